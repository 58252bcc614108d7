//! Password-derived key material for a mounted volume.
//!
//! A volume owns exactly two 32-byte keys:
//!
//! - the **master key**, used for content envelopes and for sealing the
//!   per-directory filemap sidecars, and
//! - the **filename key**, used only by the deterministic filename envelope.
//!
//! Both derive from the `(password, salt, iterations)` triple persisted in
//! the volume configuration, so the same password always reproduces the same
//! keys. The filename key is derived *from the master key* with a distinct
//! salt suffix, isolating filename-oracle attacks from file contents.

use std::fmt;
use std::num::NonZeroU32;

use ring::pbkdf2;
use thiserror::Error;
use zeroize::Zeroizing;

/// Key size for both the master and the filename key.
pub const KEY_SIZE: usize = 32;

/// Salt suffix that separates the filename-key derivation from the
/// master-key derivation.
const FILENAME_KEY_INFO: &[u8] = b"filename";

/// Errors that can occur while deriving volume keys.
#[derive(Error, Debug)]
pub enum KeyDerivationError {
    /// The PBKDF2 iteration count was zero.
    #[error("iteration count must be non-zero")]
    ZeroIterations,

    /// The password was empty.
    #[error("password cannot be empty")]
    EmptyPassword,
}

/// The master/filename key pair of a mounted volume.
///
/// Key bytes are held in [`Zeroizing`] buffers so they are wiped from memory
/// when the volume is dropped, and the `Debug` implementation redacts them.
/// The pair is constructed once at mount and shared by reference (via
/// `Arc`) among the façade, the filemap store and open file envelopes.
pub struct VolumeKeys {
    master: Zeroizing<[u8; KEY_SIZE]>,
    filename: Zeroizing<[u8; KEY_SIZE]>,
}

impl fmt::Debug for VolumeKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VolumeKeys")
            .field("master", &"[REDACTED]")
            .field("filename", &"[REDACTED]")
            .finish()
    }
}

impl VolumeKeys {
    /// Derive the key pair from a password and the volume salt.
    ///
    /// `master = PBKDF2-HMAC-SHA-256(password, salt, iterations)` and
    /// `filename = PBKDF2-HMAC-SHA-256(master, salt ∥ "filename", iterations)`.
    pub fn derive(
        password: &str,
        salt: &[u8],
        iterations: u32,
    ) -> Result<Self, KeyDerivationError> {
        if password.is_empty() {
            return Err(KeyDerivationError::EmptyPassword);
        }
        let iterations =
            NonZeroU32::new(iterations).ok_or(KeyDerivationError::ZeroIterations)?;

        let mut master = Zeroizing::new([0u8; KEY_SIZE]);
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            iterations,
            salt,
            password.as_bytes(),
            master.as_mut_slice(),
        );

        let mut filename_salt =
            Zeroizing::new(Vec::with_capacity(salt.len() + FILENAME_KEY_INFO.len()));
        filename_salt.extend_from_slice(salt);
        filename_salt.extend_from_slice(FILENAME_KEY_INFO);

        let mut filename = Zeroizing::new([0u8; KEY_SIZE]);
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            iterations,
            filename_salt.as_slice(),
            master.as_slice(),
            filename.as_mut_slice(),
        );

        Ok(VolumeKeys { master, filename })
    }

    /// Key for content envelopes and filemap sidecars.
    #[inline]
    pub fn master(&self) -> &[u8; KEY_SIZE] {
        &self.master
    }

    /// Key for the deterministic filename envelope.
    #[inline]
    pub fn filename(&self) -> &[u8; KEY_SIZE] {
        &self.filename
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALT: [u8; 32] = [7u8; 32];

    #[test]
    fn derivation_is_deterministic() {
        let a = VolumeKeys::derive("password", &SALT, 1_000).unwrap();
        let b = VolumeKeys::derive("password", &SALT, 1_000).unwrap();
        assert_eq!(a.master(), b.master());
        assert_eq!(a.filename(), b.filename());
    }

    #[test]
    fn master_and_filename_keys_differ() {
        let keys = VolumeKeys::derive("password", &SALT, 1_000).unwrap();
        assert_ne!(keys.master(), keys.filename());
    }

    #[test]
    fn different_passwords_produce_different_keys() {
        let a = VolumeKeys::derive("password", &SALT, 1_000).unwrap();
        let b = VolumeKeys::derive("passwore", &SALT, 1_000).unwrap();
        assert_ne!(a.master(), b.master());
        assert_ne!(a.filename(), b.filename());
    }

    #[test]
    fn different_salts_produce_different_keys() {
        let a = VolumeKeys::derive("password", &[1u8; 32], 1_000).unwrap();
        let b = VolumeKeys::derive("password", &[2u8; 32], 1_000).unwrap();
        assert_ne!(a.master(), b.master());
    }

    #[test]
    fn iteration_count_affects_output() {
        let a = VolumeKeys::derive("password", &SALT, 1_000).unwrap();
        let b = VolumeKeys::derive("password", &SALT, 1_001).unwrap();
        assert_ne!(a.master(), b.master());
    }

    #[test]
    fn zero_iterations_rejected() {
        assert!(matches!(
            VolumeKeys::derive("password", &SALT, 0),
            Err(KeyDerivationError::ZeroIterations)
        ));
    }

    #[test]
    fn empty_password_rejected() {
        assert!(matches!(
            VolumeKeys::derive("", &SALT, 1_000),
            Err(KeyDerivationError::EmptyPassword)
        ));
    }

    #[test]
    fn debug_redacts_key_material() {
        let keys = VolumeKeys::derive("password", &SALT, 1_000).unwrap();
        let rendered = format!("{keys:?}");
        assert!(rendered.contains("REDACTED"));
    }
}
