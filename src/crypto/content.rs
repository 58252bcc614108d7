//! Whole-file content envelope: AES-256-GCM with a per-file random nonce.
//!
//! The on-disk layout is `nonce(12) ∥ ciphertext ∥ tag(16)` — the minimum
//! valid envelope is 28 bytes (a sealed empty plaintext). GCM is not
//! length-extensible, so the envelope always covers the entire file; random
//! offset reads are served from the decrypted buffer by the file envelope,
//! never from the backend.
//!
//! [`seal`] and [`open`] are the one-shot forms used for filemap sidecars.
//! The file envelope writes its nonce to the backend up front and buffers
//! plaintext until close, so it uses the detached forms instead.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use rand::RngCore;
use thiserror::Error;

use crate::crypto::keys::KEY_SIZE;

/// GCM nonce size in bytes.
pub const NONCE_SIZE: usize = 12;

/// GCM authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Smallest possible envelope: a nonce plus the tag of an empty plaintext.
pub const MIN_ENVELOPE_SIZE: usize = NONCE_SIZE + TAG_SIZE;

/// Errors from sealing or opening a content envelope.
#[derive(Error, Debug)]
pub enum ContentError {
    /// The envelope is shorter than `nonce + tag`.
    #[error("envelope too short: expected at least {MIN_ENVELOPE_SIZE} bytes, got {actual}")]
    TruncatedEnvelope { actual: usize },

    /// Authentication tag verification failed.
    ///
    /// **[INTEGRITY VIOLATION]** The ciphertext has been tampered with or
    /// the wrong key was used.
    #[error("content decryption failed: invalid authentication tag - possible tampering or wrong key")]
    DecryptionFailed,

    /// Encryption failed unexpectedly; indicates an internal error.
    #[error("unexpected content encryption failure")]
    EncryptionFailed,
}

/// Generate a fresh random GCM nonce.
pub(crate) fn random_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce);
    nonce
}

/// Seal `plaintext` under `key`, returning `nonce ∥ ciphertext ∥ tag`.
pub fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<Vec<u8>, ContentError> {
    let nonce = random_nonce();
    let sealed = seal_detached(key, &nonce, plaintext)?;

    let mut envelope = Vec::with_capacity(NONCE_SIZE + sealed.len());
    envelope.extend_from_slice(&nonce);
    envelope.extend_from_slice(&sealed);
    Ok(envelope)
}

/// Open an envelope produced by [`seal`].
pub fn open(key: &[u8; KEY_SIZE], envelope: &[u8]) -> Result<Vec<u8>, ContentError> {
    if envelope.len() < MIN_ENVELOPE_SIZE {
        return Err(ContentError::TruncatedEnvelope {
            actual: envelope.len(),
        });
    }
    let nonce: [u8; NONCE_SIZE] = envelope[..NONCE_SIZE]
        .try_into()
        .expect("slice length is NONCE_SIZE");
    open_detached(key, &nonce, &envelope[NONCE_SIZE..])
}

/// Seal `plaintext` with a caller-provided nonce, returning only
/// `ciphertext ∥ tag`. The caller is responsible for persisting the nonce.
pub(crate) fn seal_detached(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
) -> Result<Vec<u8>, ContentError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|_| ContentError::EncryptionFailed)
}

/// Open `ciphertext ∥ tag` sealed with a known nonce.
pub(crate) fn open_detached(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
) -> Result<Vec<u8>, ContentError> {
    if ciphertext.len() < TAG_SIZE {
        return Err(ContentError::TruncatedEnvelope {
            actual: NONCE_SIZE + ciphertext.len(),
        });
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| ContentError::DecryptionFailed)
}
