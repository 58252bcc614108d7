//! Deterministic filename obfuscation.
//!
//! The same cleartext name under the same key always yields the same token,
//! so callers can compute a lookup key without first reading the directory's
//! filemap. Determinism is obtained by deriving the CTR IV from the name
//! itself:
//!
//! ```text
//! IV      = SHA-256(filename_key ∥ cleartext)[..16]
//! ct      = AES-256-CTR(filename_key, IV, cleartext)
//! tag     = HMAC-SHA-256(filename_key, IV ∥ ct)
//! token   = base64url(IV ∥ ct ∥ tag)        (with '=' padding)
//! ```
//!
//! Tokens are ASCII, free of reserved filesystem characters, and capped at
//! 200 encoded bytes — with 48 bytes of IV and tag overhead, cleartext
//! names longer than 102 bytes exceed the cap. Name encryption is
//! deterministic by design; an observer can tell that the same name was
//! written twice. Only the master key, never this filename key, touches
//! file contents.

use aes::cipher::{KeyIvInit, StreamCipher};
use base64::{engine::general_purpose, Engine as _};
use ring::{digest, hmac};
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::crypto::keys::KEY_SIZE;

type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

/// CTR IV size in bytes.
pub const IV_SIZE: usize = 16;

/// HMAC-SHA-256 tag size in bytes.
pub const MAC_SIZE: usize = 32;

/// Maximum length of an encoded token.
pub const MAX_TOKEN_LEN: usize = 200;

/// Smallest decodable payload: an IV and a tag around an empty ciphertext.
const MIN_PAYLOAD_SIZE: usize = IV_SIZE + MAC_SIZE;

/// Errors from filename obfuscation and deobfuscation.
///
/// Authentication failures indicate **integrity violations**: the token was
/// tampered with or the wrong filename key is in use.
#[derive(Error, Debug)]
pub enum NameError {
    /// The cleartext or obfuscated name was empty.
    #[error("filename cannot be empty")]
    EmptyName,

    /// The encoded token would exceed [`MAX_TOKEN_LEN`] bytes.
    #[error("obfuscated filename too long: {actual} > {MAX_TOKEN_LEN}")]
    TokenTooLong { actual: usize },

    /// The token is not valid URL-safe base64.
    #[error("invalid base64 in obfuscated filename: {reason}")]
    Base64Decode { reason: String },

    /// The decoded payload is shorter than an IV plus a tag.
    #[error("obfuscated filename too short: {actual} < {MIN_PAYLOAD_SIZE} bytes")]
    TokenTooShort { actual: usize },

    /// HMAC verification failed.
    ///
    /// **[INTEGRITY VIOLATION]** The token has been tampered with or the
    /// wrong filename key was used.
    #[error("filename authentication failed - possible tampering or wrong key")]
    AuthenticationFailed,

    /// The decrypted name is not valid UTF-8.
    #[error("decrypted filename is not valid UTF-8: {reason}")]
    Utf8Decode { reason: String },
}

/// Deterministic IV for `name`: the first 16 bytes of
/// `SHA-256(filename_key ∥ name)`.
fn derive_iv(filename_key: &[u8; KEY_SIZE], name: &str) -> [u8; IV_SIZE] {
    let mut ctx = digest::Context::new(&digest::SHA256);
    ctx.update(filename_key);
    ctx.update(name.as_bytes());
    let hash = ctx.finish();

    let mut iv = [0u8; IV_SIZE];
    iv.copy_from_slice(&hash.as_ref()[..IV_SIZE]);
    iv
}

fn mac_tag(filename_key: &[u8; KEY_SIZE], iv: &[u8], ciphertext: &[u8]) -> hmac::Tag {
    let key = hmac::Key::new(hmac::HMAC_SHA256, filename_key);
    let mut ctx = hmac::Context::with_key(&key);
    ctx.update(iv);
    ctx.update(ciphertext);
    ctx.sign()
}

/// Encrypt and encode a cleartext name into a filesystem-safe token.
///
/// Deterministic: repeated calls with the same key and name return the same
/// token.
pub fn obfuscate_name(
    filename_key: &[u8; KEY_SIZE],
    name: &str,
) -> Result<String, NameError> {
    if name.is_empty() {
        return Err(NameError::EmptyName);
    }

    let iv = derive_iv(filename_key, name);

    let mut ciphertext = name.as_bytes().to_vec();
    let mut cipher = Aes256Ctr::new(filename_key.into(), (&iv).into());
    cipher.apply_keystream(&mut ciphertext);

    let tag = mac_tag(filename_key, &iv, &ciphertext);

    let mut payload = Vec::with_capacity(IV_SIZE + ciphertext.len() + MAC_SIZE);
    payload.extend_from_slice(&iv);
    payload.extend_from_slice(&ciphertext);
    payload.extend_from_slice(tag.as_ref());

    let encoded = general_purpose::URL_SAFE.encode(&payload);
    if encoded.len() > MAX_TOKEN_LEN {
        return Err(NameError::TokenTooLong {
            actual: encoded.len(),
        });
    }

    Ok(encoded)
}

/// Decode and decrypt a token produced by [`obfuscate_name`].
///
/// The HMAC is verified in constant time before any decryption happens.
pub fn deobfuscate_name(
    filename_key: &[u8; KEY_SIZE],
    token: &str,
) -> Result<String, NameError> {
    if token.is_empty() {
        return Err(NameError::EmptyName);
    }

    let payload = general_purpose::URL_SAFE
        .decode(token.as_bytes())
        .map_err(|e| NameError::Base64Decode {
            reason: e.to_string(),
        })?;

    if payload.len() < MIN_PAYLOAD_SIZE {
        return Err(NameError::TokenTooShort {
            actual: payload.len(),
        });
    }

    let (iv, rest) = payload.split_at(IV_SIZE);
    let (ciphertext, received_mac) = rest.split_at(rest.len() - MAC_SIZE);

    let expected = mac_tag(filename_key, iv, ciphertext);
    if !bool::from(expected.as_ref().ct_eq(received_mac)) {
        return Err(NameError::AuthenticationFailed);
    }

    let iv: [u8; IV_SIZE] = iv.try_into().expect("slice length is IV_SIZE");
    let mut plaintext = ciphertext.to_vec();
    let mut cipher = Aes256Ctr::new(filename_key.into(), (&iv).into());
    cipher.apply_keystream(&mut plaintext);

    String::from_utf8(plaintext).map_err(|e| NameError::Utf8Decode {
        reason: e.to_string(),
    })
}
