//! Cryptographic primitives: key derivation and the whole-file content
//! envelope.
//!
//! Filename obfuscation lives in [`crate::fs::name`] next to the rest of the
//! name-handling code; everything here is consumed by the filemap store, the
//! file envelope and the volume configuration.

pub mod content;
pub mod keys;

pub use content::{ContentError, MIN_ENVELOPE_SIZE, NONCE_SIZE, TAG_SIZE};
pub use keys::{KeyDerivationError, VolumeKeys, KEY_SIZE};
