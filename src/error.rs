//! Crate-wide error type for volume and file-handle operations.
//!
//! Lower layers keep narrow error enums ([`crate::fs::name::NameError`],
//! [`crate::crypto::content::ContentError`]) and are folded into [`FsError`]
//! at the volume and envelope layer, where the offending cleartext path is
//! known. Callers pattern-match on the variant; none of the messages carry
//! key material or ciphertext.

use std::io;

use thiserror::Error;

/// Errors returned by [`crate::GrainFs`] and [`crate::EnvelopeFile`].
#[derive(Error, Debug)]
pub enum FsError {
    /// The path, or a filemap entry for it, does not exist on the backend.
    #[error("not found: '{path}'")]
    NotFound { path: String },

    /// AEAD or HMAC verification failed.
    ///
    /// **[INTEGRITY VIOLATION]** Wrong password, tampering, or corruption —
    /// cryptographically indistinguishable from one another.
    #[error("authentication failed for '{path}': possible tampering or wrong password")]
    AuthFailed { path: String },

    /// Read on a write-opened handle, or vice versa.
    #[error("cannot {op} '{path}': handle opened in the opposite mode")]
    WrongMode { op: &'static str, path: String },

    /// Operation on a handle after `close`.
    #[error("file '{path}' is closed")]
    Closed { path: String },

    /// Seek or truncate outside the supported subset, or an optional backend
    /// capability is missing.
    #[error("unsupported operation: {reason}")]
    Unsupported { reason: String },

    /// Empty filename or path, oversized obfuscated name, or other invalid
    /// argument.
    #[error("invalid argument: {reason}")]
    Invalid { reason: String },

    /// Backend error pass-through, preserving the original kind.
    #[error("backend error for '{path}': {source}")]
    Backend {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Internal-invariant violation, e.g. an envelope shorter than the
    /// minimum or undecodable sidecar JSON.
    #[error("corrupt data at '{path}': {reason}")]
    Corrupt { path: String, reason: String },
}

impl FsError {
    /// Wrap a backend I/O error for `path`, lifting `NotFound` to the
    /// dedicated variant so callers can use [`FsError::is_not_found`].
    pub(crate) fn backend(path: impl Into<String>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            FsError::NotFound { path }
        } else {
            FsError::Backend { path, source }
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        FsError::Invalid {
            reason: reason.into(),
        }
    }

    pub(crate) fn unsupported(reason: impl Into<String>) -> Self {
        FsError::Unsupported {
            reason: reason.into(),
        }
    }

    /// True if the error denotes a missing path or filemap entry.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound { .. })
    }
}
