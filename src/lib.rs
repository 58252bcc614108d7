//! GrainFS — a transparent encryption layer over a pluggable byte-level
//! file backend.
//!
//! GrainFS exposes a conventional hierarchical-filesystem interface
//! (create/open/read/write/stat/readdir/mkdir/rename/remove, plus symbolic
//! links, chroot-style sub-rooting and temp files) while storing, on the
//! underlying backend:
//!
//! - file contents as whole-file authenticated ciphertext (AES-256-GCM with
//!   a per-file random nonce), and
//! - directory entry names as deterministically obfuscated tokens, resolved
//!   through encrypted per-directory maps kept in a reserved `.grainfs`
//!   sidecar directory.
//!
//! All keys derive from a single password via PBKDF2-HMAC-SHA-256 against a
//! salt persisted in the volume configuration, so an initialized volume is
//! always re-openable with the same password.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use grainfs::{GrainFs, MemoryBackend};
//!
//! let backend = Arc::new(MemoryBackend::new());
//! let fs = GrainFs::mount(backend, "correct horse battery staple").unwrap();
//!
//! let file = fs.create("notes/todo.txt").unwrap();
//! file.write(b"buy oat milk").unwrap();
//! file.close().unwrap();
//!
//! let file = fs.open("notes/todo.txt").unwrap();
//! assert_eq!(file.read_to_end().unwrap(), b"buy oat milk");
//! ```

#![forbid(unsafe_code)]

pub mod backend;
pub mod crypto;
pub mod error;
pub mod fs;
pub mod volume;

pub use backend::{
    Backend, BackendFile, ChrootBackend, DirEntry, LocalBackend, MemoryBackend, OpenFlags,
    SymlinkBackend, TempFileBackend,
};
pub use error::FsError;
pub use fs::file::EnvelopeFile;
pub use volume::GrainFs;
