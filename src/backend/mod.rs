//! The pluggable byte-level file backend that GrainFS wraps.
//!
//! The volume treats the backend as a black box of opaque byte streams: it
//! never interprets file contents and never sees cleartext names. Required
//! operations live on [`Backend`]; optional capabilities (symbolic links,
//! chroot sub-rooting, temp files) are discovered at runtime through the
//! `as_*` query methods, so a missing capability surfaces as `Unsupported`
//! from the façade instead of a panic.
//!
//! Backends speak [`std::io::Error`] so the façade can preserve the original
//! error kind — in particular `NotFound` predicates used by callers.
//!
//! Two implementations ship with the crate: [`MemoryBackend`], an in-memory
//! tree used by the test suite and demos, and [`LocalBackend`], a thin
//! wrapper over `std::fs` rooted at a directory.

use std::io::{self, Read, Seek, Write};
use std::sync::Arc;
use std::time::SystemTime;

mod local;
mod memory;

pub use local::LocalBackend;
pub use memory::MemoryBackend;

/// Open mode and creation flags, mirroring the usual `O_*` combinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub truncate: bool,
}

impl OpenFlags {
    /// `O_RDONLY`
    pub fn read_only() -> Self {
        OpenFlags {
            read: true,
            write: false,
            create: false,
            truncate: false,
        }
    }

    /// `O_RDWR`
    pub fn read_write() -> Self {
        OpenFlags {
            read: true,
            write: true,
            create: false,
            truncate: false,
        }
    }

    /// `O_RDWR | O_CREATE | O_TRUNC` — the combination used by `create`.
    pub fn create_truncate() -> Self {
        OpenFlags {
            read: true,
            write: true,
            create: true,
            truncate: true,
        }
    }

    /// True if the handle may mutate the file.
    pub fn is_write(&self) -> bool {
        self.write
    }
}

/// Metadata for a backend file or directory, as returned by `stat`,
/// `lstat` and `read_dir`.
#[derive(Debug, Clone)]
pub struct DirEntry {
    /// Basename of the entry.
    pub name: String,
    /// Size in bytes (0 for directories).
    pub size: u64,
    pub is_dir: bool,
    /// Unix permission bits.
    pub mode: u32,
    pub modified: Option<SystemTime>,
}

/// An open handle on a backend file.
///
/// Handles support sequential reads and writes plus seeking; `truncate`
/// resizes the file in place. The cursor is per-handle.
pub trait BackendFile: Read + Write + Seek + Send + Sync {
    /// Resize the file to `size` bytes, zero-filling on growth.
    fn truncate(&mut self, size: u64) -> io::Result<()>;

    /// The backend path this handle was opened at.
    fn path(&self) -> &str;
}

/// Required backend operations.
///
/// Paths are slash-separated and relative to the backend root; `"."` names
/// the root itself.
pub trait Backend: Send + Sync {
    /// Open a file. With `flags.create`, a missing file is created (the
    /// parent directory must exist); with `flags.truncate`, existing content
    /// is discarded.
    fn open(&self, path: &str, flags: OpenFlags, mode: u32) -> io::Result<Box<dyn BackendFile>>;

    fn stat(&self, path: &str) -> io::Result<DirEntry>;

    fn rename(&self, from: &str, to: &str) -> io::Result<()>;

    /// Remove a file or an empty directory. Removing a non-empty directory
    /// fails.
    fn remove(&self, path: &str) -> io::Result<()>;

    fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntry>>;

    /// Create a directory and all missing parents. Existing directories are
    /// not an error.
    fn mkdir_all(&self, path: &str, mode: u32) -> io::Result<()>;

    /// Shorthand for `open` with [`OpenFlags::create_truncate`].
    fn create(&self, path: &str) -> io::Result<Box<dyn BackendFile>> {
        self.open(path, OpenFlags::create_truncate(), 0o666)
    }

    /// Symbolic-link support, if any.
    fn as_symlink(&self) -> Option<&dyn SymlinkBackend> {
        None
    }

    /// Chroot-style sub-rooting support, if any.
    fn as_chroot(&self) -> Option<&dyn ChrootBackend> {
        None
    }

    /// Temp-file support, if any.
    fn as_temp_file(&self) -> Option<&dyn TempFileBackend> {
        None
    }
}

/// Optional symbolic-link operations.
pub trait SymlinkBackend {
    fn symlink(&self, target: &str, link: &str) -> io::Result<()>;

    fn readlink(&self, link: &str) -> io::Result<String>;

    /// Like `stat`, but does not follow a final symlink component.
    fn lstat(&self, path: &str) -> io::Result<DirEntry>;
}

/// Optional chroot-style sub-rooting.
pub trait ChrootBackend {
    /// A new backend whose root is `path`, sharing storage with `self`.
    fn chroot(&self, path: &str) -> io::Result<Arc<dyn Backend>>;
}

/// Optional temp-file allocation.
pub trait TempFileBackend {
    /// Create a file with a fresh random name of the form `{prefix}{suffix}`
    /// inside `dir`, opened read-write. The chosen name is available via
    /// [`BackendFile::path`].
    fn temp_file(&self, dir: &str, prefix: &str) -> io::Result<Box<dyn BackendFile>>;
}
