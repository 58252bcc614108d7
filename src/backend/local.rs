//! Local-disk backend: `std::fs` under a root directory.
//!
//! All backend paths resolve strictly below the configured root; `..`
//! components are rejected rather than resolved. Symbolic links are
//! available on Unix, chroot is a sub-rooted clone, and temp files are
//! allocated with random names.

use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::RngCore;

use super::{
    Backend, BackendFile, ChrootBackend, DirEntry, OpenFlags, SymlinkBackend, TempFileBackend,
};

/// A [`Backend`] over a directory on the local filesystem.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Wrap the directory at `root`. The directory must already exist.
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("backend root is not a directory: {}", root.display()),
            ));
        }
        Ok(LocalBackend { root })
    }

    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        let mut resolved = self.root.clone();
        for comp in path.split('/') {
            match comp {
                "" | "." => continue,
                ".." => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("path escapes backend root: {path}"),
                    ));
                }
                comp => resolved.push(comp),
            }
        }
        Ok(resolved)
    }

    fn entry_from_metadata(name: &str, meta: &fs::Metadata) -> DirEntry {
        DirEntry {
            name: name.to_string(),
            size: if meta.is_dir() { 0 } else { meta.len() },
            is_dir: meta.is_dir(),
            mode: mode_of(meta),
            modified: meta.modified().ok(),
        }
    }

    fn basename(path: &str) -> &str {
        path.rsplit('/')
            .find(|c| !c.is_empty() && *c != ".")
            .unwrap_or(".")
    }
}

#[cfg(unix)]
fn mode_of(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn mode_of(meta: &fs::Metadata) -> u32 {
    if meta.is_dir() {
        0o755
    } else {
        0o644
    }
}

impl Backend for LocalBackend {
    fn open(&self, path: &str, flags: OpenFlags, mode: u32) -> io::Result<Box<dyn BackendFile>> {
        let resolved = self.resolve(path)?;

        let mut options = fs::OpenOptions::new();
        options
            .read(flags.read)
            .write(flags.write)
            .create(flags.create)
            .truncate(flags.truncate);
        #[cfg(unix)]
        if flags.create {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;

        let file = options.open(&resolved)?;
        Ok(Box::new(LocalFile {
            file,
            path: path.to_string(),
        }))
    }

    fn stat(&self, path: &str) -> io::Result<DirEntry> {
        let meta = fs::metadata(self.resolve(path)?)?;
        Ok(Self::entry_from_metadata(Self::basename(path), &meta))
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        fs::rename(self.resolve(from)?, self.resolve(to)?)
    }

    fn remove(&self, path: &str) -> io::Result<()> {
        let resolved = self.resolve(path)?;
        if fs::symlink_metadata(&resolved)?.is_dir() {
            fs::remove_dir(resolved)
        } else {
            fs::remove_file(resolved)
        }
    }

    fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(self.resolve(path)?)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let meta = entry.metadata()?;
            entries.push(Self::entry_from_metadata(&name, &meta));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn mkdir_all(&self, path: &str, _mode: u32) -> io::Result<()> {
        fs::create_dir_all(self.resolve(path)?)
    }

    #[cfg(unix)]
    fn as_symlink(&self) -> Option<&dyn SymlinkBackend> {
        Some(self)
    }

    fn as_chroot(&self) -> Option<&dyn ChrootBackend> {
        Some(self)
    }

    fn as_temp_file(&self) -> Option<&dyn TempFileBackend> {
        Some(self)
    }
}

#[cfg(unix)]
impl SymlinkBackend for LocalBackend {
    fn symlink(&self, target: &str, link: &str) -> io::Result<()> {
        std::os::unix::fs::symlink(Path::new(target), self.resolve(link)?)
    }

    fn readlink(&self, link: &str) -> io::Result<String> {
        let target = fs::read_link(self.resolve(link)?)?;
        Ok(target.to_string_lossy().into_owned())
    }

    fn lstat(&self, path: &str) -> io::Result<DirEntry> {
        let meta = fs::symlink_metadata(self.resolve(path)?)?;
        Ok(Self::entry_from_metadata(Self::basename(path), &meta))
    }
}

impl ChrootBackend for LocalBackend {
    fn chroot(&self, path: &str) -> io::Result<Arc<dyn Backend>> {
        let root = self.resolve(path)?;
        Ok(Arc::new(LocalBackend::new(root)?))
    }
}

impl TempFileBackend for LocalBackend {
    fn temp_file(&self, dir: &str, prefix: &str) -> io::Result<Box<dyn BackendFile>> {
        let resolved_dir = self.resolve(dir)?;
        loop {
            let name = format!("{prefix}{:016x}", rand::rng().next_u64());
            let mut options = fs::OpenOptions::new();
            options.read(true).write(true).create_new(true);
            match options.open(resolved_dir.join(&name)) {
                Ok(file) => {
                    let path = if dir.is_empty() || dir == "." {
                        name
                    } else {
                        format!("{dir}/{name}")
                    };
                    return Ok(Box::new(LocalFile { file, path }));
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

struct LocalFile {
    file: fs::File,
    path: String,
}

impl Read for LocalFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for LocalFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Seek for LocalFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl BackendFile for LocalFile {
    fn truncate(&mut self, size: u64) -> io::Result<()> {
        self.file.set_len(size)
    }

    fn path(&self) -> &str {
        &self.path
    }
}
