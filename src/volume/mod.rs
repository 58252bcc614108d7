//! The filesystem façade: mounts a volume and exposes the high-level
//! operations.
//!
//! [`GrainFs`] composes the key material, the filemap store and the path
//! translator over a [`Backend`]. A single per-volume reader–writer lock
//! serializes façade operations: lookups take it shared, anything that can
//! allocate filemap entries or touch backend structure takes it exclusively.
//! Operations that nest (`open` with `CREATE` performs a `mkdir_all`) go
//! through `*_locked` internal entry points that assume the lock is already
//! held, so the lock is never acquired recursively.
//!
//! Optional capabilities (symbolic links, chroot, temp files) are probed on
//! the backend at call time and surface as `Unsupported` when absent.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, instrument, trace, warn};

use crate::backend::{Backend, DirEntry, OpenFlags};
use crate::crypto::keys::VolumeKeys;
use crate::error::FsError;
use crate::fs::file::EnvelopeFile;

pub mod config;
pub(crate) mod filemap;
pub(crate) mod path;

pub use config::{VolumeConfig, CONFIG_VERSION, DEFAULT_ITERATIONS, SALT_SIZE, SIDECAR_DIR};

use filemap::FilemapStore;
use path::{basename, components, join, split_parent, to_backend_path, to_cleartext_path};

/// Borrowed backend and key references passed into the filemap store and
/// the path translator on every call. Keeps the store free of back-pointers
/// to the volume that owns it.
pub(crate) struct VolumeCtx<'a> {
    pub backend: &'a dyn Backend,
    pub keys: &'a VolumeKeys,
}

/// A mounted GrainFS volume.
///
/// Cheap to share behind an `Arc`; all methods take `&self` and are safe to
/// call from multiple threads.
pub struct GrainFs {
    backend: Arc<dyn Backend>,
    keys: Arc<VolumeKeys>,
    /// Logical root recorded for [`GrainFs::root`]; updated by chroot.
    root: String,
    filemaps: FilemapStore,
    /// Per-volume façade lock (§concurrency): read for lookups, write for
    /// anything that mutates backend structure or filemaps.
    lock: RwLock<()>,
}

impl GrainFs {
    /// Mount a volume on `backend` with `password`.
    ///
    /// Reads the volume configuration (creating it on first mount) and
    /// derives the key pair. A wrong password is not detected here — it
    /// surfaces as [`FsError::AuthFailed`] on the first content or filemap
    /// decryption.
    #[instrument(level = "debug", skip(backend, password))]
    pub fn mount(backend: Arc<dyn Backend>, password: &str) -> Result<Self, FsError> {
        if password.is_empty() {
            return Err(FsError::invalid("password cannot be empty"));
        }

        let config = VolumeConfig::load_or_init(backend.as_ref())?;
        let keys = VolumeKeys::derive(password, &config.salt, config.iterations)
            .map_err(|e| FsError::invalid(e.to_string()))?;

        debug!("volume mounted");
        Ok(GrainFs {
            backend,
            keys: Arc::new(keys),
            root: ".".to_string(),
            filemaps: FilemapStore::new(),
            lock: RwLock::new(()),
        })
    }

    fn ctx(&self) -> VolumeCtx<'_> {
        VolumeCtx {
            backend: self.backend.as_ref(),
            keys: &self.keys,
        }
    }

    /// Create (or truncate) a file for writing.
    pub fn create(&self, path: &str) -> Result<EnvelopeFile, FsError> {
        self.open_with_flags(path, OpenFlags::create_truncate(), 0o666)
    }

    /// Open an existing file for reading.
    pub fn open(&self, path: &str) -> Result<EnvelopeFile, FsError> {
        self.open_with_flags(path, OpenFlags::read_only(), 0)
    }

    /// Open a file with explicit flags and mode.
    ///
    /// With `create`, missing parent directories are created and the
    /// basename is allocated in the parent's filemap before the backend
    /// open; otherwise the path is translated without side effects on the
    /// backend tree.
    #[instrument(level = "debug", skip(self))]
    pub fn open_with_flags(
        &self,
        path: &str,
        flags: OpenFlags,
        mode: u32,
    ) -> Result<EnvelopeFile, FsError> {
        if flags.create || flags.write || flags.truncate {
            let _guard = self.lock.write();
            self.open_locked(path, flags, mode)
        } else {
            let _guard = self.lock.read();
            self.open_locked(path, flags, mode)
        }
    }

    /// Open with the façade lock already held.
    fn open_locked(
        &self,
        path: &str,
        flags: OpenFlags,
        mode: u32,
    ) -> Result<EnvelopeFile, FsError> {
        if path.is_empty() {
            return Err(FsError::invalid("filename cannot be empty"));
        }
        let ctx = self.ctx();

        let obf_path = if flags.create {
            let (dir, base) = split_parent(path);
            if base.is_empty() {
                return Err(FsError::invalid("filename cannot be empty"));
            }
            if dir != "." {
                self.mkdir_all_locked(&dir, 0o755)?;
            }
            let obf_dir = to_backend_path(&self.filemaps, &ctx, &dir)?;
            let token = self.filemaps.obfuscate(&ctx, &dir, &base)?;
            join(&obf_dir, &token)
        } else {
            to_backend_path(&self.filemaps, &ctx, path)?
        };

        let file = self
            .backend
            .open(&obf_path, flags, mode)
            .map_err(|e| FsError::backend(path, e))?;

        Ok(EnvelopeFile::new(
            self.backend.clone(),
            self.keys.clone(),
            file,
            path.to_string(),
            obf_path,
            flags.is_write(),
        ))
    }

    /// Backend metadata for `path`, with the cleartext basename.
    pub fn stat(&self, path: &str) -> Result<DirEntry, FsError> {
        let _guard = self.lock.read();
        let ctx = self.ctx();

        let obf = to_backend_path(&self.filemaps, &ctx, path)?;
        let mut entry = self
            .backend
            .stat(&obf)
            .map_err(|e| FsError::backend(path, e))?;
        entry.name = basename(path);
        Ok(entry)
    }

    /// Like [`GrainFs::stat`], but does not follow a final symlink when the
    /// backend supports links.
    pub fn lstat(&self, path: &str) -> Result<DirEntry, FsError> {
        let _guard = self.lock.read();
        let ctx = self.ctx();

        let obf = to_backend_path(&self.filemaps, &ctx, path)?;
        let mut entry = match self.backend.as_symlink() {
            Some(sym) => sym.lstat(&obf).map_err(|e| FsError::backend(path, e))?,
            None => self
                .backend
                .stat(&obf)
                .map_err(|e| FsError::backend(path, e))?,
        };
        entry.name = basename(path);
        Ok(entry)
    }

    /// Rename `old` to `new`.
    ///
    /// The new basename token is allocated first; after the backend rename
    /// succeeds, the old mapping is dropped. If that filemap update fails,
    /// one compensating backend rename is attempted before the error
    /// propagates.
    #[instrument(level = "debug", skip(self))]
    pub fn rename(&self, old: &str, new: &str) -> Result<(), FsError> {
        let _guard = self.lock.write();
        if old.is_empty() || new.is_empty() {
            return Err(FsError::invalid("paths cannot be empty"));
        }
        let ctx = self.ctx();

        let old_obf = to_backend_path(&self.filemaps, &ctx, old)?;

        let (new_dir, new_base) = split_parent(new);
        let new_token = self.filemaps.obfuscate(&ctx, &new_dir, &new_base)?;
        let new_obf_dir = to_backend_path(&self.filemaps, &ctx, &new_dir)?;
        let new_obf = join(&new_obf_dir, &new_token);

        self.backend
            .rename(&old_obf, &new_obf)
            .map_err(|e| FsError::backend(old, e))?;

        let (old_dir, _) = split_parent(old);
        let old_token = basename(&old_obf);
        if let Err(e) = self.filemaps.remove_entry(&ctx, &old_dir, &old_token) {
            // Compensate: put the backend file back where its mapping still is.
            if let Err(revert) = self.backend.rename(&new_obf, &old_obf) {
                warn!(old, new, error = %revert, "failed to revert rename after filemap update error");
            }
            return Err(e);
        }

        self.filemaps.invalidate(old);
        self.filemaps.invalidate(new);
        Ok(())
    }

    /// Remove a file or an empty directory.
    ///
    /// Non-empty directory removal is delegated to the backend's semantics
    /// and typically fails; callers empty the directory first.
    #[instrument(level = "debug", skip(self))]
    pub fn remove(&self, path: &str) -> Result<(), FsError> {
        let _guard = self.lock.write();
        if path.is_empty() {
            return Err(FsError::invalid("filename cannot be empty"));
        }
        let ctx = self.ctx();

        let obf = to_backend_path(&self.filemaps, &ctx, path)?;
        self.backend
            .remove(&obf)
            .map_err(|e| FsError::backend(path, e))?;

        let (dir, _) = split_parent(path);
        self.filemaps.remove_entry(&ctx, &dir, &basename(&obf))?;
        self.filemaps.invalidate(path);
        Ok(())
    }

    /// List a directory under cleartext names.
    ///
    /// The sidecar directory is never listed, and entries whose
    /// deobfuscation fails or is absent from the filemap are silently
    /// skipped — this tolerates partially-written state and foreign files.
    pub fn read_dir(&self, dir: &str) -> Result<Vec<DirEntry>, FsError> {
        let _guard = self.lock.read();
        let dir = if dir.is_empty() { "." } else { dir };
        let ctx = self.ctx();

        let obf = to_backend_path(&self.filemaps, &ctx, dir)?;
        let entries = self
            .backend
            .read_dir(&obf)
            .map_err(|e| FsError::backend(dir, e))?;

        let mut listed = Vec::with_capacity(entries.len());
        for mut entry in entries {
            if entry.name == SIDECAR_DIR {
                continue;
            }
            match self.filemaps.deobfuscate(&ctx, dir, &entry.name) {
                Ok(name) => {
                    entry.name = name;
                    listed.push(entry);
                }
                Err(e) => {
                    trace!(dir, token = %entry.name, error = %e, "skipping unresolvable directory entry");
                }
            }
        }
        Ok(listed)
    }

    /// Create a directory and all missing parents.
    #[instrument(level = "debug", skip(self))]
    pub fn mkdir_all(&self, path: &str, mode: u32) -> Result<(), FsError> {
        let _guard = self.lock.write();
        self.mkdir_all_locked(path, mode)
    }

    /// `mkdir_all` with the façade lock already held.
    ///
    /// Walks prefix by prefix because each filemap lives under its own
    /// obfuscated parent: every level is created on the backend and given
    /// its sidecar before the next level's filemap write can land.
    fn mkdir_all_locked(&self, path: &str, mode: u32) -> Result<(), FsError> {
        let comps = components(path);
        if comps.is_empty() {
            return Ok(());
        }
        let ctx = self.ctx();

        let mut current = ".".to_string();
        for comp in comps {
            current = join(&current, comp);
            let obf = to_backend_path(&self.filemaps, &ctx, &current)?;
            self.backend
                .mkdir_all(&obf, mode)
                .map_err(|e| FsError::backend(&current, e))?;
            let sidecar = join(&obf, SIDECAR_DIR);
            self.backend
                .mkdir_all(&sidecar, 0o755)
                .map_err(|e| FsError::backend(&current, e))?;
        }
        Ok(())
    }

    /// Create a symbolic link at `link` pointing to `target`. Both sides
    /// are stored obfuscated on the backend.
    #[instrument(level = "debug", skip(self))]
    pub fn symlink(&self, target: &str, link: &str) -> Result<(), FsError> {
        let _guard = self.lock.write();
        let sym = self
            .backend
            .as_symlink()
            .ok_or_else(|| FsError::unsupported("backend does not support symbolic links"))?;
        let ctx = self.ctx();

        let obf_target = to_backend_path(&self.filemaps, &ctx, target)?;
        let obf_link = to_backend_path(&self.filemaps, &ctx, link)?;
        sym.symlink(&obf_target, &obf_link)
            .map_err(|e| FsError::backend(link, e))
    }

    /// Read a symbolic link, translating the stored obfuscated target back
    /// to a cleartext path.
    pub fn readlink(&self, link: &str) -> Result<String, FsError> {
        let _guard = self.lock.read();
        let sym = self
            .backend
            .as_symlink()
            .ok_or_else(|| FsError::unsupported("backend does not support symbolic links"))?;
        let ctx = self.ctx();

        let obf_link = to_backend_path(&self.filemaps, &ctx, link)?;
        let obf_target = sym
            .readlink(&obf_link)
            .map_err(|e| FsError::backend(link, e))?;
        to_cleartext_path(&self.filemaps, &ctx, &obf_target)
    }

    /// A new volume rooted at `path`, sharing key material but with a fresh
    /// filemap cache.
    pub fn chroot(&self, path: &str) -> Result<GrainFs, FsError> {
        let _guard = self.lock.read();
        let ch = self
            .backend
            .as_chroot()
            .ok_or_else(|| FsError::unsupported("backend does not support chroot"))?;
        let path = if path.is_empty() { "." } else { path };
        let ctx = self.ctx();

        let obf = to_backend_path(&self.filemaps, &ctx, path)?;
        let sub = ch.chroot(&obf).map_err(|e| FsError::backend(path, e))?;

        Ok(GrainFs {
            backend: sub,
            keys: self.keys.clone(),
            root: join(&self.root, path),
            filemaps: FilemapStore::new(),
            lock: RwLock::new(()),
        })
    }

    /// The logical root recorded at mount or chroot time.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Create a write-mode temp file in `dir`.
    ///
    /// The backend allocates the random name, which is treated as already
    /// obfuscated: no filemap entry is recorded, so temp files never appear
    /// under cleartext names in listings.
    #[instrument(level = "debug", skip(self))]
    pub fn temp_file(&self, dir: &str, prefix: &str) -> Result<EnvelopeFile, FsError> {
        let _guard = self.lock.write();
        let tf = self
            .backend
            .as_temp_file()
            .ok_or_else(|| FsError::unsupported("backend does not support temp files"))?;
        let dir = if dir.is_empty() { "." } else { dir };
        let ctx = self.ctx();

        let obf_dir = to_backend_path(&self.filemaps, &ctx, dir)?;
        let file = tf
            .temp_file(&obf_dir, prefix)
            .map_err(|e| FsError::backend(dir, e))?;

        let temp_name = basename(file.path());
        let obf_path = file.path().to_string();
        Ok(EnvelopeFile::new(
            self.backend.clone(),
            self.keys.clone(),
            file,
            join(dir, &temp_name),
            obf_path,
            true,
        ))
    }

    /// Join path elements with `/`, skipping empty ones.
    pub fn join(&self, elems: &[&str]) -> String {
        let joined: Vec<&str> = elems.iter().filter(|e| !e.is_empty()).copied().collect();
        joined.join("/")
    }
}
