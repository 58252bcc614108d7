//! Per-directory filemap store: bidirectional name maps, encrypted sidecar
//! persistence, and the in-memory cache.
//!
//! Each logical directory owns one map from obfuscated basename to cleartext
//! basename, persisted as a master-key-sealed JSON object at
//! `⟦dir⟧/.grainfs/filemap.json`. A missing sidecar file denotes an empty
//! map. The cache is volume-scoped and keyed by cleartext directory path;
//! it is populated on first read, overwritten on every write, and dropped
//! explicitly when a directory is renamed or removed.
//!
//! The store holds no backend or key references of its own — the volume
//! passes a [`VolumeCtx`] into every call, which keeps the store's lifetime
//! independent of the façade that owns it. Cross-directory write ordering is
//! the façade lock's job; the cache lock here only protects the map itself.

use std::collections::HashMap;
use std::io::{Read, Write};

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::backend::OpenFlags;
use crate::crypto::content::{self, ContentError};
use crate::error::FsError;
use crate::fs::name::{self, NameError};
use crate::volume::config::{FILEMAP_FILE, SIDECAR_DIR};
use crate::volume::path::{join, to_backend_path};
use crate::volume::VolumeCtx;

/// Obfuscated basename → cleartext basename.
pub(crate) type FileMap = HashMap<String, String>;

/// Volume-scoped filemap store.
pub(crate) struct FilemapStore {
    cache: RwLock<HashMap<String, FileMap>>,
}

fn is_sidecar_name(name: &str) -> bool {
    name == SIDECAR_DIR
        || name
            .strip_prefix(SIDECAR_DIR)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn map_name_err(dir: &str, name: &str, err: NameError) -> FsError {
    match err {
        NameError::EmptyName => FsError::invalid("filename cannot be empty"),
        NameError::TokenTooLong { actual } => FsError::invalid(format!(
            "obfuscated name for '{}' too long: {actual} bytes",
            join(dir, name)
        )),
        NameError::AuthenticationFailed => FsError::AuthFailed {
            path: join(dir, name),
        },
        other => FsError::Corrupt {
            path: join(dir, name),
            reason: other.to_string(),
        },
    }
}

impl FilemapStore {
    pub fn new() -> Self {
        FilemapStore {
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Allocate (or reuse) the obfuscated basename for `name` in `dir`,
    /// persisting the mapping.
    ///
    /// Deterministic for an unmapped or already-mapped name; a collision
    /// with a different cleartext name is resolved by appending `.1`, `.2`,
    /// … to the token until an unused key is found.
    pub fn obfuscate(
        &self,
        ctx: &VolumeCtx<'_>,
        dir: &str,
        name: &str,
    ) -> Result<String, FsError> {
        if name.is_empty() {
            return Err(FsError::invalid("filename cannot be empty"));
        }
        if is_sidecar_name(name) {
            return Ok(name.to_string());
        }

        let token = name::obfuscate_name(ctx.keys.filename(), name)
            .map_err(|e| map_name_err(dir, name, e))?;

        let mut map = self.load(ctx, dir)?;
        let mut candidate = token.clone();
        let mut counter = 1u32;
        loop {
            match map.get(&candidate) {
                Some(existing) if existing == name => return Ok(candidate),
                Some(_) => {
                    candidate = format!("{token}.{counter}");
                    counter += 1;
                }
                None => break,
            }
        }

        trace!(dir, name, "allocating filemap entry");
        map.insert(candidate.clone(), name.to_string());
        self.save(ctx, dir, map)?;
        Ok(candidate)
    }

    /// Resolve an obfuscated basename back to its cleartext name.
    pub fn deobfuscate(
        &self,
        ctx: &VolumeCtx<'_>,
        dir: &str,
        token: &str,
    ) -> Result<String, FsError> {
        if token.is_empty() {
            return Err(FsError::invalid("obfuscated filename cannot be empty"));
        }
        if is_sidecar_name(token) {
            return Ok(token.to_string());
        }

        let map = self.load(ctx, dir)?;
        map.get(token).cloned().ok_or_else(|| FsError::NotFound {
            path: join(dir, token),
        })
    }

    /// Delete the mapping for `token` in `dir`, if present, and persist.
    pub fn remove_entry(
        &self,
        ctx: &VolumeCtx<'_>,
        dir: &str,
        token: &str,
    ) -> Result<(), FsError> {
        if is_sidecar_name(token) {
            return Ok(());
        }
        let mut map = self.load(ctx, dir)?;
        if map.remove(token).is_some() {
            self.save(ctx, dir, map)?;
        }
        Ok(())
    }

    /// Drop the cached map for `dir` and every cached descendant.
    pub fn invalidate(&self, dir: &str) {
        let prefix = format!("{dir}/");
        self.cache
            .write()
            .retain(|cached, _| cached != dir && !cached.starts_with(&prefix));
    }

    fn sidecar_file_path(obf_dir: &str) -> String {
        join(&join(obf_dir, SIDECAR_DIR), FILEMAP_FILE)
    }

    fn load(&self, ctx: &VolumeCtx<'_>, dir: &str) -> Result<FileMap, FsError> {
        if let Some(cached) = self.cache.read().get(dir) {
            return Ok(cached.clone());
        }

        let obf_dir = to_backend_path(self, ctx, dir)?;
        let path = Self::sidecar_file_path(&obf_dir);

        let map = match ctx.backend.open(&path, OpenFlags::read_only(), 0) {
            Ok(mut file) => {
                let mut sealed = Vec::new();
                file.read_to_end(&mut sealed)
                    .map_err(|e| FsError::backend(&path, e))?;
                let json = content::open(ctx.keys.master(), &sealed).map_err(|e| match e {
                    ContentError::DecryptionFailed => FsError::AuthFailed {
                        path: path.clone(),
                    },
                    other => FsError::Corrupt {
                        path: path.clone(),
                        reason: other.to_string(),
                    },
                })?;
                serde_json::from_slice(&json).map_err(|e| FsError::Corrupt {
                    path: path.clone(),
                    reason: format!("undecodable filemap: {e}"),
                })?
            }
            // An absent sidecar file denotes an empty map.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => FileMap::new(),
            Err(e) => return Err(FsError::backend(&path, e)),
        };

        self.cache.write().insert(dir.to_string(), map.clone());
        Ok(map)
    }

    fn save(&self, ctx: &VolumeCtx<'_>, dir: &str, map: FileMap) -> Result<(), FsError> {
        let obf_dir = to_backend_path(self, ctx, dir)?;
        let path = Self::sidecar_file_path(&obf_dir);

        let json = serde_json::to_vec_pretty(&map).map_err(|e| FsError::Corrupt {
            path: path.clone(),
            reason: format!("failed to encode filemap: {e}"),
        })?;
        let sealed = content::seal(ctx.keys.master(), &json).map_err(|e| FsError::Corrupt {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        let sidecar_dir = join(&obf_dir, SIDECAR_DIR);
        ctx.backend
            .mkdir_all(&sidecar_dir, 0o755)
            .map_err(|e| FsError::backend(&sidecar_dir, e))?;

        let mut file = ctx
            .backend
            .create(&path)
            .map_err(|e| FsError::backend(&path, e))?;
        file.write_all(&sealed)
            .map_err(|e| FsError::backend(&path, e))?;
        file.flush().map_err(|e| FsError::backend(&path, e))?;

        debug!(dir, entries = map.len(), "persisted filemap");
        self.cache.write().insert(dir.to_string(), map);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, MemoryBackend};
    use crate::crypto::keys::VolumeKeys;

    struct Fixture {
        backend: MemoryBackend,
        keys: VolumeKeys,
        store: FilemapStore,
    }

    impl Fixture {
        fn new() -> Self {
            let backend = MemoryBackend::new();
            backend.mkdir_all(SIDECAR_DIR, 0o755).unwrap();
            Fixture {
                backend,
                keys: VolumeKeys::derive("filemap-test", &[5u8; 32], 1_000).unwrap(),
                store: FilemapStore::new(),
            }
        }

        fn ctx(&self) -> VolumeCtx<'_> {
            VolumeCtx {
                backend: &self.backend,
                keys: &self.keys,
            }
        }
    }

    #[test]
    fn obfuscate_then_deobfuscate_round_trips() {
        let fx = Fixture::new();
        let token = fx.store.obfuscate(&fx.ctx(), ".", "a.txt").unwrap();
        assert_eq!(
            fx.store.deobfuscate(&fx.ctx(), ".", &token).unwrap(),
            "a.txt"
        );
    }

    #[test]
    fn obfuscate_is_idempotent() {
        let fx = Fixture::new();
        let a = fx.store.obfuscate(&fx.ctx(), ".", "a.txt").unwrap();
        let b = fx.store.obfuscate(&fx.ctx(), ".", "a.txt").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn filemap_is_persisted_encrypted() {
        let fx = Fixture::new();
        fx.store.obfuscate(&fx.ctx(), ".", "a.txt").unwrap();

        let mut file = fx
            .backend
            .open(".grainfs/filemap.json", OpenFlags::read_only(), 0)
            .unwrap();
        let mut raw = Vec::new();
        file.read_to_end(&mut raw).unwrap();

        // Not plaintext JSON: it must decrypt with the master key.
        assert!(serde_json::from_slice::<serde_json::Value>(&raw).is_err());
        let json = content::open(fx.keys.master(), &raw).unwrap();
        let map: FileMap = serde_json::from_slice(&json).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.values().next().unwrap(), "a.txt");
    }

    #[test]
    fn fresh_store_reloads_persisted_map() {
        let fx = Fixture::new();
        let token = fx.store.obfuscate(&fx.ctx(), ".", "a.txt").unwrap();

        // A second store over the same backend (fresh cache) sees the entry.
        let store = FilemapStore::new();
        assert_eq!(
            store.deobfuscate(&fx.ctx(), ".", &token).unwrap(),
            "a.txt"
        );
    }

    #[test]
    fn missing_sidecar_reads_as_empty_map() {
        let fx = Fixture::new();
        let err = fx
            .store
            .deobfuscate(&fx.ctx(), ".", "no-such-token")
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn remove_entry_persists() {
        let fx = Fixture::new();
        let token = fx.store.obfuscate(&fx.ctx(), ".", "a.txt").unwrap();
        fx.store.remove_entry(&fx.ctx(), ".", &token).unwrap();

        let store = FilemapStore::new();
        assert!(store
            .deobfuscate(&fx.ctx(), ".", &token)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn remove_of_unknown_entry_is_a_no_op() {
        let fx = Fixture::new();
        fx.store
            .remove_entry(&fx.ctx(), ".", "never-mapped")
            .unwrap();
    }

    #[test]
    fn sidecar_names_pass_through() {
        let fx = Fixture::new();
        assert_eq!(
            fx.store.obfuscate(&fx.ctx(), ".", ".grainfs").unwrap(),
            ".grainfs"
        );
        assert_eq!(
            fx.store
                .obfuscate(&fx.ctx(), ".", ".grainfs/filemap.json")
                .unwrap(),
            ".grainfs/filemap.json"
        );
        assert_eq!(
            fx.store.deobfuscate(&fx.ctx(), ".", ".grainfs").unwrap(),
            ".grainfs"
        );
    }

    #[test]
    fn collision_suffix_preserves_both_mappings() {
        let fx = Fixture::new();
        let ctx = fx.ctx();
        let token = fx.store.obfuscate(&ctx, ".", "original.txt").unwrap();

        // Forge a collision: hand the token to a different cleartext name.
        {
            let mut cache = fx.store.cache.write();
            let map = cache.get_mut(".").unwrap();
            map.insert(token.clone(), "squatter.txt".to_string());
        }

        let suffixed = fx.store.obfuscate(&ctx, ".", "original.txt").unwrap();
        assert_eq!(suffixed, format!("{token}.1"));
        assert_eq!(
            fx.store.deobfuscate(&ctx, ".", &suffixed).unwrap(),
            "original.txt"
        );
        assert_eq!(
            fx.store.deobfuscate(&ctx, ".", &token).unwrap(),
            "squatter.txt"
        );
    }

    #[test]
    fn invalidate_drops_directory_and_descendants() {
        let fx = Fixture::new();
        let ctx = fx.ctx();
        fx.store.obfuscate(&ctx, ".", "keep.txt").unwrap();

        fx.store.cache.write().insert("d".to_string(), FileMap::new());
        fx.store
            .cache
            .write()
            .insert("d/sub".to_string(), FileMap::new());
        fx.store
            .cache
            .write()
            .insert("dz".to_string(), FileMap::new());

        fx.store.invalidate("d");

        let cache = fx.store.cache.read();
        assert!(!cache.contains_key("d"));
        assert!(!cache.contains_key("d/sub"));
        assert!(cache.contains_key("dz"));
        assert!(cache.contains_key("."));
    }

    #[test]
    fn empty_name_is_invalid() {
        let fx = Fixture::new();
        assert!(matches!(
            fx.store.obfuscate(&fx.ctx(), ".", ""),
            Err(FsError::Invalid { .. })
        ));
        assert!(matches!(
            fx.store.deobfuscate(&fx.ctx(), ".", ""),
            Err(FsError::Invalid { .. })
        ));
    }

    #[test]
    fn nested_directory_gets_its_own_sidecar() {
        let fx = Fixture::new();
        let ctx = fx.ctx();

        let obf_dir = fx.store.obfuscate(&ctx, ".", "d").unwrap();
        fx.backend.mkdir_all(&obf_dir, 0o755).unwrap();
        fx.store.obfuscate(&ctx, "d", "inner.txt").unwrap();

        assert!(fx
            .backend
            .stat(&format!("{obf_dir}/.grainfs/filemap.json"))
            .is_ok());
    }
}
