use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use grainfs::backend::OpenFlags;
use grainfs::crypto::content;
use grainfs::crypto::keys::VolumeKeys;
use grainfs::volume::VolumeConfig;
use grainfs::{Backend, GrainFs, MemoryBackend};

#[allow(dead_code)]
pub const TEST_PASSWORD: &str = "test-password-12345";

/// Mount a fresh in-memory volume, returning the raw backend alongside the
/// façade so tests can inspect the obfuscated layout underneath.
pub fn mount_memory() -> (Arc<MemoryBackend>, GrainFs) {
    let backend = Arc::new(MemoryBackend::new());
    let fs = GrainFs::mount(backend.clone(), TEST_PASSWORD).expect("mount failed");
    (backend, fs)
}

pub fn write_file(fs: &GrainFs, path: &str, data: &[u8]) {
    let file = fs.create(path).expect("create failed");
    file.write(data).expect("write failed");
    file.close().expect("close failed");
}

pub fn read_file(fs: &GrainFs, path: &str) -> Vec<u8> {
    let file = fs.open(path).expect("open failed");
    let data = file.read_to_end().expect("read failed");
    file.close().expect("close failed");
    data
}

/// Raw backend listing, names only.
#[allow(dead_code)]
pub fn raw_names(backend: &dyn Backend, path: &str) -> Vec<String> {
    backend
        .read_dir(path)
        .expect("backend read_dir failed")
        .into_iter()
        .map(|e| e.name)
        .collect()
}

/// Raw backend file contents.
#[allow(dead_code)]
pub fn raw_bytes(backend: &dyn Backend, path: &str) -> Vec<u8> {
    let mut file = backend
        .open(path, OpenFlags::read_only(), 0)
        .expect("backend open failed");
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).expect("backend read failed");
    bytes
}

/// Re-derive the volume keys from the persisted config, exactly as a second
/// mount would.
#[allow(dead_code)]
pub fn rederive_keys(backend: &dyn Backend, password: &str) -> VolumeKeys {
    let raw = raw_bytes(backend, ".grainfs/config.json");
    let config: VolumeConfig = serde_json::from_slice(&raw).expect("config is not valid JSON");
    VolumeKeys::derive(password, &config.salt, config.iterations).expect("key derivation failed")
}

/// Decrypt the filemap sidecar at `obf_dir` on the raw backend.
#[allow(dead_code)]
pub fn decrypt_filemap(
    backend: &dyn Backend,
    password: &str,
    obf_dir: &str,
) -> HashMap<String, String> {
    let keys = rederive_keys(backend, password);
    let path = if obf_dir == "." {
        ".grainfs/filemap.json".to_string()
    } else {
        format!("{obf_dir}/.grainfs/filemap.json")
    };
    let sealed = raw_bytes(backend, &path);
    let json = content::open(keys.master(), &sealed).expect("filemap decryption failed");
    serde_json::from_slice(&json).expect("filemap is not valid JSON")
}

/// The obfuscated directory entries at `path`, excluding the sidecar.
#[allow(dead_code)]
pub fn raw_non_sidecar(backend: &dyn Backend, path: &str) -> Vec<String> {
    raw_names(backend, path)
        .into_iter()
        .filter(|n| n != ".grainfs")
        .collect()
}
