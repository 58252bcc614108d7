//! Volume configuration: the persisted `(salt, iterations, version)` triple.
//!
//! The configuration lives as plaintext JSON at `.grainfs/config.json` under
//! the volume root. It is created on first mount and read-only thereafter;
//! together with the password it deterministically reproduces all keys, so
//! an initialized volume is always re-openable. The config itself is not
//! encrypted and its integrity is not protected — an accepted limitation,
//! since it contains no secret material.

use std::io::{Read, Write};

use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};
use tracing::{debug, info};

use crate::backend::{Backend, OpenFlags};
use crate::error::FsError;

/// Reserved sidecar directory present under every logical directory.
pub const SIDECAR_DIR: &str = ".grainfs";

/// Volume configuration file name, under the root sidecar only.
pub const CONFIG_FILE: &str = "config.json";

/// Per-directory filemap file name, under each sidecar.
pub const FILEMAP_FILE: &str = "filemap.json";

/// Salt size in bytes.
pub const SALT_SIZE: usize = 32;

/// Default PBKDF2 iteration count for new volumes.
pub const DEFAULT_ITERATIONS: u32 = 100_000;

/// Format version written to new volumes.
pub const CONFIG_VERSION: &str = "1.0.0";

/// The persisted volume configuration.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeConfig {
    #[serde_as(as = "Base64")]
    pub salt: Vec<u8>,
    pub iterations: u32,
    pub version: String,
}

impl VolumeConfig {
    /// Fresh configuration with a random salt and default parameters.
    fn generate() -> Self {
        let mut salt = vec![0u8; SALT_SIZE];
        rand::rng().fill_bytes(&mut salt);
        VolumeConfig {
            salt,
            iterations: DEFAULT_ITERATIONS,
            version: CONFIG_VERSION.to_string(),
        }
    }

    fn config_path() -> String {
        format!("{SIDECAR_DIR}/{CONFIG_FILE}")
    }

    /// Read the configuration from the backend, initializing a new volume
    /// if none exists yet.
    pub(crate) fn load_or_init(backend: &dyn Backend) -> Result<Self, FsError> {
        let path = Self::config_path();
        match backend.open(&path, OpenFlags::read_only(), 0) {
            Ok(mut file) => {
                let mut raw = Vec::new();
                file.read_to_end(&mut raw)
                    .map_err(|e| FsError::backend(&path, e))?;
                let config: VolumeConfig =
                    serde_json::from_slice(&raw).map_err(|e| FsError::Corrupt {
                        path: path.clone(),
                        reason: format!("undecodable volume config: {e}"),
                    })?;
                config.validate(&path)?;
                debug!(iterations = config.iterations, version = %config.version, "loaded volume config");
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::generate();
                config.persist(backend)?;
                info!("initialized new volume configuration");
                Ok(config)
            }
            Err(e) => Err(FsError::backend(&path, e)),
        }
    }

    fn validate(&self, path: &str) -> Result<(), FsError> {
        if self.salt.len() != SALT_SIZE {
            return Err(FsError::Corrupt {
                path: path.to_string(),
                reason: format!(
                    "invalid salt size: expected {SALT_SIZE}, got {}",
                    self.salt.len()
                ),
            });
        }
        if self.iterations == 0 {
            return Err(FsError::Corrupt {
                path: path.to_string(),
                reason: "iteration count must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    fn persist(&self, backend: &dyn Backend) -> Result<(), FsError> {
        let path = Self::config_path();
        backend
            .mkdir_all(SIDECAR_DIR, 0o755)
            .map_err(|e| FsError::backend(SIDECAR_DIR, e))?;

        let json = serde_json::to_vec_pretty(self).map_err(|e| FsError::Corrupt {
            path: path.clone(),
            reason: format!("failed to encode volume config: {e}"),
        })?;

        let mut file = backend
            .create(&path)
            .map_err(|e| FsError::backend(&path, e))?;
        file.write_all(&json)
            .map_err(|e| FsError::backend(&path, e))?;
        file.flush().map_err(|e| FsError::backend(&path, e))?;
        Ok(())
    }
}
