//! Node configuration: storage roots, ring location and chunking defaults.

use crate::chunk_store::StorageMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Chunk size used when the caller does not pick one
pub const DEFAULT_CHUNK_SIZE: u32 = 512;

/// Default bound on chunk fetches in flight during reassembly
pub const DEFAULT_REASSEMBLY_CONCURRENCY: usize = 64;

/// Extension of file metadata records under `meta_root`
pub const META_EXTENSION: &str = ".meta";

/// Prefix of reassembled files under `out_root`
pub const OUTPUT_PREFIX: &str = "_b_";

/// Errors that can occur while loading or checking configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration format error: {0}")]
    Format(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {reason}")]
    Invalid { reason: String },
}

/// Configuration for a HaaS storage node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HaasConfig {
    /// Root directory for chunk artifacts
    pub chunk_root: PathBuf,
    /// Directory for `{file_digest}.meta` records
    pub meta_root: PathBuf,
    /// Directory for reassembled files
    pub out_root: PathBuf,
    /// YAML file describing the active hash ring
    pub ring_config: PathBuf,
    /// Chunk size used when none is given
    pub default_chunk_size: u32,
    /// Layout used when none is given
    pub storage_mode: StorageMode,
    /// Maximum chunk fetches in flight while reassembling
    pub reassembly_concurrency: usize,
    /// Re-hash reassembled output and compare with the recorded digest
    pub verify_output: bool,
}

impl HaasConfig {
    /// Create a configuration with every root below `base`
    pub fn new<P: AsRef<Path>>(base: P) -> Self {
        let base = base.as_ref();
        Self {
            chunk_root: base.join("chunks"),
            meta_root: base.join("meta"),
            out_root: base.join("out"),
            ring_config: base.join("ring.yaml"),
            default_chunk_size: DEFAULT_CHUNK_SIZE,
            storage_mode: StorageMode::default(),
            reassembly_concurrency: DEFAULT_REASSEMBLY_CONCURRENCY,
            verify_output: true,
        }
    }

    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.default_chunk_size = chunk_size;
        self
    }

    pub fn with_storage_mode(mut self, mode: StorageMode) -> Self {
        self.storage_mode = mode;
        self
    }

    pub fn with_reassembly_concurrency(mut self, limit: usize) -> Self {
        self.reassembly_concurrency = limit;
        self
    }

    pub fn with_verify_output(mut self, verify: bool) -> Self {
        self.verify_output = verify;
        self
    }

    /// `{meta_root}/{file_digest}.meta`
    pub fn meta_path(&self, file_hash: &str) -> PathBuf {
        self.meta_root
            .join(format!("{}{}", file_hash, META_EXTENSION))
    }

    /// `{out_root}/_b_{file_digest}`
    pub fn output_path(&self, file_hash: &str) -> PathBuf {
        self.out_root.join(format!("{}{}", OUTPUT_PREFIX, file_hash))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_chunk_size == 0 {
            return Err(ConfigError::Invalid {
                reason: "default_chunk_size must be greater than 0".to_string(),
            });
        }

        if self.reassembly_concurrency == 0 {
            return Err(ConfigError::Invalid {
                reason: "reassembly_concurrency must be greater than 0".to_string(),
            });
        }

        for (name, root) in [
            ("chunk_root", &self.chunk_root),
            ("meta_root", &self.meta_root),
            ("out_root", &self.out_root),
        ] {
            if root.as_os_str().is_empty() {
                return Err(ConfigError::Invalid {
                    reason: format!("{} must not be empty", name),
                });
            }
        }

        Ok(())
    }
}

impl Default for HaasConfig {
    fn default() -> Self {
        Self::new("data")
    }
}
