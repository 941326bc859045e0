//! Ring Configuration Module
//!
//! The hash ring is produced by an external configuration service; this module only
//! defines the shape the placement code consumes and a provider that loads it from a
//! YAML file on first use.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, info};

/// Separator used in chunk path identifiers; ids may not contain it
pub const CHUNK_PATH_SEPARATOR: char = '-';

/// Errors raised while obtaining or checking a ring configuration
#[derive(Error, Debug)]
pub enum RingError {
    #[error("Failed to read ring configuration {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse ring configuration {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid ring configuration: {reason}")]
    Invalid { reason: String },
}

/// Snapshot of an active ring configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RingConfig {
    /// Identifies this configuration; embedded in every chunk path
    pub config_id: String,
    /// Number of leading hex characters of a chunk hash used as table key
    pub ring_size: usize,
    /// Hash prefix -> node id
    pub hash_table: HashMap<String, String>,
    /// Known storage hosts, in lookup order
    pub host_list: Vec<String>,
    /// Host -> node ids (ring partitions) owned by that host
    pub node_parts: HashMap<String, Vec<String>>,
}

impl RingConfig {
    /// Load a ring configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, RingError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| RingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_yaml::from_str(&content).map_err(|source| RingError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(config)
    }

    /// Save the ring configuration as YAML
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), RingError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self).map_err(|source| RingError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, content).map_err(|source| RingError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check the configuration is usable for placement
    pub fn validate(&self) -> Result<(), RingError> {
        if self.ring_size == 0 {
            return Err(invalid("ring_size must be at least 1"));
        }

        check_id("config_id", &self.config_id)?;

        for (prefix, node) in &self.hash_table {
            if prefix.chars().count() != self.ring_size {
                return Err(invalid(format!(
                    "hash table key {:?} does not have ring_size {} characters",
                    prefix, self.ring_size
                )));
            }
            check_id("node id", node)?;
        }

        for host in &self.host_list {
            if !self.node_parts.contains_key(host) {
                return Err(invalid(format!("host {} has no node_parts entry", host)));
            }
        }

        Ok(())
    }

    /// Node id owning the given hash prefix
    pub fn node_for_prefix(&self, prefix: &str) -> Option<&str> {
        self.hash_table.get(prefix).map(String::as_str)
    }

    /// First host in `host_list` whose partitions include `node_id`
    pub fn host_for_node(&self, node_id: &str) -> Option<&str> {
        self.host_list
            .iter()
            .find(|host| {
                self.node_parts
                    .get(host.as_str())
                    .is_some_and(|parts| parts.iter().any(|part| part == node_id))
            })
            .map(String::as_str)
    }
}

fn check_id(what: &str, id: &str) -> Result<(), RingError> {
    if id.is_empty() {
        return Err(invalid(format!("{} must not be empty", what)));
    }
    if id.contains(CHUNK_PATH_SEPARATOR) {
        return Err(invalid(format!(
            "{} {:?} must not contain '{}'",
            what, id, CHUNK_PATH_SEPARATOR
        )));
    }
    Ok(())
}

fn invalid<S: Into<String>>(reason: S) -> RingError {
    RingError::Invalid {
        reason: reason.into(),
    }
}

/// Source of the active ring configuration
pub trait RingProvider: Send + Sync {
    /// The active ring, loading it on first use
    fn ring(&self) -> Result<&RingConfig, RingError>;
}

/// An already materialized ring is its own provider
impl RingProvider for RingConfig {
    fn ring(&self) -> Result<&RingConfig, RingError> {
        Ok(self)
    }
}

/// Ring provider backed by a YAML file, read lazily exactly once
#[derive(Debug)]
pub struct FileRingProvider {
    path: PathBuf,
    loaded: OnceLock<RingConfig>,
}

impl FileRingProvider {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            loaded: OnceLock::new(),
        }
    }

    /// Whether the configuration has been read yet
    pub fn is_loaded(&self) -> bool {
        self.loaded.get().is_some()
    }

    /// Read and validate the configuration if that has not happened yet
    pub fn load_config(&self) -> Result<&RingConfig, RingError> {
        if let Some(ring) = self.loaded.get() {
            return Ok(ring);
        }

        debug!("Loading ring configuration from {:?}", self.path);
        let ring = RingConfig::from_file(&self.path)?;
        ring.validate()?;
        info!(
            "Loaded ring configuration {} (ring size {}, {} hosts)",
            ring.config_id,
            ring.ring_size,
            ring.host_list.len()
        );

        Ok(self.loaded.get_or_init(|| ring))
    }
}

impl RingProvider for FileRingProvider {
    fn ring(&self) -> Result<&RingConfig, RingError> {
        self.load_config()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Two hosts, four nodes, one hex character of ring size
    pub(crate) fn test_ring() -> RingConfig {
        let nodes = ["n0", "n1", "n2", "n3"];
        let hash_table = "0123456789abcdef"
            .chars()
            .enumerate()
            .map(|(i, c)| (c.to_string(), nodes[i % nodes.len()].to_string()))
            .collect();
        let node_parts = HashMap::from([
            (
                "10.0.0.1:8080".to_string(),
                vec!["n0".to_string(), "n2".to_string()],
            ),
            (
                "10.0.0.2:8080".to_string(),
                vec!["n1".to_string(), "n3".to_string()],
            ),
        ]);

        RingConfig {
            config_id: "cfg42".to_string(),
            ring_size: 1,
            hash_table,
            host_list: vec!["10.0.0.1:8080".to_string(), "10.0.0.2:8080".to_string()],
            node_parts,
        }
    }

    #[test]
    fn test_ring_validates() {
        test_ring().validate().unwrap();
    }

    #[test]
    fn test_config_id_with_separator_rejected() {
        let mut ring = test_ring();
        ring.config_id = "cfg-42".to_string();
        assert!(matches!(ring.validate(), Err(RingError::Invalid { .. })));
    }

    #[test]
    fn test_prefix_length_must_match_ring_size() {
        let mut ring = test_ring();
        ring.hash_table.insert("ab".to_string(), "n0".to_string());
        assert!(ring.validate().is_err());
    }

    #[test]
    fn test_host_for_node_uses_list_order() {
        let mut ring = test_ring();
        ring.node_parts
            .get_mut("10.0.0.2:8080")
            .unwrap()
            .push("n0".to_string());
        assert_eq!(ring.host_for_node("n0"), Some("10.0.0.1:8080"));
        assert_eq!(ring.host_for_node("n3"), Some("10.0.0.2:8080"));
        assert_eq!(ring.host_for_node("n9"), None);
    }

    #[test]
    fn test_file_provider_loads_lazily() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ring.yaml");
        test_ring().save_to_file(&path).unwrap();

        let provider = FileRingProvider::new(&path);
        assert!(!provider.is_loaded());
        assert_eq!(provider.ring().unwrap(), &test_ring());
        assert!(provider.is_loaded());

        // Later edits are not picked up once loaded
        fs::remove_file(&path).unwrap();
        assert_eq!(provider.ring().unwrap().config_id, "cfg42");
    }

    #[test]
    fn test_file_provider_missing_file() {
        let provider = FileRingProvider::new("/no/such/ring.yaml");
        assert!(matches!(provider.ring(), Err(RingError::Io { .. })));
        assert!(!provider.is_loaded());
    }
}
