//! Chunk Placement Module
//!
//! Maps a chunk's content hash onto the node that owns it and the host serving that
//! node. Placement is table driven: the first `ring_size` hex characters of the hash
//! are looked up in the ring's hash table, so the result is a pure function of the
//! hash and the ring configuration. Nothing here touches the filesystem or caches.

use crate::ring::{RingConfig, RingError, RingProvider, CHUNK_PATH_SEPARATOR};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during placement
#[derive(Error, Debug)]
pub enum PlacementError {
    #[error("Ring configuration unavailable: {0}")]
    Ring(#[from] RingError),

    #[error("Chunk hash {hash:?} has no {ring_size}-character prefix")]
    MalformedChunkHash { hash: String, ring_size: usize },

    #[error("No node for hash prefix {prefix:?} in ring {config_id}")]
    UnknownPrefix { prefix: String, config_id: String },

    #[error("Malformed chunk path: {cpath:?}")]
    MalformedChunkPath { cpath: String },

    #[error("Mismatching config id: chunk path has {found}, active ring is {expected}")]
    ConfigMismatch { expected: String, found: String },

    #[error("No host owns node {node_id} in ring {config_id}")]
    NoTargetFound { node_id: String, config_id: String },
}

/// Result type for placement operations
pub type PlacementResult<T> = Result<T, PlacementError>;

/// Composite chunk identifier `{config_id}-{node_id}-{chunk_hash}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkPath {
    pub config_id: String,
    pub node_id: String,
    pub chunk_hash: String,
}

impl fmt::Display for ChunkPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}",
            self.config_id,
            self.node_id,
            self.chunk_hash,
            sep = CHUNK_PATH_SEPARATOR
        )
    }
}

impl FromStr for ChunkPath {
    type Err = PlacementError;

    fn from_str(cpath: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = cpath.split(CHUNK_PATH_SEPARATOR).collect();
        match parts.as_slice() {
            [config_id, node_id, chunk_hash]
                if !config_id.is_empty() && !node_id.is_empty() && !chunk_hash.is_empty() =>
            {
                Ok(ChunkPath {
                    config_id: config_id.to_string(),
                    node_id: node_id.to_string(),
                    chunk_hash: chunk_hash.to_string(),
                })
            }
            _ => Err(PlacementError::MalformedChunkPath {
                cpath: cpath.to_string(),
            }),
        }
    }
}

/// Where a chunk belongs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub chunk_path: ChunkPath,
    /// Address of the host owning the chunk's node
    pub host: String,
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.chunk_path, self.host)
    }
}

/// Node id owning `chunk_hash` under the ring's hash table
pub fn resolve_node(chunk_hash: &str, ring: &dyn RingProvider) -> PlacementResult<String> {
    let ring = ring.ring()?;
    node_in_ring(chunk_hash, ring).map(str::to_string)
}

fn node_in_ring<'r>(chunk_hash: &str, ring: &'r RingConfig) -> PlacementResult<&'r str> {
    let prefix = chunk_hash
        .get(..ring.ring_size)
        .ok_or_else(|| PlacementError::MalformedChunkHash {
            hash: chunk_hash.to_string(),
            ring_size: ring.ring_size,
        })?;

    ring.node_for_prefix(prefix)
        .ok_or_else(|| PlacementError::UnknownPrefix {
            prefix: prefix.to_string(),
            config_id: ring.config_id.clone(),
        })
}

/// Build the chunk path identifier for `chunk_hash` under the active ring
pub fn build_chunk_path(chunk_hash: &str, ring: &dyn RingProvider) -> PlacementResult<ChunkPath> {
    let ring = ring.ring()?;
    let node_id = node_in_ring(chunk_hash, ring)?;

    Ok(ChunkPath {
        config_id: ring.config_id.clone(),
        node_id: node_id.to_string(),
        chunk_hash: chunk_hash.to_string(),
    })
}

/// Find the host serving a chunk path.
///
/// The chunk path must have been built against the active ring; a foreign or
/// stale config id fails before any partition lookup.
pub fn locate(cpath: &str, ring: &dyn RingProvider) -> PlacementResult<Placement> {
    let chunk_path: ChunkPath = cpath.parse()?;
    locate_path(chunk_path, ring)
}

/// [`locate`] for an already parsed chunk path
pub fn locate_path(chunk_path: ChunkPath, ring: &dyn RingProvider) -> PlacementResult<Placement> {
    let ring = ring.ring()?;

    if chunk_path.config_id != ring.config_id {
        return Err(PlacementError::ConfigMismatch {
            expected: ring.config_id.clone(),
            found: chunk_path.config_id,
        });
    }

    let host = ring
        .host_for_node(&chunk_path.node_id)
        .ok_or_else(|| PlacementError::NoTargetFound {
            node_id: chunk_path.node_id.clone(),
            config_id: ring.config_id.clone(),
        })?
        .to_string();

    debug!("Chunk {} placed on {}", chunk_path, host);
    Ok(Placement { chunk_path, host })
}
