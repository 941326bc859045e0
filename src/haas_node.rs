//! HaaS Node Module
//!
//! Entry point tying configuration, the ring provider and the chunk store together.
//! Every operation exposed to the CLI (chunking, reassembly, placement lookups and
//! chunk mobilization) goes through [`HaasNode`].

use crate::chunk_store::{ChunkStore, ChunkStoreError, StorageMode};
use crate::chunker::{ChunkReport, Chunker};
use crate::config::{ConfigError, HaasConfig};
use crate::message_codec::{decode, CodecError, FileMetadata};
use crate::placement::{build_chunk_path, locate, ChunkPath, Placement, PlacementError};
use crate::reassembler::{JoinReport, Reassembler};
use crate::ring::{FileRingProvider, RingProvider};

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

/// Errors surfaced by node operations
#[derive(Error, Debug)]
pub enum HaasError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Placement error: {0}")]
    Placement(#[from] PlacementError),

    #[error("Chunk store error: {0}")]
    ChunkStore(#[from] ChunkStoreError),

    #[error("Failed to {op} {path:?}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to decode {path:?}: {source}")]
    Codec {
        path: PathBuf,
        #[source]
        source: CodecError,
    },

    #[error("Failed to encode metadata for {file_hash}: {source}")]
    Encode {
        file_hash: String,
        #[source]
        source: CodecError,
    },

    #[error("Refusing to chunk empty file {path:?}")]
    EmptyFile { path: PathBuf },

    #[error("Invalid chunk size: {chunk_size}")]
    InvalidChunkSize { chunk_size: u32 },

    #[error("Invalid metadata key: {key:?}")]
    InvalidMetaKey { key: String },

    #[error("Invalid metadata {path:?}: {source}")]
    InvalidMetadata {
        path: PathBuf,
        #[source]
        source: CodecError,
    },

    #[error("Chunk {chunk_hash} (part {part}) is unusable: {details}")]
    ChunkCorrupted {
        part: u32,
        chunk_hash: String,
        details: String,
    },

    #[error("Size mismatch: expected {expected} bytes, wrote {written} bytes")]
    SizeMismatch { expected: u64, written: u64 },

    #[error("Data corruption detected: {details}")]
    DataCorruption { details: String },
}

/// Coarse classification of a [`HaasError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or unusable configuration or ring; raised before any I/O
    Configuration,
    /// Chunk path built against a different ring configuration
    ConfigMismatch,
    /// No host owns the resolved node, or no node owns the hash prefix
    NoTargetFound,
    /// Malformed or truncated encoded bytes
    Codec,
    /// Filesystem failure
    Io,
    /// Input or stored data violates an invariant
    Integrity,
}

impl HaasError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HaasError::Config(_) | HaasError::InvalidChunkSize { .. } => ErrorKind::Configuration,
            HaasError::Placement(e) => match e {
                PlacementError::Ring(_) => ErrorKind::Configuration,
                PlacementError::ConfigMismatch { .. } => ErrorKind::ConfigMismatch,
                PlacementError::NoTargetFound { .. } | PlacementError::UnknownPrefix { .. } => {
                    ErrorKind::NoTargetFound
                }
                PlacementError::MalformedChunkHash { .. }
                | PlacementError::MalformedChunkPath { .. } => ErrorKind::Integrity,
            },
            HaasError::ChunkStore(e) => match e {
                ChunkStoreError::Io { .. } => ErrorKind::Io,
                ChunkStoreError::Codec { .. }
                | ChunkStoreError::Encode { .. }
                | ChunkStoreError::NotAChunk { .. } => ErrorKind::Codec,
                ChunkStoreError::InvalidDigest { .. }
                | ChunkStoreError::MissingBlob { .. }
                | ChunkStoreError::BlobCorrupted { .. } => ErrorKind::Integrity,
            },
            HaasError::Io { .. } => ErrorKind::Io,
            HaasError::Codec { .. } | HaasError::Encode { .. } => ErrorKind::Codec,
            HaasError::EmptyFile { .. }
            | HaasError::InvalidMetaKey { .. }
            | HaasError::InvalidMetadata { .. }
            | HaasError::ChunkCorrupted { .. }
            | HaasError::SizeMismatch { .. }
            | HaasError::DataCorruption { .. } => ErrorKind::Integrity,
        }
    }
}

/// Result type for node operations
pub type HaasResult<T> = Result<T, HaasError>;

pub(crate) fn io_error(op: &'static str, path: &Path, source: io::Error) -> HaasError {
    HaasError::Io {
        op,
        path: path.to_path_buf(),
        source,
    }
}

/// A storage node bound to one configuration and one ring
pub struct HaasNode {
    config: HaasConfig,
    ring: Arc<dyn RingProvider>,
    store: ChunkStore,
}

impl HaasNode {
    /// Create a node, loading the ring before touching the filesystem
    pub async fn new(config: HaasConfig, ring: Arc<dyn RingProvider>) -> HaasResult<Self> {
        config.validate()?;

        let active = ring.ring().map_err(PlacementError::from)?;
        info!(
            "Initializing HaaS node with ring {} ({} hosts)",
            active.config_id,
            active.host_list.len()
        );

        for dir in [&config.meta_root, &config.out_root] {
            fs::create_dir_all(dir)
                .await
                .map_err(|source| io_error("create directory", dir, source))?;
        }

        let store = ChunkStore::new(&config.chunk_root);
        debug!("Initializing chunk store: {:?}", config.chunk_root);
        store.ensure_layout().await?;

        Ok(Self {
            config,
            ring,
            store,
        })
    }

    /// Create a node whose ring is read from `config.ring_config`
    pub async fn from_config(config: HaasConfig) -> HaasResult<Self> {
        let ring = Arc::new(FileRingProvider::new(&config.ring_config));
        Self::new(config, ring).await
    }

    pub fn config(&self) -> &HaasConfig {
        &self.config
    }

    pub fn ring(&self) -> &dyn RingProvider {
        self.ring.as_ref()
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    /// Chunk a file and persist its artifacts and metadata record.
    ///
    /// `None` arguments fall back to the configured chunk size and layout.
    pub async fn chunk_file<P: AsRef<Path>>(
        &self,
        path: P,
        chunk_size: Option<u32>,
        mode: Option<StorageMode>,
    ) -> HaasResult<ChunkReport> {
        let chunk_size = chunk_size.unwrap_or(self.config.default_chunk_size);
        let mode = mode.unwrap_or(self.config.storage_mode);
        Chunker::new(&self.config, self.ring(), &self.store)
            .chunk_file(path.as_ref(), chunk_size, mode)
            .await
    }

    /// Rebuild a file from its metadata record (`{digest}.meta` or `{digest}`)
    pub async fn join_chunks(&self, meta_key: &str) -> HaasResult<JoinReport> {
        Reassembler::new(&self.config, &self.store)
            .join_chunks(meta_key)
            .await
    }

    /// Host responsible for a chunk path
    pub fn where_to(&self, cpath: &str) -> HaasResult<Placement> {
        Ok(locate(cpath, self.ring())?)
    }

    /// Chunk path identifier for a chunk hash under the active ring
    pub fn bucket_path(&self, chunk_hash: &str) -> HaasResult<ChunkPath> {
        Ok(build_chunk_path(chunk_hash, self.ring())?)
    }

    /// Encoded self-contained message for a dedup-layout chunk
    pub async fn mobilize_chunk(&self, file_hash: &str, chunk_hash: &str) -> HaasResult<Vec<u8>> {
        Ok(self.store.mobilize(file_hash, chunk_hash).await?)
    }

    /// Mobilize a dedup-layout chunk and place it in the reassembly bucket
    pub async fn mobilize_to_bucket(&self, file_hash: &str, chunk_hash: &str) -> HaasResult<PathBuf> {
        let encoded = self.store.mobilize(file_hash, chunk_hash).await?;
        Ok(self
            .store
            .dump_as_bucket(file_hash, chunk_hash, &encoded)
            .await?)
    }

    /// Decode any stored message for inspection
    pub async fn inspect<P: AsRef<Path>>(&self, path: P) -> HaasResult<FileMetadata> {
        let path = path.as_ref();
        let bytes = fs::read(path)
            .await
            .map_err(|source| io_error("read", path, source))?;
        decode(&bytes).map_err(|source| HaasError::Codec {
            path: path.to_path_buf(),
            source,
        })
    }
}
