//! Chunk Store Module
//!
//! Local chunk storage under a single chunk root, in one of two layouts:
//! - network: one self-contained `file` message per chunk occurrence at
//!   `{root}/{file_digest}-{chunk_digest}`
//! - dedup: raw bytes stored once per digest at `{root}/data/{chunk_digest}` plus a
//!   payload-free header per occurrence at `{root}/head/{file_digest}-{chunk_digest}`
//!
//! Independently of the layout, a mobilized copy of every chunk is kept at
//! `{root}/{file_digest}/{chunk_digest}`, which is where reassembly reads from.
//!
//! Every artifact is written to a uniquely named temporary file and renamed into
//! place, so readers see either nothing or the complete artifact.

use crate::digest::{chunk_digest, is_hex_digest};
use crate::message_codec::{decode, encode, CodecError, FileMetadata, Piece};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// Directory under the chunk root holding deduplicated chunk bytes
pub const DATA_DIR: &str = "data";

/// Directory under the chunk root holding per-occurrence headers
pub const HEAD_DIR: &str = "head";

/// How chunk artifacts are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Self-contained messages ready to be sent as-is; no deduplication
    #[default]
    Network,
    /// Shared data blobs plus lightweight headers
    Dedup,
}

/// Outcome of persisting a data blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobWrite {
    /// Bytes were written for the first time
    Written,
    /// A blob with this digest already existed; nothing was written
    Deduplicated,
}

/// Errors that can occur in the chunk store
#[derive(Error, Debug)]
pub enum ChunkStoreError {
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

    #[error("Failed to encode message for chunk {chunk_hash}: {source}")]
    Encode {
        chunk_hash: String,
        #[source]
        source: CodecError,
    },

    #[error("Not a valid digest: {value:?}")]
    InvalidDigest { value: String },

    #[error("Header {header:?} exists but its data blob {blob:?} does not")]
    MissingBlob { header: PathBuf, blob: PathBuf },

    #[error("Data blob {path:?} does not match digest {chunk_hash}")]
    BlobCorrupted { path: PathBuf, chunk_hash: String },

    #[error("{path:?} is not a single-piece chunk message")]
    NotAChunk { path: PathBuf },
}

/// Result type for chunk store operations
pub type ChunkStoreResult<T> = Result<T, ChunkStoreError>;

/// Chunk storage rooted at one directory
#[derive(Debug)]
pub struct ChunkStore {
    root: PathBuf,
    /// Digests whose blob bytes were written or checked by this store
    verified_blobs: Mutex<HashSet<String>>,
}

impl ChunkStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            verified_blobs: Mutex::new(HashSet::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the chunk root and the dedup layout directories
    pub async fn ensure_layout(&self) -> ChunkStoreResult<()> {
        for dir in [
            self.root.clone(),
            self.root.join(DATA_DIR),
            self.root.join(HEAD_DIR),
        ] {
            fs::create_dir_all(&dir)
                .await
                .map_err(|source| io_error("create directory", &dir, source))?;
        }
        Ok(())
    }

    /// `{root}/{file_digest}-{chunk_digest}`
    pub fn network_path(&self, file_hash: &str, chunk_hash: &str) -> ChunkStoreResult<PathBuf> {
        Ok(self
            .root
            .join(format!("{}-{}", checked(file_hash)?, checked(chunk_hash)?)))
    }

    /// `{root}/data/{chunk_digest}`
    pub fn data_path(&self, chunk_hash: &str) -> ChunkStoreResult<PathBuf> {
        Ok(self.root.join(DATA_DIR).join(checked(chunk_hash)?))
    }

    /// `{root}/head/{file_digest}-{chunk_digest}`
    pub fn head_path(&self, file_hash: &str, chunk_hash: &str) -> ChunkStoreResult<PathBuf> {
        Ok(self
            .root
            .join(HEAD_DIR)
            .join(format!("{}-{}", checked(file_hash)?, checked(chunk_hash)?)))
    }

    /// `{root}/{file_digest}/{chunk_digest}`
    pub fn bucket_path(&self, file_hash: &str, chunk_hash: &str) -> ChunkStoreResult<PathBuf> {
        Ok(self.root.join(checked(file_hash)?).join(checked(chunk_hash)?))
    }

    /// Persist a self-contained chunk message in the network layout, returning its encoding
    pub async fn put_network(
        &self,
        file_hash: &str,
        chunk_hash: &str,
        message: &FileMetadata,
    ) -> ChunkStoreResult<Vec<u8>> {
        let path = self.network_path(file_hash, chunk_hash)?;
        let encoded = encode(message).map_err(|source| ChunkStoreError::Encode {
            chunk_hash: chunk_hash.to_string(),
            source,
        })?;
        write_atomic(&path, &encoded).await?;
        debug!("Stored network chunk {:?} ({} bytes)", path, encoded.len());
        Ok(encoded)
    }

    /// Load a chunk message stored in the network layout
    pub async fn get_network(
        &self,
        file_hash: &str,
        chunk_hash: &str,
    ) -> ChunkStoreResult<FileMetadata> {
        let path = self.network_path(file_hash, chunk_hash)?;
        read_chunk_message(&path).await
    }

    /// Persist a chunk in the dedup layout: the blob first, then the header.
    ///
    /// `header` is stored without payload even if its piece carries data.
    pub async fn put_dedup(
        &self,
        file_hash: &str,
        chunk_hash: &str,
        header: &FileMetadata,
        data: &[u8],
    ) -> ChunkStoreResult<BlobWrite> {
        let outcome = self.put_blob(chunk_hash, data).await?;

        let header = FileMetadata {
            kind: header.kind,
            name: header.name.clone(),
            content_hash: header.content_hash.clone(),
            size: header.size,
            chunk_size: header.chunk_size,
            count: header.count,
            pieces: header.pieces.iter().map(Piece::without_data).collect(),
        };
        let path = self.head_path(file_hash, chunk_hash)?;
        let encoded = encode(&header).map_err(|source| ChunkStoreError::Encode {
            chunk_hash: chunk_hash.to_string(),
            source,
        })?;
        write_atomic(&path, &encoded).await?;

        Ok(outcome)
    }

    /// Store raw chunk bytes under their digest unless a matching blob is already on disk.
    ///
    /// The disk is always consulted. A blob found there that this store has not seen
    /// yet is re-hashed once; a blob whose bytes no longer match its name is rewritten.
    pub async fn put_blob(&self, chunk_hash: &str, data: &[u8]) -> ChunkStoreResult<BlobWrite> {
        let path = self.data_path(chunk_hash)?;

        // Held across the write so concurrent callers cannot both write the same digest
        let mut verified = self.verified_blobs.lock().await;

        let exists = fs::try_exists(&path)
            .await
            .map_err(|source| io_error("stat", &path, source))?;
        if exists {
            if verified.contains(chunk_hash) {
                debug!("Blob {} already stored", chunk_hash);
                return Ok(BlobWrite::Deduplicated);
            }

            let stored = fs::read(&path)
                .await
                .map_err(|source| io_error("read", &path, source))?;
            if chunk_digest(&stored) == chunk_hash {
                debug!("Blob {} already on disk", chunk_hash);
                verified.insert(chunk_hash.to_string());
                return Ok(BlobWrite::Deduplicated);
            }
            warn!("Blob {:?} does not match its digest, rewriting", path);
        } else if verified.remove(chunk_hash) {
            warn!("Blob {:?} disappeared, rewriting", path);
        }

        write_atomic(&path, data).await?;
        verified.insert(chunk_hash.to_string());
        debug!("Stored blob {} ({} bytes)", chunk_hash, data.len());
        Ok(BlobWrite::Written)
    }

    /// Rebuild the self-contained message for a dedup-layout chunk.
    ///
    /// Loads the header, re-attaches the blob as the piece payload and returns the
    /// encoded message, identical in shape to a network-layout artifact.
    pub async fn mobilize(&self, file_hash: &str, chunk_hash: &str) -> ChunkStoreResult<Vec<u8>> {
        let head_path = self.head_path(file_hash, chunk_hash)?;
        let blob_path = self.data_path(chunk_hash)?;

        let mut message = read_message(&head_path).await?;

        let data = match fs::read(&blob_path).await {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ChunkStoreError::MissingBlob {
                    header: head_path,
                    blob: blob_path,
                })
            }
            Err(e) => return Err(io_error("read", &blob_path, e)),
        };

        if chunk_digest(&data) != chunk_hash {
            return Err(ChunkStoreError::BlobCorrupted {
                path: blob_path,
                chunk_hash: chunk_hash.to_string(),
            });
        }

        let piece = message
            .single_piece_mut()
            .filter(|piece| piece.content_hash == chunk_hash)
            .ok_or_else(|| ChunkStoreError::NotAChunk {
                path: head_path.clone(),
            })?;
        piece.data = Some(data);

        message
            .validate()
            .map_err(|source| ChunkStoreError::Codec {
                path: head_path,
                source,
            })?;

        encode(&message).map_err(|source| ChunkStoreError::Encode {
            chunk_hash: chunk_hash.to_string(),
            source,
        })
    }

    /// Write an encoded chunk message into the per-file bucket used by reassembly
    pub async fn dump_as_bucket(
        &self,
        file_hash: &str,
        chunk_hash: &str,
        encoded: &[u8],
    ) -> ChunkStoreResult<PathBuf> {
        let path = self.bucket_path(file_hash, chunk_hash)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| io_error("create directory", parent, source))?;
        }
        write_atomic(&path, encoded).await?;
        debug!("Dumped chunk {} into bucket {:?}", chunk_hash, path);
        Ok(path)
    }

    /// Load a chunk message from the per-file bucket
    pub async fn load_bucket(
        &self,
        file_hash: &str,
        chunk_hash: &str,
    ) -> ChunkStoreResult<FileMetadata> {
        let path = self.bucket_path(file_hash, chunk_hash)?;
        read_chunk_message(&path).await
    }
}

fn checked(digest: &str) -> ChunkStoreResult<&str> {
    if is_hex_digest(digest) {
        Ok(digest)
    } else {
        Err(ChunkStoreError::InvalidDigest {
            value: digest.to_string(),
        })
    }
}

fn io_error(op: &'static str, path: &Path, source: io::Error) -> ChunkStoreError {
    ChunkStoreError::Io {
        op,
        path: path.to_path_buf(),
        source,
    }
}

/// Write `bytes` to a temporary sibling of `path`, then rename it into place
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> ChunkStoreResult<()> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

    fs::write(&tmp_path, bytes)
        .await
        .map_err(|source| io_error("write", &tmp_path, source))?;
    fs::rename(&tmp_path, path)
        .await
        .map_err(|source| io_error("rename into", path, source))
}

async fn read_message(path: &Path) -> ChunkStoreResult<FileMetadata> {
    let bytes = fs::read(path)
        .await
        .map_err(|source| io_error("read", path, source))?;
    decode(&bytes).map_err(|source| ChunkStoreError::Codec {
        path: path.to_path_buf(),
        source,
    })
}

async fn read_chunk_message(path: &Path) -> ChunkStoreResult<FileMetadata> {
    let message = read_message(path).await?;
    if message.single_piece().is_none() {
        return Err(ChunkStoreError::NotAChunk {
            path: path.to_path_buf(),
        });
    }
    message
        .validate()
        .map_err(|source| ChunkStoreError::Codec {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(message)
}
