//! Chunker Module
//!
//! Splits a source file into fixed-size chunks, places and persists each one, and
//! records the whole-file metadata once the end of the file is reached.

use crate::chunk_store::{write_atomic, BlobWrite, ChunkStore, StorageMode};
use crate::config::HaasConfig;
use crate::digest::{chunk_digest, file_digest};
use crate::haas_node::{io_error, HaasError, HaasResult};
use crate::message_codec::{encode, FileMetadata, Piece};
use crate::placement::{build_chunk_path, locate_path, Placement};
use crate::ring::RingProvider;

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

/// Outcome of chunking one file
#[derive(Debug, Clone)]
pub struct ChunkReport {
    /// Digest of the whole file; keys every artifact of this file
    pub file_hash: String,
    /// Where the metadata record was written
    pub meta_path: PathBuf,
    /// The finalized metadata record
    pub metadata: FileMetadata,
    /// Placement of each chunk, in file order
    pub placements: Vec<Placement>,
    /// Chunks whose data blob already existed (dedup layout only)
    pub blobs_deduplicated: usize,
}

/// Turns one source file into chunk artifacts plus a metadata record
pub struct Chunker<'a> {
    config: &'a HaasConfig,
    ring: &'a dyn RingProvider,
    store: &'a ChunkStore,
}

impl<'a> Chunker<'a> {
    pub fn new(config: &'a HaasConfig, ring: &'a dyn RingProvider, store: &'a ChunkStore) -> Self {
        Self {
            config,
            ring,
            store,
        }
    }

    /// Chunk `path` into `chunk_size` windows persisted in the given layout.
    ///
    /// Empty files and a zero chunk size are rejected before anything is written.
    /// A failure part way through leaves the artifacts written so far in place.
    pub async fn chunk_file(
        &self,
        path: &Path,
        chunk_size: u32,
        mode: StorageMode,
    ) -> HaasResult<ChunkReport> {
        if chunk_size == 0 {
            return Err(HaasError::InvalidChunkSize { chunk_size });
        }

        let file_size = fs::metadata(path)
            .await
            .map_err(|source| io_error("stat", path, source))?
            .len();
        if file_size == 0 {
            return Err(HaasError::EmptyFile {
                path: path.to_path_buf(),
            });
        }

        info!(
            "Chunking {:?}: {} bytes, chunk size {}, {:?} layout",
            path, file_size, chunk_size, mode
        );

        // Every artifact path derives from the file digest, so it must be known first
        let file_hash = file_digest(path)
            .await
            .map_err(|source| io_error("hash", path, source))?;
        info!("Check sum: {}", file_hash);

        let name = path.to_string_lossy().into_owned();
        let mut metadata = FileMetadata::meta(name.as_str(), file_hash.as_str(), file_size, chunk_size);
        let mut placements = Vec::new();
        let mut blobs_deduplicated = 0;

        let mut file = File::open(path)
            .await
            .map_err(|source| io_error("open", path, source))?;
        // No window needs to exceed the file itself
        let window = u64::from(chunk_size).min(file_size) as usize;
        let mut buffer = vec![0u8; window];
        let mut part = 1u32;
        let mut bytes_seen = 0u64;

        loop {
            let bytes_read = read_window(&mut file, &mut buffer)
                .await
                .map_err(|source| io_error("read", path, source))?;
            if bytes_read == 0 {
                break;
            }

            let data = &buffer[..bytes_read];
            let chunk_hash = chunk_digest(data);
            let placement = locate_path(build_chunk_path(&chunk_hash, self.ring)?, self.ring)?;

            let piece = Piece::new(part, bytes_read as u32, chunk_hash.as_str());
            metadata.push_piece(piece.clone());

            let message = FileMetadata::file(
                name.as_str(),
                file_hash.as_str(),
                file_size,
                chunk_size,
                piece.with_data(data.to_vec()),
            );

            let transfer = match mode {
                StorageMode::Network => {
                    self.store
                        .put_network(&file_hash, &chunk_hash, &message)
                        .await?
                }
                StorageMode::Dedup => {
                    let outcome = self
                        .store
                        .put_dedup(&file_hash, &chunk_hash, &message, data)
                        .await?;
                    if outcome == BlobWrite::Deduplicated {
                        blobs_deduplicated += 1;
                    }
                    self.store.mobilize(&file_hash, &chunk_hash).await?
                }
            };
            self.store
                .dump_as_bucket(&file_hash, &chunk_hash, &transfer)
                .await?;

            debug!("Chunk {}: {} bytes, {}", part, bytes_read, placement);
            placements.push(placement);

            bytes_seen += bytes_read as u64;
            part += 1;
        }

        if bytes_seen != file_size {
            return Err(HaasError::DataCorruption {
                details: format!(
                    "{:?} changed while chunking: expected {} bytes, read {}",
                    path, file_size, bytes_seen
                ),
            });
        }

        metadata.finalize();
        let encoded = encode(&metadata).map_err(|source| HaasError::Encode {
            file_hash: file_hash.clone(),
            source,
        })?;
        let meta_path = self.config.meta_path(&file_hash);
        write_atomic(&meta_path, &encoded).await?;
        info!(
            "Meta data {:?} written: {} chunks, {} blobs deduplicated",
            meta_path,
            part - 1,
            blobs_deduplicated
        );

        Ok(ChunkReport {
            file_hash,
            meta_path,
            metadata,
            placements,
            blobs_deduplicated,
        })
    }
}

/// Fill `buffer` from `file`, returning fewer bytes only at end of file
async fn read_window(file: &mut File, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let bytes_read = file.read(&mut buffer[filled..]).await?;
        if bytes_read == 0 {
            break;
        }
        filled += bytes_read;
    }
    Ok(filled)
}
