//! Reassembler Module
//!
//! Rebuilds an original file from its metadata record and the per-file chunk
//! bucket. Pieces are fetched and written concurrently and may finish in any
//! order; the file is complete once the bytes written add up to its declared size.

use crate::chunk_store::ChunkStore;
use crate::config::{HaasConfig, META_EXTENSION};
use crate::digest::{chunk_digest, file_digest, is_hex_digest};
use crate::haas_node::{io_error, HaasError, HaasResult};
use crate::message_codec::{decode, CodecError, MessageKind, Piece};

use futures::future;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info};

/// Outcome of a successful reassembly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinReport {
    pub file_hash: String,
    pub output_path: PathBuf,
    pub bytes_written: u64,
    pub pieces: usize,
}

/// Rebuilds files from metadata records
pub struct Reassembler<'a> {
    config: &'a HaasConfig,
    store: &'a ChunkStore,
}

impl<'a> Reassembler<'a> {
    pub fn new(config: &'a HaasConfig, store: &'a ChunkStore) -> Self {
        Self { config, store }
    }

    /// Path of the metadata record named by `meta_key` (`{digest}.meta` or `{digest}`)
    pub fn meta_path_for_key(&self, meta_key: &str) -> HaasResult<PathBuf> {
        let file_hash = meta_key.strip_suffix(META_EXTENSION).unwrap_or(meta_key);
        if !is_hex_digest(file_hash) {
            return Err(HaasError::InvalidMetaKey {
                key: meta_key.to_string(),
            });
        }
        Ok(self.config.meta_path(file_hash))
    }

    /// Reassemble the file described by `meta_key` into `{out_root}/_b_{digest}`.
    ///
    /// Any missing or damaged chunk fails the whole operation; the partially
    /// written output is left behind and must not be trusted.
    pub async fn join_chunks(&self, meta_key: &str) -> HaasResult<JoinReport> {
        let meta_path = self.meta_path_for_key(meta_key)?;
        let bytes = fs::read(&meta_path)
            .await
            .map_err(|source| io_error("read", &meta_path, source))?;
        let metadata = decode(&bytes).map_err(|source| HaasError::Codec {
            path: meta_path.clone(),
            source,
        })?;

        if metadata.kind != MessageKind::Meta {
            return Err(HaasError::InvalidMetadata {
                path: meta_path,
                source: CodecError::Inconsistent {
                    reason: "expected a meta message".to_string(),
                },
            });
        }
        // Offsets are derived from chunk_size, so irregular piece sizes must be caught here
        metadata
            .validate()
            .map_err(|source| HaasError::InvalidMetadata {
                path: meta_path.clone(),
                source,
            })?;

        let file_hash = metadata.content_hash.as_str();
        if !is_hex_digest(file_hash) {
            return Err(HaasError::InvalidMetadata {
                path: meta_path,
                source: CodecError::Inconsistent {
                    reason: format!("content hash {:?} is not a digest", file_hash),
                },
            });
        }

        let output_path = self.config.output_path(file_hash);
        info!(
            "Reassembling {} ({} bytes, {} pieces) into {:?}",
            metadata.name,
            metadata.size,
            metadata.pieces.len(),
            output_path
        );

        let output = File::create(&output_path)
            .await
            .map_err(|source| io_error("create", &output_path, source))?;
        output
            .set_len(metadata.size)
            .await
            .map_err(|source| io_error("allocate", &output_path, source))?;
        drop(output);

        let chunk_size = u64::from(metadata.chunk_size);
        let last_index = metadata.pieces.len().saturating_sub(1);

        let bytes_written = stream::iter(metadata.pieces.iter().enumerate())
            .map(|(index, piece)| {
                self.restore_piece(
                    file_hash,
                    &output_path,
                    index as u64 * chunk_size,
                    piece,
                    (index, last_index),
                )
            })
            .buffer_unordered(self.config.reassembly_concurrency)
            .try_fold(0u64, |total, written| future::ready(Ok(total + written)))
            .await?;

        if bytes_written != metadata.size {
            return Err(HaasError::SizeMismatch {
                expected: metadata.size,
                written: bytes_written,
            });
        }

        if self.config.verify_output {
            let output_hash = file_digest(&output_path)
                .await
                .map_err(|source| io_error("hash", &output_path, source))?;
            if output_hash != file_hash {
                return Err(HaasError::DataCorruption {
                    details: format!(
                        "Checksum mismatch: expected {}, got {}",
                        file_hash, output_hash
                    ),
                });
            }
        }

        info!("File reassembled successfully: {} bytes", bytes_written);
        Ok(JoinReport {
            file_hash: file_hash.to_string(),
            output_path,
            bytes_written,
            pieces: metadata.pieces.len(),
        })
    }

    /// Fetch one piece from the bucket and write it at `offset`
    async fn restore_piece(
        &self,
        file_hash: &str,
        output_path: &Path,
        offset: u64,
        piece: &Piece,
        (index, last_index): (usize, usize),
    ) -> HaasResult<u64> {
        let message = self.store.load_bucket(file_hash, &piece.content_hash).await?;
        let corrupted = |details: String| HaasError::ChunkCorrupted {
            part: piece.part,
            chunk_hash: piece.content_hash.clone(),
            details,
        };

        let data = message
            .single_piece()
            .and_then(|stored| stored.data.as_deref())
            .ok_or_else(|| corrupted("stored message carries no payload".to_string()))?;
        if data.len() != piece.size as usize {
            return Err(corrupted(format!(
                "payload is {} bytes, metadata records {}",
                data.len(),
                piece.size
            )));
        }
        if chunk_digest(data) != piece.content_hash {
            return Err(corrupted("payload does not match its digest".to_string()));
        }

        let mut output = OpenOptions::new()
            .write(true)
            .open(output_path)
            .await
            .map_err(|source| io_error("open", output_path, source))?;
        output
            .seek(SeekFrom::Start(offset))
            .await
            .map_err(|source| io_error("seek", output_path, source))?;
        output
            .write_all(data)
            .await
            .map_err(|source| io_error("write", output_path, source))?;
        output
            .flush()
            .await
            .map_err(|source| io_error("flush", output_path, source))?;

        debug!(
            "{} bytes written for chunk {}/{} at offset {}",
            data.len(),
            index,
            last_index,
            offset
        );
        Ok(data.len() as u64)
    }
}
