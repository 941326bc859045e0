//! Library entrypoint for haas.
//!
//! Content-addressed chunk storage: files are split into fixed-size chunks,
//! each chunk is named by its digest and placed on a node of a consistent-hash
//! ring, and a per-file metadata record allows the file to be rebuilt later.

pub mod chunk_store;
pub mod chunker;
pub mod config;
pub mod digest;
pub mod haas_node;
pub mod message_codec;
pub mod placement;
pub mod reassembler;
pub mod ring;

pub use chunk_store::{BlobWrite, ChunkStore, ChunkStoreError, StorageMode};
pub use chunker::ChunkReport;
pub use config::{ConfigError, HaasConfig};
pub use haas_node::{ErrorKind, HaasError, HaasNode, HaasResult};
pub use message_codec::{decode, encode, CodecError, FileMetadata, MessageKind, Piece};
pub use placement::{ChunkPath, Placement, PlacementError};
pub use reassembler::JoinReport;
pub use ring::{FileRingProvider, RingConfig, RingError, RingProvider};
