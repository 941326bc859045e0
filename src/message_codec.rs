//! Message Codec Module
//!
//! Binary encoding for the two message shapes exchanged by the chunk pipeline:
//! the `meta` whole-file descriptor and the single-piece `file` transfer message.
//!
//! Message layout (little-endian):
//! - magic: [u8;4] = b"HAAS"
//! - kind: u8 (0 = meta, 1 = file)
//! - name_len: u32, name: [u8; name_len]
//! - hash_len: u16, content_hash: [u8; hash_len]
//! - size: u64
//! - chunk_size: u32
//! - has_count: u8, count: u32
//! - piece_count: u32
//! - pieces: piece_count times
//!   - part: u32
//!   - size: u32
//!   - hash_len: u16, content_hash: [u8; hash_len]
//!   - has_data: u8, [data_len: u32, data: [u8; data_len]]
//! - checksum: u32 (CRC32 over every preceding byte)

use crc32fast::Hasher;
use serde::{Serialize, Serializer};
use std::io::{Cursor, Read};
use thiserror::Error;

/// Fixed magic at the start of every encoded message
pub const MESSAGE_MAGIC: &[u8; 4] = b"HAAS";

/// Size of the CRC32 trailer
const CHECKSUM_LEN: usize = 4;

/// Shape of an encoded message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum MessageKind {
    /// Whole-file descriptor, one per ingested file
    Meta = 0,
    /// Self-contained single-chunk transfer message
    File = 1,
}

impl TryFrom<u8> for MessageKind {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageKind::Meta),
            1 => Ok(MessageKind::File),
            other => Err(CodecError::UnknownKind(other)),
        }
    }
}

/// Errors that can occur while encoding, decoding or validating messages
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Invalid message magic: {found:02x?}")]
    InvalidMagic { found: Vec<u8> },

    #[error("Message truncated while reading {field}")]
    Truncated { field: &'static str },

    #[error("Unknown message kind: {0}")]
    UnknownKind(u8),

    #[error("Invalid presence flag for {field}: {value}")]
    InvalidFlag { field: &'static str, value: u8 },

    #[error("Field {field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    #[error("Field {field} too long to encode: {length}")]
    FieldTooLong { field: &'static str, length: usize },

    #[error("Message checksum mismatch: expected {expected:08x}, calculated {calculated:08x}")]
    ChecksumMismatch { expected: u32, calculated: u32 },

    #[error("{count} unexpected bytes after message")]
    TrailingBytes { count: usize },

    #[error("Inconsistent message: {reason}")]
    Inconsistent { reason: String },
}

/// One chunk of a file, as referenced from a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Piece {
    /// 1-based position of the chunk within its file
    pub part: u32,
    /// Byte length of this chunk
    pub size: u32,
    /// Digest of the chunk bytes
    pub content_hash: String,
    /// Raw chunk payload, only present in transfer messages
    #[serde(rename = "data_len", serialize_with = "serialize_payload_len")]
    pub data: Option<Vec<u8>>,
}

impl Piece {
    /// Create a piece descriptor without payload
    pub fn new<S: Into<String>>(part: u32, size: u32, content_hash: S) -> Self {
        Self {
            part,
            size,
            content_hash: content_hash.into(),
            data: None,
        }
    }

    /// Attach the chunk payload
    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = Some(data);
        self
    }

    /// Copy of this descriptor with the payload dropped
    pub fn without_data(&self) -> Self {
        Self {
            part: self.part,
            size: self.size,
            content_hash: self.content_hash.clone(),
            data: None,
        }
    }
}

fn serialize_payload_len<S: Serializer>(data: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
    data.as_ref().map(Vec::len).serialize(s)
}

/// File-level message: either a whole-file descriptor or a single-chunk transfer unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileMetadata {
    pub kind: MessageKind,
    /// Path of the chunked file, informational only
    pub name: String,
    /// Digest of the whole file
    pub content_hash: String,
    /// Total byte length of the file
    pub size: u64,
    /// Split size used when chunking
    pub chunk_size: u32,
    /// Number of pieces, unset until chunking reached end of input
    pub count: Option<u32>,
    /// Pieces in file order
    pub pieces: Vec<Piece>,
}

impl FileMetadata {
    /// Start an empty whole-file descriptor
    pub fn meta<S: Into<String>, H: Into<String>>(
        name: S,
        content_hash: H,
        size: u64,
        chunk_size: u32,
    ) -> Self {
        Self {
            kind: MessageKind::Meta,
            name: name.into(),
            content_hash: content_hash.into(),
            size,
            chunk_size,
            count: None,
            pieces: Vec::new(),
        }
    }

    /// Build a single-piece transfer message
    pub fn file<S: Into<String>, H: Into<String>>(
        name: S,
        content_hash: H,
        size: u64,
        chunk_size: u32,
        piece: Piece,
    ) -> Self {
        Self {
            kind: MessageKind::File,
            name: name.into(),
            content_hash: content_hash.into(),
            size,
            chunk_size,
            count: Some(1),
            pieces: vec![piece],
        }
    }

    /// Append the next piece while streaming
    pub fn push_piece(&mut self, piece: Piece) {
        self.pieces.push(piece);
    }

    /// Mark the descriptor complete, fixing `count` to the number of pieces
    pub fn finalize(&mut self) {
        self.count = Some(self.pieces.len() as u32);
    }

    /// The only piece of a `file` message
    pub fn single_piece(&self) -> Option<&Piece> {
        match (self.kind, self.pieces.as_slice()) {
            (MessageKind::File, [piece]) => Some(piece),
            _ => None,
        }
    }

    /// Mutable access to the only piece of a `file` message
    pub fn single_piece_mut(&mut self) -> Option<&mut Piece> {
        match (self.kind, self.pieces.as_mut_slice()) {
            (MessageKind::File, [piece]) => Some(piece),
            _ => None,
        }
    }

    /// Check the structural invariants a decoded message must satisfy before use.
    ///
    /// For `meta` messages: count is set and matches the pieces, parts run 1..=count,
    /// sizes add up to the file size and only the final piece may be shorter than
    /// `chunk_size`. For `file` messages: exactly one piece whose payload length
    /// matches its declared size.
    pub fn validate(&self) -> Result<(), CodecError> {
        match self.kind {
            MessageKind::Meta => self.validate_meta(),
            MessageKind::File => self.validate_file(),
        }
    }

    fn validate_meta(&self) -> Result<(), CodecError> {
        let count = self.count.ok_or_else(|| inconsistent("count is not set"))?;
        if count as usize != self.pieces.len() {
            return Err(inconsistent(format!(
                "count {} does not match {} pieces",
                count,
                self.pieces.len()
            )));
        }

        if !self.pieces.is_empty() && self.chunk_size == 0 {
            return Err(inconsistent("chunk_size is zero"));
        }

        let last = self.pieces.len().saturating_sub(1);
        let mut total = 0u64;
        for (index, piece) in self.pieces.iter().enumerate() {
            let expected_part = index as u32 + 1;
            if piece.part != expected_part {
                return Err(inconsistent(format!(
                    "piece {} has part {}, expected {}",
                    index, piece.part, expected_part
                )));
            }
            if piece.size == 0 || piece.size > self.chunk_size {
                return Err(inconsistent(format!(
                    "piece {} has size {} outside 1..={}",
                    piece.part, piece.size, self.chunk_size
                )));
            }
            if index < last && piece.size != self.chunk_size {
                return Err(inconsistent(format!(
                    "non-final piece {} has size {}, expected {}",
                    piece.part, piece.size, self.chunk_size
                )));
            }
            total += u64::from(piece.size);
        }

        if total != self.size {
            return Err(inconsistent(format!(
                "piece sizes add up to {}, file size is {}",
                total, self.size
            )));
        }

        Ok(())
    }

    fn validate_file(&self) -> Result<(), CodecError> {
        let piece = self.single_piece().ok_or_else(|| {
            inconsistent(format!(
                "file message carries {} pieces, expected 1",
                self.pieces.len()
            ))
        })?;

        if let Some(data) = &piece.data {
            if data.len() != piece.size as usize {
                return Err(inconsistent(format!(
                    "piece {} declares {} bytes but carries {}",
                    piece.part,
                    piece.size,
                    data.len()
                )));
            }
        }

        Ok(())
    }
}

fn inconsistent<S: Into<String>>(reason: S) -> CodecError {
    CodecError::Inconsistent {
        reason: reason.into(),
    }
}

/// Calculate the CRC32 used as message trailer
pub fn calculate_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Encode a message into its binary form
pub fn encode(message: &FileMetadata) -> Result<Vec<u8>, CodecError> {
    let payload_len: usize = message
        .pieces
        .iter()
        .map(|p| p.content_hash.len() + p.data.as_ref().map_or(0, Vec::len) + 15)
        .sum();
    let mut buffer =
        Vec::with_capacity(40 + message.name.len() + message.content_hash.len() + payload_len);

    buffer.extend_from_slice(MESSAGE_MAGIC);
    buffer.push(message.kind as u8);
    put_long_bytes(&mut buffer, "name", message.name.as_bytes())?;
    put_short_bytes(&mut buffer, "content_hash", message.content_hash.as_bytes())?;
    buffer.extend_from_slice(&message.size.to_le_bytes());
    buffer.extend_from_slice(&message.chunk_size.to_le_bytes());

    match message.count {
        Some(count) => {
            buffer.push(1);
            buffer.extend_from_slice(&count.to_le_bytes());
        }
        None => {
            buffer.push(0);
            buffer.extend_from_slice(&0u32.to_le_bytes());
        }
    }

    let piece_count = u32::try_from(message.pieces.len()).map_err(|_| CodecError::FieldTooLong {
        field: "pieces",
        length: message.pieces.len(),
    })?;
    buffer.extend_from_slice(&piece_count.to_le_bytes());

    for piece in &message.pieces {
        buffer.extend_from_slice(&piece.part.to_le_bytes());
        buffer.extend_from_slice(&piece.size.to_le_bytes());
        put_short_bytes(&mut buffer, "piece.content_hash", piece.content_hash.as_bytes())?;
        match &piece.data {
            Some(data) => {
                buffer.push(1);
                put_long_bytes(&mut buffer, "piece.data", data)?;
            }
            None => buffer.push(0),
        }
    }

    let checksum = calculate_checksum(&buffer);
    buffer.extend_from_slice(&checksum.to_le_bytes());

    Ok(buffer)
}

/// Decode a message, rejecting anything that is not exactly one well-formed message
pub fn decode(bytes: &[u8]) -> Result<FileMetadata, CodecError> {
    let mut cursor = Cursor::new(bytes);

    let magic: [u8; 4] = read_array(&mut cursor, "magic")?;
    if &magic != MESSAGE_MAGIC {
        return Err(CodecError::InvalidMagic {
            found: magic.to_vec(),
        });
    }

    let kind = MessageKind::try_from(read_u8(&mut cursor, "kind")?)?;
    let name_len = read_u32(&mut cursor, "name_len")? as usize;
    let name = read_string(&mut cursor, name_len, "name")?;
    let hash_len = read_u16(&mut cursor, "hash_len")? as usize;
    let content_hash = read_string(&mut cursor, hash_len, "content_hash")?;
    let size = read_u64(&mut cursor, "size")?;
    let chunk_size = read_u32(&mut cursor, "chunk_size")?;

    let has_count = read_flag(&mut cursor, "count")?;
    let raw_count = read_u32(&mut cursor, "count")?;
    let count = has_count.then_some(raw_count);

    let piece_count = read_u32(&mut cursor, "piece_count")? as usize;
    // Each piece needs at least 15 bytes, so a bogus count cannot trigger a huge allocation
    let mut pieces = Vec::with_capacity(piece_count.min(remaining(&cursor) / 15));
    for _ in 0..piece_count {
        let part = read_u32(&mut cursor, "piece.part")?;
        let piece_size = read_u32(&mut cursor, "piece.size")?;
        let hash_len = read_u16(&mut cursor, "piece.hash_len")? as usize;
        let piece_hash = read_string(&mut cursor, hash_len, "piece.content_hash")?;
        let data = if read_flag(&mut cursor, "piece.data")? {
            let data_len = read_u32(&mut cursor, "piece.data_len")? as usize;
            Some(read_bytes(&mut cursor, data_len, "piece.data")?)
        } else {
            None
        };
        pieces.push(Piece {
            part,
            size: piece_size,
            content_hash: piece_hash,
            data,
        });
    }

    let body_len = cursor.position() as usize;
    let expected = u32::from_le_bytes(read_array::<CHECKSUM_LEN>(&mut cursor, "checksum")?);
    let extra = remaining(&cursor);
    if extra > 0 {
        return Err(CodecError::TrailingBytes { count: extra });
    }

    let calculated = calculate_checksum(&bytes[..body_len]);
    if calculated != expected {
        return Err(CodecError::ChecksumMismatch {
            expected,
            calculated,
        });
    }

    Ok(FileMetadata {
        kind,
        name,
        content_hash,
        size,
        chunk_size,
        count,
        pieces,
    })
}

fn put_short_bytes(buffer: &mut Vec<u8>, field: &'static str, bytes: &[u8]) -> Result<(), CodecError> {
    let len = u16::try_from(bytes.len()).map_err(|_| CodecError::FieldTooLong {
        field,
        length: bytes.len(),
    })?;
    buffer.extend_from_slice(&len.to_le_bytes());
    buffer.extend_from_slice(bytes);
    Ok(())
}

fn put_long_bytes(buffer: &mut Vec<u8>, field: &'static str, bytes: &[u8]) -> Result<(), CodecError> {
    let len = u32::try_from(bytes.len()).map_err(|_| CodecError::FieldTooLong {
        field,
        length: bytes.len(),
    })?;
    buffer.extend_from_slice(&len.to_le_bytes());
    buffer.extend_from_slice(bytes);
    Ok(())
}

fn remaining(cursor: &Cursor<&[u8]>) -> usize {
    cursor
        .get_ref()
        .len()
        .saturating_sub(cursor.position() as usize)
}

fn read_array<const N: usize>(
    cursor: &mut Cursor<&[u8]>,
    field: &'static str,
) -> Result<[u8; N], CodecError> {
    let mut buf = [0u8; N];
    cursor
        .read_exact(&mut buf)
        .map_err(|_| CodecError::Truncated { field })?;
    Ok(buf)
}

fn read_u8(cursor: &mut Cursor<&[u8]>, field: &'static str) -> Result<u8, CodecError> {
    Ok(read_array::<1>(cursor, field)?[0])
}

fn read_u16(cursor: &mut Cursor<&[u8]>, field: &'static str) -> Result<u16, CodecError> {
    Ok(u16::from_le_bytes(read_array(cursor, field)?))
}

fn read_u32(cursor: &mut Cursor<&[u8]>, field: &'static str) -> Result<u32, CodecError> {
    Ok(u32::from_le_bytes(read_array(cursor, field)?))
}

fn read_u64(cursor: &mut Cursor<&[u8]>, field: &'static str) -> Result<u64, CodecError> {
    Ok(u64::from_le_bytes(read_array(cursor, field)?))
}

fn read_flag(cursor: &mut Cursor<&[u8]>, field: &'static str) -> Result<bool, CodecError> {
    match read_u8(cursor, field)? {
        0 => Ok(false),
        1 => Ok(true),
        value => Err(CodecError::InvalidFlag { field, value }),
    }
}

fn read_bytes(
    cursor: &mut Cursor<&[u8]>,
    len: usize,
    field: &'static str,
) -> Result<Vec<u8>, CodecError> {
    if len > remaining(cursor) {
        return Err(CodecError::Truncated { field });
    }
    let mut buf = vec![0u8; len];
    cursor
        .read_exact(&mut buf)
        .map_err(|_| CodecError::Truncated { field })?;
    Ok(buf)
}

fn read_string(
    cursor: &mut Cursor<&[u8]>,
    len: usize,
    field: &'static str,
) -> Result<String, CodecError> {
    let bytes = read_bytes(cursor, len, field)?;
    String::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8 { field })
}
