//! Content digests for whole files and individual chunks.
//!
//! Both digests are SHA-256 rendered as lowercase hex, so a chunk digest is a
//! pure function of the chunk bytes and doubles as its storage address.

use sha2::{Digest, Sha256};
use std::io;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Length in characters of a hex-encoded digest
pub const DIGEST_HEX_LEN: usize = 64;

/// Read buffer used while streaming a file through the hasher
const READ_BUFFER_SIZE: usize = 8192;

/// Compute the digest of an entire file without loading it into memory.
pub async fn file_digest<P: AsRef<Path>>(path: P) -> io::Result<String> {
    let mut file = File::open(path.as_ref()).await?;
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    let mut hasher = Sha256::new();

    loop {
        let bytes_read = file.read(&mut buffer).await?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compute the digest of one chunk's bytes.
pub fn chunk_digest(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// True if `value` looks like a digest produced by this module.
///
/// Digests end up as file names, so anything else is rejected before it can
/// reach the filesystem.
pub fn is_hex_digest(value: &str) -> bool {
    value.len() == DIGEST_HEX_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_chunk_digest_deterministic() {
        let a = chunk_digest(b"the same bytes");
        let b = chunk_digest(b"the same bytes");
        assert_eq!(a, b);
        assert_eq!(a.len(), DIGEST_HEX_LEN);
        assert!(is_hex_digest(&a));
    }

    #[test]
    fn test_chunk_digest_distinguishes_content() {
        assert_ne!(chunk_digest(b"chunk one"), chunk_digest(b"chunk two"));
        assert_ne!(chunk_digest(b""), chunk_digest(b"\0"));
    }

    #[test]
    fn test_known_vector() {
        assert_eq!(
            chunk_digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_file_digest_matches_chunk_digest_of_contents() {
        // Larger than the read buffer so the streaming loop runs more than once
        let content: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&content).unwrap();

        let digest = file_digest(file.path()).await.unwrap();
        assert_eq!(digest, chunk_digest(&content));
    }

    #[tokio::test]
    async fn test_file_digest_missing_file() {
        let result = file_digest("/definitely/not/here.bin").await;
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_is_hex_digest_rejects_paths() {
        assert!(!is_hex_digest("../../etc/passwd"));
        assert!(!is_hex_digest(&"A".repeat(DIGEST_HEX_LEN)));
        assert!(!is_hex_digest("abc"));
    }
}
