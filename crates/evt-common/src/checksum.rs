//! SHA-256 digests of staged artifacts

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Hex SHA-256 of a file. Blocking; call from `spawn_blocking` in async code.
pub fn compute_file_checksum(path: impl AsRef<Path>) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    compute_checksum(&mut file)
}

/// Hex SHA-256 of any readable source
pub fn compute_checksum<R: Read>(reader: &mut R) -> Result<String> {
    let mut hasher = StreamingChecksum::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize())
}

/// Incremental SHA-256 over chunks as they arrive, e.g. a streamed download
#[derive(Debug, Clone, Default)]
pub struct StreamingChecksum {
    hasher: Sha256,
    bytes: u64,
}

impl StreamingChecksum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes += chunk.len() as u64;
    }

    /// Bytes hashed so far
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn finalize(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const HELLO_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_compute_checksum() {
        let mut cursor = Cursor::new(b"hello world");
        assert_eq!(compute_checksum(&mut cursor).unwrap(), HELLO_SHA256);
    }

    #[test]
    fn test_streamed_chunks_match_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        std::fs::write(&path, b"hello world").unwrap();

        let mut streaming = StreamingChecksum::new();
        streaming.update(b"hello ");
        streaming.update(b"world");
        assert_eq!(streaming.bytes(), 11);

        assert_eq!(compute_file_checksum(&path).unwrap(), HELLO_SHA256);
        assert_eq!(streaming.finalize(), HELLO_SHA256);
    }
}
