//! SHA256 hashing utilities for deduplication.
//!
//! Receipt images are compared by content hash when both submissions carry
//! one, so the same photo saved under two URIs is still caught.

use crate::error::{ErrorContext, QueueError};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Calculate SHA256 hash of a file's content, streaming it in chunks
pub fn calculate_file_hash_sha256(file_path: &Path) -> Result<String, QueueError> {
    let file = File::open(file_path).context("Failed to open file for hashing")?;
    let mut reader = BufReader::new(file);

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_CHUNK_SIZE];
    loop {
        let read = reader
            .read(&mut buffer)
            .context("Failed to read file for hashing")?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Calculate SHA256 hash of bytes in memory
pub fn calculate_content_hash_sha256(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}
