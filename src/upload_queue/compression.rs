//! Gzip compression utilities for upload optimization.
//!
//! Receipt payloads can embed large metadata blobs; compressing the request
//! body reduces transfer size on slow mobile links.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;

/// Compress a request body using gzip
pub fn compress_body(content: &[u8]) -> Result<Vec<u8>, String> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(content)
        .map_err(|e| format!("Failed to compress content: {}", e))?;
    encoder
        .finish()
        .map_err(|e| format!("Failed to finalize compression: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn test_compress_empty_content() {
        // Even empty content produces gzip headers
        assert!(!compress_body(b"").unwrap().is_empty());
    }

    #[test]
    fn test_compressed_body_decodes() {
        let body = br#"{"id":"bill_1","payload":{"storeId":"s1"}}"#.repeat(50);
        let compressed = compress_body(&body).unwrap();
        assert!(compressed.len() < body.len());

        let mut decoded = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, body);
    }
}
