// backuptool/src/codec/compression.rs
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::errors::{AppError, Result};

/// Gzip-compresses a whole buffer.
pub fn compress(raw: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(raw.len() / 4), Compression::default());
    encoder
        .write_all(raw)
        .map_err(|e| AppError::Codec(format!("Compression failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| AppError::Codec(format!("Failed to finish gzip stream: {}", e)))
}

/// Inverse of [`compress`]. Fails on truncated or corrupted input.
pub fn decompress(compressed: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(compressed);
    let mut raw = Vec::new();
    decoder
        .read_to_end(&mut raw)
        .map_err(|e| AppError::Codec(format!("Decompression failed: {}", e)))?;
    Ok(raw)
}
