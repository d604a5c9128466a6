use crate::config::MAX_PAYLOAD_SIZE;
use crate::error::{ProtocolError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Maximum output size for decompression (align with MAX_PAYLOAD_SIZE to prevent DoS)
pub const MAX_DECOMPRESSION_SIZE: usize = MAX_PAYLOAD_SIZE;

/// Gzip-compresses data, as the server does for large Multi containers.
///
/// # Errors
/// Returns `ProtocolError::WriteFailed` if the encoder rejects input
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(ProtocolError::WriteFailed)?;
    encoder.finish().map_err(ProtocolError::WriteFailed)
}

/// Decompresses a gzip stream, refusing to produce more than `limit` bytes.
///
/// `size_hint` is the uncompressed size the sender claimed. It only sizes the
/// initial allocation and is clamped to `limit`.
///
/// # Errors
/// Returns `ProtocolError::DecompressionFailure` if:
/// - The stream is not valid gzip
/// - Output size exceeds `limit`
pub fn decompress_limited(data: &[u8], size_hint: usize, limit: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(size_hint.min(limit));
    let mut reader = GzDecoder::new(data).take(limit as u64 + 1);

    reader
        .read_to_end(&mut out)
        .map_err(|_| ProtocolError::DecompressionFailure)?;

    if out.len() > limit {
        return Err(ProtocolError::DecompressionFailure);
    }
    Ok(out)
}

/// Decompresses with the default [`MAX_DECOMPRESSION_SIZE`] cap.
pub fn decompress(data: &[u8], size_hint: usize) -> Result<Vec<u8>> {
    decompress_limited(data, size_hint, MAX_DECOMPRESSION_SIZE)
}
