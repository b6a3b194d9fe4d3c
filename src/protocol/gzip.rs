use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Wrap bytes in a gzip container: RFC 1952 header, deflate body, CRC-32 and
/// length footer.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .context("Failed to write gzip stream")?;
    encoder.finish().context("Failed to finish gzip stream")
}

/// Recover the original bytes from a gzip container.
///
/// Optional header fields (extra, filename, comment) are skipped and the
/// footer CRC is verified. Any corruption surfaces as an error; callers drop
/// the single affected message rather than failing the session.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .context("Failed to decompress gzip payload")?;
    Ok(out)
}
