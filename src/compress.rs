//! Outer stream compression.
//!
//! These functions transform a finished byte stream as a whole; they know
//! nothing about the object-graph format inside. The codec applies them
//! either to the entire output or per record behind a size-flag envelope,
//! see [`crate::Config::compression_threshold`].
//!
//! Zlib, raw deflate and gzip are always available through flate2. Snappy
//! and LZ4 sit behind the `snappy` and `lz4` cargo features; selecting a
//! mode that is not compiled in fails with [`CodecError::Compression`].

use crate::{CodecError, Result};
use std::io::{Read, Write};

/// Compression algorithm applied to the encoded stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionMode {
    /// No compression.
    #[default]
    None,
    /// Deflate with a zlib header and checksum.
    Zlib,
    /// Raw deflate, no header.
    Zip,
    /// Deflate with a gzip header and checksum.
    Gzip,
    /// Snappy raw block format (feature `snappy`).
    Snappy,
    /// LZ4 block format with a length prefix (feature `lz4`).
    Lz4,
}

/// Compresses `data` with the selected mode. `level` applies to the deflate
/// family only and is clamped to flate2's 0..=9 range.
pub fn compress(mode: CompressionMode, level: u32, data: &[u8]) -> Result<Vec<u8>> {
    let level = flate2::Compression::new(level.min(9));
    match mode {
        CompressionMode::None => Ok(data.to_vec()),
        CompressionMode::Zlib => {
            let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), level);
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
        CompressionMode::Zip => {
            let mut encoder = flate2::write::DeflateEncoder::new(Vec::new(), level);
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
        CompressionMode::Gzip => {
            let mut encoder = flate2::write::GzEncoder::new(Vec::new(), level);
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
        CompressionMode::Snappy => snappy_compress(data),
        CompressionMode::Lz4 => lz4_compress(data),
    }
}

/// Reverses [`compress`] for the same mode.
pub fn decompress(mode: CompressionMode, data: &[u8]) -> Result<Vec<u8>> {
    match mode {
        CompressionMode::None => Ok(data.to_vec()),
        CompressionMode::Zlib => {
            let mut decoder = flate2::read::ZlibDecoder::new(data);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            Ok(out)
        }
        CompressionMode::Zip => {
            let mut decoder = flate2::read::DeflateDecoder::new(data);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            Ok(out)
        }
        CompressionMode::Gzip => {
            let mut decoder = flate2::read::GzDecoder::new(data);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            Ok(out)
        }
        CompressionMode::Snappy => snappy_decompress(data),
        CompressionMode::Lz4 => lz4_decompress(data),
    }
}

#[cfg(feature = "snappy")]
fn snappy_compress(data: &[u8]) -> Result<Vec<u8>> {
    snap::raw::Encoder::new()
        .compress_vec(data)
        .map_err(|e| CodecError::Compression(format!("snappy: {e}")))
}

#[cfg(feature = "snappy")]
fn snappy_decompress(data: &[u8]) -> Result<Vec<u8>> {
    snap::raw::Decoder::new()
        .decompress_vec(data)
        .map_err(|e| CodecError::Compression(format!("snappy: {e}")))
}

#[cfg(not(feature = "snappy"))]
fn snappy_compress(_data: &[u8]) -> Result<Vec<u8>> {
    Err(CodecError::Compression(
        "snappy support is not compiled in (enable the 'snappy' feature)".into(),
    ))
}

#[cfg(not(feature = "snappy"))]
fn snappy_decompress(_data: &[u8]) -> Result<Vec<u8>> {
    Err(CodecError::Compression(
        "snappy support is not compiled in (enable the 'snappy' feature)".into(),
    ))
}

#[cfg(feature = "lz4")]
fn lz4_compress(data: &[u8]) -> Result<Vec<u8>> {
    Ok(lz4_flex::compress_prepend_size(data))
}

#[cfg(feature = "lz4")]
fn lz4_decompress(data: &[u8]) -> Result<Vec<u8>> {
    lz4_flex::decompress_size_prepended(data)
        .map_err(|e| CodecError::Compression(format!("lz4: {e}")))
}

#[cfg(not(feature = "lz4"))]
fn lz4_compress(_data: &[u8]) -> Result<Vec<u8>> {
    Err(CodecError::Compression(
        "lz4 support is not compiled in (enable the 'lz4' feature)".into(),
    ))
}

#[cfg(not(feature = "lz4"))]
fn lz4_decompress(_data: &[u8]) -> Result<Vec<u8>> {
    Err(CodecError::Compression(
        "lz4 support is not compiled in (enable the 'lz4' feature)".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        // Repeated pattern so every deflate mode actually shrinks it.
        b"ABCDEFGH".iter().cycle().take(512).copied().collect()
    }

    #[test]
    fn none_is_identity() {
        let data = sample();
        assert_eq!(compress(CompressionMode::None, 6, &data).unwrap(), data);
        assert_eq!(decompress(CompressionMode::None, &data).unwrap(), data);
    }

    #[test]
    fn zlib_roundtrip_shrinks() {
        let data = sample();
        let packed = compress(CompressionMode::Zlib, 6, &data).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(decompress(CompressionMode::Zlib, &packed).unwrap(), data);
    }

    #[test]
    fn zip_roundtrip() {
        let data = sample();
        let packed = compress(CompressionMode::Zip, 6, &data).unwrap();
        assert_eq!(decompress(CompressionMode::Zip, &packed).unwrap(), data);
    }

    #[test]
    fn gzip_roundtrip() {
        let data = sample();
        let packed = compress(CompressionMode::Gzip, 6, &data).unwrap();
        assert_eq!(decompress(CompressionMode::Gzip, &packed).unwrap(), data);
    }

    #[test]
    fn zip_is_headerless_zlib() {
        // Same deflate body, zlib adds a 2-byte header and 4-byte checksum.
        let data = sample();
        let zip = compress(CompressionMode::Zip, 6, &data).unwrap();
        let zlib = compress(CompressionMode::Zlib, 6, &data).unwrap();
        assert!(zip.len() < zlib.len());
    }

    #[test]
    fn level_out_of_range_is_clamped() {
        let data = sample();
        let packed = compress(CompressionMode::Zlib, 99, &data).unwrap();
        assert_eq!(decompress(CompressionMode::Zlib, &packed).unwrap(), data);
    }

    #[test]
    fn corrupt_zlib_input_fails() {
        assert!(decompress(CompressionMode::Zlib, &[0xFF, 0xFF, 0xFF, 0xFF]).is_err());
    }

    #[cfg(feature = "snappy")]
    #[test]
    fn snappy_roundtrip() {
        let data = sample();
        let packed = compress(CompressionMode::Snappy, 6, &data).unwrap();
        assert_eq!(decompress(CompressionMode::Snappy, &packed).unwrap(), data);
    }

    #[cfg(not(feature = "snappy"))]
    #[test]
    fn snappy_without_feature_fails() {
        assert!(compress(CompressionMode::Snappy, 6, b"x").is_err());
    }

    #[cfg(feature = "lz4")]
    #[test]
    fn lz4_roundtrip() {
        let data = sample();
        let packed = compress(CompressionMode::Lz4, 6, &data).unwrap();
        assert_eq!(decompress(CompressionMode::Lz4, &packed).unwrap(), data);
    }

    #[cfg(not(feature = "lz4"))]
    #[test]
    fn lz4_without_feature_fails() {
        assert!(compress(CompressionMode::Lz4, 6, b"x").is_err());
    }
}
