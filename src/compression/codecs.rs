use std::io::{Read, Write};
use flate2::Compression;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
use weezl::BitOrder;
use crate::core::error::{Error, ErrorKind, Result};

/// LZW literal width. Codes start at 9 bits, MSB-first packing.
const LZW_LITERAL_WIDTH: u8 = 8;

pub fn compress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

pub fn compress_zlib(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

pub fn compress_deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

pub fn compress_lzw(data: &[u8]) -> Result<Vec<u8>> {
    weezl::encode::Encoder::new(BitOrder::Msb, LZW_LITERAL_WIDTH)
        .encode(data)
        .map_err(|e| Error::new(ErrorKind::Internal, format!("LZW encode: {}", e)))
}

// Decoders append to `out`; on error `out` may hold a partial result and the
// caller is responsible for truncating it.

pub fn decompress_gzip(data: &[u8], out: &mut Vec<u8>) -> Result<()> {
    GzDecoder::new(data).read_to_end(out)?;
    Ok(())
}

pub fn decompress_zlib(data: &[u8], out: &mut Vec<u8>) -> Result<()> {
    ZlibDecoder::new(data).read_to_end(out)?;
    Ok(())
}

pub fn decompress_deflate(data: &[u8], out: &mut Vec<u8>) -> Result<()> {
    DeflateDecoder::new(data).read_to_end(out)?;
    Ok(())
}

pub fn decompress_lzw(data: &[u8], out: &mut Vec<u8>) -> Result<()> {
    let decoded = weezl::decode::Decoder::new(BitOrder::Msb, LZW_LITERAL_WIDTH)
        .decode(data)
        .map_err(|e| Error::new(ErrorKind::Corrupted, format!("LZW decode: {}", e)))?;
    out.extend_from_slice(&decoded);
    Ok(())
}
