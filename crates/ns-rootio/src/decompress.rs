//! ROOT compression block decompression (ZL = zlib, L4 = LZ4, ZS = ZSTD, XZ = LZMA).
//!
//! ROOT writes compressed data as one or more 9-byte-header blocks:
//! ```text
//! bytes 0-1:  algorithm tag ("ZL", "XZ", "L4", "ZS")
//! byte  2:    method (ignored)
//! bytes 3-5:  compressed size   (3-byte little-endian)
//! bytes 6-8:  uncompressed size (3-byte little-endian)
//! ```
//! The compressed payload immediately follows the 9-byte header.

use std::fmt;

use crate::error::{Result, RootError};

const BLOCK_HEADER_LEN: usize = 9;
const LZ4_CHECKSUM_LEN: usize = 8;

std::thread_local! {
    static ZSTD_DECODER: std::cell::RefCell<ruzstd::decoding::FrameDecoder> =
        std::cell::RefCell::new(ruzstd::decoding::FrameDecoder::new());
}

/// Compression algorithm of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// `ZL`
    Zlib,
    /// `XZ`
    Lzma,
    /// `L4`, with an 8-byte xxhash64 prefix.
    Lz4,
    /// `ZS`
    Zstd,
}

impl Algorithm {
    /// Name reported in block accounting.
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Zlib => "ZLIB",
            Algorithm::Lzma => "LZMA",
            Algorithm::Lz4 => "LZ4",
            Algorithm::Zstd => "ZSTD",
        }
    }

    fn from_tag(tag: &[u8]) -> Result<Self> {
        match tag {
            b"ZL" => Ok(Algorithm::Zlib),
            b"XZ" => Ok(Algorithm::Lzma),
            b"L4" => Ok(Algorithm::Lz4),
            b"ZS" => Ok(Algorithm::Zstd),
            b"CS" => Err(RootError::Decompression(
                "unsupported compression algorithm: CS (obsolete ROOT algorithm)".into(),
            )),
            _ => Err(RootError::Decompression(format!(
                "unrecognized compression algorithm: {:?}",
                String::from_utf8_lossy(tag)
            ))),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Accounting for one compressed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Algorithm named by the block header.
    pub algorithm: Algorithm,
    /// Bytes the block occupies on disk, header included.
    pub compressed_size: usize,
    /// Bytes the block expands to.
    pub uncompressed_size: usize,
}

/// Turns a compressed payload into its uncompressed bytes.
///
/// Implementations are shared between basket-decoding threads.
pub trait Decompressor: Send + Sync {
    /// Decompress the first `compressed_len` bytes of `src` into exactly
    /// `uncompressed_len` bytes, reporting every block encountered.
    fn decompress(
        &self,
        src: &[u8],
        compressed_len: usize,
        uncompressed_len: usize,
    ) -> Result<(Vec<u8>, Vec<BlockInfo>)>;
}

/// The block codecs ROOT itself writes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RootDecompressor;

impl Decompressor for RootDecompressor {
    fn decompress(
        &self,
        src: &[u8],
        compressed_len: usize,
        uncompressed_len: usize,
    ) -> Result<(Vec<u8>, Vec<BlockInfo>)> {
        decompress(src, compressed_len, uncompressed_len)
    }
}

/// Decompress ROOT-compressed data into `expected_len` bytes.
pub fn decompress(
    src: &[u8],
    compressed_len: usize,
    expected_len: usize,
) -> Result<(Vec<u8>, Vec<BlockInfo>)> {
    if compressed_len > src.len() {
        return Err(RootError::Decompression(format!(
            "compressed payload claims {} bytes but only {} are available",
            compressed_len,
            src.len()
        )));
    }
    let src = &src[..compressed_len];
    let mut out = Vec::with_capacity(expected_len);
    let mut blocks = Vec::new();
    let mut offset = 0;

    while offset < src.len() {
        if offset + BLOCK_HEADER_LEN > src.len() {
            return Err(RootError::Decompression(format!(
                "truncated block header at byte {} of {}",
                offset,
                src.len()
            )));
        }
        let algorithm = Algorithm::from_tag(&src[offset..offset + 2])?;
        let c_size = read_le24(&src[offset + 3..offset + 6]);
        let u_size = read_le24(&src[offset + 6..offset + 9]);
        let start = offset + BLOCK_HEADER_LEN;

        let end = start + c_size;
        if end > src.len() {
            return Err(RootError::Decompression(format!(
                "compressed block claims {} bytes but only {} remain",
                c_size,
                src.len() - start
            )));
        }

        let compressed = &src[start..end];
        let decompressed = match algorithm {
            Algorithm::Zlib => decompress_zlib(compressed, u_size)?,
            Algorithm::Lz4 => decompress_lz4(compressed, u_size)?,
            Algorithm::Zstd => decompress_zstd(compressed, u_size)?,
            Algorithm::Lzma => decompress_xz(compressed, u_size)?,
        };

        if decompressed.len() != u_size {
            return Err(RootError::Decompression(format!(
                "after {} blocks, a {} block of {} bytes decompressed to {} bytes, header expects {}",
                blocks.len(),
                algorithm,
                c_size,
                decompressed.len(),
                u_size
            )));
        }

        out.extend_from_slice(&decompressed);
        blocks.push(BlockInfo {
            algorithm,
            compressed_size: end - offset,
            uncompressed_size: u_size,
        });
        offset = end;
    }

    if out.len() != expected_len {
        return Err(RootError::Decompression(format!(
            "total decompressed length {} != expected {}",
            out.len(),
            expected_len
        )));
    }

    Ok((out, blocks))
}

fn decompress_zlib(data: &[u8], expected: usize) -> Result<Vec<u8>> {
    use flate2::read::ZlibDecoder;
    use std::io::Read;

    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::with_capacity(expected);
    decoder.read_to_end(&mut out).map_err(|e| RootError::Decompression(format!("zlib: {}", e)))?;
    Ok(out)
}

fn decompress_lz4(data: &[u8], expected: usize) -> Result<Vec<u8>> {
    // The first 8 bytes are an xxhash64 of the compressed payload (not verified).
    if data.len() < LZ4_CHECKSUM_LEN {
        return Err(RootError::Decompression("LZ4 block too small for checksum header".into()));
    }
    lz4_flex::decompress(&data[LZ4_CHECKSUM_LEN..], expected)
        .map_err(|e| RootError::Decompression(format!("lz4: {}", e)))
}

fn decompress_zstd(data: &[u8], expected: usize) -> Result<Vec<u8>> {
    let mut out = vec![0u8; expected];
    let bytes_written = ZSTD_DECODER
        .with(|cell| cell.borrow_mut().decode_all(data, &mut out))
        .map_err(|e| RootError::Decompression(format!("zstd: {}", e)))?;
    out.truncate(bytes_written);
    Ok(out)
}

fn decompress_xz(data: &[u8], expected: usize) -> Result<Vec<u8>> {
    let mut input = std::io::BufReader::new(data);
    let mut out = Vec::with_capacity(expected);
    lzma_rs::xz_decompress(&mut input, &mut out)
        .map_err(|e| RootError::Decompression(format!("xz: {}", e)))?;
    Ok(out)
}

/// Read a 3-byte little-endian unsigned integer.
fn read_le24(b: &[u8]) -> usize {
    b[0] as usize | ((b[1] as usize) << 8) | ((b[2] as usize) << 16)
}
