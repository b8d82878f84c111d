//! TBasket decoding: one serialized batch of entries for a single branch.
//!
//! A basket starts with a TKey-like header. Free-standing baskets are located
//! by their own key and may be compressed; embedded baskets live inside their
//! TBranch and are always stored raw. Either way the payload is split at
//! `border` into entry data and an optional entry-offset footer.

use rayon::prelude::*;

use crate::cursor::Cursor;
use crate::decompress::{BlockInfo, Decompressor};
use crate::error::{Result, RootError};

/// Size of the `>ihiIhh` key prefix.
const PREFIX_LEN: usize = 18;
/// Size of the `>Hiiii` basket trailer.
const TRAILER_LEN: usize = 18;

/// The fixed-layout header at the start of every basket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasketHeader {
    /// `fNbytes`: key plus (compressed) object.
    pub bytes_total: i32,
    /// Version of the key.
    pub key_version: i16,
    /// `fObjlen`: uncompressed object length.
    pub object_len: i32,
    /// `fDatime`
    pub datime: u32,
    /// `fKeylen`
    pub key_len: i16,
    /// `fCycle`
    pub cycle: i16,
    /// TBasket class version.
    pub version: u16,
    /// `fBufferSize`
    pub buffer_size: i32,
    /// `fNevBufSize`: fixed entry size, if every entry has the same size.
    pub entry_size: i32,
    /// `fNevBuf`: number of entries.
    pub entry_count: i32,
    /// `fLast`: end of entry data, measured from the start of the key.
    pub last_offset: i32,
}

impl BasketHeader {
    /// Read the header; leaves the cursor at `start + key_len`.
    pub fn read(cursor: &mut Cursor) -> Result<Self> {
        let start = cursor.pos();
        let bytes_total = cursor.read_i32()?;
        let key_version = cursor.read_i16()?;
        let object_len = cursor.read_i32()?;
        let datime = cursor.read_u32()?;
        let key_len = cursor.read_i16()?;
        let cycle = cursor.read_i16()?;

        // Class name, name and title sit between prefix and trailer.
        let trailer = (start + key_len.max(0) as usize)
            .checked_sub(TRAILER_LEN + 1)
            .filter(|&pos| pos >= start + PREFIX_LEN)
            .ok_or_else(|| {
                RootError::Deserialization(format!("basket key length {} is too short", key_len))
            })?;
        cursor.move_to(trailer)?;

        let version = cursor.read_u16()?;
        let buffer_size = cursor.read_i32()?;
        let entry_size = cursor.read_i32()?;
        let entry_count = cursor.read_i32()?;
        let last_offset = cursor.read_i32()?;
        cursor.skip(1)?;

        Ok(Self {
            bytes_total,
            key_version,
            object_len,
            datime,
            key_len,
            cycle,
            version,
            buffer_size,
            entry_size,
            entry_count,
            last_offset,
        })
    }

    /// Whether the basket is stored inside its TBranch.
    pub fn is_embedded(&self) -> bool {
        self.bytes_total <= i32::from(self.key_len)
    }

    /// Boundary between entry data and the entry-offset footer.
    pub fn border(&self) -> i64 {
        i64::from(self.last_offset) - i64::from(self.key_len)
    }

    /// Bytes on disk, key included.
    pub fn compressed_bytes(&self) -> i64 {
        i64::from(self.bytes_total)
    }

    /// Bytes once decompressed, key included.
    pub fn uncompressed_bytes(&self) -> i64 {
        i64::from(self.key_len) + i64::from(self.object_len)
    }

    fn has_embedded_footer(&self) -> bool {
        i64::from(self.entry_size) * i64::from(self.entry_count) + i64::from(self.key_len)
            != i64::from(self.last_offset)
    }
}

/// Per-decode options.
#[derive(Debug, Clone, Copy)]
pub struct BasketContext {
    /// Index of the basket within its branch, for diagnostics.
    pub basket_num: Option<usize>,
    /// When `false`, only the header is parsed.
    pub read_basket: bool,
}

impl Default for BasketContext {
    fn default() -> Self {
        Self { basket_num: None, read_basket: true }
    }
}

impl BasketContext {
    /// Context for basket `n` of a branch.
    pub fn numbered(n: usize) -> Self {
        Self { basket_num: Some(n), ..Self::default() }
    }
}

/// A decoded basket.
#[derive(Debug, Clone)]
pub struct Basket {
    header: BasketHeader,
    basket_num: Option<usize>,
    /// Entry data, followed by the footer when `has_raw` is set.
    payload: Option<Vec<u8>>,
    has_raw: bool,
    data_len: usize,
    byte_offsets: Option<Vec<usize>>,
    block_compression_info: Option<Vec<BlockInfo>>,
}

impl Basket {
    /// Decode a basket from bytes that start at its key.
    pub fn decode(
        bytes: &[u8],
        ctx: &BasketContext,
        decompressor: &dyn Decompressor,
    ) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let header = BasketHeader::read(&mut cursor)?;
        Self::from_header(header, &mut cursor, ctx, decompressor)
    }

    /// Decode the basket whose key starts at `seek` in `source`.
    pub fn read_at(
        source: &[u8],
        seek: u64,
        ctx: &BasketContext,
        decompressor: &dyn Decompressor,
    ) -> Result<Self> {
        let pos = usize::try_from(seek)
            .map_err(|_| RootError::Deserialization(format!("seek offset too large: {}", seek)))?;
        if pos >= source.len() {
            return Err(RootError::BufferUnderflow { offset: pos, need: 1, have: 0 });
        }
        let rest = &source[pos..];
        let mut peek = Cursor::new(rest);
        let bytes_total = peek.read_i32()?;
        peek.move_to(14)?;
        let key_len = peek.read_i16()?;

        // Only free-standing baskets know their own extent.
        let bytes = if bytes_total > i32::from(key_len.max(0)) {
            let n = bytes_total as usize;
            if n > rest.len() {
                return Err(RootError::BufferUnderflow { offset: pos, need: n, have: rest.len() });
            }
            &rest[..n]
        } else {
            rest
        };
        Self::decode(bytes, ctx, decompressor)
    }

    /// Decode the payload that follows an already-read header.
    pub fn from_header(
        header: BasketHeader,
        cursor: &mut Cursor,
        ctx: &BasketContext,
        decompressor: &dyn Decompressor,
    ) -> Result<Self> {
        let mut basket = Self {
            header,
            basket_num: ctx.basket_num,
            payload: None,
            has_raw: false,
            data_len: 0,
            byte_offsets: None,
            block_compression_info: None,
        };
        if !ctx.read_basket {
            return Ok(basket);
        }

        let border = usize::try_from(header.border()).map_err(|_| {
            RootError::Deserialization(format!(
                "basket border is negative (fLast={}, fKeylen={})",
                header.last_offset, header.key_len
            ))
        })?;

        if header.is_embedded() {
            basket.read_embedded(cursor, border)?;
        } else {
            basket.read_free_standing(cursor, border, decompressor)?;
        }

        log::debug!(
            "basket {:?}: embedded={} entries={} border={} offsets={} blocks={}",
            basket.basket_num,
            header.is_embedded(),
            header.entry_count,
            border,
            basket.byte_offsets.is_some(),
            basket.block_compression_info.as_ref().map_or(0, Vec::len),
        );
        Ok(basket)
    }

    fn read_embedded(&mut self, cursor: &mut Cursor, border: usize) -> Result<()> {
        let header = self.header;
        if header.has_embedded_footer() {
            let n = self.entry_count_usize()?;
            let footer = cursor.read_bytes(8 + n * 4)?;
            self.byte_offsets = Some(rebase_offsets(footer, &header, border)?);
            cursor.skip_back(4)?;
        }

        // The second key carries no new information.
        cursor.skip(key_len_usize(&header)?)?;

        let data = if border == 0 { Vec::new() } else { cursor.read_bytes(border)?.to_vec() };
        self.data_len = data.len();
        self.payload = Some(data);
        Ok(())
    }

    fn read_free_standing(
        &mut self,
        cursor: &mut Cursor,
        border: usize,
        decompressor: &dyn Decompressor,
    ) -> Result<()> {
        let header = self.header;
        let compressed = usize::try_from(i64::from(header.bytes_total) - i64::from(header.key_len))
            .map_err(|_| RootError::Deserialization("basket size smaller than its key".into()))?;
        let uncompressed = usize::try_from(header.object_len).map_err(|_| {
            RootError::Deserialization(format!("negative object length {}", header.object_len))
        })?;

        let raw = if compressed != uncompressed {
            let src = cursor.read_bytes(compressed)?;
            let (raw, blocks) = decompressor.decompress(src, compressed, uncompressed)?;
            self.block_compression_info = Some(blocks);
            raw
        } else {
            cursor.read_bytes(uncompressed)?.to_vec()
        };

        if border != uncompressed {
            if border > raw.len() {
                return Err(RootError::Deserialization(format!(
                    "basket border {} lies past the {} payload bytes",
                    border,
                    raw.len()
                )));
            }
            self.byte_offsets = Some(rebase_offsets(&raw[border..], &header, border)?);
        }

        self.data_len = border.min(raw.len());
        self.has_raw = true;
        self.payload = Some(raw);
        Ok(())
    }

    fn entry_count_usize(&self) -> Result<usize> {
        usize::try_from(self.header.entry_count).map_err(|_| {
            RootError::Deserialization(format!(
                "negative entry count {}",
                self.header.entry_count
            ))
        })
    }

    /// The parsed header.
    pub fn header(&self) -> &BasketHeader {
        &self.header
    }

    /// Index of this basket within its branch, if known.
    pub fn basket_num(&self) -> Option<usize> {
        self.basket_num
    }

    /// Whether the basket was stored inside its TBranch.
    pub fn is_embedded(&self) -> bool {
        self.header.is_embedded()
    }

    /// Boundary between entry data and entry offsets.
    pub fn border(&self) -> i64 {
        self.header.border()
    }

    /// Number of entries (`fNevBuf`).
    pub fn num_entries(&self) -> usize {
        usize::try_from(self.header.entry_count).unwrap_or(0)
    }

    /// Uncompressed data and footer together; absent for embedded baskets.
    pub fn raw_data(&self) -> Option<&[u8]> {
        self.payload.as_deref().filter(|_| self.has_raw)
    }

    /// Entry data without the footer.
    pub fn data(&self) -> Option<&[u8]> {
        self.payload.as_deref().map(|p| &p[..self.data_len])
    }

    /// Entry boundaries into [`Basket::data`], `num_entries + 1` long.
    pub fn byte_offsets(&self) -> Option<&[usize]> {
        self.byte_offsets.as_deref()
    }

    /// Blocks met while decompressing; `None` if stored uncompressed.
    pub fn block_compression_info(&self) -> Option<&[BlockInfo]> {
        self.block_compression_info.as_deref()
    }

    /// Bytes of entry `i`, when the basket has entry offsets.
    pub fn entry(&self, i: usize) -> Option<&[u8]> {
        let offsets = self.byte_offsets.as_ref()?;
        let (start, stop) = (*offsets.get(i)?, *offsets.get(i + 1)?);
        self.data()?.get(start..stop)
    }
}

/// Decode the footer's big-endian offsets into data-relative positions.
///
/// The first word is dropped, the rest are shifted by `key_len`, and the last
/// offset is replaced by `border`.
fn rebase_offsets(footer: &[u8], header: &BasketHeader, border: usize) -> Result<Vec<usize>> {
    if footer.len() % 4 != 0 || footer.len() < 8 {
        return Err(RootError::Deserialization(format!(
            "entry-offset footer of {} bytes is not a whole number of offsets",
            footer.len()
        )));
    }
    let expected = usize::try_from(header.entry_count).unwrap_or(0) + 1;
    let found = footer.len() / 4 - 1;
    if found != expected {
        return Err(RootError::Deserialization(format!(
            "entry-offset footer holds {} offsets, expected {}",
            found, expected
        )));
    }

    let key_len = i64::from(header.key_len);
    let mut offsets = footer
        .chunks_exact(4)
        .skip(1)
        .take(expected - 1)
        .map(|w| {
            let v = i64::from(i32::from_be_bytes([w[0], w[1], w[2], w[3]])) - key_len;
            usize::try_from(v).map_err(|_| {
                RootError::Deserialization(format!("entry offset {} precedes the key", v))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    offsets.push(border);
    Ok(offsets)
}

fn key_len_usize(header: &BasketHeader) -> Result<usize> {
    usize::try_from(header.key_len)
        .map_err(|_| RootError::Deserialization(format!("negative key length {}", header.key_len)))
}

/// Decode every basket at `seeks`, in order. `ctx.basket_num` is replaced by
/// each basket's position in `seeks`.
///
/// With `parallel`, baskets are decoded on the rayon pool; each worker owns
/// its own cursor and the decompressor is shared.
pub fn decode_baskets(
    source: &[u8],
    seeks: &[u64],
    ctx: &BasketContext,
    decompressor: &dyn Decompressor,
    parallel: bool,
) -> Result<Vec<Basket>> {
    let decode_one = |(i, &seek): (usize, &u64)| {
        let ctx = BasketContext { basket_num: Some(i), ..*ctx };
        Basket::read_at(source, seek, &ctx, decompressor)
    };
    if parallel {
        seeks.par_iter().enumerate().map(decode_one).collect()
    } else {
        seeks.iter().enumerate().map(decode_one).collect()
    }
}
