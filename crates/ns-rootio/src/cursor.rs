//! Positioned big-endian reader over an immutable byte range.

use crate::error::{Result, RootError};

/// Set on the first u32 of a streamed object when a byte count is present.
pub const K_BYTE_COUNT_MASK: u32 = 0x4000_0000;
/// Set on a version word when the object was streamed member-wise.
pub const K_STREAMED_MEMBER_WISE: u16 = 0x4000;
/// `TObject` version flag announcing an extra 4-byte word.
const K_BYTE_COUNT_V_MASK: u16 = 0x4000;
/// `TObject::fBits` flag: the object carries a 2-byte process id.
const K_IS_REFERENCED: u32 = 0x0000_0010;
/// `TObject::fBits` flag ROOT always sets on objects read from disk.
const K_IS_ON_HEAP: u32 = 0x0100_0000;

/// The byte-count/version prefix of a streamed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionHeader {
    /// Bytes following the count word, if a count was written.
    pub num_bytes: Option<u32>,
    /// Class version of this instance (member-wise bit cleared).
    pub version: u16,
    /// Whether the instance was streamed member-wise.
    pub is_memberwise: bool,
}

/// A cursor-based reader over a byte slice, using ROOT's big-endian conventions.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    /// Create a new reader over the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current read position.
    #[inline]
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Total length of the underlying view.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the view is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Remaining bytes from current position.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Jump to an absolute position within the view.
    pub fn move_to(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(RootError::BufferUnderflow {
                offset: self.pos,
                need: pos - self.pos,
                have: self.remaining(),
            });
        }
        self.pos = pos;
        Ok(())
    }

    /// Skip `n` bytes forward.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.ensure(n)?;
        self.pos += n;
        Ok(())
    }

    /// Step `n` bytes backward.
    pub fn skip_back(&mut self, n: usize) -> Result<()> {
        self.pos = self.pos.checked_sub(n).ok_or_else(|| {
            RootError::Deserialization(format!("cannot step back {} bytes from {}", n, self.pos))
        })?;
        Ok(())
    }

    /// Read a sub-slice of `n` bytes, advancing the cursor.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.ensure(n)?;
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    /// Read a signed byte.
    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(i8::from_be_bytes(self.read_array()?))
    }

    /// Read a one-byte boolean.
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Read a big-endian u16.
    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    /// Read a big-endian i16.
    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_be_bytes(self.read_array()?))
    }

    /// Read a big-endian u32.
    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    /// Read a big-endian i32.
    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.read_array()?))
    }

    /// Read a big-endian u64.
    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    /// Read a big-endian i64.
    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.read_array()?))
    }

    /// Read a big-endian f32.
    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_be_bytes(self.read_array()?))
    }

    /// Read a big-endian f64.
    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_be_bytes(self.read_array()?))
    }

    /// Read a ROOT-encoded string.
    ///
    /// Format: length byte (if < 255), or 255 + u32 length, then UTF-8 bytes.
    pub fn read_string(&mut self) -> Result<String> {
        let first = self.read_u8()?;
        let len = if first == 255 { self.read_u32()? as usize } else { first as usize };
        if len == 0 {
            return Ok(String::new());
        }
        let bytes = self.read_bytes(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Read a streamed object's byte count and version.
    ///
    /// Without the byte-count mask the first two bytes are already the
    /// version, and only those are consumed.
    pub fn read_version_header(&mut self) -> Result<VersionHeader> {
        let raw = self.read_u32()?;
        let (num_bytes, raw_version) = if raw & K_BYTE_COUNT_MASK != 0 {
            (Some(raw & !K_BYTE_COUNT_MASK), self.read_u16()?)
        } else {
            self.skip_back(2)?;
            (None, (raw >> 16) as u16)
        };
        Ok(VersionHeader {
            num_bytes,
            version: raw_version & !K_STREAMED_MEMBER_WISE,
            is_memberwise: raw_version & K_STREAMED_MEMBER_WISE != 0,
        })
    }

    /// Read a `TObject` header and return `(fUniqueID, fBits)`.
    pub fn read_tobject(&mut self) -> Result<(u32, u32)> {
        let version = self.read_u16()?;
        if version & K_BYTE_COUNT_V_MASK != 0 {
            self.skip(4)?;
        }
        let unique_id = self.read_u32()?;
        let bits = self.read_u32()? | K_IS_ON_HEAP;
        if bits & K_IS_REFERENCED != 0 {
            self.skip(2)?;
        }
        Ok((unique_id, bits))
    }

    fn ensure(&self, n: usize) -> Result<()> {
        if self.pos + n > self.data.len() {
            return Err(RootError::BufferUnderflow {
                offset: self.pos,
                need: n,
                have: self.data.len().saturating_sub(self.pos),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jump_past_end_names_the_overrun() {
        let data = [0u8; 8];
        let mut r = Cursor::new(&data);
        r.skip(3).unwrap();
        match r.move_to(12).unwrap_err() {
            RootError::BufferUnderflow { offset, need, have } => {
                assert_eq!((offset, need, have), (3, 9, 5));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(r.pos(), 3);
        r.move_to(8).unwrap();
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn read_primitives() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x40, 0x09, 0x21, 0xfb, 0x54, 0x44, 0x2d, 0x18, 0xff];
        let mut r = Cursor::new(&data);
        assert_eq!(r.read_u32().unwrap(), 0x0102_0304);
        assert!((r.read_f64().unwrap() - std::f64::consts::PI).abs() < 1e-15);
        assert_eq!(r.read_i8().unwrap(), -1);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn read_string_short_and_long() {
        let data = [3, b'a', b'b', b'c'];
        assert_eq!(Cursor::new(&data).read_string().unwrap(), "abc");

        let mut long = vec![255u8];
        long.extend_from_slice(&300u32.to_be_bytes());
        long.extend(std::iter::repeat_n(b'x', 300));
        let mut r = Cursor::new(&long);
        assert_eq!(r.read_string().unwrap().len(), 300);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn version_header_with_bytecount() {
        let mut data = Vec::new();
        data.extend_from_slice(&0x4000_0010u32.to_be_bytes());
        data.extend_from_slice(&3u16.to_be_bytes());
        let mut r = Cursor::new(&data);
        let h = r.read_version_header().unwrap();
        assert_eq!(h, VersionHeader { num_bytes: Some(16), version: 3, is_memberwise: false });
        assert_eq!(r.pos(), 6);
    }

    #[test]
    fn version_header_without_bytecount() {
        let data = [0x00, 0x05, 0x00, 0x00];
        let mut r = Cursor::new(&data);
        let h = r.read_version_header().unwrap();
        assert_eq!(h.version, 5);
        assert!(h.num_bytes.is_none());
        assert_eq!(r.pos(), 2);
    }

    #[test]
    fn version_header_memberwise_bit() {
        let mut data = Vec::new();
        data.extend_from_slice(&0x4000_0006u32.to_be_bytes());
        data.extend_from_slice(&(0x4000u16 | 9).to_be_bytes());
        let h = Cursor::new(&data).read_version_header().unwrap();
        assert!(h.is_memberwise);
        assert_eq!(h.version, 9);
    }

    #[test]
    fn tobject_referenced_skips_pidf() {
        let mut data = Vec::new();
        data.extend_from_slice(&1u16.to_be_bytes());
        data.extend_from_slice(&7u32.to_be_bytes());
        data.extend_from_slice(&K_IS_REFERENCED.to_be_bytes());
        data.extend_from_slice(&[0xAA, 0xBB]);
        let mut r = Cursor::new(&data);
        let (id, bits) = r.read_tobject().unwrap();
        assert_eq!(id, 7);
        assert_ne!(bits & K_IS_ON_HEAP, 0);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn underflow_is_reported() {
        let mut r = Cursor::new(&[0u8; 2]);
        match r.read_u32() {
            Err(RootError::BufferUnderflow { offset: 0, need: 4, have: 2 }) => {}
            other => panic!("unexpected {other:?}"),
        }
        assert!(r.skip_back(1).is_err());
    }
}
