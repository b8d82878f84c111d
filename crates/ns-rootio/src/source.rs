//! Memory-mapped or owned byte ranges that baskets are read from.

use std::fs;
use std::ops::Deref;
use std::path::Path;

use crate::error::{Result, RootError};

/// Backing storage for basket reads.
///
/// `Mmap` avoids copying multi-GB files into RAM;
/// `Owned` is used for `from_bytes()` and testing.
pub enum Source {
    /// Bytes owned in a `Vec<u8>`.
    Owned(Vec<u8>),
    /// Memory-mapped file.
    Mmap(memmap2::Mmap),
}

impl Source {
    /// Memory-map a file from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = fs::File::open(path.as_ref())?;
        // SAFETY: the mapping is only read; concurrent truncation of the file
        // by another process is outside what this reader guards against.
        let mmap = unsafe { memmap2::Mmap::map(&file)? };
        Ok(Source::Mmap(mmap))
    }

    /// Wrap bytes already in memory.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Source::Owned(data)
    }

    /// Bounds-checked view of `len` bytes starting at `start`.
    pub fn range(&self, start: u64, len: usize) -> Result<&[u8]> {
        let start = usize::try_from(start)
            .map_err(|_| RootError::Deserialization(format!("seek offset too large: {}", start)))?;
        let end = start.checked_add(len).ok_or_else(|| {
            RootError::Deserialization(format!("range length too large: {}", len))
        })?;
        if end > self.len() {
            return Err(RootError::BufferUnderflow {
                offset: start,
                need: len,
                have: self.len().saturating_sub(start),
            });
        }
        Ok(&self[start..end])
    }
}

impl Deref for Source {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        match self {
            Source::Owned(v) => v,
            Source::Mmap(m) => m,
        }
    }
}

impl AsRef<[u8]> for Source {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self
    }
}
