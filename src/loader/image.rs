//! Sequential reader over a host-resident image file.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{Error, Result};

/// Offset-tracking byte reader over an image.
///
/// Generic over the underlying reader so images can also come from memory.
pub struct ImageSource<R = File> {
    inner: R,
    offset: u64,
    len: u64,
}

impl ImageSource<File> {
    /// Open an image file read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::NotFound(path.to_path_buf()),
            _ => Error::Io(e),
        })?;
        Self::new(file)
    }
}

impl<R: Read + Seek> ImageSource<R> {
    /// Wrap a reader, measuring the image length.
    pub fn new(mut inner: R) -> Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self {
            inner,
            offset: 0,
            len,
        })
    }

    /// Current read offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Image length in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Position the reader at `offset`.
    ///
    /// Offsets past the end of the image are legal; reads from there
    /// return no bytes.
    pub fn seek_to(&mut self, offset: u64) -> Result<()> {
        if offset != self.offset {
            self.inner.seek(SeekFrom::Start(offset.min(self.len)))?;
            self.offset = offset;
        }
        Ok(())
    }

    /// Read up to `buf.len()` bytes, stopping early only at end of stream.
    ///
    /// Returns the number of bytes read.
    pub fn read_full(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.offset > self.len {
            return Ok(0);
        }
        let mut total = 0;
        while total < buf.len() {
            match self.inner.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }
        self.offset += total as u64;
        Ok(total)
    }

    /// Fill `buf` completely or fail with [`Error::ShortRead`].
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let start = self.offset;
        let actual = self.read_full(buf)?;
        if actual < buf.len() {
            return Err(Error::ShortRead {
                offset: start,
                expected: buf.len(),
                actual,
            });
        }
        Ok(())
    }

    /// Read exactly `buf.len()` bytes starting at `offset`.
    pub fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.seek_to(offset)?;
        self.read_exact(buf)
    }
}
