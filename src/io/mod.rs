//! Byte-level I/O for the archive engine.
//!
//! - [`FieldReader`] / [`FieldWriter`]: bounds-checked little-endian field
//!   codecs over in-memory buffers, used by every on-disk record type.
//! - [`ArchiveFile`]: a random-access file handle with 64-bit seek/tell,
//!   positioned reads, block copy for splicing and truncation.
//! - [`ReadAt`]: the random-access read abstraction the parsers are generic
//!   over, so they run unchanged against a file or an in-memory buffer.

mod fields;
mod file;

pub use fields::{FieldReader, FieldWriter, alloc_buffer};
pub use file::ArchiveFile;

use std::io::Cursor;

use crate::error::{Result, ZipError};

/// Trait for random access reading from a data source
pub trait ReadAt {
    /// Fill `buf` entirely with the bytes starting at `offset`.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Get the total size of the data source
    fn size(&mut self) -> Result<u64>;
}

impl<T: AsRef<[u8]>> ReadAt for Cursor<T> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let data = self.get_ref().as_ref();
        let start = usize::try_from(offset).ok().filter(|&s| s <= data.len());
        match start.and_then(|s| data.get(s..s + buf.len())) {
            Some(src) => {
                buf.copy_from_slice(src);
                Ok(())
            }
            None => Err(ZipError::ReadError {
                offset,
                source: std::io::Error::from(std::io::ErrorKind::UnexpectedEof),
            }),
        }
    }

    fn size(&mut self) -> Result<u64> {
        Ok(self.get_ref().as_ref().len() as u64)
    }
}

/// Read `len` bytes at `offset` into a freshly allocated buffer.
pub fn read_vec_at<R: ReadAt + ?Sized>(reader: &mut R, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut buf = alloc_buffer(len)?;
    reader.read_at(offset, &mut buf)?;
    Ok(buf)
}
