use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::{ReadAt, alloc_buffer};
use crate::error::{Result, ZipError};

/// Random-access handle on an archive file.
///
/// Offsets are 64-bit throughout; only the on-disk record fields are limited
/// to 32 bits. I/O failures are reported as `ReadError`/`WriteError` carrying
/// the absolute offset where they happened.
#[derive(Debug)]
pub struct ArchiveFile {
    file: File,
    path: PathBuf,
}

impl ArchiveFile {
    /// Open an existing archive read-only.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| open_error(path, e))?;
        Ok(Self::from_file(file, path))
    }

    /// Open an existing archive for in-place update.
    pub fn open_rw(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| open_error(path, e))?;
        Ok(Self::from_file(file, path))
    }

    /// Create (or truncate) an archive file.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|source| ZipError::WriteError { offset: 0, source })?;
        Ok(Self::from_file(file, path))
    }

    pub fn from_file(file: File, path: impl Into<PathBuf>) -> Self {
        Self {
            file,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> Result<u64> {
        self.file
            .metadata()
            .map(|m| m.len())
            .map_err(|source| ZipError::ReadError { offset: 0, source })
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn seek_to(&mut self, offset: u64) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|source| ZipError::ReadError { offset, source })?;
        Ok(())
    }

    pub fn tell(&mut self) -> Result<u64> {
        self.file
            .stream_position()
            .map_err(|source| ZipError::ReadError { offset: 0, source })
    }

    /// Write all of `data` at the current position.
    pub fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let offset = self.tell()?;
        self.file
            .write_all(data)
            .map_err(|source| ZipError::WriteError { offset, source })
    }

    /// Overwrite bytes at `offset`. The position is left just past them.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.seek_to(offset)?;
        self.write_all(data)
    }

    /// Forward block copy of `len` bytes from `src` down to `dst`.
    ///
    /// Requires `dst <= src`, which is always the case when splicing a
    /// member out of the archive.
    pub fn copy_within(&mut self, src: u64, dst: u64, len: u64, chunk: usize) -> Result<()> {
        debug_assert!(dst <= src);
        let mut buf = alloc_buffer(chunk.max(1))?;
        let mut done = 0u64;
        while done < len {
            let n = (len - done).min(buf.len() as u64) as usize;
            self.read_at(src + done, &mut buf[..n])?;
            self.write_at(dst + done, &buf[..n])?;
            done += n as u64;
        }
        Ok(())
    }

    pub fn set_len(&mut self, len: u64) -> Result<()> {
        self.file
            .set_len(len)
            .map_err(|source| ZipError::WriteError { offset: len, source })
    }

    /// Flush file contents and metadata to disk.
    pub fn sync(&mut self) -> Result<()> {
        let offset = self.tell().unwrap_or(0);
        self.file
            .sync_all()
            .map_err(|source| ZipError::WriteError { offset, source })
    }

    pub fn into_inner(self) -> File {
        self.file
    }
}

fn open_error(path: &Path, source: io::Error) -> ZipError {
    if source.kind() == io::ErrorKind::NotFound {
        ZipError::ArchiveNotFound(path.to_path_buf())
    } else {
        ZipError::ReadError { offset: 0, source }
    }
}

impl ReadAt for ArchiveFile {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.seek_to(offset)?;
        self.file
            .read_exact(buf)
            .map_err(|source| ZipError::ReadError { offset, source })
    }

    fn size(&mut self) -> Result<u64> {
        self.len()
    }
}

impl Read for ArchiveFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for ArchiveFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Seek for ArchiveFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::io::read_vec_at;

    #[test]
    fn copy_within_compacts_overlapping_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("splice.bin");
        let mut file = ArchiveFile::create(&path).unwrap();
        file.write_all(b"aaaaXXXbbbbbbbbbbcc").unwrap();

        // Remove "XXX" using a chunk smaller than the moved range.
        file.copy_within(7, 4, 12, 5).unwrap();
        file.set_len(16).unwrap();

        assert_eq!(file.len().unwrap(), 16);
        assert_eq!(read_vec_at(&mut file, 0, 16).unwrap(), b"aaaabbbbbbbbbbcc");
    }

    #[test]
    fn write_at_then_tell() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = ArchiveFile::create(&dir.path().join("x.bin")).unwrap();
        file.write_all(&[0u8; 32]).unwrap();
        file.write_at(14, &[1, 2, 3, 4]).unwrap();
        assert_eq!(file.tell().unwrap(), 18);
        assert_eq!(read_vec_at(&mut file, 13, 6).unwrap(), [0, 1, 2, 3, 4, 0]);
    }

    #[test]
    fn missing_archive_is_reported_as_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = ArchiveFile::open(&dir.path().join("absent.zip")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArchiveNotFound);
    }

    #[test]
    fn reads_past_end_fail_with_offset() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = ArchiveFile::create(&dir.path().join("short.bin")).unwrap();
        file.write_all(b"1234").unwrap();
        let err = read_vec_at(&mut file, 2, 8).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadError);
        assert!(err.to_string().contains("offset 2"));
    }
}
