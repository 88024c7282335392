use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::Cursor;

use crate::error::{Result, ZipError};

/// Allocate a zeroed buffer, reporting allocation failure instead of aborting.
pub fn alloc_buffer(len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| ZipError::OutOfMemory(len))?;
    buf.resize(len, 0);
    Ok(buf)
}

/// Sequential little-endian reader over one on-disk record.
///
/// Every read is bounds checked; running off the end of the record is an
/// `ArchiveMalformed` error naming the record and the offset within it.
pub struct FieldReader<'a> {
    cursor: Cursor<&'a [u8]>,
    record: &'static str,
}

impl<'a> FieldReader<'a> {
    pub fn new(data: &'a [u8], record: &'static str) -> Self {
        Self {
            cursor: Cursor::new(data),
            record,
        }
    }

    pub fn u16(&mut self) -> Result<u16> {
        let at = self.cursor.position();
        self.cursor
            .read_u16::<LittleEndian>()
            .map_err(|_| self.short(at, 2))
    }

    pub fn u32(&mut self) -> Result<u32> {
        let at = self.cursor.position();
        self.cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| self.short(at, 4))
    }

    /// Read a variable-length field into an owned buffer.
    pub fn bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let at = self.cursor.position();
        if self.remaining() < len {
            return Err(self.short(at, len));
        }
        let start = at as usize;
        let mut out = Vec::new();
        out.try_reserve_exact(len)
            .map_err(|_| ZipError::OutOfMemory(len))?;
        out.extend_from_slice(&self.cursor.get_ref()[start..start + len]);
        self.cursor.set_position(at + len as u64);
        Ok(out)
    }

    /// Check a 4-byte signature at the current position.
    pub fn expect_signature(&mut self, signature: u32) -> Result<()> {
        let at = self.cursor.position();
        let found = self.u32()?;
        if found != signature {
            return Err(ZipError::malformed(format!(
                "bad {} signature at +{at}: expected {signature:#010x}, found {found:#010x}",
                self.record
            )));
        }
        Ok(())
    }

    pub fn position(&self) -> u64 {
        self.cursor.position()
    }

    pub fn remaining(&self) -> usize {
        let len = self.cursor.get_ref().len() as u64;
        len.saturating_sub(self.cursor.position()) as usize
    }

    fn short(&self, at: u64, wanted: usize) -> ZipError {
        ZipError::malformed(format!(
            "truncated {}: wanted {wanted} bytes at +{at}, {} available",
            self.record,
            (self.cursor.get_ref().len() as u64).saturating_sub(at)
        ))
    }
}

/// Little-endian record builder; the inverse of [`FieldReader`].
#[derive(Debug, Default)]
pub struct FieldWriter {
    buf: Vec<u8>,
}

impl FieldWriter {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn put_u16(&mut self, value: u16) -> &mut Self {
        let mut raw = [0u8; 2];
        LittleEndian::write_u16(&mut raw, value);
        self.buf.extend_from_slice(&raw);
        self
    }

    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        let mut raw = [0u8; 4];
        LittleEndian::write_u32(&mut raw, value);
        self.buf.extend_from_slice(&raw);
        self
    }

    pub fn put_bytes(&mut self, value: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(value);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn reads_what_the_writer_wrote() {
        let mut writer = FieldWriter::with_capacity(16);
        writer
            .put_u32(0x06054b50)
            .put_u16(7)
            .put_bytes(b"name")
            .put_u16(0xBEEF);
        let data = writer.into_inner();
        assert_eq!(&data[..4], b"PK\x05\x06");

        let mut reader = FieldReader::new(&data, "test record");
        reader.expect_signature(0x06054b50).unwrap();
        assert_eq!(reader.u16().unwrap(), 7);
        assert_eq!(reader.bytes(4).unwrap(), b"name");
        assert_eq!(reader.u16().unwrap(), 0xBEEF);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn short_input_is_malformed() {
        let data = [1u8, 2, 3];
        let mut reader = FieldReader::new(&data, "local header");
        let err = reader.u32().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArchiveMalformed);
        assert!(err.to_string().contains("local header"));

        let mut reader = FieldReader::new(&data, "name");
        assert_eq!(reader.bytes(4).unwrap_err().kind(), ErrorKind::ArchiveMalformed);
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn signature_mismatch_reports_both_values() {
        let data = 0x02014b50u32.to_le_bytes();
        let mut reader = FieldReader::new(&data, "directory end");
        let err = reader.expect_signature(0x06054b50).unwrap_err();
        assert!(err.to_string().contains("0x02014b50"));
    }
}
