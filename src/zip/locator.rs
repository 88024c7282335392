//! Backward signature search.
//!
//! The End of Central Directory record is followed by a variable-length
//! comment, so it can only be found by scanning backwards from the end of
//! the archive. The same scan locates the attribute extension block in the
//! gap before the central directory.

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use super::structures::{DirectoryEndRecord, EOCD_SIGNATURE, EOCD_SIZE};
use crate::error::{Result, ZipError};
use crate::io::{ReadAt, alloc_buffer, read_vec_at};

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Bytes read per step of a backward scan.
const SCAN_CHUNK: usize = 1024;

/// Offset of the last occurrence of `signature` starting in `[lower, upper - 4]`.
///
/// Reads `[lower, upper)` backwards in chunks; consecutive chunks overlap
/// so a signature straddling a chunk boundary is still seen.
pub fn rfind_signature<R: ReadAt + ?Sized>(
    reader: &mut R,
    lower: u64,
    upper: u64,
    signature: u32,
) -> Result<Option<u64>> {
    let pattern = signature.to_le_bytes();
    if upper.saturating_sub(lower) < pattern.len() as u64 {
        return Ok(None);
    }

    let mut buf = alloc_buffer(SCAN_CHUNK)?;
    let mut chunk_end = upper;
    loop {
        let chunk_start = chunk_end.saturating_sub(SCAN_CHUNK as u64).max(lower);
        let chunk = &mut buf[..(chunk_end - chunk_start) as usize];
        reader.read_at(chunk_start, chunk)?;

        if let Some(i) = chunk.windows(pattern.len()).rposition(|w| w == pattern) {
            return Ok(Some(chunk_start + i as u64));
        }
        if chunk_start == lower {
            return Ok(None);
        }
        chunk_end = chunk_start + pattern.len() as u64 - 1;
    }
}

/// Find the End of Central Directory record of the archive in `[start, end)`.
///
/// A candidate is accepted only when its comment length reaches exactly to
/// `end`, which rejects stray signature bytes inside the comment or payload.
///
/// # Returns
///
/// The absolute offset of the record's signature.
///
/// # Errors
///
/// `ArchiveMalformed` if the range is too small or no candidate fits.
pub fn find_directory_end<R: ReadAt + ?Sized>(reader: &mut R, start: u64, end: u64) -> Result<u64> {
    let size = end.saturating_sub(start);
    if size < EOCD_SIZE as u64 {
        return Err(ZipError::malformed(format!(
            "archive of {size} bytes is too small for an end of central directory record"
        )));
    }

    // Fast path: no comment.
    let tail = end - EOCD_SIZE as u64;
    let buf = read_vec_at(reader, tail, EOCD_SIZE)?;
    if LittleEndian::read_u32(&buf[..4]) == EOCD_SIGNATURE && LittleEndian::read_u16(&buf[20..]) == 0 {
        return Ok(tail);
    }

    let lower = end - (MAX_COMMENT_SIZE + EOCD_SIZE as u64).min(size);
    let mut upper = end;
    while let Some(pos) = rfind_signature(reader, lower, upper, EOCD_SIGNATURE)? {
        if pos + EOCD_SIZE as u64 <= end {
            let mut raw = [0u8; 2];
            reader.read_at(pos + 20, &mut raw)?;
            let comment_len = LittleEndian::read_u16(&raw) as u64;
            if pos + EOCD_SIZE as u64 + comment_len == end {
                return Ok(pos);
            }
            debug!("Ignoring end of directory signature at {pos}: comment length {comment_len} does not reach {end}");
        }
        upper = pos + 3;
    }

    Err(ZipError::malformed(format!(
        "end of central directory signature not found in the last {} bytes",
        end - lower
    )))
}

/// Locate and parse the End of Central Directory record.
///
/// # Returns
///
/// The record and the absolute offset it was found at.
pub fn read_directory_end<R: ReadAt + ?Sized>(
    reader: &mut R,
    start: u64,
    end: u64,
) -> Result<(DirectoryEndRecord, u64)> {
    let pos = find_directory_end(reader, start, end)?;
    let data = read_vec_at(reader, pos, (end - pos) as usize)?;
    let record = DirectoryEndRecord::parse(&data)?;
    debug!(
        "End of central directory at {pos}: {} entries, directory {} bytes at +{}",
        record.total_entries, record.cd_size, record.cd_offset
    );
    Ok((record, pos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Cursor;

    fn archive_with_comment(prefix: &[u8], comment: &[u8]) -> Vec<u8> {
        let mut data = prefix.to_vec();
        data.extend(
            DirectoryEndRecord {
                comment: comment.to_vec(),
                ..Default::default()
            }
            .to_bytes(),
        );
        data
    }

    #[test]
    fn finds_record_without_comment() {
        let data = archive_with_comment(&[0xAA; 100], b"");
        let end = data.len() as u64;
        assert_eq!(find_directory_end(&mut Cursor::new(data), 0, end).unwrap(), 100);
    }

    #[test]
    fn finds_record_behind_maximum_comment() {
        let data = archive_with_comment(&[0xAA; 3000], &[b'c'; 65535]);
        let end = data.len() as u64;
        let (record, pos) = read_directory_end(&mut Cursor::new(data), 0, end).unwrap();
        assert_eq!(pos, 3000);
        assert_eq!(record.comment.len(), 65535);
    }

    #[test]
    fn skips_signature_bytes_inside_comment() {
        let mut comment = vec![b'x'; 2000];
        comment[1500..1504].copy_from_slice(&EOCD_SIGNATURE.to_le_bytes());
        let data = archive_with_comment(&[0u8; 10], &comment);
        let end = data.len() as u64;
        assert_eq!(find_directory_end(&mut Cursor::new(data), 0, end).unwrap(), 10);
    }

    #[test]
    fn finds_signature_across_chunk_boundary() {
        let mut data = vec![0u8; 4096];
        let at = 4096 - SCAN_CHUNK - 2;
        data[at..at + 4].copy_from_slice(&EOCD_SIGNATURE.to_le_bytes());
        let found = rfind_signature(&mut Cursor::new(data), 0, 4096, EOCD_SIGNATURE).unwrap();
        assert_eq!(found, Some(at as u64));
    }

    #[test]
    fn respects_embedded_range() {
        let mut data = vec![0x55; 64];
        data.extend(archive_with_comment(&[], b"tail"));
        let end = data.len() as u64;
        data.extend([0x77; 32]);
        assert_eq!(find_directory_end(&mut Cursor::new(data), 64, end).unwrap(), 64);
    }

    #[test]
    fn missing_terminator_is_malformed() {
        let data = vec![0u8; 5000];
        let err = find_directory_end(&mut Cursor::new(data), 0, 5000).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArchiveMalformed);

        let err = find_directory_end(&mut Cursor::new(vec![0u8; 10]), 0, 10).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArchiveMalformed);
    }
}
