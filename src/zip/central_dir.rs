use log::debug;
use std::collections::BTreeMap;

use super::locator;
use super::structures::{DirectoryEndRecord, DirectoryEntry, EntryListing, normalize_name};
use crate::error::{Result, ZipError};
use crate::io::{ArchiveFile, FieldReader, FieldWriter, ReadAt, read_vec_at};

/// The archive-wide member index.
///
/// Entries keep their on-disk order; a name index gives ordered lookup.
/// The end record's counters and offsets are kept in step with every
/// insertion and removal so the directory can be flushed at any time.
#[derive(Debug, Default)]
pub struct CentralDirectory {
    end: DirectoryEndRecord,
    entries: Vec<DirectoryEntry>,
    index: BTreeMap<String, usize>,
}

impl CentralDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the directory of the archive occupying `[start, end)`.
    ///
    /// # Errors
    ///
    /// `ArchiveMalformed` when the end record is missing or multi-disk, when
    /// `offset + size` of the directory does not lead exactly to the end
    /// record, or when an entry is truncated.
    pub fn read_from<R: ReadAt + ?Sized>(reader: &mut R, start: u64, end: u64) -> Result<Self> {
        let (record, found) = locator::read_directory_end(reader, start, end)?;
        record.validate()?;

        let expected = start + record.cd_offset as u64 + record.cd_size as u64;
        if found != expected {
            return Err(ZipError::malformed(format!(
                "end of central directory at {found}, but directory offset {} + size {} gives {expected}",
                record.cd_offset, record.cd_size
            )));
        }

        let data = read_vec_at(reader, start + record.cd_offset as u64, record.cd_size as usize)?;
        let mut fields = FieldReader::new(&data, "central directory entry");
        let mut dir = Self {
            entries: Vec::with_capacity(record.total_entries as usize),
            end: record,
            index: BTreeMap::new(),
        };
        for _ in 0..dir.end.total_entries {
            let entry = DirectoryEntry::parse(&mut fields)?;
            debug!(
                "Central directory entry [{}] at +{}: {} -> {} bytes",
                entry.file_name(),
                entry.local_header_offset,
                entry.uncompressed_size,
                entry.compressed_size
            );
            dir.push(entry);
        }
        Ok(dir)
    }

    /// Serialized entries followed by the end record.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = FieldWriter::with_capacity(self.end.cd_size as usize + self.end.size());
        for entry in &self.entries {
            entry.write_to(&mut writer);
        }
        writer.put_bytes(&self.end.to_bytes());
        writer.into_inner()
    }

    /// Write the directory and end record at the file's current position.
    pub fn flush(&self, file: &mut ArchiveFile) -> Result<()> {
        debug!(
            "Writing central directory: {} entries, {} bytes at +{}",
            self.entries.len(),
            self.end.cd_size,
            self.end.cd_offset
        );
        file.write_all(&self.to_bytes())
    }

    /// Register a member whose local entry of `local_size` bytes was just written.
    pub fn add_entry(&mut self, entry: DirectoryEntry, local_size: u64) -> Result<()> {
        let offset = self.end.cd_offset as u64 + local_size;
        let count = self.end.total_entries.checked_add(1);
        match (u32::try_from(offset), count) {
            (Ok(cd_offset), Some(count)) => {
                self.end.cd_offset = cd_offset;
                self.end.total_entries = count;
                self.end.disk_entries = count;
            }
            (Err(_), _) => return Err(ZipError::too_large(offset, "central directory offset")),
            (_, None) => return Err(ZipError::too_large(offset, "entry count")),
        }
        self.end.cd_size += entry.size();
        self.push(entry);
        Ok(())
    }

    /// Drop a member whose `local_size`-byte local entry is being spliced out.
    ///
    /// Every entry stored after the removed one moves down by `local_size`.
    pub fn remove_entry(&mut self, name: &str, local_size: u64) -> Result<DirectoryEntry> {
        let key = normalize_name(name.as_bytes());
        let Some(&position) = self.index.get(&key) else {
            return Err(ZipError::EntryNotFound(key));
        };
        let removed = self.entries.remove(position);
        let shift = local_size as u32;
        for entry in &mut self.entries {
            if entry.local_header_offset > removed.local_header_offset {
                entry.local_header_offset -= shift;
            }
        }
        self.reindex();

        self.end.total_entries -= 1;
        self.end.disk_entries = self.end.total_entries;
        self.end.cd_size -= removed.size();
        self.end.cd_offset = self.end.cd_offset.saturating_sub(shift);
        Ok(removed)
    }

    pub fn find(&self, name: &str) -> Option<&DirectoryEntry> {
        let key = normalize_name(name.as_bytes());
        self.index.get(&key).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Names of every member stored under directory `dir`.
    pub fn names_under(&self, dir: &str) -> Vec<String> {
        let mut prefix = normalize_name(dir.as_bytes());
        if !prefix.ends_with('/') {
            prefix.push('/');
        }
        self.entries
            .iter()
            .map(|e| e.file_name())
            .filter(|name| name.starts_with(&prefix))
            .collect()
    }

    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    pub fn end_record(&self) -> &DirectoryEndRecord {
        &self.end
    }

    pub fn list(&self) -> Vec<EntryListing> {
        self.entries.iter().map(EntryListing::from).collect()
    }

    pub fn offset(&self) -> u32 {
        self.end.cd_offset
    }

    pub fn set_offset(&mut self, offset: u64) -> Result<()> {
        self.end.cd_offset =
            u32::try_from(offset).map_err(|_| ZipError::too_large(offset, "central directory offset"))?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, entry: DirectoryEntry) {
        self.index.entry(entry.file_name()).or_insert(self.entries.len());
        self.entries.push(entry);
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (i, entry) in self.entries.iter().enumerate() {
            self.index.entry(entry.file_name()).or_insert(i);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Cursor;

    fn entry(name: &str, offset: u32, compressed: u32) -> DirectoryEntry {
        DirectoryEntry {
            method: 8,
            compressed_size: compressed,
            uncompressed_size: compressed * 2,
            local_header_offset: offset,
            name: name.as_bytes().to_vec(),
            ..Default::default()
        }
    }

    fn local_size(e: &DirectoryEntry) -> u64 {
        30 + e.name.len() as u64 + e.compressed_size as u64
    }

    fn three_entries() -> CentralDirectory {
        let mut dir = CentralDirectory::new();
        let mut offset = 0u32;
        for (name, size) in [("a.txt", 10), ("b/c.txt", 20), ("b/d.txt", 30)] {
            let e = entry(name, offset, size);
            let len = local_size(&e);
            offset += len as u32;
            dir.add_entry(e, len).unwrap();
        }
        dir
    }

    #[test]
    fn bookkeeping_tracks_additions() {
        let dir = three_entries();
        let end = dir.end_record();
        assert_eq!(end.total_entries, 3);
        assert_eq!(end.disk_entries, 3);
        assert_eq!(end.cd_size, 46 * 3 + 5 + 7 + 7);
        assert_eq!(end.cd_offset, (35 + 10) + (37 + 20) + (37 + 30));
    }

    #[test]
    fn reads_back_what_it_flushed() {
        let dir = three_entries();
        let mut data = vec![0u8; dir.offset() as usize];
        data.extend(dir.to_bytes());
        let end = data.len() as u64;

        let loaded = CentralDirectory::read_from(&mut Cursor::new(data), 0, end).unwrap();
        assert_eq!(loaded.entries(), dir.entries());
        assert_eq!(loaded.end_record(), dir.end_record());
        assert!(loaded.contains("b\\c.txt"));
    }

    #[test]
    fn offset_arithmetic_must_lead_to_end_record() {
        let dir = three_entries();
        let mut data = vec![0u8; dir.offset() as usize + 7];
        data.extend(dir.to_bytes());
        let end = data.len() as u64;

        let err = CentralDirectory::read_from(&mut Cursor::new(data), 0, end).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArchiveMalformed);
    }

    #[test]
    fn embedded_directory_offsets_are_relative() {
        let dir = three_entries();
        let mut data = vec![0xEE; 512];
        data.extend(vec![0u8; dir.offset() as usize]);
        data.extend(dir.to_bytes());
        let end = data.len() as u64;

        let loaded = CentralDirectory::read_from(&mut Cursor::new(data), 512, end).unwrap();
        assert_eq!(loaded.len(), 3);
    }

    #[test]
    fn removal_shifts_only_later_offsets() {
        let mut dir = three_entries();
        let before: Vec<u32> = dir.entries().iter().map(|e| e.local_header_offset).collect();
        let doomed = dir.find("b/c.txt").unwrap().clone();
        let size = local_size(&doomed);

        dir.remove_entry("b/c.txt", size).unwrap();

        let after: Vec<u32> = dir.entries().iter().map(|e| e.local_header_offset).collect();
        assert_eq!(after, vec![before[0], before[2] - size as u32]);
        assert_eq!(dir.end_record().total_entries, 2);
        assert_eq!(dir.end_record().cd_size, 46 * 2 + 5 + 7);
        assert_eq!(dir.offset(), (35 + 10) + (37 + 30));
        assert!(dir.find("b/c.txt").is_none());
        assert!(dir.find("b/d.txt").is_some());
    }

    #[test]
    fn removing_unknown_name_fails() {
        let mut dir = three_entries();
        let err = dir.remove_entry("nope", 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EntryNotFound);
        assert_eq!(dir.len(), 3);
    }

    #[test]
    fn names_under_directory() {
        let dir = three_entries();
        assert_eq!(dir.names_under("b"), vec!["b/c.txt", "b/d.txt"]);
        assert_eq!(dir.names_under("b/"), vec!["b/c.txt", "b/d.txt"]);
        assert!(dir.names_under("a.txt").is_empty());
    }

    #[test]
    fn empty_archive_is_readable() {
        let data = CentralDirectory::new().to_bytes();
        let end = data.len() as u64;
        let dir = CentralDirectory::read_from(&mut Cursor::new(data), 0, end).unwrap();
        assert!(dir.is_empty());
    }
}
