//! Attribute extension block.
//!
//! A private block between the last local entry and the central directory:
//! the 4-byte signature `SF\x02\x01`, then one [`AttributeRecord`] per
//! archived path component. Other ZIP readers skip it as unreferenced data.

use log::{debug, warn};
use std::collections::BTreeMap;
use std::path::Path;

use super::attributes::FileAttributes;
use super::locator::rfind_signature;
use super::structures::{AttributeRecord, EXTENSION_SIGNATURE, normalize_name};
use crate::error::Result;
use crate::io::{ArchiveFile, FieldReader, FieldWriter, ReadAt, read_vec_at};

#[derive(Debug, Default)]
pub struct ExtensionBlock {
    /// Position relative to the archive start, once read or written.
    offset: Option<u64>,
    records: Vec<AttributeRecord>,
    index: BTreeMap<String, usize>,
}

fn record_key(name: &str) -> String {
    let mut key = normalize_name(name.as_bytes());
    while key.ends_with('/') {
        key.pop();
    }
    key
}

impl ExtensionBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the block from the gap `[data_end, directory)` (absolute offsets).
    ///
    /// An empty gap means the archive has no block. A candidate signature is
    /// accepted only if its records fill the gap exactly.
    pub fn read_in_data<R: ReadAt + ?Sized>(
        reader: &mut R,
        start: u64,
        data_end: u64,
        directory: u64,
    ) -> Result<Self> {
        if directory <= data_end {
            return Ok(Self::new());
        }

        let mut upper = directory;
        while let Some(pos) = rfind_signature(reader, data_end, upper, EXTENSION_SIGNATURE)? {
            let body = read_vec_at(reader, pos + 4, (directory - pos - 4) as usize)?;
            if let Some(records) = Self::parse_records(&body) {
                debug!(
                    "Attribute extension block at +{}: {} records",
                    pos - start,
                    records.len()
                );
                let mut block = Self {
                    offset: Some(pos - start),
                    ..Self::default()
                };
                for record in records {
                    block.upsert(record);
                }
                return Ok(block);
            }
            upper = pos + 3;
        }

        warn!(
            "Ignoring {} unrecognized bytes before the central directory",
            directory - data_end
        );
        Ok(Self::new())
    }

    fn parse_records(body: &[u8]) -> Option<Vec<AttributeRecord>> {
        let mut fields = FieldReader::new(body, "attribute record");
        let mut records = Vec::new();
        while fields.remaining() > 0 {
            records.push(AttributeRecord::parse(&mut fields).ok()?);
        }
        Some(records)
    }

    /// Record owner, group and mode for every component of `name`.
    ///
    /// `base` is the directory `name` is relative to. For `a/b/c.txt` this
    /// stats `base/a`, `base/a/b` and `base/a/b/c.txt`. Existing records for
    /// those names are overwritten.
    pub fn add_file_attribute(&mut self, attrs: &dyn FileAttributes, base: &Path, name: &str) {
        let key = record_key(name);
        let mut partial = String::with_capacity(key.len());
        for component in key.split('/').filter(|c| !c.is_empty()) {
            if !partial.is_empty() {
                partial.push('/');
            }
            partial.push_str(component);

            if let Some(stat) = attrs.capture(&base.join(&partial)) {
                self.upsert(AttributeRecord {
                    name: partial.clone(),
                    mode: stat.mode,
                    uid: stat.uid,
                    gid: stat.gid,
                });
            }
        }
    }

    pub fn find(&self, name: &str) -> Option<&AttributeRecord> {
        self.index.get(&record_key(name)).map(|&i| &self.records[i])
    }

    /// Drop records no longer needed by any of `names`, either as the
    /// member itself or as one of its parent directories.
    pub fn retain_used<'a>(&mut self, names: impl IntoIterator<Item = &'a str> + Clone) {
        let before = self.records.len();
        self.records.retain(|record| {
            let prefix = format!("{}/", record.name);
            names.clone().into_iter().any(|name| {
                let key = record_key(name);
                key == record.name || key.starts_with(&prefix)
            })
        });
        if self.records.len() != before {
            debug!("Pruned {} attribute records", before - self.records.len());
            self.reindex();
        }
    }

    pub fn records(&self) -> &[AttributeRecord] {
        &self.records
    }

    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Signature plus records; empty when there is nothing to store.
    pub fn to_bytes(&self) -> Vec<u8> {
        if self.records.is_empty() {
            return Vec::new();
        }
        let size = 4 + self.records.iter().map(AttributeRecord::size).sum::<usize>();
        let mut writer = FieldWriter::with_capacity(size);
        writer.put_u32(EXTENSION_SIGNATURE);
        for record in &self.records {
            record.write_to(&mut writer);
        }
        writer.into_inner()
    }

    /// Write the block at the file's current position.
    pub fn flush(&mut self, file: &mut ArchiveFile, start: u64) -> Result<()> {
        if self.records.is_empty() {
            self.offset = None;
            return Ok(());
        }
        let pos = file.tell()?;
        debug!("Writing {} attribute records at +{}", self.records.len(), pos - start);
        file.write_all(&self.to_bytes())?;
        self.offset = Some(pos - start);
        Ok(())
    }

    fn upsert(&mut self, record: AttributeRecord) {
        match self.index.get(&record.name) {
            Some(&i) => self.records[i] = record,
            None => {
                self.index.insert(record.name.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    fn reindex(&mut self) {
        self.index = self
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.name.clone(), i))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::attributes::FileStat;
    use crate::zip::structures::{S_IFDIR, S_IFREG};
    use std::io::Cursor;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Reports a fixed stat for every path and remembers what was asked.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<PathBuf>>,
    }

    impl FileAttributes for Recorder {
        fn capture(&self, path: &Path) -> Option<FileStat> {
            self.seen.lock().unwrap().push(path.to_path_buf());
            let mode = if path.extension().is_some() { S_IFREG | 0o644 } else { S_IFDIR | 0o755 };
            Some(FileStat { mode, uid: 7, gid: 8 })
        }
        fn restore(&self, _: &Path, _: &AttributeRecord) -> Result<()> {
            Ok(())
        }
        fn restore_mode(&self, _: &Path, _: u32) -> Result<()> {
            Ok(())
        }
        fn make_symlink(&self, _: &str, _: &Path) -> Result<()> {
            Ok(())
        }
        fn supports_symlinks(&self) -> bool {
            false
        }
    }

    #[test]
    fn every_component_gets_a_record() {
        let attrs = Recorder::default();
        let mut block = ExtensionBlock::new();
        block.add_file_attribute(&attrs, Path::new("/base"), "a/b/c.txt");
        block.add_file_attribute(&attrs, Path::new("/base"), "a/b/");

        let names: Vec<&str> = block.records().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["a", "a/b", "a/b/c.txt"]);
        assert_eq!(attrs.seen.lock().unwrap()[2], Path::new("/base/a/b/c.txt"));
        assert_eq!(block.find("a/b/").unwrap().mode, S_IFDIR | 0o755);
        assert_eq!(block.find("a\\b\\c.txt").unwrap().uid, 7);
    }

    #[test]
    fn found_between_payload_and_directory() {
        let attrs = Recorder::default();
        let mut block = ExtensionBlock::new();
        block.add_file_attribute(&attrs, Path::new("/"), "dir/file.bin");
        let bytes = block.to_bytes();

        let mut data = vec![0x11u8; 40];
        data.extend(&bytes);
        let directory = data.len() as u64;
        data.extend(b"PK\x01\x02 directory follows");

        let loaded = ExtensionBlock::read_in_data(&mut Cursor::new(data), 0, 40, directory).unwrap();
        assert_eq!(loaded.offset(), Some(40));
        assert_eq!(loaded.records(), block.records());
    }

    #[test]
    fn absent_block_is_a_no_op() {
        let mut data = Cursor::new(vec![0u8; 64]);
        let loaded = ExtensionBlock::read_in_data(&mut data, 0, 64, 64).unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.offset(), None);

        let loaded = ExtensionBlock::read_in_data(&mut data, 0, 16, 64).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn pruning_keeps_ancestors_of_remaining_members() {
        let attrs = Recorder::default();
        let mut block = ExtensionBlock::new();
        block.add_file_attribute(&attrs, Path::new("/"), "a/b/c.txt");
        block.add_file_attribute(&attrs, Path::new("/"), "a/d.txt");
        block.add_file_attribute(&attrs, Path::new("/"), "e.txt");

        block.retain_used(["a/d.txt"]);
        let names: Vec<&str> = block.records().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["a", "a/d.txt"]);
        assert!(block.find("a/b").is_none());
    }

    #[test]
    fn empty_block_writes_nothing() {
        assert!(ExtensionBlock::new().to_bytes().is_empty());
    }
}
