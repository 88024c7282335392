//! One open archive: directory, attribute block and local entries, plus the
//! append, delete, list and extract algorithms over them.

use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use super::attributes::{FileAttributes, best_effort};
use super::central_dir::CentralDirectory;
use super::extension::ExtensionBlock;
use super::local::LocalEntry;
use super::paths::{SourceItem, parent_names, reject_linked_parents, safe_join};
use super::structures::{EntryListing, normalize_name};
use crate::config::EngineConfig;
use crate::error::{Result, ZipError};
use crate::io::ArchiveFile;

/// Which members to extract and how.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Members to extract by name. `None` (and no `directories`) means all.
    pub names: Option<Vec<String>>,
    /// Extract every member stored below each of these directories.
    pub directories: Vec<String>,
    /// Overwrite existing files instead of failing.
    pub replace_existing: bool,
    /// Recreate symbolic links and apply owner, group and mode.
    pub restore_permissions: bool,
}

/// Result of deleting a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Other members remain; the archive was rewritten.
    Remaining,
    /// The member was the last one. Nothing was written: the caller
    /// disposes of the archive.
    Emptied,
}

#[derive(Debug)]
pub struct Archive {
    file: ArchiveFile,
    start: u64,
    end: u64,
    is_new: bool,
    central_dir: CentralDirectory,
    extension: ExtensionBlock,
    locals: Vec<LocalEntry>,
    local_index: BTreeMap<String, usize>,
    staged: Vec<LocalEntry>,
}

impl Archive {
    /// Start a new archive in an empty file.
    pub fn create(file: ArchiveFile) -> Self {
        Self {
            file,
            start: 0,
            end: 0,
            is_new: true,
            central_dir: CentralDirectory::new(),
            extension: ExtensionBlock::new(),
            locals: Vec::new(),
            local_index: BTreeMap::new(),
            staged: Vec::new(),
        }
    }

    /// Load an archive occupying the whole file.
    pub fn open(file: ArchiveFile) -> Result<Self> {
        let end = file.len()?;
        Self::open_range(file, 0, end)
    }

    /// Load an archive occupying `[start, end)` of a larger file, such as a
    /// self-extracting executable. Recorded offsets are relative to `start`.
    pub fn open_range(mut file: ArchiveFile, start: u64, end: u64) -> Result<Self> {
        let central_dir = CentralDirectory::read_from(&mut file, start, end)?;

        let mut locals = Vec::with_capacity(central_dir.len());
        for entry in central_dir.entries() {
            locals.push(LocalEntry::read(&mut file, start, entry)?);
        }
        let data_end = locals.iter().map(LocalEntry::end).max().unwrap_or(0);
        let directory = central_dir.offset() as u64;
        if data_end > directory {
            return Err(ZipError::malformed(format!(
                "member data runs to +{data_end}, past the central directory at +{directory}"
            )));
        }
        let extension = ExtensionBlock::read_in_data(&mut file, start, start + data_end, start + directory)?;

        let mut archive = Self {
            file,
            start,
            end,
            is_new: false,
            central_dir,
            extension,
            locals,
            local_index: BTreeMap::new(),
            staged: Vec::new(),
        };
        archive.reindex_locals();
        Ok(archive)
    }

    pub fn central_dir(&self) -> &CentralDirectory {
        &self.central_dir
    }

    pub fn extension(&self) -> &ExtensionBlock {
        &self.extension
    }

    pub fn local_entries(&self) -> &[LocalEntry] {
        &self.locals
    }

    pub fn len(&self) -> usize {
        self.central_dir.len()
    }

    pub fn is_empty(&self) -> bool {
        self.central_dir.is_empty()
    }

    /// End of the archive's byte range.
    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn list(&self) -> Vec<EntryListing> {
        self.central_dir.list()
    }

    /// Queue `items` for the next [`append`](Self::append), capturing their
    /// attributes now.
    ///
    /// # Errors
    ///
    /// `EntryAlreadyExists` if a name is already in the archive or queued.
    pub fn stage(&mut self, items: Vec<SourceItem>, attrs: &dyn FileAttributes, config: &EngineConfig) -> Result<()> {
        for item in items {
            let name = normalize_name(item.name.as_bytes());
            if self.central_dir.contains(&name) || self.staged.iter().any(|e| e.name() == name) {
                return Err(ZipError::EntryAlreadyExists(name));
            }
            let mode = attrs.capture(&item.path).map(|stat| stat.mode);
            self.extension.add_file_attribute(attrs, &item.base, &name);
            debug!("Staging [{}] as [{name}]", item.path.display());
            self.staged.push(LocalEntry::for_source(item, mode, config));
        }
        Ok(())
    }

    /// Write the staged members, then the attribute block and directory.
    ///
    /// New members overwrite the old attribute block (or, without one, the old
    /// directory) and everything after them is rewritten.
    pub fn append(&mut self, config: &EngineConfig) -> Result<()> {
        let pos = if self.is_new {
            self.start
        } else {
            let relative = self
                .extension
                .offset()
                .unwrap_or(self.central_dir.offset() as u64);
            self.start + relative
        };
        self.file.seek_to(pos)?;

        let staged = std::mem::take(&mut self.staged);
        let count = staged.len();
        for mut entry in staged {
            entry.flush(&mut self.file, self.start, config)?;
            self.central_dir.add_entry(entry.to_directory_entry()?, entry.total_size())?;
            self.locals.push(entry);
        }
        self.reindex_locals();

        self.write_trailer()?;
        self.is_new = false;
        info!("Appended {count} entries, archive now {} bytes", self.end - self.start);
        Ok(())
    }

    /// Splice member `name` out of the archive.
    ///
    /// Everything between the end of its payload and the end of member data
    /// moves down by its size; later offsets are renumbered and the
    /// attribute block and directory are rewritten after the moved data.
    pub fn delete(&mut self, name: &str, config: &EngineConfig) -> Result<DeleteOutcome> {
        let key = normalize_name(name.as_bytes());
        let Some(&position) = self.local_index.get(&key) else {
            return Err(ZipError::EntryNotFound(key));
        };
        if self.locals.len() == 1 {
            debug!("[{key}] is the only entry; archive is now empty");
            return Ok(DeleteOutcome::Emptied);
        }

        let data_end = self.locals.iter().map(LocalEntry::end).max().unwrap_or(0);
        let doomed = self.locals.remove(position);
        let size = doomed.total_size();
        let src = doomed.end();
        debug!(
            "Deleting [{key}] at +{}: moving {} bytes down by {size}",
            doomed.offset,
            data_end - src
        );
        self.file.copy_within(
            self.start + src,
            self.start + doomed.offset,
            data_end - src,
            config.chunk_size(),
        )?;

        for local in &mut self.locals {
            if local.offset > doomed.offset {
                local.offset -= size;
            }
        }
        self.reindex_locals();
        self.central_dir.remove_entry(&key, size)?;

        let names: Vec<String> = self.central_dir.entries().iter().map(|e| e.file_name()).collect();
        self.extension.retain_used(names.iter().map(String::as_str));

        self.file.seek_to(self.start + data_end - size)?;
        self.write_trailer()?;
        info!("Deleted [{key}], {} entries remain", self.central_dir.len());
        Ok(DeleteOutcome::Remaining)
    }

    /// Resolve the member selection of `options` against the directory.
    pub fn select(&self, options: &ExtractOptions) -> Result<Vec<String>> {
        if options.names.is_none() && options.directories.is_empty() {
            return Ok(self.central_dir.entries().iter().map(|e| e.file_name()).collect());
        }

        let mut selected = Vec::new();
        for name in options.names.iter().flatten() {
            let Some(entry) = self.central_dir.find(name) else {
                return Err(ZipError::EntryNotFound(normalize_name(name.as_bytes())));
            };
            selected.push(entry.file_name());
        }
        for dir in &options.directories {
            let names = self.central_dir.names_under(dir);
            if names.is_empty() {
                return Err(ZipError::EntryNotFound(normalize_name(dir.as_bytes())));
            }
            selected.extend(names);
        }

        let mut seen = BTreeSet::new();
        selected.retain(|name| seen.insert(name.clone()));
        Ok(selected)
    }

    /// Extract the selected members below `output_dir`.
    ///
    /// Directory attributes are applied last, deepest first, so restrictive
    /// directory modes cannot block writing their contents.
    ///
    /// # Returns
    ///
    /// The number of members extracted.
    pub fn extract(
        &mut self,
        output_dir: &Path,
        options: &ExtractOptions,
        attrs: &dyn FileAttributes,
        config: &EngineConfig,
    ) -> Result<usize> {
        let selected = self.select(options)?;
        let mut deferred: BTreeSet<(usize, String)> = BTreeSet::new();

        for name in &selected {
            let Some(&position) = self.local_index.get(name) else {
                return Err(ZipError::EntryNotFound(name.clone()));
            };
            let dest = safe_join(output_dir, name)?;
            reject_linked_parents(output_dir, &dest)?;

            if options.restore_permissions {
                for parent in parent_names(name) {
                    if self.extension.find(parent).is_some() {
                        deferred.insert((parent.matches('/').count(), parent.to_string()));
                    }
                }
            }

            if self.locals[position].is_dir() {
                let existing = fs::symlink_metadata(&dest);
                if existing.as_ref().is_ok_and(|m| m.file_type().is_symlink()) {
                    return Err(ZipError::invalid_path(&dest, "directory member is a symbolic link"));
                }
                if !existing.is_ok_and(|m| m.is_dir()) {
                    fs::create_dir_all(&dest).map_err(|source| ZipError::DirectoryCreateError {
                        path: dest.clone(),
                        source,
                    })?;
                }
                if options.restore_permissions {
                    let key = name.trim_end_matches('/').to_string();
                    deferred.insert((key.matches('/').count(), key));
                }
                continue;
            }

            if let Ok(existing) = fs::symlink_metadata(&dest) {
                if !options.replace_existing || existing.is_dir() {
                    return Err(ZipError::EntryAlreadyExists(dest.display().to_string()));
                }
                fs::remove_file(&dest).map_err(|source| ZipError::WriteError { offset: 0, source })?;
            }

            let record = self.extension.find(name);
            let restore = options.restore_permissions.then_some((attrs, record));
            self.locals[position].extract(&mut self.file, self.start, &dest, restore, config.chunk_size())?;
            debug!("Extracted [{name}] to [{}]", dest.display());
        }

        for (_, dir) in deferred.iter().rev() {
            let path = safe_join(output_dir, dir)?;
            reject_linked_parents(output_dir, &path)?;
            if !fs::symlink_metadata(&path).is_ok_and(|m| m.is_dir()) {
                continue;
            }
            let dir_key = format!("{dir}/");
            let mode = self
                .central_dir
                .find(&dir_key)
                .map(|e| e.unix_mode())
                .unwrap_or(0);
            match self.extension.find(dir) {
                Some(record) => best_effort("Cannot restore attributes", &path, attrs.restore(&path, record)),
                None if mode != 0 => best_effort("Cannot restore mode", &path, attrs.restore_mode(&path, mode)),
                None => {}
            }
        }

        info!("Extracted {} entries to [{}]", selected.len(), output_dir.display());
        Ok(selected.len())
    }

    /// Flush file contents to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync()
    }

    pub fn into_file(self) -> ArchiveFile {
        self.file
    }

    pub fn path(&self) -> PathBuf {
        self.file.path().to_path_buf()
    }

    /// Attribute block, then directory, at the current position; the file
    /// ends after them.
    fn write_trailer(&mut self) -> Result<()> {
        self.extension.flush(&mut self.file, self.start)?;
        let pos = self.file.tell()?;
        self.central_dir.set_offset(pos - self.start)?;
        self.central_dir.flush(&mut self.file)?;
        self.end = self.file.tell()?;
        self.file.set_len(self.end)
    }

    /// First entry wins for duplicate names, matching the directory index.
    fn reindex_locals(&mut self) {
        self.local_index.clear();
        for (i, entry) in self.locals.iter().enumerate() {
            self.local_index.entry(entry.name()).or_insert(i);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::zip::attributes::NoopAttributes;
    use crate::zip::paths::collect_sources;
    use crate::zip::structures::LFH_SIZE;

    struct Fixture {
        dir: tempfile::TempDir,
        config: EngineConfig,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                config: EngineConfig::default(),
            }
        }

        fn file(&self, name: &str, content: &[u8]) -> PathBuf {
            let path = self.dir.path().join("src").join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, content).unwrap();
            path
        }

        fn build(&self, files: &[(&str, &[u8])]) -> PathBuf {
            let zip = self.dir.path().join("test.zip");
            let mut archive = Archive::create(ArchiveFile::create(&zip).unwrap());
            for (name, content) in files {
                let path = self.file(name, content);
                let items = collect_sources(&path, Some(&self.dir.path().join("src")), false, &[]).unwrap();
                archive.stage(items, &NoopAttributes, &self.config).unwrap();
            }
            archive.append(&self.config).unwrap();
            zip
        }

        fn open(&self, zip: &Path) -> Archive {
            Archive::open(ArchiveFile::open_rw(zip).unwrap()).unwrap()
        }
    }

    #[test]
    fn append_then_reopen() {
        let fx = Fixture::new();
        let zip = fx.build(&[("a.txt", b"alpha"), ("dir/b.txt", b"bravo bravo")]);

        let archive = fx.open(&zip);
        let listing = archive.list();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].name, "a.txt");
        assert_eq!(listing[1].name, "dir/b.txt");
        assert_eq!(listing[1].length, 11);
        assert_eq!(archive.end(), fs::metadata(&zip).unwrap().len());
    }

    #[test]
    fn append_to_existing_archive() {
        let fx = Fixture::new();
        let zip = fx.build(&[("a.txt", b"alpha")]);

        let mut archive = fx.open(&zip);
        let path = fx.file("c.txt", b"charlie");
        let items = collect_sources(&path, Some(&fx.dir.path().join("src")), false, &[]).unwrap();
        archive.stage(items, &NoopAttributes, &fx.config).unwrap();
        archive.append(&fx.config).unwrap();
        drop(archive);

        let names: Vec<String> = fx.open(&zip).list().into_iter().map(|l| l.name).collect();
        assert_eq!(names, ["a.txt", "c.txt"]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let fx = Fixture::new();
        let zip = fx.build(&[("a.txt", b"alpha")]);
        let mut archive = fx.open(&zip);
        let path = fx.file("a.txt", b"again");
        let items = collect_sources(&path, Some(&fx.dir.path().join("src")), false, &[]).unwrap();
        let err = archive.stage(items, &NoopAttributes, &fx.config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EntryAlreadyExists);
    }

    #[test]
    fn duplicate_names_resolve_to_first_entry() {
        let fx = Fixture::new();
        let zip = fx.build(&[("a.txt", b"alpha"), ("b.txt", b"bravo")]);

        // Rename the second member in place so both entries carry one name.
        let mut bytes = fs::read(&zip).unwrap();
        let mut at = 0;
        while let Some(i) = bytes[at..].windows(5).position(|w| w == b"b.txt") {
            bytes[at + i..at + i + 5].copy_from_slice(b"a.txt");
            at += i + 5;
        }
        fs::write(&zip, &bytes).unwrap();

        let mut archive = fx.open(&zip);
        assert_eq!(archive.len(), 2);
        assert_eq!(archive.delete("a.txt", &fx.config).unwrap(), DeleteOutcome::Remaining);
        drop(archive);

        let mut archive = fx.open(&zip);
        assert_eq!(archive.len(), 1);
        let out = fx.dir.path().join("out");
        archive
            .extract(&out, &ExtractOptions::default(), &NoopAttributes, &fx.config)
            .unwrap();
        assert_eq!(fs::read(out.join("a.txt")).unwrap(), b"bravo");
    }

    #[test]
    fn delete_renumbers_later_offsets() {
        let fx = Fixture::new();
        let zip = fx.build(&[("one.txt", b"1111"), ("two.txt", b"2222 2222"), ("three.txt", b"333")]);

        let mut archive = fx.open(&zip);
        let before: Vec<u32> = archive
            .central_dir()
            .entries()
            .iter()
            .map(|e| e.local_header_offset)
            .collect();
        let removed = archive.local_entries()[1].total_size();
        assert_eq!(
            archive.delete("two.txt", &fx.config).unwrap(),
            DeleteOutcome::Remaining
        );
        drop(archive);

        let archive = fx.open(&zip);
        let after: Vec<u32> = archive
            .central_dir()
            .entries()
            .iter()
            .map(|e| e.local_header_offset)
            .collect();
        assert_eq!(after, [before[0], before[2] - removed as u32]);
        assert_eq!(
            archive.local_entries()[1].offset,
            LFH_SIZE as u64 + 7 + archive.local_entries()[0].header.compressed_size as u64
        );
    }

    #[test]
    fn deleting_only_entry_reports_empty() {
        let fx = Fixture::new();
        let zip = fx.build(&[("solo.txt", b"solo")]);
        let size = fs::metadata(&zip).unwrap().len();

        let mut archive = fx.open(&zip);
        assert_eq!(archive.delete("solo.txt", &fx.config).unwrap(), DeleteOutcome::Emptied);
        drop(archive);
        assert_eq!(fs::metadata(&zip).unwrap().len(), size);
    }

    #[test]
    fn delete_of_unknown_member() {
        let fx = Fixture::new();
        let zip = fx.build(&[("a.txt", b"alpha")]);
        let mut archive = fx.open(&zip);
        let err = archive.delete("b.txt", &fx.config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EntryNotFound);
    }

    #[test]
    fn extract_selection_and_replace() {
        let fx = Fixture::new();
        let zip = fx.build(&[("a.txt", b"alpha"), ("dir/b.txt", b"bravo"), ("dir/c.txt", b"charlie")]);
        let out = fx.dir.path().join("out");
        let mut archive = fx.open(&zip);

        let options = ExtractOptions {
            directories: vec!["dir".to_string()],
            ..Default::default()
        };
        assert_eq!(archive.extract(&out, &options, &NoopAttributes, &fx.config).unwrap(), 2);
        assert_eq!(fs::read(out.join("dir/c.txt")).unwrap(), b"charlie");
        assert!(!out.join("a.txt").exists());

        let err = archive.extract(&out, &options, &NoopAttributes, &fx.config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EntryAlreadyExists);

        fs::write(out.join("dir/b.txt"), b"changed").unwrap();
        let replace = ExtractOptions {
            names: Some(vec!["dir/b.txt".to_string()]),
            replace_existing: true,
            ..Default::default()
        };
        archive.extract(&out, &replace, &NoopAttributes, &fx.config).unwrap();
        assert_eq!(fs::read(out.join("dir/b.txt")).unwrap(), b"bravo");

        let missing = ExtractOptions {
            names: Some(vec!["nope.txt".to_string()]),
            ..Default::default()
        };
        let err = archive.extract(&out, &missing, &NoopAttributes, &fx.config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EntryNotFound);
    }

    #[test]
    fn embedded_archive_range() {
        let fx = Fixture::new();
        let zip = fx.build(&[("a.txt", b"alpha"), ("b.txt", b"bravo")]);
        let archive_bytes = fs::read(&zip).unwrap();

        let wrapped = fx.dir.path().join("wrapped.bin");
        let mut data = vec![0x7Fu8; 300];
        data.extend(&archive_bytes);
        fs::write(&wrapped, &data).unwrap();

        let file = ArchiveFile::open(&wrapped).unwrap();
        let mut archive = Archive::open_range(file, 300, data.len() as u64).unwrap();
        assert_eq!(archive.len(), 2);

        let out = fx.dir.path().join("out");
        archive
            .extract(&out, &ExtractOptions::default(), &NoopAttributes, &fx.config)
            .unwrap();
        assert_eq!(fs::read(out.join("b.txt")).unwrap(), b"bravo");
    }
}
