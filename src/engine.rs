//! The four archive operations, each run under the archive's path lock.
//!
//! Mutating operations on an existing archive work on a byte-for-byte copy
//! named `<archive><backup_suffix>`. The copy replaces the original by
//! rename only once the operation has succeeded; on failure it is removed
//! and the original stays untouched.

use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::{Result, ZipError};
use crate::io::ArchiveFile;
use crate::zip::{
    Archive, DeleteOutcome, EntryListing, ExtractOptions, FileAttributes, LockRegistry, collect_sources,
    normalize_name, platform,
};

/// One source to add to an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendEntry {
    pub source: PathBuf,
    /// Stripped from `source` to form the member name.
    pub relative_to: Option<PathBuf>,
    /// Walk directories to any depth instead of one level.
    pub recursive: bool,
}

impl AppendEntry {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            relative_to: None,
            recursive: false,
        }
    }

    pub fn relative_to(mut self, prefix: impl Into<PathBuf>) -> Self {
        self.relative_to = Some(prefix.into());
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }
}

pub struct ArchiveEngine {
    config: EngineConfig,
    locks: LockRegistry,
    attributes: Arc<dyn FileAttributes>,
}

impl Default for ArchiveEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl ArchiveEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_attributes(config, platform())
    }

    pub fn with_attributes(config: EngineConfig, attributes: Arc<dyn FileAttributes>) -> Self {
        Self {
            config,
            locks: LockRegistry::new(),
            attributes,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    /// Path of the working copy used while `archive` is being updated.
    pub fn backup_path(&self, archive: &Path) -> PathBuf {
        let mut name = OsString::from(archive.as_os_str());
        name.push(&self.config.backup_suffix);
        PathBuf::from(name)
    }

    /// Add files and directories to `archive`, creating it if needed.
    ///
    /// Either every entry is added or the archive is left as it was.
    pub fn append(&self, archive: &Path, entries: &[AppendEntry]) -> Result<()> {
        let _lock = self.locks.request(archive);
        self.append_locked(archive, entries)
            .map_err(|e| e.in_archive(archive))
    }

    fn append_locked(&self, archive: &Path, entries: &[AppendEntry]) -> Result<()> {
        let backup = self.backup_path(archive);
        let exclude = [archive.to_path_buf(), backup.clone()];
        let mut items = Vec::new();
        for entry in entries {
            items.extend(collect_sources(
                &entry.source,
                entry.relative_to.as_deref(),
                entry.recursive,
                &exclude,
            )?);
        }

        let exists = fs::metadata(archive).map(|m| m.len() > 0).unwrap_or(false);
        if !exists {
            debug!("Creating new archive with {} entries", items.len());
            let result = ArchiveFile::create(archive).and_then(|file| {
                let mut zip = Archive::create(file);
                zip.stage(items, self.attributes.as_ref(), &self.config)?;
                zip.append(&self.config)?;
                zip.sync()
            });
            if result.is_err() {
                discard(archive);
            }
            return result;
        }

        self.with_backup(archive, |zip| {
            zip.stage(items, self.attributes.as_ref(), &self.config)?;
            zip.append(&self.config)?;
            Ok(true)
        })
    }

    /// Remove `names` from `archive`. Removing every member removes the
    /// archive file itself.
    pub fn delete(&self, archive: &Path, names: &[String]) -> Result<()> {
        let _lock = self.locks.request(archive);
        self.delete_locked(archive, names)
            .map_err(|e| e.in_archive(archive))
    }

    fn delete_locked(&self, archive: &Path, names: &[String]) -> Result<()> {
        if !archive.exists() {
            return Err(ZipError::ArchiveNotFound(archive.to_path_buf()));
        }

        let mut emptied = false;
        self.with_backup(archive, |zip| {
            let mut unique: Vec<String> = names.iter().map(|n| normalize_name(n.as_bytes())).collect();
            let mut seen = BTreeSet::new();
            unique.retain(|n| seen.insert(n.clone()));
            if let Some(missing) = unique.iter().find(|n| !zip.central_dir().contains(n)) {
                return Err(ZipError::EntryNotFound(missing.clone()));
            }

            for name in &unique {
                if zip.delete(name, &self.config)? == DeleteOutcome::Emptied {
                    emptied = true;
                    return Ok(false);
                }
            }
            Ok(true)
        })?;

        if emptied {
            fs::remove_file(archive).map_err(|source| ZipError::WriteError { offset: 0, source })?;
            info!("Removed [{}]: no entries remain", archive.display());
        }
        Ok(())
    }

    /// Describe every member of `archive`.
    pub fn list(&self, archive: &Path) -> Result<Vec<EntryListing>> {
        let _lock = self.locks.request(archive);
        ArchiveFile::open(archive)
            .and_then(Archive::open)
            .map(|zip| zip.list())
            .map_err(|e| e.in_archive(archive))
    }

    /// Extract members of `archive` below `output_dir`.
    ///
    /// # Returns
    ///
    /// The number of members extracted.
    pub fn extract(&self, archive: &Path, output_dir: &Path, options: &ExtractOptions) -> Result<usize> {
        let _lock = self.locks.request(archive);
        ArchiveFile::open(archive)
            .and_then(Archive::open)
            .and_then(|mut zip| {
                zip.extract(output_dir, options, self.attributes.as_ref(), &self.config)
            })
            .map_err(|e| e.in_archive(archive))
    }

    /// Run `update` against a copy of `archive`.
    ///
    /// When `update` returns `Ok(true)` the copy replaces the original. With
    /// `Ok(false)` or an error the copy is thrown away.
    fn with_backup<F>(&self, archive: &Path, update: F) -> Result<()>
    where
        F: FnOnce(&mut Archive) -> Result<bool>,
    {
        let backup = self.backup_path(archive);
        debug!("Copying [{}] to [{}]", archive.display(), backup.display());
        fs::copy(archive, &backup).map_err(|source| ZipError::WriteError { offset: 0, source })?;

        let result = ArchiveFile::open_rw(&backup)
            .and_then(Archive::open)
            .and_then(|mut zip| {
                let keep = update(&mut zip)?;
                if keep {
                    zip.sync()?;
                }
                Ok(keep)
            });

        match result {
            Ok(true) => fs::rename(&backup, archive).map_err(|source| {
                discard(&backup);
                ZipError::WriteError { offset: 0, source }
            }),
            Ok(false) => {
                discard(&backup);
                Ok(())
            }
            Err(err) => {
                discard(&backup);
                Err(err)
            }
        }
    }
}

fn discard(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        warn!("Cannot remove [{}]: {err}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::zip::NoopAttributes;

    fn engine() -> ArchiveEngine {
        ArchiveEngine::with_attributes(EngineConfig::default(), Arc::new(NoopAttributes))
    }

    #[test]
    fn backup_name_appends_suffix() {
        let engine = engine();
        assert_eq!(engine.backup_path(Path::new("/tmp/a.zip")), Path::new("/tmp/a.zip.ZIP"));
    }

    #[test]
    fn failed_new_archive_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        fs::write(&src, b"a").unwrap();
        let zip = dir.path().join("new.zip");

        let entries = [
            AppendEntry::new(&src).relative_to(dir.path()),
            AppendEntry::new(&src).relative_to(dir.path()),
        ];
        let err = engine().append(&zip, &entries).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EntryAlreadyExists);
        assert!(!zip.exists());
    }

    #[test]
    fn missing_archive_operations() {
        let dir = tempfile::tempdir().unwrap();
        let zip = dir.path().join("absent.zip");
        let engine = engine();

        assert_eq!(engine.list(&zip).unwrap_err().kind(), ErrorKind::ArchiveNotFound);
        assert_eq!(
            engine.delete(&zip, &["x".to_string()]).unwrap_err().kind(),
            ErrorKind::ArchiveNotFound
        );
        let err = engine
            .extract(&zip, dir.path(), &ExtractOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArchiveNotFound);
        assert!(err.to_string().contains("absent.zip"));
    }

    #[test]
    fn backup_is_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        fs::write(&src, b"a").unwrap();
        let zip = dir.path().join("x.zip");
        let engine = engine();

        engine.append(&zip, &[AppendEntry::new(&src).relative_to(dir.path())]).unwrap();
        let err = engine
            .append(&zip, &[AppendEntry::new(&src).relative_to(dir.path())])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EntryAlreadyExists);
        assert!(!engine.backup_path(&zip).exists());
        assert_eq!(engine.locks().active(), 0);
    }

    #[test]
    fn failure_after_splice_keeps_original() {
        let dir = tempfile::tempdir().unwrap();
        for (name, body) in [("a.txt", "alpha"), ("b.txt", "bravo")] {
            fs::write(dir.path().join(name), body).unwrap();
        }
        let zip = dir.path().join("x.zip");
        let engine = engine();
        engine
            .append(
                &zip,
                &[
                    AppendEntry::new(dir.path().join("a.txt")).relative_to(dir.path()),
                    AppendEntry::new(dir.path().join("b.txt")).relative_to(dir.path()),
                ],
            )
            .unwrap();
        let before = fs::read(&zip).unwrap();

        let mut spliced = false;
        let err = engine
            .with_backup(&zip, |archive| {
                assert_eq!(archive.delete("a.txt", engine.config())?, DeleteOutcome::Remaining);
                spliced = true;
                Err(ZipError::malformed("trailer rewrite failed"))
            })
            .unwrap_err();

        assert!(spliced);
        assert_eq!(err.kind(), ErrorKind::ArchiveMalformed);
        assert_eq!(fs::read(&zip).unwrap(), before);
        assert!(!engine.backup_path(&zip).exists());
        let names: Vec<String> = engine.list(&zip).unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["a.txt", "b.txt"]);
    }
}
