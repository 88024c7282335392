//! Owner, group and mode capture and restoration.
//!
//! The engine holds one [`FileAttributes`] implementation chosen at startup
//! by [`platform`]. [`PosixAttributes`] reads and applies real POSIX
//! metadata; [`NoopAttributes`] is used where none exists, in which case
//! archives carry no attribute records and extraction leaves default
//! permissions in place.

use log::warn;
use std::path::Path;
use std::sync::Arc;

use super::structures::AttributeRecord;
use crate::error::Result;

/// Mode, owner and group of one file system object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Full `st_mode`, including the file type bits.
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

pub trait FileAttributes: Send + Sync {
    /// `lstat` the path. `None` when the platform has nothing to record.
    fn capture(&self, path: &Path) -> Option<FileStat>;

    /// Apply owner and group, then mode. A symbolic link at `path` gets only
    /// its own owner and group; its target is never touched.
    fn restore(&self, path: &Path, record: &AttributeRecord) -> Result<()>;

    /// Apply only the permission bits of `mode`.
    fn restore_mode(&self, path: &Path, mode: u32) -> Result<()>;

    /// Replace `link` with a symbolic link to `target`.
    fn make_symlink(&self, target: &str, link: &Path) -> Result<()>;

    fn supports_symlinks(&self) -> bool;
}

/// The implementation for the platform this binary was built for.
pub fn platform() -> Arc<dyn FileAttributes> {
    #[cfg(unix)]
    {
        Arc::new(PosixAttributes)
    }

    #[cfg(not(unix))]
    {
        Arc::new(NoopAttributes)
    }
}

/// Run an attribute operation, logging instead of propagating its failure.
pub(crate) fn best_effort(what: &str, path: &Path, result: Result<()>) {
    if let Err(err) = result {
        warn!("{what} [{}]: {err}", path.display());
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAttributes;

impl FileAttributes for NoopAttributes {
    fn capture(&self, _path: &Path) -> Option<FileStat> {
        None
    }

    fn restore(&self, _path: &Path, _record: &AttributeRecord) -> Result<()> {
        Ok(())
    }

    fn restore_mode(&self, _path: &Path, _mode: u32) -> Result<()> {
        Ok(())
    }

    fn make_symlink(&self, _target: &str, _link: &Path) -> Result<()> {
        Ok(())
    }

    fn supports_symlinks(&self) -> bool {
        false
    }
}

#[cfg(unix)]
pub use posix::PosixAttributes;

#[cfg(unix)]
mod posix {
    use log::debug;
    use std::fs::{self, Permissions};
    use std::os::unix::fs::{MetadataExt, PermissionsExt};
    use std::path::Path;

    use super::{FileAttributes, FileStat};
    use crate::error::{Result, ZipError};
    use crate::zip::structures::{AttributeRecord, S_IFLNK, S_IFMT};

    #[derive(Debug, Default, Clone, Copy)]
    pub struct PosixAttributes;

    fn attribute_error(path: &Path, source: std::io::Error) -> ZipError {
        ZipError::AttributeSetError {
            path: path.to_path_buf(),
            source,
        }
    }

    impl FileAttributes for PosixAttributes {
        fn capture(&self, path: &Path) -> Option<FileStat> {
            match fs::symlink_metadata(path) {
                Ok(meta) => Some(FileStat {
                    mode: meta.mode(),
                    uid: meta.uid(),
                    gid: meta.gid(),
                }),
                Err(err) => {
                    debug!("Cannot stat [{}]: {err}", path.display());
                    None
                }
            }
        }

        fn restore(&self, path: &Path, record: &AttributeRecord) -> Result<()> {
            let is_link = record.mode & S_IFMT == S_IFLNK
                || fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_symlink());
            let owned = if is_link {
                std::os::unix::fs::lchown(path, Some(record.uid), Some(record.gid))
            } else {
                std::os::unix::fs::chown(path, Some(record.uid), Some(record.gid))
            }
            .map_err(|e| attribute_error(path, e));

            // Links carry no permissions of their own.
            if !is_link {
                self.restore_mode(path, record.mode)?;
            }
            owned
        }

        fn restore_mode(&self, path: &Path, mode: u32) -> Result<()> {
            fs::set_permissions(path, Permissions::from_mode(mode & 0o7777))
                .map_err(|e| attribute_error(path, e))
        }

        fn make_symlink(&self, target: &str, link: &Path) -> Result<()> {
            if fs::symlink_metadata(link).is_ok() {
                fs::remove_file(link).map_err(|e| attribute_error(link, e))?;
            }
            std::os::unix::fs::symlink(target, link).map_err(|e| attribute_error(link, e))
        }

        fn supports_symlinks(&self) -> bool {
            true
        }
    }

}
