//! Error taxonomy for the archive engine.
//!
//! Every failure carries a machine-checkable [`ErrorKind`] (see
//! [`ZipError::kind`]) plus a message naming the offending member, path or
//! byte offset. Engine-level operations wrap errors in
//! [`ZipError::Archive`] so the message also identifies the archive.

use std::io;
use std::path::PathBuf;

pub type Result<T, E = ZipError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum ZipError {
    #[error("Malformed archive: {0}")]
    ArchiveMalformed(String),

    #[error("Archive does not exist [{}]", .0.display())]
    ArchiveNotFound(PathBuf),

    #[error("File name not found in zip archive [{0}]")]
    EntryNotFound(String),

    #[error("Entry already exists [{0}]")]
    EntryAlreadyExists(String),

    #[error("CRC-32 mismatch for [{name}]: recorded {expected:08x}, computed {actual:08x}")]
    ChecksumMismatch {
        name: String,
        expected: u32,
        actual: u32,
    },

    #[error("Error allocating {0} bytes")]
    OutOfMemory(usize),

    #[error("Read error at offset {offset}: {source}")]
    ReadError {
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("Write error at offset {offset}: {source}")]
    WriteError {
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("Error making directory [{}]: {source}", path.display())]
    DirectoryCreateError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Error setting file attributes [{}]: {source}", path.display())]
    AttributeSetError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid path [{}]: {reason}", path.display())]
    InvalidPath { path: PathBuf, reason: String },

    #[error("Unsupported compression method {method} for [{name}]")]
    UnsupportedCompression { name: String, method: u16 },

    #[error("[{}] {source}", archive.display())]
    Archive {
        archive: PathBuf,
        #[source]
        source: Box<ZipError>,
    },
}

/// Coarse classification of a [`ZipError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ArchiveMalformed,
    ArchiveNotFound,
    EntryNotFound,
    EntryAlreadyExists,
    ChecksumMismatch,
    OutOfMemory,
    ReadError,
    WriteError,
    DirectoryCreateError,
    AttributeSetError,
    InvalidPath,
    UnsupportedCompression,
}

impl ZipError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ZipError::ArchiveMalformed(_) => ErrorKind::ArchiveMalformed,
            ZipError::ArchiveNotFound(_) => ErrorKind::ArchiveNotFound,
            ZipError::EntryNotFound(_) => ErrorKind::EntryNotFound,
            ZipError::EntryAlreadyExists(_) => ErrorKind::EntryAlreadyExists,
            ZipError::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            ZipError::OutOfMemory(_) => ErrorKind::OutOfMemory,
            ZipError::ReadError { .. } => ErrorKind::ReadError,
            ZipError::WriteError { .. } => ErrorKind::WriteError,
            ZipError::DirectoryCreateError { .. } => ErrorKind::DirectoryCreateError,
            ZipError::AttributeSetError { .. } => ErrorKind::AttributeSetError,
            ZipError::InvalidPath { .. } => ErrorKind::InvalidPath,
            ZipError::UnsupportedCompression { .. } => ErrorKind::UnsupportedCompression,
            ZipError::Archive { source, .. } => source.kind(),
        }
    }

    /// Attach the archive path to this error, unless it already carries one.
    pub fn in_archive(self, archive: impl Into<PathBuf>) -> Self {
        match self {
            err @ ZipError::Archive { .. } => err,
            err => ZipError::Archive {
                archive: archive.into(),
                source: Box::new(err),
            },
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        ZipError::ArchiveMalformed(reason.into())
    }

    /// A value at `offset` that does not fit the format's 32-bit fields.
    pub(crate) fn too_large(offset: u64, what: &str) -> Self {
        ZipError::WriteError {
            offset,
            source: io::Error::new(
                io::ErrorKind::FileTooLarge,
                format!("{what} exceeds the 32-bit ZIP field limit"),
            ),
        }
    }

    pub(crate) fn invalid_path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        ZipError::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<walkdir::Error> for ZipError {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(|p| p.to_path_buf()).unwrap_or_default();
        ZipError::InvalidPath {
            reason: err.to_string(),
            path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_looks_through_archive_wrapper() {
        let err = ZipError::EntryNotFound("a.txt".to_string()).in_archive("/tmp/x.zip");
        assert_eq!(err.kind(), ErrorKind::EntryNotFound);

        let message = err.to_string();
        assert!(message.contains("/tmp/x.zip"));
        assert!(message.contains("a.txt"));
    }

    #[test]
    fn archive_path_is_attached_once() {
        let err = ZipError::malformed("bad")
            .in_archive("/first.zip")
            .in_archive("/second.zip");
        assert!(err.to_string().contains("/first.zip"));
        assert!(!err.to_string().contains("/second.zip"));
    }
}
