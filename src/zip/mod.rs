//! ZIP archive reading, writing and in-place update.
//!
//! ## Architecture
//!
//! - [`structures`]: on-disk records (headers, end record, attribute
//!   records) with their byte layouts, DOS timestamps and listing labels
//! - [`locator`]: backward signature search for the end record
//! - [`central_dir`]: the member index and its bookkeeping
//! - [`extension`]: the private block preserving owner, group and mode
//! - [`local`]: local headers and payload compression/decompression
//! - [`archive`]: one open archive and the append/delete/list/extract
//!   algorithms over it
//! - [`lock`]: per-path mutual exclusion across sessions
//!
//! ## ZIP Format Overview
//!
//! A ZIP file written here consists of:
//! 1. Local file headers and deflated data for each member
//! 2. An optional attribute extension block (`SF\x02\x01` + records)
//! 3. Central Directory with metadata for all members
//! 4. End of Central Directory (EOCD) record, with an optional comment
//!
//! Member CRC and sizes are patched into each local header after
//! compression; no data descriptors are written.
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support
//! - No ZIP64 records: member sizes and offsets must fit in 32 bits
//! - STORED and DEFLATE only

pub mod archive;
pub mod attributes;
pub mod central_dir;
pub mod extension;
pub mod local;
pub mod locator;
pub mod lock;
pub mod paths;
pub mod structures;

pub use archive::{Archive, DeleteOutcome, ExtractOptions};
#[cfg(unix)]
pub use attributes::PosixAttributes;
pub use attributes::{FileAttributes, FileStat, NoopAttributes, platform};
pub use central_dir::CentralDirectory;
pub use extension::ExtensionBlock;
pub use local::LocalEntry;
pub use lock::{ArchiveLock, LockRegistry};
pub use paths::{SourceItem, archive_name, collect_sources, reject_linked_parents, safe_join};
pub use structures::*;
