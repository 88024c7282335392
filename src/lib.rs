//! # attrzip
//!
//! A PKZIP-compatible archive engine that carries POSIX owner, group and
//! mode for every member in a private extension block.
//!
//! The engine creates archives, appends to them, deletes members in place,
//! lists them, and extracts them, optionally restoring symbolic links and
//! permissions. Archives it writes remain readable by any ZIP tool; the
//! extension block sits in otherwise unreferenced space between member data
//! and the central directory.
//!
//! ## Features
//!
//! - Deflate (raw, levels 0-9) and stored members with CRC-32 verification
//! - Append and delete against a working copy, swapped in by rename only on
//!   success, so a failed update leaves the archive untouched
//! - In-place member removal by splicing and offset renumbering
//! - Per-path locking: concurrent sessions on one archive are serialized
//! - Archive comments of any length and archives embedded in larger files
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use attrzip::{AppendEntry, ArchiveEngine, ExtractOptions};
//!
//! fn main() -> attrzip::Result<()> {
//!     let engine = ArchiveEngine::default();
//!     let archive = Path::new("backup.zip");
//!
//!     engine.append(archive, &[AppendEntry::new("/etc/hosts").relative_to("/etc")])?;
//!     for entry in engine.list(archive)? {
//!         println!("{} {} {}", entry.length, entry.method, entry.name);
//!     }
//!
//!     let options = ExtractOptions {
//!         restore_permissions: true,
//!         ..Default::default()
//!     };
//!     engine.extract(archive, Path::new("restore"), &options)?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod io;
pub mod zip;

pub use cli::Cli;
pub use config::EngineConfig;
pub use engine::{AppendEntry, ArchiveEngine};
pub use error::{ErrorKind, Result, ZipError};
pub use io::{ArchiveFile, ReadAt};
pub use zip::{Archive, DeleteOutcome, EntryListing, ExtractOptions, FileAttributes, NoopAttributes};
