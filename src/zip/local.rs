//! Local entry codec: header plus payload.
//!
//! Writing deflates the source in chunks while hashing it, then seeks back
//! into the header to patch CRC and sizes, since neither is known up front.
//! Reading inflates (or copies) in chunks and verifies the CRC.

use crc32fast::Hasher;
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use log::{debug, warn};
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Write};
use std::path::Path;

use super::attributes::{FileAttributes, best_effort};
use super::paths::SourceItem;
use super::structures::{
    AttributeRecord, CompressionMethod, DirectoryEntry, DosDateTime, LFH_SIZE, LocalHeader, S_IFDIR,
    S_IFLNK, S_IFMT, VERSION_MADE_BY, VERSION_NEEDED, normalize_name,
};
use crate::config::EngineConfig;
use crate::error::{Result, ZipError};
use crate::io::{ArchiveFile, FieldReader, FieldWriter, ReadAt, alloc_buffer, read_vec_at};

/// MS-DOS directory attribute, low byte of the external attribute word.
const DOS_DIRECTORY: u32 = 0x10;

/// One member's local form: header, payload location and, for members being
/// added, where the payload comes from.
#[derive(Debug, Clone)]
pub struct LocalEntry {
    pub header: LocalHeader,
    /// Header position relative to the archive start.
    pub offset: u64,
    pub external_attrs: u32,
    source: Option<SourceItem>,
}

impl LocalEntry {
    /// Read the local header of `entry` from the archive starting at `start`.
    ///
    /// Headers written with a trailing data descriptor leave CRC and sizes
    /// zero; those are taken from the central directory instead.
    pub fn read<R: ReadAt + ?Sized>(reader: &mut R, start: u64, entry: &DirectoryEntry) -> Result<Self> {
        let offset = entry.local_header_offset as u64;
        let fixed = read_vec_at(reader, start + offset, LFH_SIZE)?;
        let (name_len, extra_len) = LocalHeader::variable_lengths(&fixed)?;
        let data = read_vec_at(reader, start + offset, LFH_SIZE + name_len + extra_len)?;
        let mut header = LocalHeader::parse(&mut FieldReader::new(&data, "local header"))?;

        if header.crc32 == 0 {
            header.crc32 = entry.crc32;
        }
        if header.compressed_size == 0 {
            header.compressed_size = entry.compressed_size;
        }
        if header.uncompressed_size == 0 {
            header.uncompressed_size = entry.uncompressed_size;
        }

        let local = Self {
            header,
            offset,
            external_attrs: entry.external_attrs,
            source: None,
        };
        debug!(
            "Local entry [{}] at +{offset}, {} bytes on disk",
            local.name(),
            local.total_size()
        );
        Ok(local)
    }

    /// Prepare a new member for `item`. `mode` is its full `st_mode`, if known.
    pub fn for_source(item: SourceItem, mode: Option<u32>, config: &EngineConfig) -> Self {
        let modified = fs::symlink_metadata(&item.path)
            .and_then(|m| m.modified())
            .map(DosDateTime::from_system_time)
            .unwrap_or_else(|_| DosDateTime::now());

        let mode = match mode {
            Some(mode) => mode,
            None if item.is_symlink => S_IFLNK | 0o777,
            None if item.is_dir => S_IFDIR | 0o755,
            None => 0,
        };
        let mut external_attrs = mode << 16;
        if item.is_dir {
            external_attrs |= DOS_DIRECTORY;
        }

        let (method, flags) = if item.is_dir {
            (CompressionMethod::Stored, 0)
        } else {
            (CompressionMethod::Deflate, config.deflate_flags())
        };

        Self {
            header: LocalHeader {
                version_needed: VERSION_NEEDED,
                flags,
                method: method.as_u16(),
                modified,
                name: item.name.as_bytes().to_vec(),
                ..Default::default()
            },
            offset: 0,
            external_attrs,
            source: Some(item),
        }
    }

    pub fn name(&self) -> String {
        normalize_name(&self.header.name)
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.header.name.last(), Some(b'/') | Some(b'\\'))
    }

    /// Header, name, extra field and payload.
    pub fn total_size(&self) -> u64 {
        self.header.header_len() + self.header.compressed_size as u64
    }

    pub fn end(&self) -> u64 {
        self.offset + self.total_size()
    }

    /// Central directory form of this entry.
    pub fn to_directory_entry(&self) -> Result<DirectoryEntry> {
        let local_header_offset = u32::try_from(self.offset)
            .map_err(|_| ZipError::too_large(self.offset, "local header offset"))?;
        Ok(DirectoryEntry {
            version_made_by: VERSION_MADE_BY,
            version_needed: self.header.version_needed,
            flags: self.header.flags,
            method: self.header.method,
            modified: self.header.modified,
            crc32: self.header.crc32,
            compressed_size: self.header.compressed_size,
            uncompressed_size: self.header.uncompressed_size,
            external_attrs: self.external_attrs,
            local_header_offset,
            name: self.header.name.clone(),
            extra: self.header.extra.clone(),
            ..Default::default()
        })
    }

    /// Write header and compressed payload at the file's current position.
    pub fn flush(&mut self, file: &mut ArchiveFile, start: u64, config: &EngineConfig) -> Result<()> {
        let header_pos = file.tell()?;
        self.offset = header_pos - start;
        file.write_all(&self.header.to_bytes())?;

        if self.is_dir() {
            debug!("Wrote directory entry [{}] at +{}", self.name(), self.offset);
            return Ok(());
        }

        let Some(item) = self.source.as_ref() else {
            return Err(ZipError::invalid_path(self.name(), "member has no source to compress"));
        };
        let mut source: Box<dyn Read> = if item.is_symlink {
            let target = fs::read_link(&item.path)
                .map_err(|e| ZipError::invalid_path(&item.path, format!("cannot read link: {e}")))?;
            Box::new(Cursor::new(target.to_string_lossy().into_owned().into_bytes()))
        } else {
            Box::new(
                File::open(&item.path)
                    .map_err(|e| ZipError::invalid_path(&item.path, format!("cannot open source: {e}")))?,
            )
        };

        let data_pos = header_pos + self.header.header_len();
        let mut hasher = Hasher::new();
        let mut buf = alloc_buffer(config.chunk_size())?;
        let mut total_in = 0u64;
        let mut encoder = DeflateEncoder::new(&mut *file, Compression::new(config.clamped_level()));
        loop {
            let n = source
                .read(&mut buf)
                .map_err(|source| ZipError::ReadError { offset: total_in, source })?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            encoder
                .write_all(&buf[..n])
                .map_err(|source| ZipError::WriteError { offset: data_pos, source })?;
            total_in += n as u64;
        }
        encoder
            .try_finish()
            .map_err(|source| ZipError::WriteError { offset: data_pos, source })?;
        drop(encoder);

        let end = file.tell()?;
        let compressed = end - data_pos;
        self.header.crc32 = hasher.finalize();
        self.header.compressed_size =
            u32::try_from(compressed).map_err(|_| ZipError::too_large(data_pos, "compressed size"))?;
        self.header.uncompressed_size =
            u32::try_from(total_in).map_err(|_| ZipError::too_large(data_pos, "uncompressed size"))?;

        let mut patch = FieldWriter::with_capacity(12);
        patch
            .put_u32(self.header.crc32)
            .put_u32(self.header.compressed_size)
            .put_u32(self.header.uncompressed_size);
        file.write_at(header_pos + LocalHeader::CRC_OFFSET, &patch.into_inner())?;
        file.seek_to(end)?;

        debug!(
            "Wrote [{}] at +{}: {} -> {} bytes, crc {:08x}",
            self.name(),
            self.offset,
            total_in,
            compressed,
            self.header.crc32
        );
        Ok(())
    }

    /// Decode the payload into `out`, verifying length and CRC.
    ///
    /// A corrupt deflate stream is reported as a checksum mismatch.
    pub fn do_extract<W: Write>(
        &self,
        file: &mut ArchiveFile,
        start: u64,
        out: &mut W,
        chunk: usize,
    ) -> Result<()> {
        let name = self.name();
        let expected = self.header.crc32;
        let data_pos = start + self.offset + self.header.header_len();
        file.seek_to(data_pos)?;
        let payload = (&mut *file).take(self.header.compressed_size as u64);

        let mut reader: Box<dyn Read + '_> = match CompressionMethod::from_u16(self.header.method) {
            CompressionMethod::Stored => Box::new(payload),
            CompressionMethod::Deflate => Box::new(DeflateDecoder::new(payload)),
            CompressionMethod::Unknown(method) => {
                return Err(ZipError::UnsupportedCompression { name, method });
            }
        };

        let mut hasher = Hasher::new();
        let mut buf = alloc_buffer(chunk)?;
        let mut written = 0u64;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!("Decoding [{name}] failed after {written} bytes: {err}");
                    return Err(ZipError::ChecksumMismatch {
                        name,
                        expected,
                        actual: hasher.finalize(),
                    });
                }
            };
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            out.write_all(&buf[..n])
                .map_err(|source| ZipError::WriteError { offset: written, source })?;
            written += n as u64;
        }

        let actual = hasher.finalize();
        if actual != expected || written != self.header.uncompressed_size as u64 {
            return Err(ZipError::ChecksumMismatch { name, expected, actual });
        }
        Ok(())
    }

    /// Extract this (non-directory) member to `dest`.
    ///
    /// The modification time comes from the DOS timestamp. With `restore`,
    /// symbolic links are recreated and owner, group and mode are applied
    /// from `record` or else from the external attribute word. A failed
    /// extraction removes the partially written file.
    pub fn extract(
        &self,
        file: &mut ArchiveFile,
        start: u64,
        dest: &Path,
        restore: Option<(&dyn FileAttributes, Option<&AttributeRecord>)>,
        chunk: usize,
    ) -> Result<()> {
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ZipError::DirectoryCreateError {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut out =
            File::create(dest).map_err(|source| ZipError::WriteError { offset: 0, source })?;
        if let Err(err) = self.do_extract(file, start, &mut out, chunk) {
            drop(out);
            if let Err(e) = fs::remove_file(dest) {
                warn!("Cannot remove partial file [{}]: {e}", dest.display());
            }
            return Err(err);
        }
        if let Some(modified) = self.header.modified.to_system_time() {
            if let Err(e) = out.set_modified(modified) {
                debug!("Cannot set modification time of [{}]: {e}", dest.display());
            }
        }
        drop(out);

        let Some((attrs, record)) = restore else {
            return Ok(());
        };

        let mode = self.external_attrs >> 16;
        if mode & S_IFMT == S_IFLNK && attrs.supports_symlinks() {
            let target = fs::read_to_string(dest).map_err(|source| ZipError::ReadError { offset: 0, source })?;
            best_effort("Cannot create symbolic link", dest, attrs.make_symlink(&target, dest));
        }
        let is_link = fs::symlink_metadata(dest).is_ok_and(|m| m.file_type().is_symlink());

        match record {
            Some(record) => best_effort("Cannot restore attributes", dest, attrs.restore(dest, record)),
            // Permission bits would land on the link target.
            None if is_link => {}
            None if mode != 0 => best_effort("Cannot restore mode", dest, attrs.restore_mode(dest, mode)),
            None => {}
        }
        Ok(())
    }
}
