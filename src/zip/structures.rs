use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};
use std::time::SystemTime;

use crate::error::{Result, ZipError};
use crate::io::{FieldReader, FieldWriter};

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: u32 = 0x04034b50;
pub const LFH_SIZE: usize = 30;

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: u32 = 0x02014b50;
pub const CDFH_MIN_SIZE: usize = 46;

/// End of Central Directory (EOCD) - 22 bytes minimum
pub const EOCD_SIGNATURE: u32 = 0x06054b50;
pub const EOCD_SIZE: usize = 22;

/// Attribute extension block ("SF\x02\x01")
pub const EXTENSION_SIGNATURE: u32 = 0x01024653;

pub const VERSION_NEEDED: u16 = 20;
/// Host system UNIX, ZIP format version 2.0.
pub const VERSION_MADE_BY: u16 = 0x0314;

/// `st_mode` file type bits.
pub const S_IFMT: u32 = 0o170000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }

    /// Listing label; deflate labels encode the level hint in flag bits 1-2.
    pub fn label(&self, flags: u16) -> &'static str {
        match self {
            CompressionMethod::Stored => "Stored",
            CompressionMethod::Deflate => match (flags & 0x6) / 2 {
                0 => "Defl:N",
                1 => "Defl:X",
                _ => "Defl:F",
            },
            CompressionMethod::Unknown(_) => "Unkn.",
        }
    }
}

/// Normalize an archive member name: lossy UTF-8, forward slashes only.
pub fn normalize_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).replace('\\', "/")
}

/// MS-DOS packed date and time, local time zone, two-second resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DosDateTime {
    pub date: u16,
    pub time: u16,
}

impl DosDateTime {
    pub fn from_system_time(time: SystemTime) -> Self {
        let local: DateTime<Local> = time.into();
        if local.year() < 1980 {
            // 1980-01-01 00:00:00, the earliest representable instant
            return Self {
                date: (1 << 5) | 1,
                time: 0,
            };
        }
        let year = (local.year() - 1980).min(127) as u16;
        Self {
            date: local.day() as u16 + 32 * local.month() as u16 + 512 * year,
            time: local.second() as u16 / 2 + 32 * local.minute() as u16 + 2048 * local.hour() as u16,
        }
    }

    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Parse modification date to (year, month, day)
    pub fn mod_date(&self) -> (u16, u8, u8) {
        let day = (self.date & 0x1F) as u8;
        let month = ((self.date >> 5) & 0x0F) as u8;
        let year = ((self.date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// Parse modification time to (hour, minute, second)
    pub fn mod_time(&self) -> (u8, u8, u8) {
        let second = ((self.time & 0x1F) * 2) as u8;
        let minute = ((self.time >> 5) & 0x3F) as u8;
        let hour = ((self.time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }

    /// `None` for field values that name no real local instant.
    pub fn to_system_time(&self) -> Option<SystemTime> {
        let (year, month, day) = self.mod_date();
        let (hour, minute, second) = self.mod_time();
        Local
            .with_ymd_and_hms(
                year as i32,
                month as u32,
                day as u32,
                hour as u32,
                minute as u32,
                second as u32,
            )
            .earliest()
            .map(SystemTime::from)
    }

    /// `MM-DD-YY`
    pub fn date_string(&self) -> String {
        let (year, month, day) = self.mod_date();
        format!("{:02}-{:02}-{:02}", month, day, year % 100)
    }

    /// `HH:MM`
    pub fn time_string(&self) -> String {
        let (hour, minute, _) = self.mod_time();
        format!("{:02}:{:02}", hour, minute)
    }
}

/// End of Central Directory record, including its trailing comment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEndRecord {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment: Vec<u8>,
}

impl DirectoryEndRecord {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = FieldReader::new(data, "end of central directory");
        reader.expect_signature(EOCD_SIGNATURE)?;
        let disk_number = reader.u16()?;
        let disk_with_cd = reader.u16()?;
        let disk_entries = reader.u16()?;
        let total_entries = reader.u16()?;
        let cd_size = reader.u32()?;
        let cd_offset = reader.u32()?;
        let comment_len = reader.u16()? as usize;
        let comment = reader.bytes(comment_len)?;
        Ok(Self {
            disk_number,
            disk_with_cd,
            disk_entries,
            total_entries,
            cd_size,
            cd_offset,
            comment,
        })
    }

    /// Single-disk archives only, with consistent entry counts.
    pub fn validate(&self) -> Result<()> {
        if self.disk_number != 0 || self.disk_with_cd != 0 {
            return Err(ZipError::malformed(format!(
                "multi-disk archive (disk {}, directory on disk {})",
                self.disk_number, self.disk_with_cd
            )));
        }
        if self.disk_entries != self.total_entries {
            return Err(ZipError::malformed(format!(
                "entry count mismatch: {} on this disk, {} in total",
                self.disk_entries, self.total_entries
            )));
        }
        Ok(())
    }

    pub fn size(&self) -> usize {
        EOCD_SIZE + self.comment.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = FieldWriter::with_capacity(self.size());
        writer
            .put_u32(EOCD_SIGNATURE)
            .put_u16(self.disk_number)
            .put_u16(self.disk_with_cd)
            .put_u16(self.disk_entries)
            .put_u16(self.total_entries)
            .put_u32(self.cd_size)
            .put_u32(self.cd_offset)
            .put_u16(self.comment.len() as u16)
            .put_bytes(&self.comment);
        writer.into_inner()
    }
}

/// Central directory form of one archive member.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub method: u16,
    pub modified: DosDateTime,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub disk_start: u16,
    pub internal_attrs: u16,
    pub external_attrs: u32,
    pub local_header_offset: u32,
    pub name: Vec<u8>,
    pub extra: Vec<u8>,
    pub comment: Vec<u8>,
}

impl DirectoryEntry {
    pub fn parse(reader: &mut FieldReader<'_>) -> Result<Self> {
        reader.expect_signature(CDFH_SIGNATURE)?;
        let version_made_by = reader.u16()?;
        let version_needed = reader.u16()?;
        let flags = reader.u16()?;
        let method = reader.u16()?;
        let time = reader.u16()?;
        let date = reader.u16()?;
        let crc32 = reader.u32()?;
        let compressed_size = reader.u32()?;
        let uncompressed_size = reader.u32()?;
        let name_len = reader.u16()? as usize;
        let extra_len = reader.u16()? as usize;
        let comment_len = reader.u16()? as usize;
        let disk_start = reader.u16()?;
        let internal_attrs = reader.u16()?;
        let external_attrs = reader.u32()?;
        let local_header_offset = reader.u32()?;
        let name = reader.bytes(name_len)?;
        let extra = reader.bytes(extra_len)?;
        let comment = reader.bytes(comment_len)?;
        Ok(Self {
            version_made_by,
            version_needed,
            flags,
            method,
            modified: DosDateTime { date, time },
            crc32,
            compressed_size,
            uncompressed_size,
            disk_start,
            internal_attrs,
            external_attrs,
            local_header_offset,
            name,
            extra,
            comment,
        })
    }

    pub fn write_to(&self, writer: &mut FieldWriter) {
        writer
            .put_u32(CDFH_SIGNATURE)
            .put_u16(self.version_made_by)
            .put_u16(self.version_needed)
            .put_u16(self.flags)
            .put_u16(self.method)
            .put_u16(self.modified.time)
            .put_u16(self.modified.date)
            .put_u32(self.crc32)
            .put_u32(self.compressed_size)
            .put_u32(self.uncompressed_size)
            .put_u16(self.name.len() as u16)
            .put_u16(self.extra.len() as u16)
            .put_u16(self.comment.len() as u16)
            .put_u16(self.disk_start)
            .put_u16(self.internal_attrs)
            .put_u32(self.external_attrs)
            .put_u32(self.local_header_offset)
            .put_bytes(&self.name)
            .put_bytes(&self.extra)
            .put_bytes(&self.comment);
    }

    /// Bytes this entry occupies in the central directory.
    pub fn size(&self) -> u32 {
        (CDFH_MIN_SIZE + self.name.len() + self.extra.len() + self.comment.len()) as u32
    }

    pub fn file_name(&self) -> String {
        normalize_name(&self.name)
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.name.last(), Some(b'/') | Some(b'\\'))
    }

    pub fn compression(&self) -> CompressionMethod {
        CompressionMethod::from_u16(self.method)
    }

    /// POSIX mode carried in the high half of the external attribute word.
    pub fn unix_mode(&self) -> u32 {
        self.external_attrs >> 16
    }

    pub fn is_symlink(&self) -> bool {
        self.unix_mode() & S_IFMT == S_IFLNK
    }
}

/// Fixed part of a local file header plus its name and extra field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub method: u16,
    pub modified: DosDateTime,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub name: Vec<u8>,
    pub extra: Vec<u8>,
}

impl LocalHeader {
    /// Byte offset of the CRC field, the first of the three patched after compression.
    pub const CRC_OFFSET: u64 = 14;

    pub fn parse(reader: &mut FieldReader<'_>) -> Result<Self> {
        reader.expect_signature(LFH_SIGNATURE)?;
        let version_needed = reader.u16()?;
        let flags = reader.u16()?;
        let method = reader.u16()?;
        let time = reader.u16()?;
        let date = reader.u16()?;
        let crc32 = reader.u32()?;
        let compressed_size = reader.u32()?;
        let uncompressed_size = reader.u32()?;
        let name_len = reader.u16()? as usize;
        let extra_len = reader.u16()? as usize;
        let name = reader.bytes(name_len)?;
        let extra = reader.bytes(extra_len)?;
        Ok(Self {
            version_needed,
            flags,
            method,
            modified: DosDateTime { date, time },
            crc32,
            compressed_size,
            uncompressed_size,
            name,
            extra,
        })
    }

    /// Lengths of the name and extra field from a bare 30-byte header.
    pub fn variable_lengths(fixed: &[u8]) -> Result<(usize, usize)> {
        let mut reader = FieldReader::new(fixed, "local header");
        reader.expect_signature(LFH_SIGNATURE)?;
        reader.bytes(22)?;
        Ok((reader.u16()? as usize, reader.u16()? as usize))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = FieldWriter::with_capacity(self.header_len() as usize);
        writer
            .put_u32(LFH_SIGNATURE)
            .put_u16(self.version_needed)
            .put_u16(self.flags)
            .put_u16(self.method)
            .put_u16(self.modified.time)
            .put_u16(self.modified.date)
            .put_u32(self.crc32)
            .put_u32(self.compressed_size)
            .put_u32(self.uncompressed_size)
            .put_u16(self.name.len() as u16)
            .put_u16(self.extra.len() as u16)
            .put_bytes(&self.name)
            .put_bytes(&self.extra);
        writer.into_inner()
    }

    pub fn header_len(&self) -> u64 {
        (LFH_SIZE + self.name.len() + self.extra.len()) as u64
    }
}

/// Owner, group and mode preserved for one archived path component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeRecord {
    pub name: String,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

impl AttributeRecord {
    pub fn parse(reader: &mut FieldReader<'_>) -> Result<Self> {
        let name_len = reader.u16()? as usize;
        let name = normalize_name(&reader.bytes(name_len)?);
        Ok(Self {
            name,
            mode: reader.u32()?,
            uid: reader.u32()?,
            gid: reader.u32()?,
        })
    }

    pub fn write_to(&self, writer: &mut FieldWriter) {
        writer
            .put_u16(self.name.len() as u16)
            .put_bytes(self.name.as_bytes())
            .put_u32(self.mode)
            .put_u32(self.uid)
            .put_u32(self.gid);
    }

    pub fn size(&self) -> usize {
        2 + self.name.len() + 12
    }
}

/// One line of an archive listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryListing {
    pub length: u32,
    pub method: &'static str,
    pub size: u32,
    /// `size * 100 / length`, 0 for empty members.
    pub ratio: u32,
    /// `MM-DD-YY`
    pub date: String,
    /// `HH:MM`
    pub time: String,
    /// Eight lowercase hex digits.
    pub crc32: String,
    pub name: String,
}

impl From<&DirectoryEntry> for EntryListing {
    fn from(entry: &DirectoryEntry) -> Self {
        let ratio = if entry.uncompressed_size > 0 {
            (entry.compressed_size as u64 * 100 / entry.uncompressed_size as u64) as u32
        } else {
            0
        };
        Self {
            length: entry.uncompressed_size,
            method: entry.compression().label(entry.flags),
            size: entry.compressed_size,
            ratio,
            date: entry.modified.date_string(),
            time: entry.modified.time_string(),
            crc32: format!("{:08x}", entry.crc32),
            name: entry.file_name(),
        }
    }
}

impl EntryListing {
    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }
}
