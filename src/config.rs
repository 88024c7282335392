/// Tunables for an [`ArchiveEngine`](crate::ArchiveEngine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Deflate level, 0-9.
    pub compression_level: u32,
    /// Chunk size for compression, extraction and in-place splicing.
    pub buffer_size: usize,
    /// Appended to the archive path to name the working copy.
    pub backup_suffix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            compression_level: 9,
            buffer_size: 16384,
            backup_suffix: ".ZIP".to_string(),
        }
    }
}

impl EngineConfig {
    /// General purpose bit flag advertising the deflate level (bits 1 and 2).
    pub fn deflate_flags(&self) -> u16 {
        match self.compression_level {
            8.. => 2,
            5..=7 => 0,
            3..=4 => 4,
            _ => 6,
        }
    }

    pub(crate) fn clamped_level(&self) -> u32 {
        self.compression_level.min(9)
    }

    pub(crate) fn chunk_size(&self) -> usize {
        self.buffer_size.max(512)
    }
}
