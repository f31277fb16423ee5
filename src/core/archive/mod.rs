//! # Archive Module
//!
//! Reads archive entry tables (paths, sizes, checksums, timestamps)
//! without decompressing payloads.
//!
//! ## Contract
//! - Reading an index is cheap, side-effect-free and restartable
//! - Directory entries and zero-length placeholders are excluded
//! - An in-archive path is indexed once; repeated names are reported, not keyed
//! - A corrupt archive yields `ArchiveError::CorruptArchive`; callers skip it
//!   and continue with the remaining archives

mod discover;
mod reader;

pub use discover::discover_archives;
pub use reader::{read_index, ArchiveIndex, ArchiveReader, Entries};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Identifies one archive within a run
///
/// `ordinal` is the archive's position in the sorted archive list, which
/// fixes the discovery order used for canonical selection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArchiveId {
    pub ordinal: usize,
    pub path: PathBuf,
}

impl ArchiveId {
    pub fn new(ordinal: usize, path: impl Into<PathBuf>) -> Self {
        Self {
            ordinal,
            path: path.into(),
        }
    }

    /// File name of the archive for display
    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// One physical entry of an archive
///
/// Immutable once read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    /// Archive the entry belongs to
    pub archive: ArchiveId,
    /// Position in the archive's entry table
    pub index: usize,
    /// In-archive path
    pub path: String,
    /// Uncompressed size in bytes
    pub size: u64,
    /// CRC32 stored in the entry table
    pub crc32: u32,
    /// Timestamp stored in the entry table
    pub timestamp: Option<NaiveDateTime>,
}

impl ArchiveEntry {
    /// Final path component of the in-archive path
    pub fn file_name(&self) -> &str {
        self.path
            .rsplit('/')
            .find(|part| !part.is_empty())
            .unwrap_or(&self.path)
    }

    /// Key identifying this entry independently of the archive's ordinal
    pub fn location_key(&self) -> String {
        entry_key(&self.archive.path, &self.path)
    }

    /// `archive.zip:path/in/archive` for messages
    pub fn display_path(&self) -> String {
        format!("{}:{}", self.archive.display_name(), self.path)
    }
}

/// Cache/manifest key for an archive entry
pub fn entry_key(archive: &Path, entry_path: &str) -> String {
    format!("zip:{}!{}", archive.display(), entry_path)
}


#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry(path: &str) -> ArchiveEntry {
        ArchiveEntry {
            archive: ArchiveId::new(0, "/takeout/takeout-001.zip"),
            index: 3,
            path: path.to_string(),
            size: 10,
            crc32: 0xDEAD_BEEF,
            timestamp: None,
        }
    }

    #[test]
    fn file_name_is_last_component() {
        let entry = sample_entry("Takeout/Google Photos/2023/img1.jpg");
        assert_eq!(entry.file_name(), "img1.jpg");
    }

    #[test]
    fn display_path_uses_archive_name() {
        let entry = sample_entry("Photos/img1.jpg");
        assert_eq!(entry.display_path(), "takeout-001.zip:Photos/img1.jpg");
    }

    #[test]
    fn archive_ids_order_by_ordinal_first() {
        let a = ArchiveId::new(0, "/z.zip");
        let b = ArchiveId::new(1, "/a.zip");
        assert!(a < b);
    }
}
