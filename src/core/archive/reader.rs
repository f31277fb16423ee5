//! Zip entry-table reader.

use super::{ArchiveEntry, ArchiveId};
use crate::error::ArchiveError;
use chrono::NaiveDate;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read};
use tracing::{debug, warn};
use zip::read::ZipFile;
use zip::ZipArchive;

/// An open archive container
///
/// Holds the parsed central directory. Payloads are only decompressed when
/// an entry is explicitly opened.
pub struct ArchiveReader {
    id: ArchiveId,
    archive: ZipArchive<BufReader<File>>,
}

impl ArchiveReader {
    /// Open an archive and parse its entry table
    pub fn open(id: ArchiveId) -> Result<Self, ArchiveError> {
        let file = File::open(&id.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ArchiveError::NotFound {
                path: id.path.clone(),
            },
            _ => ArchiveError::CorruptArchive {
                path: id.path.clone(),
                reason: e.to_string(),
            },
        })?;

        let archive =
            ZipArchive::new(BufReader::new(file)).map_err(|e| ArchiveError::CorruptArchive {
                path: id.path.clone(),
                reason: e.to_string(),
            })?;

        debug!(archive = %id.path.display(), entries = archive.len(), "opened archive");

        Ok(Self { id, archive })
    }

    pub fn id(&self) -> &ArchiveId {
        &self.id
    }

    /// Number of raw slots in the entry table, including directories
    pub fn raw_len(&self) -> usize {
        self.archive.len()
    }

    /// Lazily iterate the file entries in table order
    ///
    /// Each call starts over from the first slot.
    pub fn entries(&mut self) -> Entries<'_> {
        Entries {
            reader: self,
            next: 0,
        }
    }

    /// Read the metadata of one table slot
    ///
    /// Returns `None` for directories and zero-length placeholders.
    fn entry_at(&mut self, index: usize) -> Result<Option<ArchiveEntry>, ArchiveError> {
        let archive_id = self.id.clone();
        let file = self
            .archive
            .by_index_raw(index)
            .map_err(|e| ArchiveError::UnreadableEntry {
                archive: archive_id.path.clone(),
                entry: format!("#{}", index),
                reason: e.to_string(),
            })?;

        if file.is_dir() || file.name().ends_with('/') || file.size() == 0 {
            return Ok(None);
        }

        let modified = file.last_modified();
        let timestamp = NaiveDate::from_ymd_opt(
            modified.year() as i32,
            modified.month() as u32,
            modified.day() as u32,
        )
        .and_then(|d| {
            d.and_hms_opt(
                modified.hour() as u32,
                modified.minute() as u32,
                modified.second() as u32,
            )
        });

        Ok(Some(ArchiveEntry {
            archive: archive_id,
            index,
            path: file.name().to_string(),
            size: file.size(),
            crc32: file.crc32(),
            timestamp,
        }))
    }

    /// Open an entry's decompressed byte stream
    ///
    /// The stream verifies the stored CRC32 when read to the end.
    pub fn open_entry(&mut self, entry: &ArchiveEntry) -> Result<ZipFile<'_>, ArchiveError> {
        let archive_path = self.id.path.clone();
        self.archive
            .by_index(entry.index)
            .map_err(|e| ArchiveError::UnreadableEntry {
                archive: archive_path,
                entry: entry.path.clone(),
                reason: e.to_string(),
            })
    }

    /// Decompress an entry fully into memory
    pub fn read_entry(&mut self, entry: &ArchiveEntry) -> Result<Vec<u8>, ArchiveError> {
        let archive_path = self.id.path.clone();
        let mut file = self.open_entry(entry)?;
        let mut buffer = Vec::with_capacity(entry.size.min(64 * 1024 * 1024) as usize);
        file.read_to_end(&mut buffer)
            .map_err(|e| ArchiveError::UnreadableEntry {
                archive: archive_path,
                entry: entry.path.clone(),
                reason: e.to_string(),
            })?;
        Ok(buffer)
    }

    /// Decompress at most `limit` leading bytes of an entry
    pub fn read_prefix(&mut self, entry: &ArchiveEntry, limit: usize) -> Result<Vec<u8>, ArchiveError> {
        let archive_path = self.id.path.clone();
        let file = self.open_entry(entry)?;
        let mut buffer = Vec::with_capacity(limit.min(entry.size as usize));
        file.take(limit as u64)
            .read_to_end(&mut buffer)
            .map_err(|e| ArchiveError::UnreadableEntry {
                archive: archive_path,
                entry: entry.path.clone(),
                reason: e.to_string(),
            })?;
        Ok(buffer)
    }
}

/// Lazy iterator over an archive's file entries
pub struct Entries<'a> {
    reader: &'a mut ArchiveReader,
    next: usize,
}

impl Iterator for Entries<'_> {
    type Item = Result<ArchiveEntry, ArchiveError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next < self.reader.raw_len() {
            let index = self.next;
            self.next += 1;

            match self.reader.entry_at(index) {
                Ok(Some(entry)) => return Some(Ok(entry)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}

/// A fully read entry table
#[derive(Debug)]
pub struct ArchiveIndex {
    pub id: ArchiveId,
    /// File entries in table order
    pub entries: Vec<ArchiveEntry>,
    /// Slots that could not be indexed: unreadable headers and repeated names
    pub errors: Vec<ArchiveError>,
}

impl ArchiveIndex {
    /// Total uncompressed size of all readable entries
    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }
}

/// Read an archive's entry table in one pass
///
/// Entries are keyed by in-archive path, so only the first slot carrying a
/// given path is indexed. Later slots with the same path are reported as
/// `DuplicateEntry`.
pub fn read_index(id: ArchiveId) -> Result<ArchiveIndex, ArchiveError> {
    let mut reader = ArchiveReader::open(id)?;
    let mut entries = Vec::new();
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for result in reader.entries() {
        match result {
            Ok(entry) if !seen.insert(entry.path.clone()) => {
                warn!(
                    archive = %entry.archive.path.display(),
                    entry = %entry.path,
                    index = entry.index,
                    "duplicate entry name ignored"
                );
                errors.push(ArchiveError::DuplicateEntry {
                    archive: entry.archive.path.clone(),
                    entry: entry.path,
                    index: entry.index,
                });
            }
            Ok(entry) => entries.push(entry),
            Err(e) => errors.push(e),
        }
    }

    Ok(ArchiveIndex {
        id: reader.id().clone(),
        entries,
        errors,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{dated, entry, write_archive};
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn sample_archive(dir: &TempDir) -> ArchiveId {
        let path = dir.path().join("takeout-001.zip");
        write_archive(
            &path,
            &[
                entry("Photos/", b""),
                dated("Photos/img1.jpg", b"first image bytes", (2023, 4, 10)),
                entry("Photos/empty.jpg", b""),
                dated("Photos/img2.jpg", b"second image bytes", (2022, 12, 31)),
            ],
        );
        ArchiveId::new(0, path)
    }

    #[test]
    fn entries_skip_directories_and_empty_placeholders() {
        let dir = TempDir::new().unwrap();
        let index = read_index(sample_archive(&dir)).unwrap();

        let names: Vec<_> = index.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(names, vec!["Photos/img1.jpg", "Photos/img2.jpg"]);
        assert!(index.errors.is_empty());
    }

    #[test]
    fn repeated_entry_name_is_indexed_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("takeout-001.zip");
        write_archive(
            &path,
            &[
                entry("Photos/img1.jpg", b"first copy"),
                entry("Photos/img1.jpg", b"second, different copy"),
                entry("Photos/img2.jpg", b"other"),
            ],
        );

        let index = read_index(ArchiveId::new(0, &path)).unwrap();

        let names: Vec<_> = index.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(names, vec!["Photos/img1.jpg", "Photos/img2.jpg"]);
        assert_eq!(index.entries[0].index, 0);
        assert_eq!(index.entries[0].size, b"first copy".len() as u64);
        assert_eq!(index.errors.len(), 1);
        assert!(matches!(
            &index.errors[0],
            ArchiveError::DuplicateEntry { entry, index: 1, .. } if entry == "Photos/img1.jpg"
        ));
    }

    #[test]
    fn entries_carry_size_checksum_and_timestamp() {
        let dir = TempDir::new().unwrap();
        let index = read_index(sample_archive(&dir)).unwrap();
        let first = &index.entries[0];

        assert_eq!(first.size, b"first image bytes".len() as u64);
        assert_eq!(first.crc32, crc32fast::hash(b"first image bytes"));
        let ts = first.timestamp.unwrap();
        assert_eq!(ts.date(), NaiveDate::from_ymd_opt(2023, 4, 10).unwrap());
    }

    #[test]
    fn entries_are_restartable() {
        let dir = TempDir::new().unwrap();
        let mut reader = ArchiveReader::open(sample_archive(&dir)).unwrap();

        let first_pass: Vec<_> = reader.entries().map(|e| e.unwrap()).collect();
        let second_pass: Vec<_> = reader.entries().map(|e| e.unwrap()).collect();

        assert_eq!(first_pass, second_pass);
    }

    #[test]
    fn read_entry_decompresses_payload() {
        let dir = TempDir::new().unwrap();
        let mut reader = ArchiveReader::open(sample_archive(&dir)).unwrap();
        let entries: Vec<_> = reader.entries().map(|e| e.unwrap()).collect();

        let bytes = reader.read_entry(&entries[1]).unwrap();
        assert_eq!(bytes, b"second image bytes");

        let prefix = reader.read_prefix(&entries[1], 6).unwrap();
        assert_eq!(prefix, b"second");
    }

    #[test]
    fn corrupt_archive_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.zip");
        fs::write(&path, b"this is not a zip archive").unwrap();

        let result = read_index(ArchiveId::new(0, &path));
        assert!(matches!(result, Err(ArchiveError::CorruptArchive { .. })));
    }

    #[test]
    fn missing_archive_is_not_found() {
        let result = ArchiveReader::open(ArchiveId::new(0, "/nonexistent/takeout.zip"));
        assert!(matches!(result, Err(ArchiveError::NotFound { .. })));
    }
}
