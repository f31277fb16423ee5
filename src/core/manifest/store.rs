//! Append-only JSON Lines manifest store.

use super::{ManifestRecord, RecordState};
use crate::core::archive::entry_key;
use crate::error::ManifestError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Manifest storage; the extraction state machine is its only writer
pub struct ManifestStore {
    path: PathBuf,
    file: File,
    records: HashMap<String, ManifestRecord>,
    /// Keys in first-seen order
    order: Vec<String>,
}

impl ManifestStore {
    /// Open a manifest, replaying any records already in it
    ///
    /// Malformed lines (a torn final write) are skipped with a warning.
    pub fn open(path: &Path) -> Result<Self, ManifestError> {
        let mut records = HashMap::new();
        let mut order = Vec::new();

        if path.exists() {
            let file = File::open(path).map_err(|e| ManifestError::Read {
                path: path.to_path_buf(),
                source: e,
            })?;

            for (number, line) in BufReader::new(file).lines().enumerate() {
                let line = line.map_err(|e| ManifestError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<ManifestRecord>(&line) {
                    Ok(record) => {
                        let key = record.key();
                        if !records.contains_key(&key) {
                            order.push(key.clone());
                        }
                        records.insert(key, record);
                    }
                    Err(e) => {
                        warn!(path = %path.display(), line = number + 1, error = %e, "skipping malformed manifest line");
                    }
                }
            }
        }

        let mut file = Self::open_append(path)?;
        Self::terminate_last_line(path, &mut file)?;

        debug!(path = %path.display(), records = records.len(), "manifest opened");

        Ok(Self {
            path: path.to_path_buf(),
            file,
            records,
            order,
        })
    }

    fn open_append(path: &Path) -> Result<File, ManifestError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ManifestError::Unwritable {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .map_err(|e| ManifestError::Unwritable {
                path: path.to_path_buf(),
                source: e,
            })
    }

    /// Make sure the next append starts on its own line
    fn terminate_last_line(path: &Path, file: &mut File) -> Result<(), ManifestError> {
        let unwritable = |e| ManifestError::Unwritable {
            path: path.to_path_buf(),
            source: e,
        };

        let len = file.metadata().map_err(unwritable)?.len();
        if len == 0 {
            return Ok(());
        }

        let mut last = [0u8; 1];
        file.seek(SeekFrom::Start(len - 1)).map_err(unwritable)?;
        file.read_exact(&mut last).map_err(unwritable)?;
        if last[0] != b'\n' {
            file.write_all(b"\n").map_err(unwritable)?;
            file.sync_data().map_err(unwritable)?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Latest record for an entry
    pub fn get(&self, archive: &Path, entry_path: &str) -> Option<&ManifestRecord> {
        self.records.get(&entry_key(archive, entry_path))
    }

    /// Latest records in first-seen order
    pub fn records(&self) -> impl Iterator<Item = &ManifestRecord> {
        self.order.iter().filter_map(move |key| self.records.get(key))
    }

    /// Persist a record
    ///
    /// Returns `false` without writing when the latest record for the entry
    /// already has the same outcome.
    pub fn commit(&mut self, record: &ManifestRecord) -> Result<bool, ManifestError> {
        let key = record.key();
        if let Some(previous) = self.records.get(&key) {
            if previous.same_outcome(record) {
                return Ok(false);
            }
        }

        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let unwritable = |e| ManifestError::Unwritable {
            path: self.path.clone(),
            source: e,
        };
        self.file.write_all(&line).map_err(unwritable)?;
        self.file.flush().map_err(unwritable)?;
        self.file.sync_data().map_err(unwritable)?;

        if !self.records.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.records.insert(key, record.clone());
        Ok(true)
    }

    /// Summarize the records of one archive
    ///
    /// `entry_paths` lists every file entry the archive currently holds.
    pub fn archive_status<'a, I>(&self, archive: &Path, entry_paths: I) -> ArchiveStatus
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut status = ArchiveStatus {
            archive: archive.to_path_buf(),
            ..ArchiveStatus::default()
        };

        for entry_path in entry_paths {
            status.expected += 1;
            match self.get(archive, entry_path) {
                None => {}
                Some(record) => {
                    status.recorded += 1;
                    if record.state.is_skip() && !record.proves_content() {
                        status.unverified += 1;
                    }
                    match record.state {
                        RecordState::Planned => status.planned += 1,
                        RecordState::Extracted => status.extracted += 1,
                        RecordState::SkippedDuplicate => status.skipped_duplicate += 1,
                        RecordState::SkippedExisting => status.skipped_existing += 1,
                        RecordState::Failed => status.failed += 1,
                    }
                }
            }
        }

        status
    }

    /// Rewrite the file with only the latest record per entry
    ///
    /// The new file replaces the old one atomically.
    pub fn compact(&mut self) -> Result<(), ManifestError> {
        let unwritable = |e| ManifestError::Unwritable {
            path: self.path.clone(),
            source: e,
        };

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut temp = NamedTempFile::new_in(dir).map_err(unwritable)?;

        for key in &self.order {
            if let Some(record) = self.records.get(key) {
                let mut line = serde_json::to_vec(record)?;
                line.push(b'\n');
                temp.write_all(&line).map_err(unwritable)?;
            }
        }
        temp.flush().map_err(unwritable)?;
        temp.as_file().sync_data().map_err(unwritable)?;

        temp.persist(&self.path)
            .map_err(|e| ManifestError::Unwritable {
                path: self.path.clone(),
                source: e.error,
            })?;

        self.file = Self::open_append(&self.path)?;
        debug!(path = %self.path.display(), records = self.records.len(), "manifest compacted");
        Ok(())
    }
}

/// Extraction status of one archive, read by the cleanup policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveStatus {
    pub archive: PathBuf,
    /// File entries in the archive
    pub expected: usize,
    /// Entries with a manifest record
    pub recorded: usize,
    pub planned: usize,
    pub extracted: usize,
    pub skipped_duplicate: usize,
    pub skipped_existing: usize,
    pub failed: usize,
    /// Slots that never made it into the index
    #[serde(default)]
    pub unindexed: usize,
    /// Skipped entries matched only by a sampled fingerprint
    #[serde(default)]
    pub unverified: usize,
}

impl ArchiveStatus {
    /// Every slot was indexed and has a terminal, non-`Failed` record
    pub fn is_cleanup_eligible(&self) -> bool {
        self.unindexed == 0
            && self.unverified == 0
            && self.recorded == self.expected
            && self.planned == 0
            && self.failed == 0
    }
}
