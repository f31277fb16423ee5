//! Manifest record and its state machine.

use crate::core::archive::{entry_key, ArchiveEntry};
use crate::core::date::ResolvedDate;
use crate::core::fingerprint::Fingerprint;
use crate::error::ExtractError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Extraction state of one archive entry
///
/// `Planned` moves to exactly one terminal state. A later run may take a
/// `Failed` record back to `Planned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    Planned,
    Extracted,
    SkippedDuplicate,
    SkippedExisting,
    Failed,
}

impl RecordState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RecordState::Planned)
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, RecordState::SkippedDuplicate | RecordState::SkippedExisting)
    }

    pub fn can_transition_to(&self, next: RecordState) -> bool {
        match (self, next) {
            (RecordState::Planned, next) => next.is_terminal(),
            (RecordState::Failed, RecordState::Planned) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordState::Planned => "planned",
            RecordState::Extracted => "extracted",
            RecordState::SkippedDuplicate => "skipped_duplicate",
            RecordState::SkippedExisting => "skipped_existing",
            RecordState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RecordState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome record for one archive entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRecord {
    pub archive: PathBuf,
    pub entry_path: String,
    pub size: u64,
    pub crc32: u32,
    pub fingerprint: Option<Fingerprint>,
    pub date: ResolvedDate,
    /// Destination-relative path written or matched
    pub placement: Option<PathBuf>,
    pub state: RecordState,
    /// Canonical location for `SkippedDuplicate`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    pub run_id: Uuid,
    pub updated_at: DateTime<Utc>,
}

impl ManifestRecord {
    /// A fresh `Planned` record for an entry
    pub fn planned(
        entry: &ArchiveEntry,
        fingerprint: Option<Fingerprint>,
        date: ResolvedDate,
        run_id: Uuid,
    ) -> Self {
        Self {
            archive: entry.archive.path.clone(),
            entry_path: entry.path.clone(),
            size: entry.size,
            crc32: entry.crc32,
            fingerprint,
            date,
            placement: None,
            state: RecordState::Planned,
            duplicate_of: None,
            error: None,
            attempts: 0,
            run_id,
            updated_at: Utc::now(),
        }
    }

    pub fn key(&self) -> String {
        entry_key(&self.archive, &self.entry_path)
    }

    /// Move to `next`, rejecting transitions the state machine forbids
    pub fn transition(&mut self, next: RecordState) -> Result<(), ExtractError> {
        if !self.state.can_transition_to(next) {
            return Err(ExtractError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Whether the fingerprint behind this record's decision covered the
    /// whole content
    pub fn proves_content(&self) -> bool {
        self.fingerprint
            .as_ref()
            .map_or(false, |fp| fp.strategy.covers_content())
    }

    /// Whether the entry this record describes is the same archive content
    pub fn describes(&self, entry: &ArchiveEntry) -> bool {
        self.archive == entry.archive.path
            && self.entry_path == entry.path
            && self.size == entry.size
            && self.crc32 == entry.crc32
    }

    /// Equal in everything except the run that wrote it
    pub fn same_outcome(&self, other: &ManifestRecord) -> bool {
        self.archive == other.archive
            && self.entry_path == other.entry_path
            && self.size == other.size
            && self.crc32 == other.crc32
            && self.fingerprint == other.fingerprint
            && self.date == other.date
            && self.placement == other.placement
            && self.state == other.state
            && self.duplicate_of == other.duplicate_of
            && self.error == other.error
            && self.attempts == other.attempts
    }
}
