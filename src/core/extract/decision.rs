//! Planning output consumed by the extractor.

use crate::core::archive::ArchiveEntry;
use crate::core::date::ResolvedDate;
use crate::core::dedup::Classification;
use crate::core::fingerprint::Fingerprint;
use crate::core::manifest::RecordState;
use crate::core::planner::Placement;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What should happen to one entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Write the entry to this destination-relative path
    Extract { target: PathBuf },
    /// Another entry holds the same content
    SkipDuplicate { canonical: String },
    /// The destination already holds the content here
    SkipExisting { destination: PathBuf },
    /// The entry could not be read during analysis
    Unreadable { reason: String },
}

impl Decision {
    /// Combine a dedup classification with a placement proposal
    ///
    /// `placement` is only consulted for unique entries.
    pub fn from_parts(classification: &Classification, placement: Option<Placement>) -> Self {
        match classification {
            Classification::DuplicateOf { canonical } => Decision::SkipDuplicate {
                canonical: canonical.to_string(),
            },
            Classification::AlreadyPresent { destination } => Decision::SkipExisting {
                destination: destination.clone(),
            },
            Classification::Unique => match placement {
                Some(Placement::New { relative }) => Decision::Extract { target: relative },
                Some(Placement::AlreadyPresent { relative }) => {
                    Decision::SkipExisting { destination: relative }
                }
                None => Decision::Unreadable {
                    reason: "no placement proposed".to_string(),
                },
            },
        }
    }

    /// Terminal state this decision leads to when it succeeds
    pub fn target_state(&self) -> RecordState {
        match self {
            Decision::Extract { .. } => RecordState::Extracted,
            Decision::SkipDuplicate { .. } => RecordState::SkippedDuplicate,
            Decision::SkipExisting { .. } => RecordState::SkippedExisting,
            Decision::Unreadable { .. } => RecordState::Failed,
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            Decision::SkipDuplicate { .. } | Decision::SkipExisting { .. }
        )
    }
}

/// One entry of an archive's extraction plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedEntry {
    pub entry: ArchiveEntry,
    pub fingerprint: Option<Fingerprint>,
    pub date: ResolvedDate,
    pub decision: Decision,
}
