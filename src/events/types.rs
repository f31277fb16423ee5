//! Event type definitions for progress reporting.

use crate::core::manifest::RecordState;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// All events emitted by the extraction pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    /// Archive discovery and index reading
    Archive(ArchiveEvent),
    /// Destination tree walking
    Scan(ScanEvent),
    /// Fingerprinting of archive entries and destination files
    Fingerprint(FingerprintEvent),
    /// Per-entry extraction outcomes
    Extract(ExtractEvent),
    /// Pipeline-level events
    Pipeline(PipelineEvent),
}

/// Events while locating and indexing archives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ArchiveEvent {
    /// Archives found under the input directory
    Discovered { count: usize },
    /// An archive's entry table was read
    Indexed { archive: PathBuf, entries: usize },
    /// An archive could not be parsed and is skipped
    Skipped { archive: PathBuf, message: String },
}

/// Events while walking the destination tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScanEvent {
    /// Walking has started
    Started { root: PathBuf },
    /// An error occurred but scanning continues
    Error { path: PathBuf, message: String },
    /// Walking completed
    Completed { total_files: usize },
}

/// Which side of the comparison is being fingerprinted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FingerprintTarget {
    Archives,
    Destination,
}

/// Events during fingerprinting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FingerprintEvent {
    /// Fingerprinting has started
    Started {
        target: FingerprintTarget,
        total: usize,
    },
    /// Progress update
    Progress(FingerprintProgress),
    /// An error occurred but fingerprinting continues
    Error { location: String, message: String },
    /// Fingerprinting completed
    Completed {
        target: FingerprintTarget,
        total: usize,
        cache_hits: usize,
    },
}

/// Progress information during fingerprinting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintProgress {
    pub target: FingerprintTarget,
    /// Items fingerprinted so far
    pub completed: usize,
    /// Total number of items
    pub total: usize,
    /// Item just finished
    pub current: String,
    /// Number of cache hits so far
    pub cache_hits: usize,
}

/// Events from the extraction state machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExtractEvent {
    /// An archive's entries are about to be processed
    ArchiveStarted { archive: PathBuf, entries: usize },
    /// An entry reached a terminal state
    EntryFinished(EntryOutcome),
    /// A write or verification failed and will be retried
    Retrying {
        entry: String,
        attempt: u32,
        message: String,
    },
    /// All entries of an archive were processed
    ArchiveFinished {
        archive: PathBuf,
        cleanup_eligible: bool,
    },
}

/// Terminal outcome of one entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryOutcome {
    pub archive: PathBuf,
    pub entry: String,
    pub state: RecordState,
    /// Destination-relative path written or matched
    pub target: Option<PathBuf>,
    pub message: Option<String>,
}

/// Pipeline-level events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    /// Pipeline has started
    Started,
    /// Moving to a new phase
    PhaseChanged { phase: PipelinePhase },
    /// Pipeline completed successfully
    Completed { summary: PipelineSummary },
    /// Pipeline was cancelled; completed work has been recorded
    Cancelled,
    /// Pipeline encountered a fatal error
    Error { message: String },
}

/// Phases of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelinePhase {
    Indexing,
    Fingerprinting,
    Scanning,
    Deduplicating,
    Planning,
    Extracting,
    Reconciling,
}

/// Summary of pipeline results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Archives processed
    pub archives: usize,
    /// File entries across all archives
    pub entries: usize,
    /// Entries written to the destination
    pub extracted: usize,
    /// Entries skipped as copies of another entry
    pub skipped_duplicate: usize,
    /// Entries skipped because the destination already has them
    pub skipped_existing: usize,
    /// Entries that failed
    pub failed: usize,
    /// Bytes written to the destination
    pub bytes_written: u64,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl std::fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelinePhase::Indexing => write!(f, "Indexing"),
            PipelinePhase::Fingerprinting => write!(f, "Fingerprinting"),
            PipelinePhase::Scanning => write!(f, "Scanning"),
            PipelinePhase::Deduplicating => write!(f, "Deduplicating"),
            PipelinePhase::Planning => write!(f, "Planning"),
            PipelinePhase::Extracting => write!(f, "Extracting"),
            PipelinePhase::Reconciling => write!(f, "Reconciling"),
        }
    }
}
