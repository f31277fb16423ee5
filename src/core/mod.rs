//! # Core Module
//!
//! The UI-agnostic fingerprinting, deduplication and extraction engine.
//!
//! ## Modules
//! - `archive` - Reads archive entry tables without decompressing payloads
//! - `fingerprint` - Computes content identities under a selectable strategy
//! - `date` - Resolves capture dates (EXIF, else archive timestamp)
//! - `cache` - Persists fingerprints and dates keyed by file identity
//! - `scanner` - Walks and fingerprints the destination tree in parallel
//! - `dedup` - Assigns canonical ownership across archives and destination
//! - `planner` - Proposes `year/month/filename` placements
//! - `manifest` - Append-only record of per-entry outcomes
//! - `extract` - The per-entry extraction state machine
//! - `reconcile` - Compares a manifest against a fresh destination scan
//! - `pipeline` - Orchestrates a full analysis or extraction run

pub mod archive;
pub mod cache;
pub mod date;
pub mod dedup;
pub mod extract;
pub mod fingerprint;
pub mod manifest;
pub mod pipeline;
pub mod planner;
pub mod reconcile;
pub mod scanner;

// Re-export commonly used types
pub use archive::{ArchiveEntry, ArchiveId, ArchiveReader};
pub use date::ResolvedDate;
pub use dedup::{Classification, DedupEngine, DuplicateGroup, Location};
pub use fingerprint::{Fingerprint, Strategy};
pub use manifest::{ManifestRecord, ManifestStore, RecordState};
pub use planner::{Placement, PlacementPlanner};
