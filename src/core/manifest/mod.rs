//! # Manifest Module
//!
//! Per-entry extraction outcomes, persisted so runs can resume.
//!
//! ## Format
//! JSON Lines, one [`ManifestRecord`] per line, append-only. Replaying the
//! file keeps the last record per entry. Each commit is flushed and synced
//! before returning, so a crash can at most leave one torn trailing line,
//! which replay skips.

mod record;
mod store;

pub use record::{ManifestRecord, RecordState};
pub use store::{ArchiveStatus, ManifestStore};

/// Manifest file name inside the destination root
pub const MANIFEST_FILE: &str = ".takeout-manifest.jsonl";
