//! # Reconcile Module
//!
//! Compares what the manifest says was done against what the destination
//! actually holds.
//!
//! Matching is by fingerprint, never by path, so a destination that was
//! reorganized by hand still reconciles. The path only decides how close
//! the match is to where the entry was placed.

mod compare;

pub use compare::{compare_archive, CompareReport, PresentEntry};

use crate::core::fingerprint::Fingerprint;
use crate::core::manifest::ManifestRecord;
use crate::core::scanner::{ScanResult, ScannedFile};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::debug;

/// How close a match is to the recorded placement
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Proximity {
    /// At the recorded path
    Exact,
    /// In the recorded folder under another name
    SameFolder,
    /// Somewhere else in the destination
    Elsewhere,
}

/// A record whose content the destination holds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Confirmed {
    pub record: ManifestRecord,
    /// Destination-relative path of the matching file
    pub found_at: PathBuf,
    pub proximity: Proximity,
}

/// Why a record is still pending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingReason {
    /// No destination file has this content
    Missing,
    /// The record carries no fingerprint
    NoFingerprint,
    /// The record was fingerprinted under another strategy
    StrategyMismatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pending {
    pub record: ManifestRecord,
    pub reason: PendingReason,
}

/// Pending records of one year bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSummary {
    pub bucket: String,
    pub count: usize,
    pub size_bytes: u64,
}

/// Manifest records split by whether the destination holds their content
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub confirmed: Vec<Confirmed>,
    pub pending: Vec<Pending>,
}

impl ReconcileReport {
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }

    /// Confirmed records that were found away from their recorded path
    pub fn moved(&self) -> impl Iterator<Item = &Confirmed> {
        self.confirmed
            .iter()
            .filter(|c| c.proximity != Proximity::Exact)
    }

    /// Pending records grouped by year, oldest first, `unknown` last
    pub fn pending_by_bucket(&self) -> Vec<BucketSummary> {
        let mut buckets: BTreeMap<String, BucketSummary> = BTreeMap::new();
        for pending in &self.pending {
            let bucket = pending.record.date.year_bucket();
            let summary = buckets.entry(bucket.clone()).or_insert(BucketSummary {
                bucket,
                count: 0,
                size_bytes: 0,
            });
            summary.count += 1;
            summary.size_bytes += pending.record.size;
        }
        // digits sort before letters, so "unknown" already comes last
        buckets.into_values().collect()
    }
}

/// Partition manifest records against a fresh destination scan
///
/// Every record ends up in exactly one of `confirmed` or `pending`.
pub fn reconcile<'a, I>(records: I, scan: &ScanResult) -> ReconcileReport
where
    I: IntoIterator<Item = &'a ManifestRecord>,
{
    let by_fingerprint: HashMap<&Fingerprint, Vec<&ScannedFile>> = scan.by_fingerprint();
    let mut report = ReconcileReport::default();

    for record in records {
        let fingerprint = match &record.fingerprint {
            Some(fp) => fp,
            None => {
                report.pending.push(Pending {
                    record: record.clone(),
                    reason: PendingReason::NoFingerprint,
                });
                continue;
            }
        };
        if fingerprint.strategy != scan.strategy {
            report.pending.push(Pending {
                record: record.clone(),
                reason: PendingReason::StrategyMismatch,
            });
            continue;
        }

        match by_fingerprint.get(fingerprint) {
            Some(files) => {
                let (found_at, proximity) = closest(files, record.placement.as_deref());
                report.confirmed.push(Confirmed {
                    record: record.clone(),
                    found_at,
                    proximity,
                });
            }
            None => report.pending.push(Pending {
                record: record.clone(),
                reason: PendingReason::Missing,
            }),
        }
    }

    debug!(
        confirmed = report.confirmed.len(),
        pending = report.pending.len(),
        "reconciled manifest"
    );
    report
}

/// Pick the matching file nearest the recorded placement
///
/// `files` is never empty and is in scan order, so ties resolve to the
/// lowest relative path.
fn closest(files: &[&ScannedFile], placement: Option<&Path>) -> (PathBuf, Proximity) {
    let proximity = |file: &ScannedFile| match placement {
        Some(p) if file.relative == p => Proximity::Exact,
        Some(p) if file.relative.parent() == p.parent() => Proximity::SameFolder,
        _ => Proximity::Elsewhere,
    };

    files
        .iter()
        .map(|&f| (proximity(f), &f.relative))
        .min()
        .map(|(proximity, relative)| (relative.clone(), proximity))
        .unwrap_or_else(|| (PathBuf::new(), Proximity::Elsewhere))
}
