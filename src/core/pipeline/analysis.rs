//! Analysis pass: archive fingerprinting, dedup input and planning.

use crate::core::archive::{ArchiveEntry, ArchiveId, ArchiveIndex, ArchiveReader};
use crate::core::cache::{flush_records, CacheBackend, CacheRecord, FileIdentity, CACHE_BATCH};
use crate::core::date::{self, resolve_entry, ResolvedDate};
use crate::core::dedup::{Classification, DedupResult, Location};
use crate::core::extract::{Decision, PlannedEntry};
use crate::core::fingerprint::{fingerprint_entry, Fingerprint, Strategy};
use crate::core::pipeline::CancellationToken;
use crate::core::planner::PlacementPlanner;
use crate::core::scanner::{worker_pool, ScanResult};
use crate::error::ScanError;
use crate::events::{
    ArchiveEvent, Event, EventSender, FingerprintEvent, FingerprintProgress, FingerprintTarget,
};
use crossbeam_channel::{unbounded, Sender};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Entries handled by one worker with one open reader
const ENTRY_CHUNK: usize = 256;

/// The plan for one archive, entries in entry-table order
#[derive(Debug, Clone)]
pub struct ArchivePlan {
    pub archive: ArchiveId,
    pub entries: Vec<PlannedEntry>,
    /// Entry-table slots left out of the index
    pub unindexed: usize,
}

impl ArchivePlan {
    pub fn to_extract(&self) -> impl Iterator<Item = &PlannedEntry> {
        self.entries
            .iter()
            .filter(|p| matches!(p.decision, Decision::Extract { .. }))
    }
}

/// Everything one analysis pass learned
#[derive(Debug)]
pub struct Analysis {
    pub strategy: Strategy,
    /// Plans for every readable archive, in archive-list order
    pub archives: Vec<ArchivePlan>,
    pub dedup: DedupResult,
    pub scan: ScanResult,
    /// Archives that could not be read at all
    pub skipped_archives: Vec<ArchiveId>,
    /// Non-fatal errors
    pub errors: Vec<String>,
    /// Archive entries whose fingerprint and date came from the cache
    pub cache_hits: usize,
    pub cancelled: bool,
}

/// Counts describing an [`Analysis`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub strategy: Strategy,
    pub archives: usize,
    pub skipped_archives: usize,
    pub entries: usize,
    pub to_extract: usize,
    pub already_present: usize,
    pub duplicates: usize,
    pub unreadable: usize,
    pub duplicate_groups: usize,
    pub bytes_to_extract: u64,
    pub destination_files: usize,
    pub cache_hits: usize,
}

impl Analysis {
    pub fn summary(&self) -> AnalysisSummary {
        let mut summary = AnalysisSummary {
            strategy: self.strategy,
            archives: self.archives.len(),
            skipped_archives: self.skipped_archives.len(),
            duplicate_groups: self.dedup.duplicate_groups().count(),
            destination_files: self.scan.files.len(),
            cache_hits: self.cache_hits + self.scan.cache_hits,
            ..AnalysisSummary::default()
        };

        for planned in self.archives.iter().flat_map(|a| a.entries.iter()) {
            summary.entries += 1;
            match planned.decision {
                Decision::Extract { .. } => {
                    summary.to_extract += 1;
                    summary.bytes_to_extract += planned.entry.size;
                }
                Decision::SkipExisting { .. } => summary.already_present += 1,
                Decision::SkipDuplicate { .. } => summary.duplicates += 1,
                Decision::Unreadable { .. } => summary.unreadable += 1,
            }
        }
        summary
    }

    pub fn plan_for(&self, archive: &ArchiveId) -> Option<&ArchivePlan> {
        self.archives.iter().find(|p| p.archive == *archive)
    }
}

/// What was learned about one archive entry
#[derive(Debug, Clone)]
pub(crate) struct EntryFacts {
    pub fingerprint: Result<Fingerprint, String>,
    pub date: ResolvedDate,
}

/// Facts for every entry that was reached, keyed by location key
#[derive(Debug, Default)]
pub(crate) struct ArchiveFacts {
    pub entries: HashMap<String, EntryFacts>,
    pub cache_hits: usize,
    pub errors: Vec<String>,
    pub cancelled: bool,
}

enum EntryMessage {
    Done {
        key: String,
        display: String,
        facts: EntryFacts,
        cached: bool,
        record: Option<CacheRecord>,
    },
    Unopenable {
        archive: ArchiveId,
        message: String,
    },
}

/// Fingerprint and date every entry of the given archives in parallel
///
/// Workers each open their own reader and only read the cache. Results come
/// back over one channel; the calling thread is the only cache writer.
pub(crate) fn fingerprint_archives(
    indexes: &[ArchiveIndex],
    strategy: Strategy,
    cache: &dyn CacheBackend,
    workers: Option<usize>,
    cancel: &CancellationToken,
    events: &EventSender,
) -> Result<ArchiveFacts, ScanError> {
    let work: Vec<(&ArchiveId, &[ArchiveEntry])> = indexes
        .iter()
        .flat_map(|index| {
            index
                .entries
                .chunks(ENTRY_CHUNK)
                .map(move |chunk| (&index.id, chunk))
        })
        .collect();
    let total: usize = indexes.iter().map(|i| i.entries.len()).sum();

    events.send(Event::Fingerprint(FingerprintEvent::Started {
        target: FingerprintTarget::Archives,
        total,
    }));

    let pool = worker_pool(workers)?;
    let (tx, rx) = unbounded::<EntryMessage>();
    let mut facts = ArchiveFacts::default();
    let mut pending: Vec<CacheRecord> = Vec::new();

    std::thread::scope(|scope| {
        let work = &work;
        scope.spawn(move || {
            pool.install(|| {
                work.par_iter().for_each_with(tx, |tx, (id, chunk)| {
                    fingerprint_chunk(id, chunk, strategy, cache, cancel, tx);
                });
            });
        });

        for message in rx.iter() {
            match message {
                EntryMessage::Done {
                    key,
                    display: shown,
                    facts: entry,
                    cached,
                    record,
                } => {
                    if cached {
                        facts.cache_hits += 1;
                    }
                    if let Err(reason) = &entry.fingerprint {
                        warn!(entry = %shown, error = %reason, "entry not fingerprinted");
                        events.send(Event::Fingerprint(FingerprintEvent::Error {
                            location: shown.clone(),
                            message: reason.clone(),
                        }));
                        facts.errors.push(format!("{}: {}", shown, reason));
                    }
                    if let Some(record) = record {
                        pending.push(record);
                    }
                    facts.entries.insert(key, entry);

                    events.send(Event::Fingerprint(FingerprintEvent::Progress(
                        FingerprintProgress {
                            target: FingerprintTarget::Archives,
                            completed: facts.entries.len(),
                            total,
                            current: shown,
                            cache_hits: facts.cache_hits,
                        },
                    )));

                    if pending.len() >= CACHE_BATCH {
                        flush_records(cache, &mut pending);
                    }
                }
                EntryMessage::Unopenable { archive, message } => {
                    warn!(archive = %archive.path.display(), error = %message, "archive could not be reopened");
                    facts
                        .errors
                        .push(format!("{}: {}", archive.display_name(), message));
                }
            }
        }
    });

    flush_records(cache, &mut pending);
    facts.cancelled = cancel.is_cancelled();

    events.send(Event::Fingerprint(FingerprintEvent::Completed {
        target: FingerprintTarget::Archives,
        total: facts.entries.len(),
        cache_hits: facts.cache_hits,
    }));
    info!(
        entries = facts.entries.len(),
        cache_hits = facts.cache_hits,
        "archive entries fingerprinted"
    );

    Ok(facts)
}

fn fingerprint_chunk(
    id: &ArchiveId,
    chunk: &[ArchiveEntry],
    strategy: Strategy,
    cache: &dyn CacheBackend,
    cancel: &CancellationToken,
    tx: &mut Sender<EntryMessage>,
) {
    // Opened on the first cache miss only
    let mut reader: Option<ArchiveReader> = None;

    for entry in chunk {
        if cancel.is_cancelled() {
            return;
        }

        let key = entry.location_key();
        let identity = FileIdentity::of_entry(entry);
        let cached_fp = cache
            .get_fingerprint(&key, &identity, strategy)
            .unwrap_or_else(|e| {
                debug!(error = %e, "cache read failed; recomputing");
                None
            });
        let cached_date = cache.get_date(&key, &identity).unwrap_or(None);

        if let (Some(fingerprint), Some(date)) = (cached_fp.clone(), cached_date) {
            let _ = tx.send(EntryMessage::Done {
                key,
                display: entry.display_path(),
                facts: EntryFacts {
                    fingerprint: Ok(fingerprint),
                    date,
                },
                cached: true,
                record: None,
            });
            continue;
        }

        if reader.is_none() {
            match ArchiveReader::open(id.clone()) {
                Ok(opened) => reader = Some(opened),
                Err(e) => {
                    let _ = tx.send(EntryMessage::Unopenable {
                        archive: id.clone(),
                        message: e.to_string(),
                    });
                    return;
                }
            }
        }
        let Some(reader) = reader.as_mut() else {
            return;
        };

        let computed_fp = cached_fp.is_none();
        let fingerprint = match cached_fp {
            Some(fp) => Ok(fp),
            None => fingerprint_entry(reader, entry, strategy).map_err(|e| e.to_string()),
        };
        let computed_date = cached_date.is_none();
        let date = cached_date.unwrap_or_else(|| resolve_entry(reader, entry));

        let record = CacheRecord {
            key: key.clone(),
            identity,
            fingerprint: fingerprint.as_ref().ok().filter(|_| computed_fp).cloned(),
            date: Some(date).filter(|_| computed_date),
        };

        let _ = tx.send(EntryMessage::Done {
            key,
            display: entry.display_path(),
            facts: EntryFacts { fingerprint, date },
            cached: false,
            record: Some(record),
        });
    }
}

/// Record an unreadable archive and tell listeners it is skipped
pub(crate) fn skip_archive(id: &ArchiveId, message: String, events: &EventSender, errors: &mut Vec<String>) {
    warn!(archive = %id.path.display(), error = %message, "skipping archive");
    events.send(Event::Archive(ArchiveEvent::Skipped {
        archive: id.path.clone(),
        message: message.clone(),
    }));
    errors.push(format!("{}: {}", id.display_name(), message));
}

/// Turn classifications into per-entry decisions, in canonical order
///
/// Walking archives and entries in order means placement collisions are
/// resolved first-encountered first.
pub(crate) fn plan_archives(
    indexes: &[ArchiveIndex],
    facts: &ArchiveFacts,
    dedup: &DedupResult,
    planner: &mut PlacementPlanner,
) -> Vec<ArchivePlan> {
    indexes
        .iter()
        .map(|index| ArchivePlan {
            archive: index.id.clone(),
            entries: index
                .entries
                .iter()
                .map(|entry| plan_entry(entry, facts.entries.get(&entry.location_key()), dedup, planner))
                .collect(),
            unindexed: index.errors.len(),
        })
        .collect()
}

fn plan_entry(
    entry: &ArchiveEntry,
    facts: Option<&EntryFacts>,
    dedup: &DedupResult,
    planner: &mut PlacementPlanner,
) -> PlannedEntry {
    let unreadable = |reason: String, date: ResolvedDate| PlannedEntry {
        entry: entry.clone(),
        fingerprint: None,
        date,
        decision: Decision::Unreadable { reason },
    };

    let facts = match facts {
        Some(facts) => facts,
        None => {
            return unreadable(
                "entry was not fingerprinted".to_string(),
                date::resolve(None, entry.timestamp),
            )
        }
    };
    let fingerprint = match &facts.fingerprint {
        Ok(fp) => fp,
        Err(reason) => return unreadable(reason.clone(), facts.date),
    };

    let decision = match dedup.classify(&Location::of_entry(entry)) {
        Some(Classification::Unique) => {
            let placement = planner.propose(entry.file_name(), &facts.date, fingerprint);
            Decision::from_parts(&Classification::Unique, Some(placement))
        }
        Some(classification) => Decision::from_parts(classification, None),
        None => Decision::Unreadable {
            reason: "entry was not classified".to_string(),
        },
    };

    PlannedEntry {
        entry: entry.clone(),
        fingerprint: Some(fingerprint.clone()),
        date: facts.date,
        decision,
    }
}
