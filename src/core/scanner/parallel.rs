//! Parallel fingerprinting of the destination tree.

use super::walker::{list_files, ListedFile, ScanConfig};
use super::{ScanResult, ScannedFile};
use crate::core::cache::{file_key, flush_records, CacheBackend, CacheRecord, ScanState, CACHE_BATCH};
use crate::core::fingerprint::{fingerprint_file, Strategy};
use crate::core::pipeline::CancellationToken;
use crate::error::ScanError;
use crate::events::{
    Event, EventSender, FingerprintEvent, FingerprintProgress, FingerprintTarget, ScanEvent,
};
use crossbeam_channel::unbounded;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::path::Path;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Build the bounded worker pool used for fingerprinting
///
/// Defaults to the machine's available parallelism.
pub fn worker_pool(workers: Option<usize>) -> Result<ThreadPool, ScanError> {
    let threads = workers.filter(|&n| n > 0).unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    });

    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("fingerprint-{}", i))
        .build()
        .map_err(|e| ScanError::WorkerPool(e.to_string()))
}

enum WorkerMessage {
    Cached(ScannedFile),
    Computed(ScannedFile),
    Failed(ScanError),
}

/// Fingerprints a destination tree
pub struct DestinationScanner {
    config: ScanConfig,
}

impl DestinationScanner {
    /// Create a new scanner with the given configuration
    pub fn new(config: ScanConfig) -> Self {
        Self { config }
    }

    /// Walk `root` and fingerprint every included file under `strategy`
    ///
    /// Cancellation is checked before each file; a cancelled scan returns
    /// the files completed so far with `cancelled` set.
    pub fn scan(
        &self,
        root: &Path,
        strategy: Strategy,
        cache: &dyn CacheBackend,
        cancel: &CancellationToken,
        events: &EventSender,
    ) -> Result<ScanResult, ScanError> {
        events.send(Event::Scan(ScanEvent::Started {
            root: root.to_path_buf(),
        }));

        let (listed, mut errors) = list_files(root, &self.config, events)?;
        let total = listed.len();
        events.send(Event::Scan(ScanEvent::Completed { total_files: total }));
        info!(root = %root.display(), files = total, "destination listed");

        events.send(Event::Fingerprint(FingerprintEvent::Started {
            target: FingerprintTarget::Destination,
            total,
        }));

        let pool = worker_pool(self.config.workers)?;
        let (tx, rx) = unbounded::<WorkerMessage>();

        let mut files = Vec::with_capacity(total);
        let mut cache_hits = 0;
        let mut pending: Vec<CacheRecord> = Vec::new();

        std::thread::scope(|scope| {
            let listed = &listed;
            scope.spawn(move || {
                pool.install(|| {
                    listed.par_iter().for_each_with(tx, |tx, item| {
                        if cancel.is_cancelled() {
                            return;
                        }
                        let _ = tx.send(fingerprint_listed(item, strategy, cache));
                    });
                });
            });

            // Sole cache writer
            for message in rx.iter() {
                let (file, current) = match message {
                    WorkerMessage::Cached(file) => {
                        cache_hits += 1;
                        let current = file.relative.display().to_string();
                        (Some(file), current)
                    }
                    WorkerMessage::Computed(file) => {
                        pending.push(CacheRecord {
                            key: file_key(&file.path),
                            identity: file.identity,
                            fingerprint: Some(file.fingerprint.clone()),
                            date: None,
                        });
                        let current = file.relative.display().to_string();
                        (Some(file), current)
                    }
                    WorkerMessage::Failed(error) => {
                        warn!(error = %error, "destination file skipped");
                        events.send(Event::Fingerprint(FingerprintEvent::Error {
                            location: error_location(&error),
                            message: error.to_string(),
                        }));
                        errors.push(error);
                        (None, String::new())
                    }
                };

                if let Some(file) = file {
                    files.push(file);
                    events.send(Event::Fingerprint(FingerprintEvent::Progress(
                        FingerprintProgress {
                            target: FingerprintTarget::Destination,
                            completed: files.len(),
                            total,
                            current,
                            cache_hits,
                        },
                    )));
                }

                if pending.len() >= CACHE_BATCH {
                    flush_records(cache, &mut pending);
                }
            }
        });

        flush_records(cache, &mut pending);

        let cancelled = cancel.is_cancelled();
        files.sort_by(|a, b| a.relative.cmp(&b.relative));

        if !cancelled {
            let state = ScanState {
                directory: root.to_path_buf(),
                last_scan_time: SystemTime::now(),
                file_count: files.len(),
            };
            if let Err(e) = cache.set_scan_state(&state) {
                warn!(error = %e, "failed to record scan state");
            }
        }

        events.send(Event::Fingerprint(FingerprintEvent::Completed {
            target: FingerprintTarget::Destination,
            total: files.len(),
            cache_hits,
        }));
        debug!(files = files.len(), cache_hits, cancelled, "destination fingerprinted");

        Ok(ScanResult {
            root: root.to_path_buf(),
            strategy,
            files,
            errors,
            cache_hits,
            cancelled,
        })
    }
}

fn fingerprint_listed(item: &ListedFile, strategy: Strategy, cache: &dyn CacheBackend) -> WorkerMessage {
    let key = file_key(&item.path);

    match cache.get_fingerprint(&key, &item.identity, strategy) {
        Ok(Some(fingerprint)) => {
            return WorkerMessage::Cached(ScannedFile {
                path: item.path.clone(),
                relative: item.relative.clone(),
                identity: item.identity,
                fingerprint,
            });
        }
        Ok(None) => {}
        Err(e) => debug!(error = %e, "cache read failed; recomputing"),
    }

    match fingerprint_file(&item.path, strategy) {
        Ok(fingerprint) => WorkerMessage::Computed(ScannedFile {
            path: item.path.clone(),
            relative: item.relative.clone(),
            identity: item.identity,
            fingerprint,
        }),
        Err(e) => WorkerMessage::Failed(ScanError::Fingerprint {
            path: item.path.clone(),
            reason: e.to_string(),
        }),
    }
}

fn error_location(error: &ScanError) -> String {
    match error {
        ScanError::Fingerprint { path, .. }
        | ScanError::ReadDirectory { path, .. }
        | ScanError::PermissionDenied { path }
        | ScanError::DirectoryNotFound { path } => path.display().to_string(),
        _ => String::new(),
    }
}
