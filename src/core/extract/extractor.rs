//! Per-archive driver of the extraction state machine.

use super::decision::{Decision, PlannedEntry};
use super::writer::write_entry;
use crate::core::archive::ArchiveReader;
use crate::core::manifest::{ArchiveStatus, ManifestRecord, ManifestStore, RecordState};
use crate::core::pipeline::CancellationToken;
use crate::error::Result;
use crate::events::{EntryOutcome, Event, EventSender, ExtractEvent};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Extraction knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractOptions {
    /// Write attempts per entry before it is marked `Failed`
    pub max_attempts: u32,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

/// Outcome of processing one archive
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveReport {
    pub archive: PathBuf,
    pub entries: usize,
    pub extracted: usize,
    pub skipped_duplicate: usize,
    pub skipped_existing: usize,
    pub failed: usize,
    pub bytes_written: u64,
    pub errors: Vec<String>,
    /// Stopped early; unprocessed entries keep their previous records
    pub cancelled: bool,
    /// Manifest status after processing
    pub status: ArchiveStatus,
}

impl ArchiveReport {
    fn count(&mut self, state: RecordState) {
        match state {
            RecordState::Extracted => self.extracted += 1,
            RecordState::SkippedDuplicate => self.skipped_duplicate += 1,
            RecordState::SkippedExisting => self.skipped_existing += 1,
            RecordState::Failed => self.failed += 1,
            RecordState::Planned => {}
        }
    }

    /// Every entry settled and none failed
    pub fn is_cleanup_eligible(&self) -> bool {
        !self.cancelled && self.status.is_cleanup_eligible()
    }
}

/// Final result of the write loop for one entry
struct WriteAttempt {
    state: RecordState,
    bytes: u64,
    attempts: u32,
    error: Option<String>,
}

/// Drives planned entries through the manifest state machine
///
/// The extractor is the only writer of the manifest. A record is committed
/// as `Planned` before any byte reaches the destination, and moves to a
/// terminal state only once the outcome is known.
pub struct Extractor<'a> {
    destination: &'a Path,
    manifest: &'a mut ManifestStore,
    options: ExtractOptions,
    run_id: Uuid,
    cancel: &'a CancellationToken,
    events: &'a EventSender,
}

impl<'a> Extractor<'a> {
    pub fn new(
        destination: &'a Path,
        manifest: &'a mut ManifestStore,
        cancel: &'a CancellationToken,
        events: &'a EventSender,
    ) -> Self {
        Self {
            destination,
            manifest,
            options: ExtractOptions::default(),
            run_id: Uuid::new_v4(),
            cancel,
            events,
        }
    }

    pub fn with_options(mut self, options: ExtractOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Process every planned entry of one archive
    ///
    /// Per-entry failures end up in the report. Only a manifest that can no
    /// longer be written is returned as an error.
    pub fn extract_archive(
        &mut self,
        reader: &mut ArchiveReader,
        plans: &[PlannedEntry],
    ) -> Result<ArchiveReport> {
        self.extract_partial(reader, plans, 0)
    }

    /// Like [`extract_archive`](Self::extract_archive) for an archive whose
    /// index skipped `unindexed` slots; such an archive is never eligible for
    /// cleanup
    pub fn extract_partial(
        &mut self,
        reader: &mut ArchiveReader,
        plans: &[PlannedEntry],
        unindexed: usize,
    ) -> Result<ArchiveReport> {
        let archive = reader.id().path.clone();
        let mut report = ArchiveReport {
            archive: archive.clone(),
            entries: plans.len(),
            ..ArchiveReport::default()
        };

        self.events.send(Event::Extract(ExtractEvent::ArchiveStarted {
            archive: archive.clone(),
            entries: plans.len(),
        }));
        info!(archive = %archive.display(), entries = plans.len(), "extracting archive");

        for planned in plans {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                info!(archive = %archive.display(), "extraction cancelled");
                break;
            }

            let outcome = self.process(reader, planned, &mut report)?;
            report.count(outcome.state);
            if outcome.state == RecordState::Failed {
                if let Some(message) = &outcome.message {
                    report.errors.push(format!("{}: {}", planned.entry.display_path(), message));
                }
            }
            self.events.send(Event::Extract(ExtractEvent::EntryFinished(outcome)));
        }

        report.status = self
            .manifest
            .archive_status(&archive, plans.iter().map(|p| p.entry.path.as_str()));
        report.status.unindexed = unindexed;

        self.events.send(Event::Extract(ExtractEvent::ArchiveFinished {
            archive: archive.clone(),
            cleanup_eligible: report.is_cleanup_eligible(),
        }));
        debug!(
            archive = %archive.display(),
            extracted = report.extracted,
            skipped_duplicate = report.skipped_duplicate,
            skipped_existing = report.skipped_existing,
            failed = report.failed,
            "archive finished"
        );

        Ok(report)
    }

    fn process(
        &mut self,
        reader: &mut ArchiveReader,
        planned: &PlannedEntry,
        report: &mut ArchiveReport,
    ) -> Result<EntryOutcome> {
        let entry = &planned.entry;
        let state = planned.decision.target_state();
        let mut outcome = EntryOutcome {
            archive: entry.archive.path.clone(),
            entry: entry.path.clone(),
            state,
            target: None,
            message: None,
        };

        // A settled entry that needs no write keeps its record as is, unless
        // a whole-content fingerprint can now replace a sampled one.
        if planned.decision.is_skip() {
            if let Some(previous) = self.manifest.get(&entry.archive.path, &entry.path) {
                let upgraded = !previous.proves_content()
                    && planned
                        .fingerprint
                        .as_ref()
                        .map_or(false, |fp| fp.strategy.covers_content());
                if previous.describes(entry)
                    && previous.state.is_terminal()
                    && previous.state != RecordState::Failed
                    && !upgraded
                {
                    outcome.target = previous.placement.clone();
                    return Ok(outcome);
                }
            }
        }

        let mut record = ManifestRecord::planned(
            entry,
            planned.fingerprint.clone(),
            planned.date,
            self.run_id,
        );

        match &planned.decision {
            Decision::SkipDuplicate { canonical } => {
                record.duplicate_of = Some(canonical.clone());
                outcome.message = Some(format!("duplicate of {}", canonical));
                self.settle(record, state)?;
            }
            Decision::SkipExisting { destination } => {
                record.placement = Some(destination.clone());
                outcome.target = Some(destination.clone());
                self.settle(record, state)?;
            }
            Decision::Unreadable { reason } => {
                warn!(entry = %entry.display_path(), reason = %reason, "entry unreadable");
                record.error = Some(reason.clone());
                outcome.message = Some(reason.clone());
                self.settle(record, state)?;
            }
            Decision::Extract { target } => {
                outcome.target = Some(target.clone());
                record.placement = Some(target.clone());
                self.manifest.commit(&record)?;

                let attempt = self.write_with_retry(reader, planned, target);
                record.attempts = attempt.attempts;
                record.error = attempt.error.clone();
                report.bytes_written += attempt.bytes;
                outcome.state = attempt.state;
                outcome.message = attempt.error;
                record.transition(attempt.state)?;
                self.manifest.commit(&record)?;
            }
        }

        Ok(outcome)
    }

    /// Commit a record that goes straight from `Planned` to `state`
    fn settle(&mut self, mut record: ManifestRecord, state: RecordState) -> Result<()> {
        record.transition(state)?;
        self.manifest.commit(&record)?;
        Ok(())
    }

    fn write_with_retry(
        &self,
        reader: &mut ArchiveReader,
        planned: &PlannedEntry,
        target: &Path,
    ) -> WriteAttempt {
        let max_attempts = self.options.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match write_entry(
                reader,
                &planned.entry,
                self.destination,
                target,
                planned.fingerprint.as_ref(),
            ) {
                Ok(bytes) => {
                    return WriteAttempt {
                        state: RecordState::Extracted,
                        bytes,
                        attempts: attempt,
                        error: None,
                    }
                }
                Err(e) if e.is_retryable() && attempt < max_attempts && !self.cancel.is_cancelled() => {
                    warn!(entry = %planned.entry.display_path(), attempt, error = %e, "write failed, retrying");
                    self.events.send(Event::Extract(ExtractEvent::Retrying {
                        entry: planned.entry.display_path(),
                        attempt,
                        message: e.to_string(),
                    }));
                }
                Err(e) => {
                    warn!(entry = %planned.entry.display_path(), attempts = attempt, error = %e, "entry failed");
                    return WriteAttempt {
                        state: RecordState::Failed,
                        bytes: 0,
                        attempts: attempt,
                        error: Some(e.to_string()),
                    };
                }
            }
        }
    }
}
