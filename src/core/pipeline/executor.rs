//! Pipeline execution implementation.

use super::analysis::{fingerprint_archives, plan_archives, skip_archive, Analysis, AnalysisSummary};
use super::CancellationToken;
use crate::core::archive::{discover_archives, read_index, ArchiveId, ArchiveReader};
use crate::core::cache::{CacheBackend, InMemoryCache};
use crate::core::dedup::{DedupEngine, Location};
use crate::core::extract::{ArchiveReport, ExtractOptions, Extractor};
use crate::core::fingerprint::Strategy;
use crate::core::manifest::{ManifestStore, MANIFEST_FILE};
use crate::core::planner::PlacementPlanner;
use crate::core::reconcile::{compare_archive, reconcile, CompareReport, ReconcileReport};
use crate::core::scanner::{DestinationScanner, ScanConfig, ScanResult};
use crate::error::{Result, TakeoutError};
use crate::events::{
    null_sender, ArchiveEvent, Event, EventSender, PipelineEvent, PipelinePhase, PipelineSummary,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Configuration for the pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory holding the archives, or a single archive
    pub archives: PathBuf,
    /// Destination tree
    pub destination: PathBuf,
    /// Fingerprint strategy for the whole run
    pub strategy: Strategy,
    /// Manifest location (default: inside the destination)
    pub manifest_path: Option<PathBuf>,
    /// Fingerprinting threads (None = available parallelism)
    pub workers: Option<usize>,
    /// Write attempts per entry
    pub max_attempts: u32,
    /// Analyze and plan, write nothing
    pub dry_run: bool,
    /// Destination scanner configuration
    pub scan_config: ScanConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            archives: PathBuf::from("."),
            destination: PathBuf::from("."),
            strategy: Strategy::default(),
            manifest_path: None,
            workers: None,
            max_attempts: ExtractOptions::default().max_attempts,
            dry_run: false,
            scan_config: ScanConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Configured manifest path, or the default inside the destination
    pub fn manifest_path(&self) -> PathBuf {
        self.manifest_path
            .clone()
            .unwrap_or_else(|| self.destination.join(MANIFEST_FILE))
    }
}

/// Builder for pipeline configuration
pub struct PipelineBuilder {
    config: PipelineConfig,
    cache: Option<Box<dyn CacheBackend>>,
    cancel: CancellationToken,
}

impl PipelineBuilder {
    /// Create a new pipeline builder
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            cache: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Directory (or single file) holding the archives
    pub fn archives(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.archives = path.into();
        self
    }

    pub fn destination(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.destination = path.into();
        self
    }

    /// Set the fingerprint strategy
    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    pub fn manifest_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.manifest_path = Some(path.into());
        self
    }

    /// Number of fingerprinting threads
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = Some(workers);
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.config.dry_run = dry_run;
        self
    }

    /// Set the cache backend
    pub fn cache(mut self, cache: Box<dyn CacheBackend>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Set scanner configuration
    pub fn scan_config(mut self, config: ScanConfig) -> Self {
        self.config.scan_config = config;
        self
    }

    /// Descend into hidden destination directories
    pub fn include_hidden(mut self, include: bool) -> Self {
        self.config.scan_config.include_hidden = include;
        self
    }

    /// Share a cancellation token with the caller
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Build the pipeline
    pub fn build(self) -> Pipeline {
        Pipeline {
            config: self.config,
            cache: self.cache.unwrap_or_else(|| Box::new(InMemoryCache::new())),
            cancel: self.cancel,
        }
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of an extraction run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub manifest_path: PathBuf,
    pub analysis: AnalysisSummary,
    /// One report per processed archive; empty for dry runs
    pub archives: Vec<ArchiveReport>,
    /// Non-fatal errors from analysis and extraction
    pub errors: Vec<String>,
    pub dry_run: bool,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn summary(&self) -> PipelineSummary {
        let mut summary = PipelineSummary {
            archives: self.analysis.archives,
            entries: self.analysis.entries,
            duration_ms: self.duration_ms,
            ..PipelineSummary::default()
        };
        for report in &self.archives {
            summary.extracted += report.extracted;
            summary.skipped_duplicate += report.skipped_duplicate;
            summary.skipped_existing += report.skipped_existing;
            summary.failed += report.failed;
            summary.bytes_written += report.bytes_written;
        }
        summary
    }

    /// Archives whose every entry is settled and none failed
    pub fn cleanup_candidates(&self) -> impl Iterator<Item = &ArchiveReport> {
        self.archives.iter().filter(|r| r.is_cleanup_eligible())
    }
}

/// The takeout extraction pipeline
pub struct Pipeline {
    config: PipelineConfig,
    cache: Box<dyn CacheBackend>,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Create a new pipeline builder
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache(&self) -> &dyn CacheBackend {
        self.cache.as_ref()
    }

    /// A handle that cancels this pipeline between files
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Analyze without events
    pub fn analyze(&self) -> Result<Analysis> {
        self.analyze_with_events(&null_sender())
    }

    /// Index, fingerprint, scan, deduplicate and plan; nothing is written
    /// outside the cache
    pub fn analyze_with_events(&self, events: &EventSender) -> Result<Analysis> {
        let strategy = self.config.strategy;
        let mut errors = Vec::new();

        // Phase 1: Indexing
        phase(events, PipelinePhase::Indexing);
        let root = fs::canonicalize(&self.config.archives)
            .unwrap_or_else(|_| self.config.archives.clone());
        let ids = discover_archives(&root)?;
        events.send(Event::Archive(ArchiveEvent::Discovered { count: ids.len() }));
        info!(root = %root.display(), archives = ids.len(), "archives discovered");

        let mut indexes = Vec::with_capacity(ids.len());
        let mut skipped_archives = Vec::new();
        for id in ids {
            match read_index(id.clone()) {
                Ok(index) => {
                    for error in &index.errors {
                        warn!(error = %error, "entry not indexed");
                        errors.push(error.to_string());
                    }
                    events.send(Event::Archive(ArchiveEvent::Indexed {
                        archive: index.id.path.clone(),
                        entries: index.entries.len(),
                    }));
                    indexes.push(index);
                }
                Err(e) => {
                    skip_archive(&id, e.to_string(), events, &mut errors);
                    skipped_archives.push(id);
                }
            }
        }

        // Phase 2: Fingerprinting archive entries
        phase(events, PipelinePhase::Fingerprinting);
        let facts = fingerprint_archives(
            &indexes,
            strategy,
            self.cache.as_ref(),
            self.config.workers,
            &self.cancel,
            events,
        )?;
        errors.extend(facts.errors.iter().cloned());

        // Phase 3: Scanning the destination
        let scan = if facts.cancelled {
            ScanResult::empty(&self.config.destination, strategy)
        } else {
            phase(events, PipelinePhase::Scanning);
            self.scan_destination(strategy, events)?
        };
        errors.extend(scan.errors.iter().map(|e| e.to_string()));

        // Phase 4: Deduplicating
        phase(events, PipelinePhase::Deduplicating);
        let mut engine = DedupEngine::new(strategy);
        for entry in indexes.iter().flat_map(|i| i.entries.iter()) {
            if let Some(Ok(fp)) = facts.entries.get(&entry.location_key()).map(|f| &f.fingerprint) {
                engine.push(Location::of_entry(entry), fp.clone())?;
            }
        }
        for file in &scan.files {
            engine.push(
                Location::Destination {
                    path: file.relative.clone(),
                },
                file.fingerprint.clone(),
            )?;
        }
        let dedup = engine.finish();

        // Phase 5: Planning
        phase(events, PipelinePhase::Planning);
        let mut planner = PlacementPlanner::with_existing(&scan);
        let archives = plan_archives(&indexes, &facts, &dedup, &mut planner);

        let cancelled = facts.cancelled || scan.cancelled;
        let analysis = Analysis {
            strategy,
            archives,
            dedup,
            scan,
            skipped_archives,
            errors,
            cache_hits: facts.cache_hits,
            cancelled,
        };

        let summary = analysis.summary();
        info!(
            entries = summary.entries,
            to_extract = summary.to_extract,
            already_present = summary.already_present,
            duplicates = summary.duplicates,
            "analysis finished"
        );
        Ok(analysis)
    }

    /// Run without events
    pub fn run(&self) -> Result<RunReport> {
        self.run_with_events(&null_sender())
    }

    /// Analyze, then extract every planned entry
    pub fn run_with_events(&self, events: &EventSender) -> Result<RunReport> {
        let start = Instant::now();
        events.send(Event::Pipeline(PipelineEvent::Started));

        let analysis = match self.analyze_with_events(events) {
            Ok(analysis) => analysis,
            Err(e) => {
                events.send(Event::Pipeline(PipelineEvent::Error {
                    message: e.to_string(),
                }));
                return Err(e);
            }
        };

        let result = self.extract_with_events(&analysis, events);
        match &result {
            Ok(report) if report.cancelled => {
                events.send(Event::Pipeline(PipelineEvent::Cancelled));
            }
            Ok(report) => {
                let mut summary = report.summary();
                summary.duration_ms = start.elapsed().as_millis() as u64;
                events.send(Event::Pipeline(PipelineEvent::Completed { summary }));
            }
            Err(e) => {
                events.send(Event::Pipeline(PipelineEvent::Error {
                    message: e.to_string(),
                }));
            }
        }
        result.map(|mut report| {
            report.duration_ms = start.elapsed().as_millis() as u64;
            report
        })
    }

    /// Extract the entries an earlier analysis planned
    ///
    /// Fails only when the destination root or the manifest cannot be
    /// written; every other failure is recorded and the run continues.
    pub fn extract_with_events(&self, analysis: &Analysis, events: &EventSender) -> Result<RunReport> {
        let start = Instant::now();
        let manifest_path = self.config.manifest_path();
        let mut report = RunReport {
            run_id: Uuid::new_v4(),
            manifest_path: manifest_path.clone(),
            analysis: analysis.summary(),
            archives: Vec::new(),
            errors: analysis.errors.clone(),
            dry_run: self.config.dry_run,
            cancelled: analysis.cancelled,
            duration_ms: 0,
        };

        if self.config.dry_run || analysis.cancelled {
            report.duration_ms = start.elapsed().as_millis() as u64;
            return Ok(report);
        }

        phase(events, PipelinePhase::Extracting);
        ensure_writable(&self.config.destination)?;
        let mut manifest = ManifestStore::open(&manifest_path)?;
        let options = ExtractOptions {
            max_attempts: self.config.max_attempts,
        };
        let mut extractor = Extractor::new(&self.config.destination, &mut manifest, &self.cancel, events)
            .with_options(options)
            .with_run_id(report.run_id);

        for plan in &analysis.archives {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let mut reader = match ArchiveReader::open(plan.archive.clone()) {
                Ok(reader) => reader,
                Err(e) => {
                    skip_archive(&plan.archive, e.to_string(), events, &mut report.errors);
                    continue;
                }
            };

            let archive_report = extractor.extract_partial(&mut reader, &plan.entries, plan.unindexed)?;
            report.errors.extend(archive_report.errors.iter().cloned());
            report.cancelled |= archive_report.cancelled;
            report.archives.push(archive_report);
        }

        // Drop superseded `planned` lines; the appended log stays valid if this fails
        if !report.cancelled {
            if let Err(e) = manifest.compact() {
                warn!(path = %manifest_path.display(), error = %e, "manifest not compacted");
                report.errors.push(e.to_string());
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        let summary = report.summary();
        info!(
            extracted = summary.extracted,
            skipped_duplicate = summary.skipped_duplicate,
            skipped_existing = summary.skipped_existing,
            failed = summary.failed,
            bytes = summary.bytes_written,
            "extraction finished"
        );
        Ok(report)
    }

    /// Reconcile without events
    pub fn reconcile(&self) -> Result<ReconcileReport> {
        self.reconcile_with_events(&null_sender())
    }

    /// Check the manifest against a fresh scan of the destination
    ///
    /// The destination is scanned with the strategy the manifest was written
    /// under, so a run's own records always stay comparable.
    pub fn reconcile_with_events(&self, events: &EventSender) -> Result<ReconcileReport> {
        let manifest_path = self.config.manifest_path();
        if !manifest_path.is_file() {
            return Err(TakeoutError::Config(format!(
                "no manifest at {}",
                manifest_path.display()
            )));
        }
        let manifest = ManifestStore::open(&manifest_path)?;
        let strategy = manifest
            .records()
            .find_map(|r| r.fingerprint.as_ref().map(|fp| fp.strategy))
            .unwrap_or(self.config.strategy);

        phase(events, PipelinePhase::Scanning);
        let scan = self.scan_destination(strategy, events)?;

        phase(events, PipelinePhase::Reconciling);
        let report = reconcile(manifest.records(), &scan);
        info!(
            confirmed = report.confirmed.len(),
            pending = report.pending.len(),
            "reconciliation finished"
        );
        Ok(report)
    }

    /// Compare one archive with the destination
    pub fn compare_with_events(&self, archive: &Path, events: &EventSender) -> Result<CompareReport> {
        let strategy = self.config.strategy;
        let path = fs::canonicalize(archive).unwrap_or_else(|_| archive.to_path_buf());

        phase(events, PipelinePhase::Indexing);
        let index = read_index(ArchiveId::new(0, &path))?;

        phase(events, PipelinePhase::Fingerprinting);
        let indexes = [index];
        let facts = fingerprint_archives(
            &indexes,
            strategy,
            self.cache.as_ref(),
            self.config.workers,
            &self.cancel,
            events,
        )?;
        let entries: Vec<_> = indexes[0]
            .entries
            .iter()
            .filter_map(|entry| {
                facts
                    .entries
                    .get(&entry.location_key())
                    .and_then(|f| f.fingerprint.as_ref().ok())
                    .map(|fp| (entry.clone(), fp.clone()))
            })
            .collect();

        phase(events, PipelinePhase::Scanning);
        let scan = self.scan_destination(strategy, events)?;

        Ok(compare_archive(path, &entries, &scan)?)
    }

    fn scan_destination(&self, strategy: Strategy, events: &EventSender) -> Result<ScanResult> {
        let destination = &self.config.destination;
        if !destination.exists() {
            return Ok(ScanResult::empty(destination, strategy));
        }

        let mut scan_config = self.config.scan_config.clone();
        if scan_config.workers.is_none() {
            scan_config.workers = self.config.workers;
        }
        scan_config.excluded.push(self.config.manifest_path());
        let scanner = DestinationScanner::new(scan_config);
        Ok(scanner.scan(destination, strategy, self.cache.as_ref(), &self.cancel, events)?)
    }
}

fn phase(events: &EventSender, phase: PipelinePhase) {
    events.send(Event::Pipeline(PipelineEvent::PhaseChanged { phase }));
}

/// Fail fast when the destination root cannot take a file
fn ensure_writable(destination: &Path) -> Result<()> {
    let unwritable = |e| TakeoutError::DestinationUnwritable {
        path: destination.to_path_buf(),
        source: e,
    };
    fs::create_dir_all(destination).map_err(unwritable)?;
    tempfile::Builder::new()
        .prefix(".takeout-check")
        .tempfile_in(destination)
        .map_err(unwritable)?;
    Ok(())
}
