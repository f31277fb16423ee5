//! # CLI Module
//!
//! Command-line interface for the takeout extractor.
//!
//! ## Usage
//! ```bash
//! # Show what would happen
//! takeout-dedup analyze ~/Downloads/takeout ~/Pictures/Library
//!
//! # Extract, then offer to delete fully extracted archives
//! takeout-dedup extract ~/Downloads/takeout ~/Pictures/Library --cleanup prompt
//!
//! # Check a destination that was reorganized by hand
//! takeout-dedup reconcile ~/Pictures/Library --json
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use takeout_dedup::core::cache::{CacheBackend, InMemoryCache, SqliteCache};
use takeout_dedup::core::extract::{decide_cleanup, CleanupAction, CleanupMode};
use takeout_dedup::core::fingerprint::Strategy;
use takeout_dedup::core::pipeline::{Analysis, Pipeline, PipelineBuilder, RunReport};
use takeout_dedup::core::reconcile::{CompareReport, ReconcileReport};
use takeout_dedup::events::{
    Event, EventChannel, EventSender, ExtractEvent, FingerprintEvent, PipelineEvent,
};
use takeout_dedup::{Result, TakeoutError};
use tracing::warn;

/// Takeout Dedup - extract photo archives once, and only once
#[derive(Parser, Debug)]
#[command(name = "takeout-dedup")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze archives against a destination without writing anything
    Analyze {
        /// Directory holding the archives, or a single archive
        archives: PathBuf,
        /// Destination tree
        destination: PathBuf,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Extract unique entries into the destination
    Extract {
        /// Directory holding the archives, or a single archive
        archives: PathBuf,
        /// Destination tree
        destination: PathBuf,
        #[command(flatten)]
        run: RunArgs,
        /// Plan only; same as `analyze`
        #[arg(long)]
        dry_run: bool,
        /// Write attempts per entry before it is marked failed
        #[arg(long, default_value = "3")]
        max_attempts: u32,
        /// What to do with fully extracted archives
        #[arg(long, default_value = "keep")]
        cleanup: Cleanup,
    },
    /// Compare the manifest with what the destination holds now
    Reconcile {
        /// Destination tree
        destination: PathBuf,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Compare one archive with the destination
    Compare {
        /// Archive file
        archive: PathBuf,
        /// Destination tree
        destination: PathBuf,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Inspect or clear the fingerprint cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
        /// Cache database path
        #[arg(long, global = true)]
        cache_path: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Show entry counts
    Stats,
    /// Remove every cached fingerprint and date
    Clear,
}

/// Options shared by every command that reads archives or the destination
#[derive(Args, Debug)]
struct RunArgs {
    /// Fingerprint strategy
    #[arg(short, long, default_value = "size-crc")]
    strategy: StrategyArg,

    /// Manifest path (default: inside the destination)
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Cache database path
    #[arg(long)]
    cache_path: Option<PathBuf>,

    /// Clear the cache before running
    #[arg(long)]
    clear_cache: bool,

    /// Fingerprinting threads (default: all cores)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Descend into hidden destination directories
    #[arg(long)]
    include_hidden: bool,

    /// Print JSON instead of a summary
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    /// Size plus a hash of the first 64 KiB - fastest, may collide
    SizePartial,
    /// Size plus CRC32 - reads no archive payload (default)
    SizeCrc,
    /// Size plus SHA-256 of the whole content - slowest, strongest
    Full,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::SizePartial => Strategy::SizePartial,
            StrategyArg::SizeCrc => Strategy::SizeCrc,
            StrategyArg::Full => Strategy::Full,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Cleanup {
    /// Ask before deleting each fully extracted archive
    Prompt,
    /// Delete all fully extracted archives after one confirmation
    Auto,
    /// Never delete archives
    Keep,
}

impl From<Cleanup> for CleanupMode {
    fn from(arg: Cleanup) -> Self {
        match arg {
            Cleanup::Prompt => CleanupMode::Prompt,
            Cleanup::Auto => CleanupMode::Auto,
            Cleanup::Keep => CleanupMode::Keep,
        }
    }
}

/// Run the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            archives,
            destination,
            run,
        } => {
            let pipeline = builder(&run)?
                .archives(archives)
                .destination(destination)
                .dry_run(true)
                .build();
            let analysis = with_progress(!run.json, |events| pipeline.analyze_with_events(events))?;
            if run.json {
                print_json(&analysis.summary())
            } else {
                print_analysis(&Term::stderr(), &analysis, run.verbose);
                Ok(())
            }
        }
        Commands::Extract {
            archives,
            destination,
            run,
            dry_run,
            max_attempts,
            cleanup,
        } => {
            let pipeline = builder(&run)?
                .archives(archives)
                .destination(destination)
                .dry_run(dry_run)
                .max_attempts(max_attempts)
                .build();
            let report = with_progress(!run.json, |events| pipeline.run_with_events(events))?;
            if run.json {
                print_json(&report)?;
            } else {
                print_run(&Term::stderr(), &report, run.verbose);
            }
            if !report.dry_run {
                cleanup_archives(&Term::stderr(), &report, cleanup.into());
            }
            Ok(())
        }
        Commands::Reconcile { destination, run } => {
            let pipeline = builder(&run)?.destination(destination).build();
            let report = with_progress(!run.json, |events| pipeline.reconcile_with_events(events))?;
            if run.json {
                print_json(&report)
            } else {
                print_reconcile(&Term::stderr(), &report, run.verbose);
                Ok(())
            }
        }
        Commands::Compare {
            archive,
            destination,
            run,
        } => {
            let pipeline = builder(&run)?.destination(destination).build();
            let report = with_progress(!run.json, |events| {
                pipeline.compare_with_events(&archive, events)
            })?;
            if run.json {
                print_json(&report)
            } else {
                print_compare(&Term::stderr(), &report, run.verbose);
                Ok(())
            }
        }
        Commands::Cache { action, cache_path } => {
            let path = cache_path.unwrap_or_else(default_cache_path);
            let cache = SqliteCache::open_or_rebuild(&path)?;
            let term = Term::stderr();
            match action {
                CacheAction::Stats => {
                    let stats = cache.stats()?;
                    term.write_line(&format!("{} {}", style("Cache").bold(), path.display())).ok();
                    term.write_line(&format!("  {} fingerprints", style(stats.fingerprints).cyan())).ok();
                    term.write_line(&format!("  {} dates", style(stats.dates).cyan())).ok();
                    term.write_line(&format!("  {} scanned folders", style(stats.scanned_roots).cyan())).ok();
                }
                CacheAction::Clear => {
                    cache.clear()?;
                    term.write_line(&format!("{} Cache cleared", style("✓").green().bold())).ok();
                }
            }
            Ok(())
        }
    }
}

fn default_cache_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("takeout-dedup")
        .join("cache.db")
}

/// Pipeline builder with the shared options applied
fn builder(run: &RunArgs) -> Result<PipelineBuilder> {
    let cache_path = run.cache_path.clone().unwrap_or_else(default_cache_path);
    let cache: Box<dyn CacheBackend> = match SqliteCache::open_or_rebuild(&cache_path) {
        Ok(cache) => Box::new(cache),
        Err(e) => {
            warn!(path = %cache_path.display(), error = %e, "cache unavailable; using memory only");
            Box::new(InMemoryCache::new())
        }
    };
    if run.clear_cache {
        cache.clear()?;
    }

    let mut builder = Pipeline::builder()
        .strategy(run.strategy.into())
        .include_hidden(run.include_hidden)
        .cache(cache);
    if let Some(workers) = run.workers {
        builder = builder.workers(workers);
    }
    if let Some(manifest) = &run.manifest {
        builder = builder.manifest_path(manifest);
    }
    Ok(builder)
}

/// Run `f` with a progress bar fed from the event stream
fn with_progress<T>(show: bool, f: impl FnOnce(&EventSender) -> Result<T>) -> Result<T> {
    let (sender, receiver) = EventChannel::new();

    let progress = if show {
        let pb = ProgressBar::new(0);
        let bar_style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .map(|s| s.progress_chars("█▓░"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(bar_style);
        Some(pb)
    } else {
        None
    };
    let progress_clone = progress.clone();

    // Handle events in a separate thread
    let event_thread = thread::spawn(move || {
        for event in receiver.iter() {
            let Some(ref pb) = progress_clone else {
                continue;
            };
            match event {
                Event::Pipeline(PipelineEvent::PhaseChanged { phase }) => {
                    pb.set_message(phase.to_string());
                }
                Event::Fingerprint(FingerprintEvent::Started { total, .. }) => {
                    pb.set_length(total as u64);
                    pb.set_position(0);
                }
                Event::Fingerprint(FingerprintEvent::Progress(p)) => {
                    pb.set_position(p.completed as u64);
                }
                Event::Extract(ExtractEvent::ArchiveStarted { archive, entries }) => {
                    pb.set_length(entries as u64);
                    pb.set_position(0);
                    pb.set_message(display_name(&archive));
                }
                Event::Extract(ExtractEvent::EntryFinished(_)) => pb.inc(1),
                Event::Pipeline(PipelineEvent::Completed { .. })
                | Event::Pipeline(PipelineEvent::Cancelled)
                | Event::Pipeline(PipelineEvent::Error { .. }) => pb.finish_and_clear(),
                _ => {}
            }
        }
    });

    let result = f(&sender);

    // Drop sender to signal event thread to finish
    drop(sender);
    event_thread.join().ok();
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }
    result
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| TakeoutError::Config(format!("cannot serialize output: {}", e)))?;
    println!("{}", json);
    Ok(())
}

fn print_analysis(term: &Term, analysis: &Analysis, verbose: bool) {
    let summary = analysis.summary();

    term.write_line("").ok();
    term.write_line(&format!("{} Analysis Complete", style("✓").green().bold())).ok();
    term.write_line("").ok();
    term.write_line(&format!(
        "  {} entries in {} archives ({})",
        style(summary.entries).cyan(),
        style(summary.archives).cyan(),
        summary.strategy
    ))
    .ok();
    term.write_line(&format!(
        "  {} to extract ({})",
        style(summary.to_extract).green(),
        format_bytes(summary.bytes_to_extract)
    ))
    .ok();
    term.write_line(&format!("  {} already in the destination", style(summary.already_present).cyan())).ok();
    term.write_line(&format!("  {} duplicates of another entry", style(summary.duplicates).cyan())).ok();
    if summary.unreadable > 0 {
        term.write_line(&format!("  {} unreadable", style(summary.unreadable).red())).ok();
    }
    if summary.skipped_archives > 0 {
        term.write_line(&format!("  {} archives skipped", style(summary.skipped_archives).red())).ok();
    }
    if summary.cache_hits > 0 {
        term.write_line(&format!("  {} cache hits", style(summary.cache_hits).dim())).ok();
    }

    if verbose {
        let groups: Vec<_> = analysis.dedup.duplicate_groups().collect();
        if !groups.is_empty() {
            term.write_line("").ok();
            term.write_line(&format!("{}", style("Duplicate Groups:").bold().underlined())).ok();
            for group in groups {
                term.write_line(&format!("  {}", style(group.fingerprint.short()).yellow())).ok();
                term.write_line(&format!("    {} {}", style("★").green(), group.canonical())).ok();
                for member in group.duplicates() {
                    term.write_line(&format!("    {} {}", style("○").dim(), member)).ok();
                }
            }
        }
    }

    print_errors(term, &analysis.errors, verbose);
    term.write_line("").ok();
    term.write_line(&format!("{}", style("Nothing was written. Run `extract` to apply.").dim())).ok();
}

fn print_run(term: &Term, report: &RunReport, verbose: bool) {
    let summary = report.summary();

    term.write_line("").ok();
    if report.dry_run {
        term.write_line(&format!("{} Dry Run Complete", style("✓").green().bold())).ok();
        term.write_line(&format!(
            "  {} entries would be extracted ({})",
            style(report.analysis.to_extract).green(),
            format_bytes(report.analysis.bytes_to_extract)
        ))
        .ok();
        print_errors(term, &report.errors, verbose);
        return;
    }

    if report.cancelled {
        term.write_line(&format!("{} Extraction Cancelled", style("!").yellow().bold())).ok();
    } else {
        term.write_line(&format!("{} Extraction Complete", style("✓").green().bold())).ok();
    }
    term.write_line("").ok();
    term.write_line(&format!(
        "  {} extracted ({}) in {:.1}s",
        style(summary.extracted).green(),
        format_bytes(summary.bytes_written),
        summary.duration_ms as f64 / 1000.0
    ))
    .ok();
    term.write_line(&format!("  {} already in the destination", style(summary.skipped_existing).cyan())).ok();
    term.write_line(&format!("  {} duplicates skipped", style(summary.skipped_duplicate).cyan())).ok();
    if summary.failed > 0 {
        term.write_line(&format!("  {} failed", style(summary.failed).red())).ok();
    }
    term.write_line(&format!("  manifest: {}", style(report.manifest_path.display()).dim())).ok();

    print_errors(term, &report.errors, verbose);
}

fn print_reconcile(term: &Term, report: &ReconcileReport, verbose: bool) {
    term.write_line("").ok();
    let heading = if report.is_complete() {
        format!("{} Destination is complete", style("✓").green().bold())
    } else {
        format!("{} Destination is incomplete", style("!").yellow().bold())
    };
    term.write_line(&heading).ok();
    term.write_line("").ok();
    term.write_line(&format!("  {} confirmed", style(report.confirmed.len()).green())).ok();
    term.write_line(&format!("  {} found away from their planned path", style(report.moved().count()).cyan())).ok();
    term.write_line(&format!("  {} pending", style(report.pending.len()).yellow())).ok();

    for bucket in report.pending_by_bucket() {
        term.write_line(&format!(
            "    {} {} entries ({})",
            style(&bucket.bucket).bold(),
            bucket.count,
            format_bytes(bucket.size_bytes)
        ))
        .ok();
    }

    if verbose {
        for pending in &report.pending {
            term.write_line(&format!(
                "    {} {} ({:?})",
                style("○").dim(),
                pending.record.entry_path,
                pending.reason
            ))
            .ok();
        }
    }
}

fn print_compare(term: &Term, report: &CompareReport, verbose: bool) {
    term.write_line("").ok();
    term.write_line(&format!(
        "{} {}",
        style("Compared").bold(),
        display_name(&report.archive)
    ))
    .ok();
    term.write_line(&format!("  {} already present", style(report.already_present.len()).cyan())).ok();
    term.write_line(&format!(
        "  {} only in the archive ({})",
        style(report.unique_in_archive.len()).green(),
        format_bytes(report.unique_bytes)
    ))
    .ok();
    term.write_line(&format!("  {} only in the destination", style(report.unique_in_destination.len()).cyan())).ok();

    if verbose {
        for entry in &report.unique_in_archive {
            term.write_line(&format!("    {} {}", style("+").green(), entry)).ok();
        }
    }
}

fn print_errors(term: &Term, errors: &[String], verbose: bool) {
    if errors.is_empty() {
        return;
    }
    term.write_line("").ok();
    term.write_line(&format!("  {} errors", style(errors.len()).red())).ok();
    let shown = if verbose { errors.len() } else { errors.len().min(5) };
    for error in &errors[..shown] {
        term.write_line(&format!("    {} {}", style("✗").red(), error)).ok();
    }
    if shown < errors.len() {
        term.write_line(&format!("    {}", style("(use --verbose to see all)").dim())).ok();
    }
}

/// Delete fully extracted archives one at a time
///
/// `prompt` asks per archive; `auto` asks once for the whole batch.
fn cleanup_archives(term: &Term, report: &RunReport, mode: CleanupMode) {
    if mode == CleanupMode::Keep {
        return;
    }

    let mut to_delete: Vec<&Path> = Vec::new();
    let mut batch: Vec<&Path> = Vec::new();
    for archive in report.archives.iter().filter(|a| !a.cancelled) {
        let name = display_name(&archive.archive);
        match decide_cleanup(&archive.status, mode) {
            CleanupAction::Keep { reason } => {
                term.write_line(&format!("  {} keeping {}: {}", style("○").dim(), name, reason)).ok();
            }
            CleanupAction::AskToDelete => {
                if confirm(term, &format!("Delete {}?", name)) {
                    to_delete.push(&archive.archive);
                }
            }
            CleanupAction::Delete => batch.push(&archive.archive),
        }
    }

    if !batch.is_empty()
        && confirm(term, &format!("Delete {} fully extracted archives?", batch.len()))
    {
        to_delete.extend(batch);
    }

    for path in to_delete {
        let name = display_name(path);
        match fs::remove_file(path) {
            Ok(()) => {
                term.write_line(&format!("  {} deleted {}", style("✓").green(), name)).ok();
            }
            Err(e) => {
                warn!(archive = %path.display(), error = %e, "archive not deleted");
                term.write_line(&format!("  {} could not delete {}: {}", style("✗").red(), name, e)).ok();
            }
        }
    }
}

fn confirm(term: &Term, question: &str) -> bool {
    term.write_str(&format!("  {} [y/N] ", question)).ok();
    match term.read_line() {
        Ok(answer) => matches!(answer.trim(), "y" | "Y" | "yes"),
        Err(_) => false,
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
