//! # Pipeline Module
//!
//! Orchestrates a full takeout run.
//!
//! ## Pipeline Stages
//! 1. **Index** - Discover archives and read their entry tables
//! 2. **Fingerprint** - Fingerprint and date every entry (with caching)
//! 3. **Scan** - Fingerprint the files already at the destination
//! 4. **Deduplicate** - Group identical content and pick canonical members
//! 5. **Plan** - Propose a `year/month/name` path for each unique entry
//! 6. **Extract** - Drive each entry through the manifest state machine
//!
//! ## Parallelism
//! Fingerprinting runs on a bounded rayon pool. Everything else, including
//! every cache and manifest write, happens on the calling thread.

mod analysis;
mod cancel;
mod executor;

pub use analysis::{Analysis, AnalysisSummary, ArchivePlan};
pub use cancel::CancellationToken;
pub use executor::{Pipeline, PipelineBuilder, PipelineConfig, RunReport};
