//! # Error Module
//!
//! Error taxonomy for the takeout extractor.
//!
//! ## Design Principles
//! - **Never panic** on user data - return errors instead
//! - **Include context** - archive names, entry paths, destination paths
//! - **Isolate failures** - per-entry and per-archive errors are reported
//!   and the run continues; only an unwritable destination root or manifest
//!   store aborts a run

use std::path::PathBuf;
use thiserror::Error;

use crate::core::fingerprint::Strategy;
use crate::core::manifest::RecordState;

/// Top-level application error
#[derive(Error, Debug)]
pub enum TakeoutError {
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Fingerprint error: {0}")]
    Fingerprint(#[from] FingerprintError),

    #[error("Scanning error: {0}")]
    Scan(#[from] ScanError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Destination {path} is not writable: {source}")]
    DestinationUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TakeoutError {
    /// Whether this error must abort the whole run
    ///
    /// Nothing can be safely recorded once the destination root or the
    /// manifest store refuses writes.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TakeoutError::DestinationUnwritable { .. }
                | TakeoutError::Manifest(ManifestError::Unwritable { .. })
        )
    }
}

/// Errors reading an archive container
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Archive not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Corrupt archive {path}: {reason}")]
    CorruptArchive { path: PathBuf, reason: String },

    #[error("Unreadable entry {entry} in {archive}: {reason}")]
    UnreadableEntry {
        archive: PathBuf,
        entry: String,
        reason: String,
    },

    #[error("Duplicate entry {entry} at slot {index} in {archive}; only the first is used")]
    DuplicateEntry {
        archive: PathBuf,
        entry: String,
        index: usize,
    },
}

/// Errors computing or comparing fingerprints
#[derive(Error, Debug)]
pub enum FingerprintError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("Cannot compare a {left} fingerprint with a {right} fingerprint")]
    StrategyMismatch { left: Strategy, right: Strategy },
}

/// Errors that occur while walking a directory tree
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    #[error("Permission denied accessing: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("Failed to read {path}: {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to fingerprint {path}: {reason}")]
    Fingerprint { path: PathBuf, reason: String },

    #[error("Failed to start worker pool: {0}")]
    WorkerPool(String),

    #[error("Scan was cancelled")]
    Cancelled,
}

/// Errors that occur with the persistent cache
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Failed to open cache database at {path}: {reason}")]
    OpenFailed { path: PathBuf, reason: String },

    #[error("Database query failed: {0}")]
    QueryFailed(String),

    #[error("Cache corruption detected at {path}")]
    Corrupted { path: PathBuf },
}

/// Errors extracting a single entry
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Failed to write {path}: {source}")]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Verification failed for {path}: expected {expected}, found {actual}")]
    VerificationMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error(transparent)]
    Unreadable(#[from] ArchiveError),

    #[error("Invalid manifest transition {from:?} -> {to:?}")]
    InvalidTransition { from: RecordState, to: RecordState },
}

impl ExtractError {
    /// Whether another attempt may succeed
    ///
    /// Verification mismatches count as write failures. Decompression
    /// failures, clobber refusals and permission errors are deterministic
    /// and never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExtractError::WriteFailure { source, .. } => !matches!(
                source.kind(),
                std::io::ErrorKind::AlreadyExists | std::io::ErrorKind::PermissionDenied
            ),
            ExtractError::VerificationMismatch { .. } => true,
            ExtractError::Unreadable(_) | ExtractError::InvalidTransition { .. } => false,
        }
    }
}

/// Errors with the manifest store
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Manifest {path} is not writable: {source}")]
    Unwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize manifest record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, TakeoutError>;
