//! # Scanner Module
//!
//! Walks the destination tree and fingerprints every file in parallel.
//!
//! ## Concurrency
//! A bounded rayon pool fingerprints files (reading the cache concurrently)
//! and sends results over one crossbeam channel. The calling thread drains
//! the channel and is the only writer to the cache.
//!
//! ## Example
//! ```rust,ignore
//! let scanner = DestinationScanner::new(ScanConfig::default());
//! let result = scanner.scan(&dest, Strategy::SizeCrc, &cache, &cancel, &events)?;
//! ```

mod filter;
mod parallel;
mod walker;

pub use filter::{FileFilter, OWN_FILE_PREFIX};
pub use parallel::{worker_pool, DestinationScanner};
pub use walker::{list_files, ListedFile, ScanConfig};

use crate::core::cache::FileIdentity;
use crate::core::fingerprint::{Fingerprint, Strategy};
use crate::error::ScanError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// A fingerprinted file in the destination tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannedFile {
    /// Absolute path
    pub path: PathBuf,
    /// Path relative to the scanned root
    pub relative: PathBuf,
    pub identity: FileIdentity,
    pub fingerprint: Fingerprint,
}

/// Result of a destination scan
#[derive(Debug)]
pub struct ScanResult {
    pub root: PathBuf,
    pub strategy: Strategy,
    /// Fingerprinted files, sorted by relative path
    pub files: Vec<ScannedFile>,
    /// Errors that occurred during scanning (non-fatal)
    pub errors: Vec<ScanError>,
    /// Files whose fingerprint came from the cache
    pub cache_hits: usize,
    /// Whether the scan stopped early
    pub cancelled: bool,
}

impl ScanResult {
    /// An empty result for a destination that does not exist yet
    pub fn empty(root: impl Into<PathBuf>, strategy: Strategy) -> Self {
        Self {
            root: root.into(),
            strategy,
            files: Vec::new(),
            errors: Vec::new(),
            cache_hits: 0,
            cancelled: false,
        }
    }

    /// Files indexed by relative path
    pub fn by_relative_path(&self) -> HashMap<PathBuf, &ScannedFile> {
        self.files
            .iter()
            .map(|f| (f.relative.clone(), f))
            .collect()
    }

    /// Files grouped by fingerprint
    pub fn by_fingerprint(&self) -> HashMap<&Fingerprint, Vec<&ScannedFile>> {
        let mut map: HashMap<&Fingerprint, Vec<&ScannedFile>> = HashMap::new();
        for file in &self.files {
            map.entry(&file.fingerprint).or_default().push(file);
        }
        map
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.identity.size).sum()
    }
}
