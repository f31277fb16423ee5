//! # Cache Module
//!
//! Persists fingerprints and resolved dates to avoid recomputation.
//!
//! ## Validity
//! Every stored value carries the [`FileIdentity`] it was computed for.
//! A lookup with a different identity (size changed, modification time
//! changed) misses, and the caller recomputes and overwrites the entry.
//! Archive entries are keyed by archive path + entry path and identified
//! by their stored CRC32, which cannot change without the archive changing.
//!
//! ## Backends
//! - `SqliteCache` - Persistent storage using SQLite
//! - `InMemoryCache` - For testing and dry runs

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryCache;
pub use sqlite::SqliteCache;
pub use traits::CacheBackend;

use crate::core::archive::ArchiveEntry;
use crate::core::date::ResolvedDate;
use crate::core::fingerprint::Fingerprint;
use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Change-detection half of a [`FileIdentity`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signature {
    /// Checksum stored in an archive entry table
    Crc32(u32),
    /// Filesystem modification time, nanoseconds since the Unix epoch
    Modified(i64),
}

/// Cheap signature deciding whether a cached value is still valid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileIdentity {
    pub size: u64,
    pub signature: Signature,
}

impl FileIdentity {
    pub fn of_entry(entry: &ArchiveEntry) -> Self {
        Self {
            size: entry.size,
            signature: Signature::Crc32(entry.crc32),
        }
    }

    pub fn of_metadata(metadata: &Metadata) -> Self {
        let modified = metadata
            .modified()
            .unwrap_or(UNIX_EPOCH)
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);
        Self {
            size: metadata.len(),
            signature: Signature::Modified(modified),
        }
    }

    pub(crate) fn signature_text(&self) -> String {
        match self.signature {
            Signature::Crc32(c) => format!("crc:{:08x}", c),
            Signature::Modified(n) => format!("mtime:{}", n),
        }
    }
}

/// Cache key for a file on disk
pub fn file_key(path: &Path) -> String {
    let absolute = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    format!("file:{}", absolute.display())
}

/// Cache writes are committed in batches of this size
pub(crate) const CACHE_BATCH: usize = 256;

/// Write and clear a batch; a failed write only costs recomputation later
pub(crate) fn flush_records(cache: &dyn CacheBackend, pending: &mut Vec<CacheRecord>) {
    if pending.is_empty() {
        return;
    }
    if let Err(e) = cache.put_batch(pending) {
        warn!(error = %e, records = pending.len(), "failed to write cache batch");
    }
    pending.clear();
}

/// One write for [`CacheBackend::put_batch`]
#[derive(Debug, Clone)]
pub struct CacheRecord {
    pub key: String,
    pub identity: FileIdentity,
    pub fingerprint: Option<Fingerprint>,
    pub date: Option<ResolvedDate>,
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Rows in the fingerprint table
    pub fingerprints: usize,
    /// Rows in the date table
    pub dates: usize,
    /// Directories with a recorded scan
    pub scanned_roots: usize,
}

/// Represents the state of a previous scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanState {
    /// Directory that was scanned
    pub directory: PathBuf,
    /// When the scan was performed
    pub last_scan_time: SystemTime,
    /// Number of files found
    pub file_count: usize,
}
