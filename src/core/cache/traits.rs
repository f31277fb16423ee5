//! Cache backend trait definition.

use super::{CacheRecord, CacheStats, FileIdentity, ScanState};
use crate::core::date::ResolvedDate;
use crate::core::fingerprint::{Fingerprint, Strategy};
use crate::error::CacheError;
use std::path::Path;

/// Trait for cache backends
///
/// Reads may come from any thread; a read racing a write for the same key
/// observes either the old or the new row, never a mix.
pub trait CacheBackend: Send + Sync {
    /// Get a cached fingerprint if it exists and `identity` still matches
    fn get_fingerprint(
        &self,
        key: &str,
        identity: &FileIdentity,
        strategy: Strategy,
    ) -> Result<Option<Fingerprint>, CacheError>;

    /// Store a fingerprint, replacing any previous value for this key and strategy
    fn put_fingerprint(
        &self,
        key: &str,
        identity: &FileIdentity,
        fingerprint: &Fingerprint,
    ) -> Result<(), CacheError>;

    /// Get a cached date if it exists and `identity` still matches
    fn get_date(&self, key: &str, identity: &FileIdentity)
        -> Result<Option<ResolvedDate>, CacheError>;

    /// Store a resolved date
    fn put_date(
        &self,
        key: &str,
        identity: &FileIdentity,
        date: ResolvedDate,
    ) -> Result<(), CacheError>;

    /// Store many values in a single transaction
    fn put_batch(&self, records: &[CacheRecord]) -> Result<(), CacheError> {
        for record in records {
            if let Some(ref fp) = record.fingerprint {
                self.put_fingerprint(&record.key, &record.identity, fp)?;
            }
            if let Some(date) = record.date {
                self.put_date(&record.key, &record.identity, date)?;
            }
        }
        Ok(())
    }

    /// Drop every value stored for a key
    fn invalidate(&self, key: &str) -> Result<(), CacheError>;

    /// Truncate both tables
    fn clear(&self) -> Result<(), CacheError>;

    /// Get cache statistics
    fn stats(&self) -> Result<CacheStats, CacheError>;

    /// Last recorded scan of a directory
    fn scan_state(&self, directory: &Path) -> Result<Option<ScanState>, CacheError>;

    /// Record a completed scan of a directory
    fn set_scan_state(&self, state: &ScanState) -> Result<(), CacheError>;
}
