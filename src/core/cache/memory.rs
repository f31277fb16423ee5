//! In-memory cache backend for testing.

use super::{CacheBackend, CacheStats, FileIdentity, ScanState};
use crate::core::date::ResolvedDate;
use crate::core::fingerprint::{Fingerprint, Strategy};
use crate::error::CacheError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

#[derive(Default)]
struct Tables {
    fingerprints: HashMap<(String, Strategy), (FileIdentity, Fingerprint)>,
    dates: HashMap<String, (FileIdentity, ResolvedDate)>,
    scans: HashMap<PathBuf, ScanState>,
}

/// In-memory cache backend
///
/// Useful for testing and scenarios where persistence isn't needed.
#[derive(Default)]
pub struct InMemoryCache {
    tables: RwLock<Tables>,
}

impl InMemoryCache {
    /// Create a new in-memory cache
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> CacheError {
        CacheError::Corrupted {
            path: PathBuf::from("memory"),
        }
    }
}

impl CacheBackend for InMemoryCache {
    fn get_fingerprint(
        &self,
        key: &str,
        identity: &FileIdentity,
        strategy: Strategy,
    ) -> Result<Option<Fingerprint>, CacheError> {
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        Ok(tables
            .fingerprints
            .get(&(key.to_string(), strategy))
            .filter(|(stored, _)| stored == identity)
            .map(|(_, fp)| fp.clone()))
    }

    fn put_fingerprint(
        &self,
        key: &str,
        identity: &FileIdentity,
        fingerprint: &Fingerprint,
    ) -> Result<(), CacheError> {
        let mut tables = self.tables.write().map_err(|_| Self::poisoned())?;
        tables.fingerprints.insert(
            (key.to_string(), fingerprint.strategy),
            (*identity, fingerprint.clone()),
        );
        Ok(())
    }

    fn get_date(
        &self,
        key: &str,
        identity: &FileIdentity,
    ) -> Result<Option<ResolvedDate>, CacheError> {
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        Ok(tables
            .dates
            .get(key)
            .filter(|(stored, _)| stored == identity)
            .map(|(_, date)| *date))
    }

    fn put_date(
        &self,
        key: &str,
        identity: &FileIdentity,
        date: ResolvedDate,
    ) -> Result<(), CacheError> {
        let mut tables = self.tables.write().map_err(|_| Self::poisoned())?;
        tables.dates.insert(key.to_string(), (*identity, date));
        Ok(())
    }

    fn invalidate(&self, key: &str) -> Result<(), CacheError> {
        let mut tables = self.tables.write().map_err(|_| Self::poisoned())?;
        tables.fingerprints.retain(|(k, _), _| k != key);
        tables.dates.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        let mut tables = self.tables.write().map_err(|_| Self::poisoned())?;
        *tables = Tables::default();
        Ok(())
    }

    fn stats(&self) -> Result<CacheStats, CacheError> {
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        Ok(CacheStats {
            fingerprints: tables.fingerprints.len(),
            dates: tables.dates.len(),
            scanned_roots: tables.scans.len(),
        })
    }

    fn scan_state(&self, directory: &Path) -> Result<Option<ScanState>, CacheError> {
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        Ok(tables.scans.get(directory).cloned())
    }

    fn set_scan_state(&self, state: &ScanState) -> Result<(), CacheError> {
        let mut tables = self.tables.write().map_err(|_| Self::poisoned())?;
        tables
            .scans
            .insert(state.directory.clone(), state.clone());
        Ok(())
    }
}
