//! SQLite cache backend for persistent storage.

use super::{CacheBackend, CacheRecord, CacheStats, FileIdentity, ScanState};
use crate::core::date::ResolvedDate;
use crate::core::fingerprint::{Fingerprint, Strategy};
use crate::error::CacheError;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// SQLite-backed persistent cache
///
/// Uses WAL (Write-Ahead Logging) mode for better concurrent access.
/// The connection sits behind a mutex, so every get/put is atomic.
pub struct SqliteCache {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl SqliteCache {
    /// Open or create a cache database at the given path
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CacheError::OpenFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        }

        let conn = Connection::open(path).map_err(|e| CacheError::OpenFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| CacheError::OpenFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS fingerprints (
                key TEXT NOT NULL,
                strategy TEXT NOT NULL,
                size INTEGER NOT NULL,
                signature TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                cached_at INTEGER NOT NULL,
                PRIMARY KEY (key, strategy)
            );
            CREATE TABLE IF NOT EXISTS dates (
                key TEXT PRIMARY KEY,
                size INTEGER NOT NULL,
                signature TEXT NOT NULL,
                date TEXT NOT NULL,
                cached_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS scan_state (
                directory TEXT PRIMARY KEY,
                last_scan_time INTEGER NOT NULL,
                file_count INTEGER NOT NULL
            );",
        )
        .map_err(|e| CacheError::OpenFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        })
    }

    /// Open the cache, discarding and recreating it if it is unreadable
    ///
    /// A corrupt cache only costs recomputation, so it is never fatal.
    pub fn open_or_rebuild(path: &Path) -> Result<Self, CacheError> {
        let attempt = Self::open(path).and_then(|cache| {
            cache.verify()?;
            Ok(cache)
        });

        match attempt {
            Ok(cache) => Ok(cache),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "discarding unreadable cache");
                Self::discard(path);
                Self::open(path)
            }
        }
    }

    fn discard(path: &Path) {
        for suffix in ["", "-wal", "-shm"] {
            let mut target = path.as_os_str().to_owned();
            target.push(suffix);
            let target = PathBuf::from(target);
            if target.exists() {
                if let Err(e) = std::fs::remove_file(&target) {
                    warn!(path = %target.display(), error = %e, "failed to remove cache file");
                }
            }
        }
    }

    /// Run SQLite's integrity quick check
    pub fn verify(&self) -> Result<(), CacheError> {
        let conn = self.lock()?;
        let result: String = conn
            .query_row("PRAGMA quick_check", [], |row| row.get(0))
            .map_err(|_| CacheError::Corrupted {
                path: self.db_path.clone(),
            })?;
        if result != "ok" {
            return Err(CacheError::Corrupted {
                path: self.db_path.clone(),
            });
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
        self.conn.lock().map_err(|_| CacheError::Corrupted {
            path: self.db_path.clone(),
        })
    }

    /// Convert SystemTime to Unix timestamp
    fn to_timestamp(time: SystemTime) -> i64 {
        time.duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs() as i64
    }

    /// Convert Unix timestamp to SystemTime
    fn from_timestamp(timestamp: i64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(timestamp.max(0) as u64)
    }

    fn now() -> i64 {
        Self::to_timestamp(SystemTime::now())
    }

    fn write_fingerprint(
        conn: &Connection,
        key: &str,
        identity: &FileIdentity,
        fingerprint: &Fingerprint,
    ) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT OR REPLACE INTO fingerprints
             (key, strategy, size, signature, fingerprint, cached_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                key,
                fingerprint.strategy.as_str(),
                identity.size as i64,
                identity.signature_text(),
                fingerprint.to_text(),
                Self::now(),
            ],
        )
    }

    fn write_date(
        conn: &Connection,
        key: &str,
        identity: &FileIdentity,
        date: ResolvedDate,
    ) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT OR REPLACE INTO dates (key, size, signature, date, cached_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                key,
                identity.size as i64,
                identity.signature_text(),
                date.to_text(),
                Self::now(),
            ],
        )
    }
}

impl CacheBackend for SqliteCache {
    fn get_fingerprint(
        &self,
        key: &str,
        identity: &FileIdentity,
        strategy: Strategy,
    ) -> Result<Option<Fingerprint>, CacheError> {
        let conn = self.lock()?;

        let row: Option<(i64, String, String)> = conn
            .query_row(
                "SELECT size, signature, fingerprint FROM fingerprints
                 WHERE key = ? AND strategy = ?",
                params![key, strategy.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(|e| CacheError::QueryFailed(e.to_string()))?;

        let Some((size, signature, text)) = row else {
            return Ok(None);
        };
        if size as u64 != identity.size || signature != identity.signature_text() {
            return Ok(None);
        }

        match Fingerprint::parse(&text) {
            Some(fp) if fp.strategy == strategy => Ok(Some(fp)),
            _ => {
                debug!(key, "ignoring malformed cached fingerprint");
                Ok(None)
            }
        }
    }

    fn put_fingerprint(
        &self,
        key: &str,
        identity: &FileIdentity,
        fingerprint: &Fingerprint,
    ) -> Result<(), CacheError> {
        let conn = self.lock()?;
        Self::write_fingerprint(&conn, key, identity, fingerprint)
            .map_err(|e| CacheError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    fn get_date(
        &self,
        key: &str,
        identity: &FileIdentity,
    ) -> Result<Option<ResolvedDate>, CacheError> {
        let conn = self.lock()?;

        let row: Option<(i64, String, String)> = conn
            .query_row(
                "SELECT size, signature, date FROM dates WHERE key = ?",
                [key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(|e| CacheError::QueryFailed(e.to_string()))?;

        Ok(row.and_then(|(size, signature, text)| {
            if size as u64 == identity.size && signature == identity.signature_text() {
                ResolvedDate::parse(&text)
            } else {
                None
            }
        }))
    }

    fn put_date(
        &self,
        key: &str,
        identity: &FileIdentity,
        date: ResolvedDate,
    ) -> Result<(), CacheError> {
        let conn = self.lock()?;
        Self::write_date(&conn, key, identity, date)
            .map_err(|e| CacheError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    fn put_batch(&self, records: &[CacheRecord]) -> Result<(), CacheError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| CacheError::QueryFailed(e.to_string()))?;

        for record in records {
            if let Some(ref fp) = record.fingerprint {
                Self::write_fingerprint(&tx, &record.key, &record.identity, fp)
                    .map_err(|e| CacheError::QueryFailed(e.to_string()))?;
            }
            if let Some(date) = record.date {
                Self::write_date(&tx, &record.key, &record.identity, date)
                    .map_err(|e| CacheError::QueryFailed(e.to_string()))?;
            }
        }

        tx.commit()
            .map_err(|e| CacheError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    fn invalidate(&self, key: &str) -> Result<(), CacheError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM fingerprints WHERE key = ?", [key])
            .map_err(|e| CacheError::QueryFailed(e.to_string()))?;
        conn.execute("DELETE FROM dates WHERE key = ?", [key])
            .map_err(|e| CacheError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        let conn = self.lock()?;
        conn.execute_batch(
            "DELETE FROM fingerprints;
             DELETE FROM dates;
             DELETE FROM scan_state;",
        )
        .map_err(|e| CacheError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    fn stats(&self) -> Result<CacheStats, CacheError> {
        let conn = self.lock()?;

        let count = |table: &str| -> Result<usize, CacheError> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get::<_, i64>(0).map(|v| v as usize)
            })
            .map_err(|e| CacheError::QueryFailed(e.to_string()))
        };

        Ok(CacheStats {
            fingerprints: count("fingerprints")?,
            dates: count("dates")?,
            scanned_roots: count("scan_state")?,
        })
    }

    fn scan_state(&self, directory: &Path) -> Result<Option<ScanState>, CacheError> {
        let conn = self.lock()?;
        let dir_str = directory.to_string_lossy();

        conn.query_row(
            "SELECT last_scan_time, file_count FROM scan_state WHERE directory = ?",
            [&dir_str],
            |row| {
                Ok(ScanState {
                    directory: directory.to_path_buf(),
                    last_scan_time: Self::from_timestamp(row.get(0)?),
                    file_count: row.get::<_, i64>(1)? as usize,
                })
            },
        )
        .optional()
        .map_err(|e| CacheError::QueryFailed(e.to_string()))
    }

    fn set_scan_state(&self, state: &ScanState) -> Result<(), CacheError> {
        let conn = self.lock()?;
        let dir_str = state.directory.to_string_lossy();

        conn.execute(
            "INSERT OR REPLACE INTO scan_state (directory, last_scan_time, file_count) VALUES (?, ?, ?)",
            params![
                dir_str,
                Self::to_timestamp(state.last_scan_time),
                state.file_count as i64,
            ],
        )
        .map_err(|e| CacheError::QueryFailed(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::Signature;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn identity(size: u64) -> FileIdentity {
        FileIdentity {
            size,
            signature: Signature::Modified(1_700_000_000_000_000_000),
        }
    }

    #[test]
    fn sqlite_cache_creates_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested/cache.db");

        let cache = SqliteCache::open(&db_path).unwrap();

        assert!(db_path.exists());
        assert_eq!(cache.stats().unwrap(), CacheStats::default());
    }

    #[test]
    fn fingerprint_round_trips_until_size_changes() {
        let temp_dir = TempDir::new().unwrap();
        let cache = SqliteCache::open(&temp_dir.path().join("cache.db")).unwrap();
        let fp = Fingerprint::crc(1000, 0xDEAD_BEEF);

        cache.put_fingerprint("file:/a.jpg", &identity(1000), &fp).unwrap();

        let hit = cache
            .get_fingerprint("file:/a.jpg", &identity(1000), Strategy::SizeCrc)
            .unwrap();
        assert_eq!(hit, Some(fp));

        let miss = cache
            .get_fingerprint("file:/a.jpg", &identity(1001), Strategy::SizeCrc)
            .unwrap();
        assert_eq!(miss, None);
    }

    #[test]
    fn fingerprints_are_stored_per_strategy() {
        let temp_dir = TempDir::new().unwrap();
        let cache = SqliteCache::open(&temp_dir.path().join("cache.db")).unwrap();

        cache
            .put_fingerprint("k", &identity(5), &Fingerprint::crc(5, 1))
            .unwrap();

        let other = cache
            .get_fingerprint("k", &identity(5), Strategy::Full)
            .unwrap();
        assert_eq!(other, None);
    }

    #[test]
    fn batch_writes_both_tables_and_clear_truncates() {
        let temp_dir = TempDir::new().unwrap();
        let cache = SqliteCache::open(&temp_dir.path().join("cache.db")).unwrap();

        let records: Vec<_> = (0..3)
            .map(|i| CacheRecord {
                key: format!("zip:/t.zip!img{}.jpg", i),
                identity: identity(10),
                fingerprint: Some(Fingerprint::crc(10, i)),
                date: Some(ResolvedDate::Unknown),
            })
            .collect();
        cache.put_batch(&records).unwrap();

        let stats = cache.stats().unwrap();
        assert_eq!(stats.fingerprints, 3);
        assert_eq!(stats.dates, 3);
        assert_eq!(
            cache.get_date("zip:/t.zip!img1.jpg", &identity(10)).unwrap(),
            Some(ResolvedDate::Unknown)
        );

        cache.clear().unwrap();
        assert_eq!(cache.stats().unwrap(), CacheStats::default());
    }

    #[test]
    fn invalidate_removes_key() {
        let temp_dir = TempDir::new().unwrap();
        let cache = SqliteCache::open(&temp_dir.path().join("cache.db")).unwrap();
        cache
            .put_fingerprint("k", &identity(5), &Fingerprint::crc(5, 1))
            .unwrap();
        cache.put_date("k", &identity(5), ResolvedDate::Unknown).unwrap();

        cache.invalidate("k").unwrap();

        assert_eq!(
            cache.get_fingerprint("k", &identity(5), Strategy::SizeCrc).unwrap(),
            None
        );
        assert_eq!(cache.get_date("k", &identity(5)).unwrap(), None);
    }

    #[test]
    fn values_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("cache.db");
        {
            let cache = SqliteCache::open(&db_path).unwrap();
            cache
                .put_fingerprint("k", &identity(5), &Fingerprint::crc(5, 9))
                .unwrap();
        }

        let cache = SqliteCache::open(&db_path).unwrap();
        assert_eq!(
            cache.get_fingerprint("k", &identity(5), Strategy::SizeCrc).unwrap(),
            Some(Fingerprint::crc(5, 9))
        );
    }

    #[test]
    fn garbage_file_is_rebuilt() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("cache.db");
        fs::write(&db_path, vec![0xAB; 4096]).unwrap();

        let cache = SqliteCache::open_or_rebuild(&db_path).unwrap();

        assert_eq!(cache.stats().unwrap(), CacheStats::default());
        cache
            .put_fingerprint("k", &identity(5), &Fingerprint::crc(5, 9))
            .unwrap();
    }

    #[test]
    fn scan_state_round_trips() {
        let temp_dir = TempDir::new().unwrap();
        let cache = SqliteCache::open(&temp_dir.path().join("cache.db")).unwrap();
        let state = ScanState {
            directory: PathBuf::from("/photos"),
            last_scan_time: UNIX_EPOCH + Duration::from_secs(1_700_000_000),
            file_count: 42,
        };

        cache.set_scan_state(&state).unwrap();

        assert_eq!(cache.scan_state(Path::new("/photos")).unwrap(), Some(state));
        assert_eq!(cache.stats().unwrap().scanned_roots, 1);
    }

    #[test]
    fn concurrent_reads_see_whole_values() {
        let temp_dir = TempDir::new().unwrap();
        let cache = Arc::new(SqliteCache::open(&temp_dir.path().join("cache.db")).unwrap());
        let fp = Fingerprint::full(5, "b".repeat(64));
        cache.put_fingerprint("k", &identity(5), &fp).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let expected = fp.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let got = cache.get_fingerprint("k", &identity(5), Strategy::Full).unwrap();
                        assert_eq!(got, Some(expected.clone()));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
