//! Staged, verified write of one entry.

use crate::core::archive::{ArchiveEntry, ArchiveReader};
use crate::core::fingerprint::{fingerprint_file, Fingerprint};
use crate::core::scanner::OWN_FILE_PREFIX;
use crate::error::{ArchiveError, ExtractError};
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use tempfile::Builder;
use tracing::debug;

const CHUNK: usize = 64 * 1024;

/// Write an entry to `root/relative`, returning the bytes written
///
/// The payload lands in a hidden temporary in the target directory and is
/// moved into place only after:
/// - its length and CRC32 match the entry table
/// - a read-back fingerprint matches `expected`
///
/// An existing file at the target is never replaced. On any failure the
/// temporary is removed.
pub fn write_entry(
    reader: &mut ArchiveReader,
    entry: &ArchiveEntry,
    root: &Path,
    relative: &Path,
    expected: Option<&Fingerprint>,
) -> Result<u64, ExtractError> {
    let target = root.join(relative);
    let write_err = |e: io::Error| ExtractError::WriteFailure {
        path: target.clone(),
        source: e,
    };

    let parent = target.parent().unwrap_or(root);
    fs::create_dir_all(parent).map_err(write_err)?;

    let mut temp = Builder::new()
        .prefix(OWN_FILE_PREFIX)
        .tempfile_in(parent)
        .map_err(write_err)?;

    let archive_path = reader.id().path.clone();
    let mut source = reader.open_entry(entry)?;
    let mut hasher = crc32fast::Hasher::new();
    let mut written = 0u64;
    let mut buffer = vec![0u8; CHUNK];

    loop {
        let n = match source.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(ExtractError::Unreadable(ArchiveError::UnreadableEntry {
                    archive: archive_path,
                    entry: entry.path.clone(),
                    reason: e.to_string(),
                }))
            }
        };
        hasher.update(&buffer[..n]);
        temp.write_all(&buffer[..n]).map_err(write_err)?;
        written += n as u64;
    }
    drop(source);

    temp.flush().map_err(write_err)?;
    temp.as_file().sync_data().map_err(write_err)?;

    if written != entry.size {
        return Err(ExtractError::VerificationMismatch {
            path: target.clone(),
            expected: format!("{} bytes", entry.size),
            actual: format!("{} bytes", written),
        });
    }

    let crc = hasher.finalize();
    if crc != entry.crc32 {
        return Err(ExtractError::VerificationMismatch {
            path: target.clone(),
            expected: format!("crc32 {:08x}", entry.crc32),
            actual: format!("crc32 {:08x}", crc),
        });
    }

    if let Some(expected) = expected {
        let actual = fingerprint_file(temp.path(), expected.strategy)
            .map_err(|e| write_err(io::Error::other(e.to_string())))?;
        if actual != *expected {
            return Err(ExtractError::VerificationMismatch {
                path: target.clone(),
                expected: expected.to_text(),
                actual: actual.to_text(),
            });
        }
    }

    temp.persist_noclobber(&target)
        .map_err(|e| write_err(e.error))?;

    debug!(target = %target.display(), bytes = written, "entry written");
    Ok(written)
}
