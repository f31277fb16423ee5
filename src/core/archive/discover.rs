//! Archive discovery under an input directory.

use super::ArchiveId;
use crate::error::ScanError;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

fn is_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
}

/// Find every `*.zip` under `root`, sorted by path
///
/// The sort order is the archive-list order used for canonical selection,
/// so it is assigned here once as each archive's ordinal. A single archive
/// path is accepted as well.
pub fn discover_archives(root: &Path) -> Result<Vec<ArchiveId>, ScanError> {
    if root.is_file() && is_archive(root) {
        return Ok(vec![ArchiveId::new(0, root)]);
    }
    if !root.is_dir() {
        return Err(ScanError::DirectoryNotFound {
            path: root.to_path_buf(),
        });
    }

    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        match entry {
            Ok(entry) => {
                if entry.file_type().is_file() && is_archive(entry.path()) {
                    paths.push(entry.into_path());
                }
            }
            Err(e) => {
                warn!(error = %e, "skipping unreadable path during archive discovery");
            }
        }
    }

    paths.sort();
    debug!(root = %root.display(), count = paths.len(), "discovered archives");

    Ok(paths
        .into_iter()
        .enumerate()
        .map(|(ordinal, path)| ArchiveId::new(ordinal, path))
        .collect())
}
