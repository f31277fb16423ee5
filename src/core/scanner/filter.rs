//! File filtering logic for the scanner.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Prefix shared by the manifest, staging files and the writability check
pub const OWN_FILE_PREFIX: &str = ".takeout-";

/// Decides which destination files take part in a scan
///
/// Hidden files are always considered: an archive entry named `.x.jpg` is
/// written under that name and must be seen by the next run. Only this
/// tool's own `.takeout-*` files and explicitly excluded paths are skipped.
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    /// Lowercase extensions to include; `None` accepts every file
    extensions: Option<HashSet<String>>,
    /// Paths never included, such as a manifest kept under another name
    excluded: HashSet<PathBuf>,
}

impl FileFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never include these exact paths
    pub fn with_excluded(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.excluded.extend(paths);
        self
    }

    /// Restrict the scan to these extensions
    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = Some(extensions.into_iter().map(|e| e.to_lowercase()).collect());
        self
    }

    /// Check if a file should be included
    pub fn should_include(&self, path: &Path) -> bool {
        if is_own_file(path) || self.excluded.contains(path) {
            return false;
        }

        match &self.extensions {
            None => true,
            Some(allowed) => path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| allowed.contains(&e.to_lowercase()))
                .unwrap_or(false),
        }
    }
}

pub(crate) fn is_own_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(OWN_FILE_PREFIX))
        .unwrap_or(false)
}

pub(crate) fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}
