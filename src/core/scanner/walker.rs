//! Directory walking implementation using walkdir.

use super::filter::{is_hidden, FileFilter};
use crate::core::cache::FileIdentity;
use crate::error::ScanError;
use crate::events::{Event, EventSender, ScanEvent};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Configuration for the directory scanner
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    /// Whether to follow symbolic links
    pub follow_symlinks: bool,
    /// Whether to descend into hidden directories
    ///
    /// Hidden files are always scanned; nothing is ever placed in a hidden
    /// directory.
    pub include_hidden: bool,
    /// Maximum directory depth (None = unlimited)
    pub max_depth: Option<usize>,
    /// Extensions to include (None = every file)
    pub extensions: Option<Vec<String>>,
    /// Fingerprinting threads (None = available parallelism)
    pub workers: Option<usize>,
    /// Files never included
    pub excluded: Vec<PathBuf>,
}

impl ScanConfig {
    pub(crate) fn filter(&self) -> FileFilter {
        let filter = FileFilter::new().with_excluded(self.excluded.iter().cloned());
        match self.extensions {
            Some(ref extensions) => filter.with_extensions(extensions.clone()),
            None => filter,
        }
    }
}

/// A file found by the walk, not yet fingerprinted
#[derive(Debug, Clone)]
pub struct ListedFile {
    pub path: PathBuf,
    pub relative: PathBuf,
    pub identity: FileIdentity,
}

/// List every included file under `root`
///
/// Unreadable directories and files are reported and skipped.
pub fn list_files(
    root: &Path,
    config: &ScanConfig,
    events: &EventSender,
) -> Result<(Vec<ListedFile>, Vec<ScanError>), ScanError> {
    if !root.is_dir() {
        return Err(ScanError::DirectoryNotFound {
            path: root.to_path_buf(),
        });
    }

    let filter = config.filter();
    let include_hidden = config.include_hidden;
    let mut files = Vec::new();
    let mut errors = Vec::new();

    let mut walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    if let Some(depth) = config.max_depth {
        walker = walker.max_depth(depth);
    }

    let entries = walker
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0 || include_hidden || !e.file_type().is_dir() || !is_hidden(e.path())
        });

    for entry_result in entries {
        match entry_result {
            Ok(entry) => {
                if !entry.file_type().is_file() || !filter.should_include(entry.path()) {
                    continue;
                }

                let path = entry.path();
                match entry.metadata() {
                    Ok(metadata) => {
                        let relative = path.strip_prefix(root).unwrap_or(path).to_path_buf();
                        files.push(ListedFile {
                            path: path.to_path_buf(),
                            relative,
                            identity: FileIdentity::of_metadata(&metadata),
                        });
                    }
                    Err(e) => {
                        let error = ScanError::ReadDirectory {
                            path: path.to_path_buf(),
                            source: std::io::Error::other(e.to_string()),
                        };
                        events.send(Event::Scan(ScanEvent::Error {
                            path: path.to_path_buf(),
                            message: error.to_string(),
                        }));
                        errors.push(error);
                    }
                }
            }
            Err(e) => {
                let path = e.path().map(|p| p.to_path_buf()).unwrap_or_default();

                let error = if e.io_error().map(|e| e.kind())
                    == Some(std::io::ErrorKind::PermissionDenied)
                {
                    ScanError::PermissionDenied { path: path.clone() }
                } else {
                    ScanError::ReadDirectory {
                        path: path.clone(),
                        source: std::io::Error::other(e.to_string()),
                    }
                };

                events.send(Event::Scan(ScanEvent::Error {
                    path,
                    message: error.to_string(),
                }));

                errors.push(error);
            }
        }
    }

    Ok((files, errors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::null_sender;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn lists_nested_files_with_relative_paths() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("2023/04")).unwrap();
        fs::write(dir.path().join("2023/04/img1.jpg"), b"abc").unwrap();
        fs::write(dir.path().join("loose.png"), b"de").unwrap();

        let (mut files, errors) =
            list_files(dir.path(), &ScanConfig::default(), &null_sender()).unwrap();
        files.sort_by(|a, b| a.relative.cmp(&b.relative));

        assert!(errors.is_empty());
        let relatives: Vec<_> = files.iter().map(|f| f.relative.clone()).collect();
        assert_eq!(
            relatives,
            vec![PathBuf::from("2023/04/img1.jpg"), PathBuf::from("loose.png")]
        );
        assert_eq!(files[0].identity.size, 3);
    }

    #[test]
    fn hidden_directories_are_pruned() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".trash")).unwrap();
        fs::write(dir.path().join(".trash/old.jpg"), b"x").unwrap();
        fs::write(dir.path().join(".takeout-manifest.jsonl"), b"{}").unwrap();

        let (files, _) = list_files(dir.path(), &ScanConfig::default(), &null_sender()).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn hidden_files_outside_hidden_directories_are_listed() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("2023/04")).unwrap();
        fs::write(dir.path().join("2023/04/.trashed-img.jpg"), b"x").unwrap();

        let (files, _) = list_files(dir.path(), &ScanConfig::default(), &null_sender()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative, PathBuf::from("2023/04/.trashed-img.jpg"));
    }

    #[test]
    fn missing_root_is_an_error() {
        let result = list_files(
            Path::new("/nonexistent/destination"),
            &ScanConfig::default(),
            &null_sender(),
        );
        assert!(matches!(result, Err(ScanError::DirectoryNotFound { .. })));
    }
}
