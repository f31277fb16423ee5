//! Archive cleanup policy.

use crate::core::manifest::ArchiveStatus;
use serde::{Deserialize, Serialize};

/// How the caller wants fully extracted archives handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupMode {
    /// Ask before deleting each eligible archive
    Prompt,
    /// Delete eligible archives as one batch
    Auto,
    /// Never delete archives
    #[default]
    Keep,
}

/// What the caller should do with one archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupAction {
    Keep { reason: String },
    AskToDelete,
    Delete,
}

/// Decide what to do with an archive after extraction
///
/// Deletion is only ever requested for archives whose every entry has a
/// terminal, non-`Failed` record.
pub fn decide_cleanup(status: &ArchiveStatus, mode: CleanupMode) -> CleanupAction {
    if status.failed > 0 {
        return CleanupAction::Keep {
            reason: format!("{} entries failed", status.failed),
        };
    }
    if status.unindexed > 0 {
        return CleanupAction::Keep {
            reason: format!("{} entries could not be indexed", status.unindexed),
        };
    }
    if status.unverified > 0 {
        return CleanupAction::Keep {
            reason: format!(
                "{} skipped entries only matched a size_partial fingerprint",
                status.unverified
            ),
        };
    }
    if !status.is_cleanup_eligible() {
        let outstanding = status.expected.saturating_sub(status.recorded) + status.planned;
        return CleanupAction::Keep {
            reason: format!("{} entries not yet processed", outstanding),
        };
    }

    match mode {
        CleanupMode::Prompt => CleanupAction::AskToDelete,
        CleanupMode::Auto => CleanupAction::Delete,
        CleanupMode::Keep => CleanupAction::Keep {
            reason: "cleanup disabled".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn complete() -> ArchiveStatus {
        ArchiveStatus {
            archive: PathBuf::from("/in/a.zip"),
            expected: 3,
            recorded: 3,
            planned: 0,
            extracted: 1,
            skipped_duplicate: 1,
            skipped_existing: 1,
            failed: 0,
            unindexed: 0,
            unverified: 0,
        }
    }

    #[test]
    fn complete_archive_follows_mode() {
        assert_eq!(decide_cleanup(&complete(), CleanupMode::Prompt), CleanupAction::AskToDelete);
        assert_eq!(decide_cleanup(&complete(), CleanupMode::Auto), CleanupAction::Delete);
        assert!(matches!(
            decide_cleanup(&complete(), CleanupMode::Keep),
            CleanupAction::Keep { .. }
        ));
    }

    #[test]
    fn failed_entries_block_deletion_in_every_mode() {
        let status = ArchiveStatus {
            extracted: 0,
            failed: 1,
            ..complete()
        };
        for mode in [CleanupMode::Prompt, CleanupMode::Auto, CleanupMode::Keep] {
            assert_eq!(
                decide_cleanup(&status, mode),
                CleanupAction::Keep {
                    reason: "1 entries failed".to_string()
                }
            );
        }
    }

    #[test]
    fn unprocessed_entries_block_deletion() {
        let status = ArchiveStatus {
            recorded: 2,
            extracted: 0,
            ..complete()
        };
        assert_eq!(
            decide_cleanup(&status, CleanupMode::Auto),
            CleanupAction::Keep {
                reason: "1 entries not yet processed".to_string()
            }
        );
    }

    #[test]
    fn unindexed_slots_block_deletion() {
        let status = ArchiveStatus {
            unindexed: 1,
            ..complete()
        };
        assert!(!status.is_cleanup_eligible());
        assert_eq!(
            decide_cleanup(&status, CleanupMode::Auto),
            CleanupAction::Keep {
                reason: "1 entries could not be indexed".to_string()
            }
        );
    }

    #[test]
    fn sampled_matches_block_deletion() {
        let status = ArchiveStatus {
            unverified: 2,
            ..complete()
        };
        assert!(!status.is_cleanup_eligible());
        assert_eq!(
            decide_cleanup(&status, CleanupMode::Prompt),
            CleanupAction::Keep {
                reason: "2 skipped entries only matched a size_partial fingerprint".to_string()
            }
        );
    }
}
