//! Archive versus destination comparison.

use crate::core::archive::ArchiveEntry;
use crate::core::fingerprint::Fingerprint;
use crate::core::scanner::ScanResult;
use crate::error::FingerprintError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// An archive entry whose content the destination already holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentEntry {
    pub entry: String,
    /// Destination-relative paths holding the same content
    pub found_at: Vec<PathBuf>,
}

/// Overlap between one archive and the destination
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompareReport {
    pub archive: PathBuf,
    pub already_present: Vec<PresentEntry>,
    /// Entries with no copy in the destination, in archive order
    pub unique_in_archive: Vec<String>,
    /// Destination files with no copy in the archive
    pub unique_in_destination: Vec<PathBuf>,
    pub unique_bytes: u64,
}

/// Compare fingerprinted archive entries with a destination scan
///
/// Both sides must share one strategy.
pub fn compare_archive(
    archive: impl Into<PathBuf>,
    entries: &[(ArchiveEntry, Fingerprint)],
    scan: &ScanResult,
) -> Result<CompareReport, FingerprintError> {
    if let Some((_, fp)) = entries.iter().find(|(_, fp)| fp.strategy != scan.strategy) {
        return Err(FingerprintError::StrategyMismatch {
            left: fp.strategy,
            right: scan.strategy,
        });
    }

    let by_fingerprint = scan.by_fingerprint();
    let mut report = CompareReport {
        archive: archive.into(),
        ..CompareReport::default()
    };
    let mut in_archive: HashSet<&Fingerprint> = HashSet::new();

    for (entry, fp) in entries {
        in_archive.insert(fp);
        match by_fingerprint.get(fp) {
            Some(files) => report.already_present.push(PresentEntry {
                entry: entry.path.clone(),
                found_at: files.iter().map(|f| f.relative.clone()).collect(),
            }),
            None => {
                report.unique_bytes += entry.size;
                report.unique_in_archive.push(entry.path.clone());
            }
        }
    }

    report.unique_in_destination = scan
        .files
        .iter()
        .filter(|f| !in_archive.contains(&f.fingerprint))
        .map(|f| f.relative.clone())
        .collect();

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::archive::ArchiveId;
    use crate::core::cache::{FileIdentity, Signature};
    use crate::core::fingerprint::Strategy;
    use crate::core::scanner::ScannedFile;

    fn archived(path: &str, crc: u32) -> (ArchiveEntry, Fingerprint) {
        let entry = ArchiveEntry {
            archive: ArchiveId::new(0, "/in/a.zip"),
            index: 0,
            path: path.to_string(),
            size: 5,
            crc32: crc,
            timestamp: None,
        };
        (entry, Fingerprint::crc(5, crc))
    }

    fn destination(files: &[(&str, u32)]) -> ScanResult {
        let mut scan = ScanResult::empty("/dest", Strategy::SizeCrc);
        scan.files = files
            .iter()
            .map(|(relative, crc)| ScannedFile {
                path: PathBuf::from("/dest").join(relative),
                relative: PathBuf::from(relative),
                identity: FileIdentity {
                    size: 5,
                    signature: Signature::Modified(1),
                },
                fingerprint: Fingerprint::crc(5, *crc),
            })
            .collect();
        scan
    }

    #[test]
    fn splits_three_ways() {
        let entries = vec![archived("a.jpg", 1), archived("b.jpg", 2)];
        let scan = destination(&[("2023/04/a.jpg", 1), ("2023/04/c.jpg", 3)]);

        let report = compare_archive("/in/a.zip", &entries, &scan).unwrap();

        assert_eq!(
            report.already_present,
            vec![PresentEntry {
                entry: "a.jpg".to_string(),
                found_at: vec![PathBuf::from("2023/04/a.jpg")],
            }]
        );
        assert_eq!(report.unique_in_archive, vec!["b.jpg".to_string()]);
        assert_eq!(report.unique_in_destination, vec![PathBuf::from("2023/04/c.jpg")]);
        assert_eq!(report.unique_bytes, 5);
    }

    #[test]
    fn rejects_mixed_strategies() {
        let mut entries = vec![archived("a.jpg", 1)];
        entries[0].1 = Fingerprint::partial(5, 1);
        let scan = destination(&[]);

        assert!(matches!(
            compare_archive("/in/a.zip", &entries, &scan),
            Err(FingerprintError::StrategyMismatch {
                left: Strategy::SizePartial,
                right: Strategy::SizeCrc
            })
        ));
    }
}
