//! # Dedup Module
//!
//! Merges fingerprints from archive entries and the destination scan into
//! duplicate groups with a canonical member.
//!
//! ## Canonical order
//! Archive entries in archive-list order then entry-table order, then
//! destination files by relative path. Pairs are buffered and sorted into
//! this order before any group is formed, so the interleaving of parallel
//! producers never changes which member is canonical.

use crate::core::archive::{ArchiveEntry, ArchiveId};
use crate::core::fingerprint::{Fingerprint, Strategy};
use crate::error::FingerprintError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use tracing::debug;

/// Where a fingerprinted item lives
///
/// The derived ordering is the canonical discovery order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Location {
    Archive {
        archive: ArchiveId,
        entry_index: usize,
        path: String,
    },
    /// Path relative to the destination root
    Destination { path: PathBuf },
}

impl Location {
    pub fn of_entry(entry: &ArchiveEntry) -> Self {
        Location::Archive {
            archive: entry.archive.clone(),
            entry_index: entry.index,
            path: entry.path.clone(),
        }
    }

    pub fn is_destination(&self) -> bool {
        matches!(self, Location::Destination { .. })
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Archive { archive, path, .. } => {
                write!(f, "{}:{}", archive.display_name(), path)
            }
            Location::Destination { path } => write!(f, "{}", path.display()),
        }
    }
}

/// All locations sharing one fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub fingerprint: Fingerprint,
    /// Members in canonical order; the first is canonical
    pub members: Vec<Location>,
}

impl DuplicateGroup {
    pub fn canonical(&self) -> &Location {
        &self.members[0]
    }

    pub fn duplicates(&self) -> &[Location] {
        &self.members[1..]
    }

    pub fn is_duplicate(&self) -> bool {
        self.members.len() > 1
    }

    /// First destination member, if the destination already holds this content
    pub fn destination(&self) -> Option<&PathBuf> {
        self.members.iter().find_map(|m| match m {
            Location::Destination { path } => Some(path),
            _ => None,
        })
    }
}

/// Outcome of deduplication for one archive entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Canonical member with no copy at the destination
    Unique,
    /// Canonical member whose content the destination already holds
    AlreadyPresent { destination: PathBuf },
    /// Non-canonical member
    DuplicateOf { canonical: Location },
}

/// Buffers `(location, fingerprint)` pairs and groups them
pub struct DedupEngine {
    strategy: Strategy,
    pending: Vec<(Location, Fingerprint)>,
}

impl DedupEngine {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            pending: Vec::new(),
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Buffer one pair; fingerprints from another strategy are rejected
    pub fn push(&mut self, location: Location, fingerprint: Fingerprint) -> Result<(), FingerprintError> {
        if fingerprint.strategy != self.strategy {
            return Err(FingerprintError::StrategyMismatch {
                left: self.strategy,
                right: fingerprint.strategy,
            });
        }
        self.pending.push((location, fingerprint));
        Ok(())
    }

    pub fn extend<I>(&mut self, pairs: I) -> Result<(), FingerprintError>
    where
        I: IntoIterator<Item = (Location, Fingerprint)>,
    {
        for (location, fingerprint) in pairs {
            self.push(location, fingerprint)?;
        }
        Ok(())
    }

    /// Sort into canonical order, group and classify
    pub fn finish(mut self) -> DedupResult {
        self.pending.sort_by(|a, b| a.0.cmp(&b.0));
        self.pending.dedup_by(|a, b| a.0 == b.0);

        let mut index: HashMap<Fingerprint, usize> = HashMap::new();
        let mut groups: Vec<DuplicateGroup> = Vec::new();

        for (location, fingerprint) in self.pending {
            match index.get(&fingerprint) {
                Some(&i) => groups[i].members.push(location),
                None => {
                    index.insert(fingerprint.clone(), groups.len());
                    groups.push(DuplicateGroup {
                        fingerprint,
                        members: vec![location],
                    });
                }
            }
        }

        let mut classifications = HashMap::new();
        for group in &groups {
            let canonical = group.canonical();
            if canonical.is_destination() {
                continue;
            }

            let first = match group.destination() {
                Some(destination) => Classification::AlreadyPresent {
                    destination: destination.clone(),
                },
                None => Classification::Unique,
            };
            classifications.insert(canonical.clone(), first);

            for member in group.duplicates().iter().filter(|m| !m.is_destination()) {
                classifications.insert(
                    member.clone(),
                    Classification::DuplicateOf {
                        canonical: canonical.clone(),
                    },
                );
            }
        }

        debug!(
            groups = groups.len(),
            duplicate_groups = groups.iter().filter(|g| g.is_duplicate()).count(),
            "deduplication finished"
        );

        DedupResult {
            strategy: self.strategy,
            groups,
            classifications,
        }
    }
}

/// Grouped and classified fingerprints for one analysis pass
#[derive(Debug)]
pub struct DedupResult {
    pub strategy: Strategy,
    /// Every group, including single-member ones, in canonical order
    pub groups: Vec<DuplicateGroup>,
    classifications: HashMap<Location, Classification>,
}

impl DedupResult {
    /// Groups with more than one member
    pub fn duplicate_groups(&self) -> impl Iterator<Item = &DuplicateGroup> {
        self.groups.iter().filter(|g| g.is_duplicate())
    }

    /// Classification of an archive location
    pub fn classify(&self, location: &Location) -> Option<&Classification> {
        self.classifications.get(location)
    }

    /// Counts of (unique, already present, duplicate) archive entries
    pub fn counts(&self) -> (usize, usize, usize) {
        self.classifications
            .values()
            .fold((0, 0, 0), |(u, p, d), c| match c {
                Classification::Unique => (u + 1, p, d),
                Classification::AlreadyPresent { .. } => (u, p + 1, d),
                Classification::DuplicateOf { .. } => (u, p, d + 1),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    fn entry(ordinal: usize, index: usize, path: &str) -> Location {
        Location::Archive {
            archive: ArchiveId::new(ordinal, format!("/in/takeout-{:03}.zip", ordinal)),
            entry_index: index,
            path: path.to_string(),
        }
    }

    fn dest(path: &str) -> Location {
        Location::Destination { path: PathBuf::from(path) }
    }

    fn x() -> Fingerprint {
        Fingerprint::crc(3, 0xAAAA)
    }

    fn y() -> Fingerprint {
        Fingerprint::crc(3, 0xBBBB)
    }

    #[test]
    fn byte_identical_entries_form_one_group() {
        let mut engine = DedupEngine::new(Strategy::SizeCrc);
        engine.push(entry(0, 0, "img1.jpg"), x()).unwrap();
        engine.push(entry(0, 1, "img2.jpg"), x()).unwrap();
        let result = engine.finish();

        let groups: Vec<_> = result.duplicate_groups().collect();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members.len(), 2);
        assert_eq!(groups[0].canonical(), &entry(0, 0, "img1.jpg"));

        assert_eq!(result.classify(&entry(0, 0, "img1.jpg")), Some(&Classification::Unique));
        assert_eq!(
            result.classify(&entry(0, 1, "img2.jpg")),
            Some(&Classification::DuplicateOf {
                canonical: entry(0, 0, "img1.jpg")
            })
        );
    }

    #[test]
    fn destination_match_marks_canonical_already_present() {
        let mut engine = DedupEngine::new(Strategy::SizeCrc);
        engine.push(dest("2023/04/img1.jpg"), x()).unwrap();
        engine.push(entry(0, 1, "img2.jpg"), x()).unwrap();
        engine.push(entry(0, 0, "img1.jpg"), x()).unwrap();
        let result = engine.finish();

        assert_eq!(
            result.classify(&entry(0, 0, "img1.jpg")),
            Some(&Classification::AlreadyPresent {
                destination: PathBuf::from("2023/04/img1.jpg")
            })
        );
        assert_eq!(
            result.classify(&entry(0, 1, "img2.jpg")),
            Some(&Classification::DuplicateOf {
                canonical: entry(0, 0, "img1.jpg")
            })
        );
        assert_eq!(result.classify(&dest("2023/04/img1.jpg")), None);
        assert_eq!(result.counts(), (0, 1, 1));
    }

    #[test]
    fn earlier_archive_wins_regardless_of_push_order() {
        let mut engine = DedupEngine::new(Strategy::SizeCrc);
        engine.push(entry(1, 0, "a.jpg"), x()).unwrap();
        engine.push(entry(0, 5, "b.jpg"), x()).unwrap();
        let result = engine.finish();

        assert_eq!(result.groups[0].canonical(), &entry(0, 5, "b.jpg"));
    }

    #[test]
    fn canonical_selection_is_independent_of_scheduling() {
        let pairs: Vec<(Location, Fingerprint)> = (0..200)
            .map(|i| {
                let fp = if i % 3 == 0 { x() } else { y() };
                if i % 5 == 0 {
                    (dest(&format!("d/{:03}.jpg", i)), fp)
                } else {
                    (entry(i % 4, i, &format!("e{}.jpg", i)), fp)
                }
            })
            .collect();

        let sequential = {
            let mut engine = DedupEngine::new(Strategy::SizeCrc);
            engine.extend(pairs.clone()).unwrap();
            engine.finish()
        };

        for _ in 0..5 {
            // Arrival order follows whichever worker finishes first
            let (tx, rx) = crossbeam_channel::unbounded();
            pairs.par_iter().for_each_with(tx, |tx, pair| {
                tx.send(pair.clone()).unwrap();
            });

            let mut engine = DedupEngine::new(Strategy::SizeCrc);
            engine.extend(rx.iter()).unwrap();
            let result = engine.finish();

            assert_eq!(result.groups, sequential.groups);
        }

        let mut reversed = pairs.clone();
        reversed.reverse();
        let mut engine = DedupEngine::new(Strategy::SizeCrc);
        engine.extend(reversed).unwrap();
        assert_eq!(engine.finish().groups, sequential.groups);
    }

    #[test]
    fn mixed_strategy_is_rejected() {
        let mut engine = DedupEngine::new(Strategy::Full);
        let result = engine.push(entry(0, 0, "a.jpg"), x());
        assert!(matches!(result, Err(FingerprintError::StrategyMismatch { .. })));
    }

    #[test]
    fn destination_only_groups_are_not_classified() {
        let mut engine = DedupEngine::new(Strategy::SizeCrc);
        engine.push(dest("a.jpg"), y()).unwrap();
        engine.push(dest("b.jpg"), y()).unwrap();
        let result = engine.finish();

        assert_eq!(result.duplicate_groups().count(), 1);
        assert_eq!(result.counts(), (0, 0, 0));
    }
}
