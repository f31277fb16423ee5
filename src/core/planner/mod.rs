//! # Planner Module
//!
//! Proposes destination paths of the form `year/month/filename`.
//!
//! ## Collisions
//! A proposal collides when its path was already proposed in this run, or
//! exists at the destination with different content. The stem then gets
//! `-1`, `-2`, ... (smallest unused). A path that exists with the same
//! content means the entry is already present and nothing is written.

use crate::core::date::ResolvedDate;
use crate::core::fingerprint::Fingerprint;
use crate::core::scanner::ScanResult;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Where an entry should go, relative to the destination root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// Write the entry here
    New { relative: PathBuf },
    /// The destination already has this content at this path
    AlreadyPresent { relative: PathBuf },
}

impl Placement {
    pub fn relative(&self) -> &Path {
        match self {
            Placement::New { relative } | Placement::AlreadyPresent { relative } => relative,
        }
    }
}

/// Allocates collision-free placements for one run
#[derive(Debug, Default)]
pub struct PlacementPlanner {
    /// Paths proposed so far in this run
    claimed: HashSet<PathBuf>,
    /// Destination files and their fingerprints
    existing: HashMap<PathBuf, Fingerprint>,
    /// Next suffix to try per base path
    counters: HashMap<PathBuf, usize>,
}

impl PlacementPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Planner aware of the files already at the destination
    pub fn with_existing(scan: &ScanResult) -> Self {
        Self {
            existing: scan
                .files
                .iter()
                .map(|f| (f.relative.clone(), f.fingerprint.clone()))
                .collect(),
            ..Self::default()
        }
    }

    /// Reserve a path, e.g. one recorded by an earlier run
    pub fn claim(&mut self, relative: impl Into<PathBuf>) {
        self.claimed.insert(relative.into());
    }

    pub fn is_claimed(&self, relative: &Path) -> bool {
        self.claimed.contains(relative)
    }

    /// Propose a placement for a unique entry
    pub fn propose(
        &mut self,
        file_name: &str,
        date: &ResolvedDate,
        fingerprint: &Fingerprint,
    ) -> Placement {
        let base = base_path(file_name, date);

        if let Some(placement) = self.try_candidate(&base, fingerprint) {
            return placement;
        }

        loop {
            let counter = self.counters.entry(base.clone()).or_insert(1);
            let candidate = with_suffix(&base, *counter);
            *counter += 1;

            if let Some(placement) = self.try_candidate(&candidate, fingerprint) {
                return placement;
            }
        }
    }

    fn try_candidate(&mut self, candidate: &Path, fingerprint: &Fingerprint) -> Option<Placement> {
        if let Some(existing) = self.existing.get(candidate) {
            if existing.same_content(fingerprint).unwrap_or(false) {
                self.claimed.insert(candidate.to_path_buf());
                return Some(Placement::AlreadyPresent {
                    relative: candidate.to_path_buf(),
                });
            }
            return None;
        }

        if self.claimed.insert(candidate.to_path_buf()) {
            Some(Placement::New {
                relative: candidate.to_path_buf(),
            })
        } else {
            None
        }
    }
}

/// `2023/04/name.ext` or `unknown/name.ext`
pub fn base_path(file_name: &str, date: &ResolvedDate) -> PathBuf {
    let mut path = PathBuf::new();
    match date {
        ResolvedDate::Known { year, month, .. } => {
            path.push(format!("{:04}", year));
            path.push(format!("{:02}", month));
        }
        ResolvedDate::Unknown => path.push("unknown"),
    }
    path.push(sanitize(file_name));
    path
}

fn sanitize(file_name: &str) -> String {
    let cleaned: String = file_name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    match cleaned.trim() {
        "" | "." | ".." => "unnamed".to_string(),
        _ => cleaned,
    }
}

/// Insert `-n` before the extension
fn with_suffix(path: &Path, n: usize) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
    let name = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}-{}.{}", stem, n, ext),
        None => format!("{}-{}", stem, n),
    };
    path.with_file_name(name)
}
