//! # Fingerprint Module
//!
//! Computes content identities for archive entries and on-disk files.
//!
//! ## Strategies
//! - `SizePartial` - size + xxh3 of the first 64 KiB. Fast, but two files of
//!   equal size sharing their first 64 KiB compare equal even when their tails
//!   differ. These false positives are accepted for this strategy, but a skip
//!   decided on one never makes an archive eligible for cleanup.
//! - `SizeCrc` - size + CRC32. Archive entries use the checksum stored in the
//!   entry table without reading the payload; on-disk files always get a full
//!   CRC32 computed over their bytes.
//! - `Full` - size + SHA-256 of the entire content.
//!
//! A [`Fingerprint`] carries the strategy that produced it and comparisons
//! across strategies are rejected.

mod compute;

pub use compute::{
    fingerprint, fingerprint_bytes, fingerprint_entry, fingerprint_file, fingerprint_reader,
    Source,
};

use crate::error::FingerprintError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bytes hashed by the `SizePartial` strategy
pub const PARTIAL_SAMPLE: usize = 64 * 1024;

/// How content identity is computed, fixed per run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    SizePartial,
    SizeCrc,
    Full,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::SizePartial => "size_partial",
            Strategy::SizeCrc => "size_crc",
            Strategy::Full => "full",
        }
    }

    /// Whether fingerprinting an archive entry needs its payload
    pub fn reads_payload(&self) -> bool {
        !matches!(self, Strategy::SizeCrc)
    }

    /// Whether equal fingerprints cover every byte of both sides
    ///
    /// A skip decided on a sampled fingerprint cannot show the content is
    /// already present, so it never makes an archive eligible for cleanup.
    pub fn covers_content(&self) -> bool {
        !matches!(self, Strategy::SizePartial)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "size_partial" | "partial" => Ok(Strategy::SizePartial),
            "size_crc" | "crc" => Ok(Strategy::SizeCrc),
            "full" | "sha256" => Ok(Strategy::Full),
            other => Err(format!("unknown fingerprint strategy: {}", other)),
        }
    }
}

/// Strategy-specific digest value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Digest {
    /// xxh3 of the first 64 KiB
    Partial(u64),
    Crc32(u32),
    /// Lowercase hex SHA-256
    Sha256(String),
}

/// Content identity produced by one strategy
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub strategy: Strategy,
    pub size: u64,
    pub digest: Digest,
}

impl Fingerprint {
    pub fn partial(size: u64, hash: u64) -> Self {
        Self {
            strategy: Strategy::SizePartial,
            size,
            digest: Digest::Partial(hash),
        }
    }

    pub fn crc(size: u64, crc32: u32) -> Self {
        Self {
            strategy: Strategy::SizeCrc,
            size,
            digest: Digest::Crc32(crc32),
        }
    }

    pub fn full(size: u64, sha256_hex: impl Into<String>) -> Self {
        Self {
            strategy: Strategy::Full,
            size,
            digest: Digest::Sha256(sha256_hex.into()),
        }
    }

    /// Compare content identity with another fingerprint
    ///
    /// Fails when the two were produced by different strategies.
    pub fn same_content(&self, other: &Fingerprint) -> Result<bool, FingerprintError> {
        if self.strategy != other.strategy {
            return Err(FingerprintError::StrategyMismatch {
                left: self.strategy,
                right: other.strategy,
            });
        }
        Ok(self.size == other.size && self.digest == other.digest)
    }

    fn digest_text(&self) -> String {
        match &self.digest {
            Digest::Partial(h) => format!("{:016x}", h),
            Digest::Crc32(c) => format!("{:08x}", c),
            Digest::Sha256(hex) => hex.clone(),
        }
    }

    /// Compact `strategy:size:digest` form used as a storage value
    pub fn to_text(&self) -> String {
        format!("{}:{}:{}", self.strategy, self.size, self.digest_text())
    }

    /// Parse the form written by [`Fingerprint::to_text`]
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.splitn(3, ':');
        let strategy: Strategy = parts.next()?.parse().ok()?;
        let size: u64 = parts.next()?.parse().ok()?;
        let digest = parts.next()?;

        let digest = match strategy {
            Strategy::SizePartial => Digest::Partial(u64::from_str_radix(digest, 16).ok()?),
            Strategy::SizeCrc => Digest::Crc32(u32::from_str_radix(digest, 16).ok()?),
            Strategy::Full => {
                if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                    return None;
                }
                Digest::Sha256(digest.to_ascii_lowercase())
            }
        };

        Some(Self {
            strategy,
            size,
            digest,
        })
    }

    /// Abbreviated digest for logs and reports
    pub fn short(&self) -> String {
        let text = self.digest_text();
        text.chars().take(12).collect()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_parses_cli_spellings() {
        assert_eq!("size-partial".parse::<Strategy>().unwrap(), Strategy::SizePartial);
        assert_eq!("size_crc".parse::<Strategy>().unwrap(), Strategy::SizeCrc);
        assert_eq!("FULL".parse::<Strategy>().unwrap(), Strategy::Full);
        assert!("md5".parse::<Strategy>().is_err());
    }

    #[test]
    fn default_strategy_is_size_partial() {
        assert_eq!(Strategy::default(), Strategy::SizePartial);
    }

    #[test]
    fn cross_strategy_comparison_is_rejected() {
        let a = Fingerprint::crc(10, 0xABCD);
        let b = Fingerprint::partial(10, 0xABCD);

        let result = a.same_content(&b);
        assert!(matches!(
            result,
            Err(FingerprintError::StrategyMismatch {
                left: Strategy::SizeCrc,
                right: Strategy::SizePartial
            })
        ));
    }

    #[test]
    fn same_strategy_compares_size_and_digest() {
        let a = Fingerprint::crc(10, 0xABCD);
        assert!(a.same_content(&Fingerprint::crc(10, 0xABCD)).unwrap());
        assert!(!a.same_content(&Fingerprint::crc(11, 0xABCD)).unwrap());
        assert!(!a.same_content(&Fingerprint::crc(10, 0xABCE)).unwrap());
    }

    #[test]
    fn text_form_parses_back() {
        let sha = "a".repeat(64);
        for fp in [
            Fingerprint::partial(70_000, 0x0123_4567_89AB_CDEF),
            Fingerprint::crc(5, 0xDEAD_BEEF),
            Fingerprint::full(1, sha),
        ] {
            assert_eq!(Fingerprint::parse(&fp.to_text()), Some(fp));
        }
    }

    #[test]
    fn malformed_text_is_rejected() {
        assert_eq!(Fingerprint::parse("size_crc:abc:00"), None);
        assert_eq!(Fingerprint::parse("full:10:not-hex"), None);
        assert_eq!(Fingerprint::parse("garbage"), None);
    }
}
