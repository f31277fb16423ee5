//! # Date Module
//!
//! Resolves a capture date for an archive entry.
//!
//! Order of preference:
//! 1. EXIF `DateTimeOriginal`, then `DateTime` (image entries only, read
//!    from the first 64 KiB of the payload)
//! 2. The entry table timestamp, unless it is a DOS-epoch placeholder
//! 3. `Unknown`

use crate::core::archive::{ArchiveEntry, ArchiveReader};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use tracing::debug;

/// Bytes of an image entry inspected for EXIF
pub const EXIF_SAMPLE: usize = 64 * 1024;

/// Archive timestamps at or before this year are placeholders
const DOS_EPOCH_YEAR: i32 = 1980;

const EXIF_EXTENSIONS: &[&str] = &["jpg", "jpeg", "tif", "tiff", "heic", "heif", "png", "webp"];

/// A capture date, or `Unknown`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedDate {
    Known { year: i32, month: u32, day: u32 },
    Unknown,
}

impl ResolvedDate {
    pub fn from_date(date: NaiveDate) -> Self {
        ResolvedDate::Known {
            year: date.year(),
            month: date.month(),
            day: date.day(),
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, ResolvedDate::Known { .. })
    }

    /// Destination folder: `2023/04`, or `unknown`
    pub fn bucket(&self) -> String {
        match self {
            ResolvedDate::Known { year, month, .. } => format!("{:04}/{:02}", year, month),
            ResolvedDate::Unknown => "unknown".to_string(),
        }
    }

    /// Year bucket used in summaries
    pub fn year_bucket(&self) -> String {
        match self {
            ResolvedDate::Known { year, .. } => format!("{:04}", year),
            ResolvedDate::Unknown => "unknown".to_string(),
        }
    }

    /// `YYYY-MM-DD` or `unknown`
    pub fn to_text(&self) -> String {
        match self {
            ResolvedDate::Known { year, month, day } => {
                format!("{:04}-{:02}-{:02}", year, month, day)
            }
            ResolvedDate::Unknown => "unknown".to_string(),
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        if text == "unknown" {
            return Some(ResolvedDate::Unknown);
        }
        NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .ok()
            .map(ResolvedDate::from_date)
    }
}

impl fmt::Display for ResolvedDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

/// Whether EXIF should be attempted for this file name
pub fn is_exif_candidate(name: &str) -> bool {
    name.rsplit_once('.')
        .map(|(_, ext)| {
            let ext = ext.to_ascii_lowercase();
            EXIF_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Read the capture date from leading image bytes
pub fn exif_date(bytes: &[u8]) -> Option<NaiveDate> {
    let exif = exif::Reader::new()
        .read_from_container(&mut Cursor::new(bytes))
        .ok()?;

    for tag in [exif::Tag::DateTimeOriginal, exif::Tag::DateTime] {
        if let Some(field) = exif.get_field(tag, exif::In::PRIMARY) {
            if let Some(date) = parse_exif_datetime(&field.display_value().to_string()) {
                return Some(date);
            }
        }
    }

    None
}

fn parse_exif_datetime(s: &str) -> Option<NaiveDate> {
    // "2024-01-15 14:30:00" or "2024:01:15 14:30:00"
    let s = s.trim_matches('"').replace(':', "-");
    let date_part = s.split_whitespace().next()?;

    let mut parts = date_part.split('-');
    let year: i32 = parts.next()?.parse().ok()?;
    let month: u32 = parts.next()?.parse().ok()?;
    let day: u32 = parts.next()?.parse().ok()?;
    if year <= 0 {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Date from the entry table timestamp
pub fn archive_date(timestamp: Option<NaiveDateTime>) -> Option<NaiveDate> {
    timestamp
        .map(|ts| ts.date())
        .filter(|d| d.year() > DOS_EPOCH_YEAR)
}

/// Resolve a date from optional leading bytes and the stored timestamp
pub fn resolve(prefix: Option<&[u8]>, timestamp: Option<NaiveDateTime>) -> ResolvedDate {
    prefix
        .and_then(exif_date)
        .or_else(|| archive_date(timestamp))
        .map(ResolvedDate::from_date)
        .unwrap_or(ResolvedDate::Unknown)
}

/// Resolve the date for an archive entry
///
/// An unreadable payload only disables the EXIF step.
pub fn resolve_entry(reader: &mut ArchiveReader, entry: &ArchiveEntry) -> ResolvedDate {
    let prefix = if is_exif_candidate(entry.file_name()) {
        match reader.read_prefix(entry, EXIF_SAMPLE) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                debug!(entry = %entry.display_path(), error = %e, "EXIF read skipped");
                None
            }
        }
    } else {
        None
    };

    resolve(prefix.as_deref(), entry.timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use exif::experimental::Writer;
    use exif::{Field, In, Tag, Value};

    fn ts(y: i32, m: u32, d: u32) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(y, m, d).and_then(|d| d.and_hms_opt(12, 0, 0))
    }

    fn tiff_with_date(date: &str) -> Vec<u8> {
        let field = Field {
            tag: Tag::DateTimeOriginal,
            ifd_num: In::PRIMARY,
            value: Value::Ascii(vec![date.as_bytes().to_vec()]),
        };
        let mut writer = Writer::new();
        writer.push_field(&field);
        let mut buf = Cursor::new(Vec::new());
        writer.write(&mut buf, false).unwrap();
        buf.into_inner()
    }

    #[test]
    fn exif_date_wins_over_archive_timestamp() {
        let bytes = tiff_with_date("2019:07:04 10:11:12");
        let date = resolve(Some(&bytes), ts(2023, 4, 10));
        assert_eq!(
            date,
            ResolvedDate::Known {
                year: 2019,
                month: 7,
                day: 4
            }
        );
    }

    #[test]
    fn archive_timestamp_is_used_without_exif() {
        let date = resolve(Some(b"not an image"), ts(2023, 4, 10));
        assert_eq!(date.bucket(), "2023/04");
    }

    #[test]
    fn dos_epoch_placeholder_is_unknown() {
        assert_eq!(resolve(None, ts(1980, 1, 1)), ResolvedDate::Unknown);
        assert_eq!(resolve(None, None), ResolvedDate::Unknown);
        assert_eq!(ResolvedDate::Unknown.bucket(), "unknown");
    }

    #[test]
    fn parse_exif_datetime_handles_both_separators() {
        assert_eq!(
            parse_exif_datetime("2024-01-15 14:30:00"),
            NaiveDate::from_ymd_opt(2024, 1, 15)
        );
        assert_eq!(
            parse_exif_datetime("\"2024:01:15 14:30:00\""),
            NaiveDate::from_ymd_opt(2024, 1, 15)
        );
        assert_eq!(parse_exif_datetime("0000:00:00 00:00:00"), None);
    }

    #[test]
    fn exif_candidates_are_images_only() {
        assert!(is_exif_candidate("IMG_0001.JPG"));
        assert!(is_exif_candidate("photo.heic"));
        assert!(!is_exif_candidate("clip.mp4"));
        assert!(!is_exif_candidate("metadata.json"));
        assert!(!is_exif_candidate("noext"));
    }

    #[test]
    fn text_form_parses_back() {
        for date in [
            ResolvedDate::Known {
                year: 2023,
                month: 4,
                day: 10,
            },
            ResolvedDate::Unknown,
        ] {
            assert_eq!(ResolvedDate::parse(&date.to_text()), Some(date));
        }
    }
}
