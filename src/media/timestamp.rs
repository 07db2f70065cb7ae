//! Logical creation timestamps for media items.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound, Utc};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// `IMG_20210405_123456.jpg`, `VID_20190101_000102.mp4`
fn date_time_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(\d{4})(\d{2})(\d{2})_(\d{2})(\d{2})(\d{2})").expect("valid regex")
    })
}

/// `2021-04-05 party.jpg`, `/photos/2019-12-31/x.png`
fn date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\d{4})-(\d{2})-(\d{2})").expect("valid regex"))
}

fn capture_u32(caps: &regex::Captures<'_>, i: usize) -> Option<u32> {
    caps.get(i)?.as_str().parse().ok()
}

/// Timestamp embedded in a file name or path, if any. A full date-time
/// pattern wins over a bare date; impossible dates are ignored.
pub fn from_name(name: &str) -> Option<NaiveDateTime> {
    for caps in date_time_pattern().captures_iter(name) {
        let date = NaiveDate::from_ymd_opt(
            capture_u32(&caps, 1)? as i32,
            capture_u32(&caps, 2)?,
            capture_u32(&caps, 3)?,
        );
        let parsed = date.and_then(|d| {
            d.and_hms_opt(
                capture_u32(&caps, 4)?,
                capture_u32(&caps, 5)?,
                capture_u32(&caps, 6)?,
            )
        });
        if parsed.is_some() {
            return parsed;
        }
    }

    for caps in date_pattern().captures_iter(name) {
        let date = NaiveDate::from_ymd_opt(
            capture_u32(&caps, 1)? as i32,
            capture_u32(&caps, 2)?,
            capture_u32(&caps, 3)?,
        );
        if let Some(d) = date {
            return d.and_hms_opt(0, 0, 0);
        }
    }

    None
}

/// Timestamp for a file on disk: embedded in its path, else its mtime.
pub fn from_path(path: &Path) -> Option<NaiveDateTime> {
    if let Some(ts) = from_name(&path.to_string_lossy()) {
        return Some(ts);
    }
    let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
    let modified: DateTime<Utc> = modified.into();
    Some(modified.naive_utc().trunc_subsecs(0))
}

/// Pick the creation timestamp in preference order: explicit fallback,
/// metadata, name pattern, now.
pub fn resolve_created(
    fallback: Option<NaiveDateTime>,
    metadata: Option<NaiveDateTime>,
    name: &str,
    now: NaiveDateTime,
) -> NaiveDateTime {
    fallback
        .or(metadata)
        .or_else(|| from_name(name))
        .unwrap_or(now)
}
