//! Timestamp parsing and formatting.
//!
//! Message timestamps arrive from several sources with different precision
//! and offset conventions. Every comparison in the system goes through
//! [`parse_instant`] so that `2024-01-01T00:00:00Z`, `2024-01-01T00:00:00.000Z`
//! and `2024-01-01T05:30:00+05:30` all map to the same absolute instant.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

const OFFSET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"];

/// Parse a timestamp string into an absolute UTC instant.
///
/// Accepts RFC 3339 (any fractional precision, `Z` or numeric offset), the
/// space separated SQL form (read as UTC when it carries no offset) and
/// integer epoch milliseconds. Returns `None` for anything else.
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    if s.bytes().all(|b| b.is_ascii_digit()) {
        return s
            .parse::<i64>()
            .ok()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());
    }

    None
}

/// Format an instant the way this system writes timestamps.
pub fn format_instant(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}
