//! Custom types for common data structures and timestamp parsing

use chrono::{DateTime as ChronoDateTime, NaiveDateTime, TimeZone, Utc};

/// Database DateTime type used across all Faultline crates
///
/// This is the canonical datetime type for TIMESTAMPTZ columns in every
/// entity (issues, events, resolutions, notifications).
pub type DBDateTime = ChronoDateTime<Utc>;

/// Standard UTC DateTime type used across all Faultline crates
///
/// Serializes as ISO 8601 with an explicit offset, e.g.
/// `2025-10-12T12:15:47.609192+00:00`.
pub type UtcDateTime = ChronoDateTime<Utc>;

/// Parse a timestamp string in any of the shapes SDKs send.
///
/// Accepts:
/// - `2024-01-15T14:30:00Z` / `2024-01-15T14:30:00+02:00` (RFC 3339)
/// - `2024-01-15T14:30:00` and `2024-01-15T14:30:00.123` (naive, assumed UTC)
/// - `1705329000` / `1705329000.25` (unix seconds as a string)
pub fn parse_flexible_timestamp(s: &str) -> Option<UtcDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = ChronoDateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(ChronoDateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
        }
    }

    s.parse::<f64>().ok().and_then(timestamp_from_unix_seconds)
}

/// Convert fractional unix seconds into a UTC datetime.
///
/// Returns `None` for NaN, infinities and values outside chrono's range.
pub fn timestamp_from_unix_seconds(secs: f64) -> Option<UtcDateTime> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.trunc();
    if whole < i64::MIN as f64 || whole > i64::MAX as f64 {
        return None;
    }
    let nanos = ((secs - whole) * 1_000_000_000.0).round().clamp(0.0, 999_999_999.0) as u32;
    Utc.timestamp_opt(whole as i64, nanos).single()
}
