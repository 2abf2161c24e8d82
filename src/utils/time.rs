//! Timestamp parsing and formatting.
//!
//! Captures carry Unix seconds as `f64`. The CLI accepts either RFC 3339
//! or raw epoch seconds.

use chrono::{DateTime, Utc};

use crate::analysis::types::Timestamp;

/// Parse a `--since`/`--until` argument
pub fn parse_time_arg(input: &str) -> Result<Timestamp, String> {
    let input = input.trim();
    if let Ok(epoch) = input.parse::<f64>() {
        if epoch.is_finite() {
            return Ok(epoch);
        }
    }
    DateTime::parse_from_rfc3339(input)
        .map(|dt| dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_millis()) / 1000.0)
        .map_err(|e| format!("Invalid time '{}': {} (expected RFC 3339 or epoch seconds)", input, e))
}

fn to_datetime(ts: Timestamp) -> Option<DateTime<Utc>> {
    let secs = ts.floor();
    let nanos = ((ts - secs) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(secs as i64, nanos)
}

/// `YYYY-MM-DD HH:MM:SS` in UTC, or the raw number when out of range
pub fn format_timestamp(ts: Timestamp) -> String {
    match to_datetime(ts) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => format!("{:.3}", ts),
    }
}
