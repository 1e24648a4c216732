/// Time utilities.
///
/// Key pair records and directory entries carry unix timestamps in
/// milliseconds, matching what the web client writes.

use chrono::{DateTime, TimeZone, Utc};

/// Returns the current Unix timestamp in seconds.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Returns the current Unix timestamp in milliseconds.
pub fn now_timestamp_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Converts a millisecond timestamp to a UTC datetime, if it is in range.
pub fn from_timestamp_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}
