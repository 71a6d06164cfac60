//! Time utilities for termgate

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch for the given time.
///
/// Times before the epoch map to 0.
pub fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Get the current Unix timestamp in milliseconds.
///
/// # Examples
/// ```
/// use tg_core::time::current_time_millis;
///
/// let now = current_time_millis();
/// assert!(now > 0);
/// ```
pub fn current_time_millis() -> u64 {
    unix_millis(SystemTime::now())
}
