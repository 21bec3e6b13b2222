//! Wall-clock access shared by the token services.
//!
//! Verification and validation functions take `now` as a parameter so tests
//! can pin the clock; this helper is the single production source of it.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in seconds.
///
/// Saturates to zero for clocks before the epoch instead of panicking.
#[must_use]
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(0))
}

/// Current unix time in milliseconds, used where second granularity would
/// not be strictly increasing (API key `last_used_at` bookkeeping).
#[must_use]
pub fn unix_now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(0))
}
