//! Per-client fixed-window throttles for abuse-prone endpoints.
//!
//! Issuance and verification endpoints are reachable without credentials,
//! so each one carries its own counter keyed by client address. Windows
//! are swept inline on access, like the CSRF store.

use std::collections::HashMap;
use tokio::sync::Mutex;

/// All limiters share a 15 minute window.
pub const WINDOW_SECONDS: i64 = 15 * 60;

/// CSRF issuance is needed before every protected request, so it gets the
/// most permissive limit.
pub const CSRF_ISSUANCE_LIMIT: u32 = 100;

/// Budget for the remaining credential and challenge endpoints.
pub const AUTH_LIMIT: u32 = 50;

struct Window {
    started_at: i64,
    count: u32,
}

/// Counts requests per key inside a fixed window.
pub struct FixedWindowLimiter {
    capacity: u32,
    window_seconds: i64,
    windows: Mutex<HashMap<String, Window>>,
}

impl FixedWindowLimiter {
    #[must_use]
    pub fn new(capacity: u32, window_seconds: i64) -> Self {
        Self {
            capacity,
            window_seconds,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record one request for `key`; `false` means the budget is spent.
    pub async fn try_acquire(&self, key: &str, now_unix_seconds: i64) -> bool {
        let mut windows = self.windows.lock().await;
        // Stale windows never count again; drop them while we hold the lock.
        windows.retain(|_, window| now_unix_seconds - window.started_at < self.window_seconds);

        let window = windows.entry(key.to_string()).or_insert(Window {
            started_at: now_unix_seconds,
            count: 0,
        });
        if window.count >= self.capacity {
            return false;
        }
        window.count += 1;
        true
    }
}

/// One limiter per throttled endpoint, sharing nothing.
pub struct RateLimits {
    pub csrf_issuance: FixedWindowLimiter,
    pub captcha: FixedWindowLimiter,
    pub token_refresh: FixedWindowLimiter,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            csrf_issuance: FixedWindowLimiter::new(CSRF_ISSUANCE_LIMIT, WINDOW_SECONDS),
            captcha: FixedWindowLimiter::new(AUTH_LIMIT, WINDOW_SECONDS),
            token_refresh: FixedWindowLimiter::new(AUTH_LIMIT, WINDOW_SECONDS),
        }
    }
}
