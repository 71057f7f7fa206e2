//! Fixed-window per-plugin rate limiting.
//!
//! Each plugin gets a request budget per window. Windows are lazy: the
//! counter resets when the first acquisition after expiry arrives, not on
//! a timer.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

struct Window {
    started: Instant,
    count: u32,
}

pub(crate) struct RateLimiter {
    max_requests: u32,
    window: Duration,
    inner: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub(crate) fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Try to take one slot from the plugin's current window.
    pub(crate) fn try_acquire(&self, plugin: &str) -> bool {
        let now = Instant::now();
        let mut windows = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let window = windows.entry(plugin.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(window.started) >= self.window {
            window.started = now;
            window.count = 0;
        }
        if window.count >= self.max_requests {
            return false;
        }
        window.count += 1;
        true
    }

    /// Drop the plugin's window entirely.
    pub(crate) fn clear(&self, plugin: &str) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(plugin);
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("max_requests", &self.max_requests)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}
