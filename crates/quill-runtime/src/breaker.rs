//! Per-plugin circuit breaker.
//!
//! Counts consecutive plugin faults and trips exactly when the count
//! reaches the configured threshold. An open breaker refuses calls until
//! an explicit reset; refusals themselves never count as new faults, so
//! an open breaker cannot dig the plugin deeper.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};

/// State captured at the moment a breaker tripped.
#[derive(Debug, Clone)]
pub struct BreakerState {
    /// When the breaker opened.
    pub opened_at: DateTime<Utc>,
    /// Operator-facing trip reason, including the last fault.
    pub reason: String,
}

#[derive(Default)]
struct Faults {
    consecutive: u32,
    open: Option<BreakerState>,
}

/// Tracks consecutive faults per plugin and the open/closed state.
pub(crate) struct BreakerBoard {
    threshold: u32,
    inner: Mutex<HashMap<String, Faults>>,
}

impl BreakerBoard {
    pub(crate) fn new(threshold: u32) -> Self {
        Self {
            threshold,
            inner: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Faults>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a plugin fault. Returns the new state when this fault
    /// tripped the breaker, `None` otherwise.
    pub(crate) fn record_failure(&self, plugin: &str, error: &str) -> Option<BreakerState> {
        let mut board = self.lock();
        let faults = board.entry(plugin.to_string()).or_default();
        if faults.open.is_some() {
            return None;
        }
        faults.consecutive = faults.consecutive.saturating_add(1);
        if faults.consecutive >= self.threshold {
            let state = BreakerState {
                opened_at: Utc::now(),
                reason: format!(
                    "{} consecutive failures, last: {error}",
                    faults.consecutive
                ),
            };
            faults.open = Some(state.clone());
            return Some(state);
        }
        None
    }

    /// Record a successful call, resetting the consecutive-fault count.
    pub(crate) fn record_success(&self, plugin: &str) {
        if let Some(faults) = self.lock().get_mut(plugin) {
            if faults.open.is_none() {
                faults.consecutive = 0;
            }
        }
    }

    /// The open state, when the breaker has tripped.
    pub(crate) fn open_state(&self, plugin: &str) -> Option<BreakerState> {
        self.lock().get(plugin).and_then(|f| f.open.clone())
    }

    /// Current consecutive-fault count.
    pub(crate) fn consecutive(&self, plugin: &str) -> u32 {
        self.lock().get(plugin).map_or(0, |f| f.consecutive)
    }

    /// Explicitly close the breaker and zero the fault count.
    pub(crate) fn reset(&self, plugin: &str) {
        self.lock().remove(plugin);
    }
}

impl std::fmt::Debug for BreakerBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerBoard")
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}
