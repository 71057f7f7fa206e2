//! Per-plugin invocation metrics.
//!
//! Route and hook invocations are counted separately, with error counts
//! and latency accumulation. Counters survive worker restarts; they are
//! operational history, not worker state.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tracing::info;

#[derive(Debug, Default, Clone)]
struct Counters {
    calls: u64,
    errors: u64,
    total_latency_ms: u64,
    last_latency_ms: u64,
}

impl Counters {
    fn record(&mut self, ok: bool, latency_ms: u64) {
        self.calls = self.calls.saturating_add(1);
        if !ok {
            self.errors = self.errors.saturating_add(1);
        }
        self.total_latency_ms = self.total_latency_ms.saturating_add(latency_ms);
        self.last_latency_ms = latency_ms;
    }

    fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            calls: self.calls,
            errors: self.errors,
            last_latency_ms: self.last_latency_ms,
            avg_latency_ms: if self.calls == 0 {
                0
            } else {
                self.total_latency_ms / self.calls
            },
        }
    }
}

/// A point-in-time view of one counter set.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CounterSnapshot {
    /// Total invocations.
    pub calls: u64,
    /// Invocations that failed (including timeouts).
    pub errors: u64,
    /// Latency of the most recent invocation.
    pub last_latency_ms: u64,
    /// Mean latency across all invocations.
    pub avg_latency_ms: u64,
}

/// Route and hook counters for one plugin.
#[derive(Debug, Clone, Serialize)]
pub struct PluginMetrics {
    /// Route dispatch counters.
    pub routes: CounterSnapshot,
    /// Hook invocation counters.
    pub hooks: CounterSnapshot,
}

#[derive(Default)]
struct PluginCounters {
    routes: Counters,
    hooks: Counters,
}

pub(crate) struct MetricsBoard {
    inner: Mutex<HashMap<String, PluginCounters>>,
}

impl MetricsBoard {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PluginCounters>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn record_route(&self, plugin: &str, ok: bool, latency_ms: u64) {
        self.lock()
            .entry(plugin.to_string())
            .or_default()
            .routes
            .record(ok, latency_ms);
    }

    pub(crate) fn record_hook(&self, plugin: &str, ok: bool, latency_ms: u64) {
        self.lock()
            .entry(plugin.to_string())
            .or_default()
            .hooks
            .record(ok, latency_ms);
    }

    pub(crate) fn snapshot(&self) -> BTreeMap<String, PluginMetrics> {
        self.lock()
            .iter()
            .map(|(name, counters)| {
                (
                    name.clone(),
                    PluginMetrics {
                        routes: counters.routes.snapshot(),
                        hooks: counters.hooks.snapshot(),
                    },
                )
            })
            .collect()
    }
}

impl std::fmt::Debug for MetricsBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsBoard").finish_non_exhaustive()
    }
}

/// Spawn a task that logs a metrics snapshot every `period`.
///
/// The task runs until aborted; hosts should abort the returned handle
/// on shutdown.
pub fn spawn_metrics_reporter(
    runtime: std::sync::Arc<crate::PluginRuntime>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so the first report
        // covers a full period.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            for (plugin, metrics) in runtime.metrics_snapshot() {
                info!(
                    target: "quill_runtime::metrics",
                    plugin = %plugin,
                    route_calls = metrics.routes.calls,
                    route_errors = metrics.routes.errors,
                    route_avg_latency_ms = metrics.routes.avg_latency_ms,
                    hook_calls = metrics.hooks.calls,
                    hook_errors = metrics.hooks.errors,
                    hook_avg_latency_ms = metrics.hooks.avg_latency_ms,
                    "Plugin metrics"
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let board = MetricsBoard::new();
        board.record_route("p", true, 10);
        board.record_route("p", false, 30);
        board.record_hook("p", true, 5);

        let snap = &board.snapshot()["p"];
        assert_eq!(snap.routes.calls, 2);
        assert_eq!(snap.routes.errors, 1);
        assert_eq!(snap.routes.avg_latency_ms, 20);
        assert_eq!(snap.routes.last_latency_ms, 30);
        assert_eq!(snap.hooks.calls, 1);
        assert_eq!(snap.hooks.errors, 0);
    }

    #[test]
    fn test_empty_board_snapshots_empty() {
        assert!(MetricsBoard::new().snapshot().is_empty());
    }
}
