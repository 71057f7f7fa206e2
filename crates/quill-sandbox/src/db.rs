//! Read-only database sandbox.
//!
//! Wraps the host's query executor behind a SELECT-shaped guard with a
//! statement length ceiling and per-request quotas on query count and
//! cumulative wall-clock time. Exceeding a quota fails the *next* call,
//! never retroactively.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{SandboxError, SandboxResult};

/// The host's database access seam.
///
/// The execution runtime supplies one implementation backed by the real
/// relational store; tests supply counters and canned rows.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run a (pre-validated) statement and return its rows as JSON values.
    async fn query(
        &self,
        statement: &str,
        params: &[serde_json::Value],
    ) -> Result<Vec<serde_json::Value>, String>;
}

/// Per-request limits for the DB sandbox.
#[derive(Debug, Clone)]
pub struct DbLimits {
    /// Maximum number of queries per request.
    pub max_queries: u32,
    /// Maximum cumulative query wall-clock time per request.
    pub max_total_time: Duration,
    /// Maximum statement length in bytes.
    pub max_statement_len: usize,
}

impl Default for DbLimits {
    fn default() -> Self {
        Self {
            max_queries: 5,
            max_total_time: Duration::from_secs(2),
            max_statement_len: 8 * 1024,
        }
    }
}

/// Read-only, quota-enforcing database wrapper handed to plugin handlers.
///
/// Constructed fresh per invocation, so the quota counters are scoped to
/// a single request. There is no write entry point: the interface is
/// read-only by construction.
pub struct DbSandbox {
    enabled: bool,
    executor: Arc<dyn QueryExecutor>,
    limits: DbLimits,
    queries_used: AtomicU32,
    time_used_ms: AtomicU64,
}

impl DbSandbox {
    /// Create a sandbox over the host executor.
    ///
    /// `enabled` reflects the registration's `db_read` capability; a
    /// disabled sandbox fails every call with a capability error.
    #[must_use]
    pub fn new(executor: Arc<dyn QueryExecutor>, enabled: bool, limits: DbLimits) -> Self {
        Self {
            enabled,
            executor,
            limits,
            queries_used: AtomicU32::new(0),
            time_used_ms: AtomicU64::new(0),
        }
    }

    /// Run a SELECT-shaped statement.
    ///
    /// # Errors
    ///
    /// Fails with a [`SandboxError`] before reaching the executor when the
    /// capability is absent, the statement is not SELECT-shaped or too
    /// long, or a per-request quota is already exhausted. Executor
    /// failures surface as [`SandboxError::Backend`].
    pub async fn query(
        &self,
        statement: &str,
        params: &[serde_json::Value],
    ) -> SandboxResult<Vec<serde_json::Value>> {
        if !self.enabled {
            return Err(SandboxError::CapabilityDenied("db:read"));
        }
        if !is_select_shaped(statement) {
            return Err(SandboxError::StatementRejected(truncated(statement)));
        }
        if statement.len() > self.limits.max_statement_len {
            return Err(SandboxError::StatementTooLong {
                len: statement.len(),
                limit: self.limits.max_statement_len,
            });
        }
        if self.queries_used.load(Ordering::Relaxed) >= self.limits.max_queries {
            return Err(SandboxError::QuotaExceeded {
                resource: "db queries",
                limit: u64::from(self.limits.max_queries),
            });
        }
        let budget_ms = u64::try_from(self.limits.max_total_time.as_millis()).unwrap_or(u64::MAX);
        if self.time_used_ms.load(Ordering::Relaxed) >= budget_ms {
            return Err(SandboxError::QuotaExceeded {
                resource: "db time",
                limit: budget_ms,
            });
        }

        self.queries_used.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();
        let result = self.executor.query(statement, params).await;
        let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.time_used_ms.fetch_add(elapsed_ms, Ordering::Relaxed);

        debug!(elapsed_ms, ok = result.is_ok(), "Sandboxed query finished");
        result.map_err(SandboxError::Backend)
    }
}

impl std::fmt::Debug for DbSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbSandbox")
            .field("enabled", &self.enabled)
            .field("queries_used", &self.queries_used)
            .finish_non_exhaustive()
    }
}

/// Whether a statement matches the SELECT-shaped prefixes the sandbox
/// allows. `WITH` is accepted for CTE-style reads; anything a CTE could
/// smuggle in still runs under the host executor's read-only connection.
fn is_select_shaped(statement: &str) -> bool {
    let trimmed = statement.trim_start();
    trimmed
        .get(..6)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("select"))
        || trimmed
            .get(..5)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("with "))
}

fn truncated(statement: &str) -> String {
    const MAX: usize = 80;
    let trimmed = statement.trim();
    if trimmed.len() <= MAX {
        trimmed.to_string()
    } else {
        let mut end = MAX;
        while !trimmed.is_char_boundary(end) {
            end = end.saturating_sub(1);
        }
        format!("{}…", &trimmed[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Executor that counts invocations and returns one canned row.
    struct CountingExecutor {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl CountingExecutor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl QueryExecutor for CountingExecutor {
        async fn query(
            &self,
            _statement: &str,
            _params: &[serde_json::Value],
        ) -> Result<Vec<serde_json::Value>, String> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            Ok(vec![serde_json::json!({ "id": 1 })])
        }
    }

    #[tokio::test]
    async fn test_select_passes_through() {
        let executor = CountingExecutor::new();
        let db = DbSandbox::new(executor.clone(), true, DbLimits::default());
        let rows = db.query("SELECT id FROM posts", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(executor.call_count(), 1);
    }

    #[tokio::test]
    async fn test_non_select_rejected_before_executor() {
        let executor = CountingExecutor::new();
        let db = DbSandbox::new(executor.clone(), true, DbLimits::default());
        for statement in ["DELETE FROM posts", "update posts set x=1", "DROP TABLE posts"] {
            let err = db.query(statement, &[]).await.unwrap_err();
            assert!(matches!(err, SandboxError::StatementRejected(_)));
        }
        assert_eq!(executor.call_count(), 0, "executor must never be reached");
    }

    #[tokio::test]
    async fn test_lowercase_select_allowed() {
        let executor = CountingExecutor::new();
        let db = DbSandbox::new(executor, true, DbLimits::default());
        assert!(db.query("  select 1", &[]).await.is_ok());
    }

    #[tokio::test]
    async fn test_cte_reads_allowed() {
        let executor = CountingExecutor::new();
        let db = DbSandbox::new(executor, true, DbLimits::default());
        assert!(
            db.query("WITH recent AS (SELECT 1) SELECT * FROM recent", &[])
                .await
                .is_ok()
        );
        // "WITH" must be a whole word, not a prefix of something else.
        assert!(db.query("WITHDRAW money", &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_oversized_statement_rejected() {
        let executor = CountingExecutor::new();
        let db = DbSandbox::new(executor.clone(), true, DbLimits::default());
        let statement = format!("SELECT {}", "x,".repeat(8 * 1024));
        let err = db.query(&statement, &[]).await.unwrap_err();
        assert!(matches!(err, SandboxError::StatementTooLong { .. }));
        assert_eq!(executor.call_count(), 0);
    }

    #[tokio::test]
    async fn test_query_quota_fails_sixth_call_only() {
        let executor = CountingExecutor::new();
        let db = DbSandbox::new(executor.clone(), true, DbLimits::default());
        for _ in 0..5 {
            db.query("SELECT 1", &[]).await.unwrap();
        }
        let err = db.query("SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(
            err,
            SandboxError::QuotaExceeded { resource: "db queries", .. }
        ));
        assert_eq!(executor.call_count(), 5);
    }

    #[tokio::test]
    async fn test_time_quota_fails_next_call_not_current() {
        let executor = CountingExecutor::slow(Duration::from_millis(30));
        let limits = DbLimits {
            max_total_time: Duration::from_millis(10),
            ..DbLimits::default()
        };
        let db = DbSandbox::new(executor.clone(), true, limits);
        // First call runs over budget but succeeds; only the next one fails.
        db.query("SELECT 1", &[]).await.unwrap();
        let err = db.query("SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(
            err,
            SandboxError::QuotaExceeded { resource: "db time", .. }
        ));
        assert_eq!(executor.call_count(), 1);
    }

    #[tokio::test]
    async fn test_disabled_sandbox_denies_capability() {
        let executor = CountingExecutor::new();
        let db = DbSandbox::new(executor.clone(), false, DbLimits::default());
        let err = db.query("SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err, SandboxError::CapabilityDenied("db:read")));
        assert_eq!(executor.call_count(), 0);
    }
}
