//! Lifecycle hook fan-out.
//!
//! Hooks run sequentially in registration order, each raced against the
//! configured timeout. One plugin's failure or timeout never prevents
//! the remaining handlers from running. Plugins with an open breaker or
//! a fault count already at the threshold are skipped outright, and a
//! skip records no new fault.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::runtime::{PluginRuntime, RegisteredHook};

/// Result of one handler within a hook emission.
#[derive(Debug)]
pub enum HookOutcome {
    /// The handler completed normally.
    Completed {
        /// The handling plugin.
        plugin: String,
        /// How long the handler ran.
        latency_ms: u64,
    },
    /// The handler returned an error.
    Failed {
        /// The handling plugin.
        plugin: String,
        /// The error message.
        error: String,
    },
    /// The handler exceeded the hook timeout and was cancelled.
    TimedOut {
        /// The handling plugin.
        plugin: String,
    },
    /// The handler was never invoked.
    Skipped {
        /// The plugin that was skipped.
        plugin: String,
        /// Why it was skipped.
        reason: &'static str,
    },
}

impl HookOutcome {
    /// The plugin this outcome belongs to.
    #[must_use]
    pub fn plugin(&self) -> &str {
        match self {
            Self::Completed { plugin, .. }
            | Self::Failed { plugin, .. }
            | Self::TimedOut { plugin }
            | Self::Skipped { plugin, .. } => plugin,
        }
    }

    /// Whether the handler ran to successful completion.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

impl PluginRuntime {
    /// Emit a lifecycle hook to every registered handler.
    ///
    /// Returns one outcome per registered handler, in invocation order.
    /// An unknown hook name returns an empty vector; emitting to nobody
    /// is not an error.
    pub async fn emit_hook(&self, name: &str, payload: &serde_json::Value) -> Vec<HookOutcome> {
        let handlers: Vec<Arc<RegisteredHook>> = self
            .tables
            .read()
            .await
            .hooks
            .get(name)
            .cloned()
            .unwrap_or_default();

        let mut outcomes = Vec::with_capacity(handlers.len());
        for hook in handlers {
            outcomes.push(self.invoke_hook(name, &hook, payload).await);
        }
        outcomes
    }

    async fn invoke_hook(
        &self,
        name: &str,
        hook: &RegisteredHook,
        payload: &serde_json::Value,
    ) -> HookOutcome {
        let plugin = hook.plugin.clone();

        if self.breakers.open_state(&plugin).is_some() {
            debug!(hook = %name, plugin = %plugin, "Skipping handler, breaker open");
            return HookOutcome::Skipped {
                plugin,
                reason: "breaker open",
            };
        }
        if self.breakers.consecutive(&plugin) >= self.config.breaker_threshold {
            debug!(hook = %name, plugin = %plugin, "Skipping handler, fault count at threshold");
            return HookOutcome::Skipped {
                plugin,
                reason: "error threshold reached",
            };
        }

        let sandboxes = self.build_sandboxes(&hook.capabilities, &hook.plugin_dir);
        let start = Instant::now();
        let result = tokio::time::timeout(
            self.config.hook_timeout,
            hook.handler.handle(payload, &sandboxes),
        )
        .await;
        let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(Ok(())) => {
                self.metrics.record_hook(&plugin, true, latency_ms);
                self.note_success(&plugin, latency_ms).await;
                HookOutcome::Completed { plugin, latency_ms }
            },
            Ok(Err(e)) => {
                let error = e.to_string();
                warn!(hook = %name, plugin = %plugin, error = %error, "Hook handler failed");
                self.metrics.record_hook(&plugin, false, latency_ms);
                self.note_failure(&plugin, &error, Some(latency_ms)).await;
                HookOutcome::Failed { plugin, error }
            },
            Err(_) => {
                let message = format!(
                    "hook {name} timed out after {}ms",
                    self.config.hook_timeout.as_millis()
                );
                warn!(hook = %name, plugin = %plugin, "Hook handler timed out, future dropped");
                self.metrics.record_hook(&plugin, false, latency_ms);
                self.note_failure(&plugin, &message, Some(latency_ms)).await;
                HookOutcome::TimedOut { plugin }
            },
        }
    }
}
