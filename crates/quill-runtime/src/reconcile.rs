//! Periodic status reconciliation.
//!
//! One pass walks every registry record, compares persisted status
//! against live runtime state (worker registrations, breaker) and
//! repairs drift. Hosts run it on a timer; it is also safe to invoke
//! ad hoc after administrative changes.

use tracing::{debug, info};

use quill_registry::{HealthUpdate, PluginStatus};

use crate::error::RuntimeResult;
use crate::runtime::PluginRuntime;

/// What one reconciler pass changed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Plugins demoted from `active` because no worker is live.
    pub demoted: Vec<String>,
    /// Plugins restored from `degraded` after their breaker was reset.
    pub restored: Vec<String>,
}

impl PluginRuntime {
    /// Run one reconciliation pass over every known plugin.
    ///
    /// An `active` record without live registrations is demoted to
    /// `error`; a `degraded` record whose breaker is no longer open is
    /// restored to `active`. Every plugin gets a fresh health row
    /// reflecting what the pass observed.
    ///
    /// # Errors
    ///
    /// Fails when the registry cannot be read; individual write failures
    /// abort the pass with the underlying error.
    pub async fn reconcile(&self) -> RuntimeResult<ReconcileReport> {
        let infos = self.registry.list_plugins().await?;
        let live: std::collections::HashSet<String> = {
            let tables = self.tables.read().await;
            tables.plugin_dirs.keys().cloned().collect()
        };

        let mut report = ReconcileReport::default();
        for info in infos {
            let name = info.record.name.as_str();
            let is_live = live.contains(name);
            let breaker_open = self.breakers.open_state(name).is_some();

            match info.record.status {
                PluginStatus::Active if !is_live => {
                    info!(plugin = %name, "Active record has no live worker, demoting");
                    self.registry.set_status(name, PluginStatus::Error).await?;
                    self.registry
                        .update_health(
                            name,
                            HealthUpdate::failed("worker not running", None),
                        )
                        .await?;
                    report.demoted.push(name.to_string());
                },
                PluginStatus::Degraded if is_live && !breaker_open => {
                    info!(plugin = %name, "Breaker closed, restoring degraded plugin");
                    self.registry.set_status(name, PluginStatus::Active).await?;
                    self.registry
                        .update_health(name, HealthUpdate::ok(0))
                        .await?;
                    report.restored.push(name.to_string());
                },
                PluginStatus::Degraded => {
                    self.registry
                        .update_health(name, HealthUpdate::breaker_open())
                        .await?;
                },
                PluginStatus::Active | PluginStatus::Error if is_live => {
                    // A healthy row also restores error status to active.
                    self.registry
                        .update_health(name, HealthUpdate::ok(0))
                        .await?;
                },
                PluginStatus::Error => {
                    self.registry
                        .update_health(
                            name,
                            HealthUpdate::failed("worker not running", None),
                        )
                        .await?;
                },
                PluginStatus::Inactive => {
                    debug!(plugin = %name, "Inactive, nothing to reconcile");
                },
                PluginStatus::Active => {},
            }
        }
        Ok(report)
    }
}
