//! The plugin registry facade.
//!
//! Sole mutation entry point for persisted plugin state. Reads are
//! enriched on the fly: grants attached, `missing_permissions` computed
//! per read (never cached), latest health row joined in.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{RegistryError, RegistryResult};
use crate::record::{
    BREAKER_OPEN_REASON, HealthRecord, HealthStatus, HealthUpdate, PermissionGrant, PluginInfo,
    PluginRecord, PluginStatus,
};
use crate::store::RegistryStore;

/// Registry of persisted plugin state.
pub struct PluginRegistry {
    store: Arc<dyn RegistryStore>,
    pending: RwLock<BTreeSet<String>>,
}

impl PluginRegistry {
    /// Create a registry over a store.
    #[must_use]
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self {
            store,
            pending: RwLock::new(BTreeSet::new()),
        }
    }

    /// List all plugins, enriched with grants, missing permissions and
    /// latest health.
    pub async fn list_plugins(&self) -> RegistryResult<Vec<PluginInfo>> {
        let records = self.store.list_records().await?;
        let mut infos = Vec::with_capacity(records.len());
        for record in records {
            infos.push(self.enrich(record).await?);
        }
        Ok(infos)
    }

    /// Fetch one plugin by name, enriched.
    pub async fn get_plugin_by_name(&self, name: &str) -> RegistryResult<Option<PluginInfo>> {
        match self.store.get_record(name).await? {
            Some(record) => Ok(Some(self.enrich(record).await?)),
            None => Ok(None),
        }
    }

    async fn enrich(&self, record: PluginRecord) -> RegistryResult<PluginInfo> {
        let grants = self.store.grants_for(&record.name).await?;
        let granted: BTreeSet<&str> = grants
            .iter()
            .filter(|g| g.granted)
            .map(|g| g.permission.as_str())
            .collect();
        let missing_permissions: Vec<String> = record
            .permissions
            .iter()
            .filter(|p| !granted.contains(p.as_str()))
            .cloned()
            .collect();
        let health = self.store.latest_health(&record.name).await?;
        Ok(PluginInfo {
            record,
            grants,
            missing_permissions,
            health,
        })
    }

    /// Register a brand-new plugin: insert its record, write its initial
    /// grant set, and queue it for approval.
    ///
    /// Discovery is the normal caller; hosts embedding the runtime may
    /// call it directly to seed system plugins.
    pub async fn register_new(
        &self,
        record: PluginRecord,
        grants: Vec<PermissionGrant>,
    ) -> RegistryResult<()> {
        let name = record.name.clone();
        self.store.insert_record(record).await?;
        self.store.replace_grants(&name, grants).await?;
        self.pending.write().await.insert(name.clone());
        info!(plugin = %name, "Registered new plugin, pending approval");
        Ok(())
    }

    /// Set a plugin's status.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::PendingApproval`] when the plugin has not
    /// been approved yet and the target status is anything but
    /// `inactive`.
    pub async fn set_status(&self, name: &str, status: PluginStatus) -> RegistryResult<()> {
        if status != PluginStatus::Inactive && self.pending.read().await.contains(name) {
            return Err(RegistryError::PendingApproval(name.to_string()));
        }
        self.store.update_status(name, status).await?;
        debug!(plugin = %name, status = %status, "Plugin status updated");
        Ok(())
    }

    /// Save a plugin's opaque settings blob.
    pub async fn save_settings(
        &self,
        name: &str,
        settings: serde_json::Value,
    ) -> RegistryResult<()> {
        self.store.update_settings(name, settings).await
    }

    /// Record a health observation.
    ///
    /// A `breaker_open` observation overrides the error with the
    /// [`BREAKER_OPEN_REASON`] sentinel. A healthy observation on a
    /// plugin currently in `error` status restores it to `active`.
    pub async fn update_health(&self, name: &str, update: HealthUpdate) -> RegistryResult<()> {
        let error = if update.breaker_open {
            Some(BREAKER_OPEN_REASON.to_string())
        } else {
            update.error
        };
        let health = HealthRecord {
            status: if update.healthy {
                HealthStatus::Ok
            } else {
                HealthStatus::Error
            },
            error,
            latency_ms: update.latency_ms,
            recorded_at: Utc::now(),
        };
        self.store.set_health(name, health).await?;

        if update.healthy {
            if let Some(record) = self.store.get_record(name).await? {
                if record.status == PluginStatus::Error {
                    self.store.update_status(name, PluginStatus::Active).await?;
                    debug!(plugin = %name, "Healthy call restored plugin from error to active");
                }
            }
        }
        Ok(())
    }

    /// Replace a plugin's grant set.
    pub async fn set_permission_grants(
        &self,
        name: &str,
        grants: Vec<PermissionGrant>,
    ) -> RegistryResult<()> {
        if self.store.get_record(name).await?.is_none() {
            return Err(RegistryError::NotFound(name.to_string()));
        }
        let count = grants.len();
        self.store.replace_grants(name, grants).await?;
        debug!(plugin = %name, grants = count, "Replaced permission grants");
        Ok(())
    }

    /// Approve a pending plugin, allowing status transitions past
    /// `inactive`.
    pub async fn approve(&self, name: &str) -> RegistryResult<()> {
        if self.store.get_record(name).await?.is_none() {
            return Err(RegistryError::NotFound(name.to_string()));
        }
        if self.pending.write().await.remove(name) {
            info!(plugin = %name, "Plugin approved");
        } else {
            warn!(plugin = %name, "Approve called for a plugin that was not pending");
        }
        Ok(())
    }

    /// Names currently awaiting approval.
    pub async fn pending_approval(&self) -> Vec<String> {
        self.pending.read().await.iter().cloned().collect()
    }

    /// Whether a plugin is awaiting approval.
    pub async fn is_pending(&self, name: &str) -> bool {
        self.pending.read().await.contains(name)
    }

    /// Remove a plugin entirely, cascading to grants and health rows.
    pub async fn remove_plugin(&self, name: &str) -> RegistryResult<()> {
        self.store.delete_record(name).await?;
        self.pending.write().await.remove(name);
        info!(plugin = %name, "Plugin removed");
        Ok(())
    }

    /// Direct access to the backing store, for discovery's diffing.
    pub(crate) fn store(&self) -> &Arc<dyn RegistryStore> {
        &self.store
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry").finish_non_exhaustive()
    }
}
