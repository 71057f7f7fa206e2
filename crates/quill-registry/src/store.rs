//! Registry persistence seam.
//!
//! The runtime needs only a narrow read/write contract from its
//! relational store: keyed lookups, single-row updates by name, and
//! delete-then-insert grant replacement. [`RegistryStore`] captures that
//! contract; [`MemoryRegistryStore`] implements it in memory for tests
//! and embedded use. Production deployments implement the trait over the
//! host CMS database.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{RegistryError, RegistryResult};
use crate::record::{HealthRecord, PermissionGrant, PluginRecord, PluginStatus};

/// Narrow persistence contract for registry state.
///
/// Grant replacement is delete-all-then-insert within one call, so a
/// single reconciliation never observes a partially-updated grant set.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Insert a brand-new plugin record.
    async fn insert_record(&self, record: PluginRecord) -> RegistryResult<()>;

    /// Fetch a record by plugin name.
    async fn get_record(&self, name: &str) -> RegistryResult<Option<PluginRecord>>;

    /// List all records.
    async fn list_records(&self) -> RegistryResult<Vec<PluginRecord>>;

    /// Single-row status update by name.
    async fn update_status(&self, name: &str, status: PluginStatus) -> RegistryResult<()>;

    /// Single-row settings update by name.
    async fn update_settings(&self, name: &str, settings: serde_json::Value)
    -> RegistryResult<()>;

    /// Update the manifest-derived fields after a rediscovery diff.
    async fn update_manifest_fields(
        &self,
        name: &str,
        version: Option<String>,
        description: Option<String>,
        permissions: Vec<String>,
    ) -> RegistryResult<()>;

    /// Record the latest health row for a plugin.
    async fn set_health(&self, name: &str, health: HealthRecord) -> RegistryResult<()>;

    /// Fetch the latest health row for a plugin.
    async fn latest_health(&self, name: &str) -> RegistryResult<Option<HealthRecord>>;

    /// Replace a plugin's grant set (delete-all-then-insert).
    async fn replace_grants(
        &self,
        name: &str,
        grants: Vec<PermissionGrant>,
    ) -> RegistryResult<()>;

    /// Fetch a plugin's grant rows.
    async fn grants_for(&self, name: &str) -> RegistryResult<Vec<PermissionGrant>>;

    /// Delete a record and cascade to its grants and health rows.
    async fn delete_record(&self, name: &str) -> RegistryResult<()>;
}

#[derive(Default)]
struct Tables {
    records: HashMap<String, PluginRecord>,
    grants: HashMap<String, Vec<PermissionGrant>>,
    health: HashMap<String, HealthRecord>,
}

/// In-memory [`RegistryStore`] implementation.
#[derive(Default)]
pub struct MemoryRegistryStore {
    tables: RwLock<Tables>,
}

impl MemoryRegistryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for MemoryRegistryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRegistryStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistryStore {
    async fn insert_record(&self, record: PluginRecord) -> RegistryResult<()> {
        let mut tables = self.tables.write().await;
        if tables.records.contains_key(&record.name) {
            return Err(RegistryError::AlreadyRegistered(record.name));
        }
        tables.records.insert(record.name.clone(), record);
        Ok(())
    }

    async fn get_record(&self, name: &str) -> RegistryResult<Option<PluginRecord>> {
        Ok(self.tables.read().await.records.get(name).cloned())
    }

    async fn list_records(&self) -> RegistryResult<Vec<PluginRecord>> {
        let mut records: Vec<PluginRecord> =
            self.tables.read().await.records.values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    async fn update_status(&self, name: &str, status: PluginStatus) -> RegistryResult<()> {
        let mut tables = self.tables.write().await;
        let record = tables
            .records
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        record.status = status;
        Ok(())
    }

    async fn update_settings(
        &self,
        name: &str,
        settings: serde_json::Value,
    ) -> RegistryResult<()> {
        let mut tables = self.tables.write().await;
        let record = tables
            .records
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        record.settings = settings;
        Ok(())
    }

    async fn update_manifest_fields(
        &self,
        name: &str,
        version: Option<String>,
        description: Option<String>,
        permissions: Vec<String>,
    ) -> RegistryResult<()> {
        let mut tables = self.tables.write().await;
        let record = tables
            .records
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        record.version = version;
        record.description = description;
        record.permissions = permissions;
        Ok(())
    }

    async fn set_health(&self, name: &str, health: HealthRecord) -> RegistryResult<()> {
        self.tables
            .write()
            .await
            .health
            .insert(name.to_string(), health);
        Ok(())
    }

    async fn latest_health(&self, name: &str) -> RegistryResult<Option<HealthRecord>> {
        Ok(self.tables.read().await.health.get(name).cloned())
    }

    async fn replace_grants(
        &self,
        name: &str,
        grants: Vec<PermissionGrant>,
    ) -> RegistryResult<()> {
        self.tables
            .write()
            .await
            .grants
            .insert(name.to_string(), grants);
        Ok(())
    }

    async fn grants_for(&self, name: &str) -> RegistryResult<Vec<PermissionGrant>> {
        Ok(self
            .tables
            .read()
            .await
            .grants
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_record(&self, name: &str) -> RegistryResult<()> {
        let mut tables = self.tables.write().await;
        tables
            .records
            .remove(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        tables.grants.remove(name);
        tables.health.remove(name);
        Ok(())
    }
}
