//! Persisted registry row types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use quill_manifest::PluginManifest;

/// Health error recorded when the runtime refused to call a plugin,
/// as opposed to the plugin itself throwing.
pub const BREAKER_OPEN_REASON: &str = "breaker open: calls refused";

/// Persisted plugin lifecycle status.
///
/// Pending approval is tracked separately by the registry, not as a
/// persisted status: an unapproved plugin simply stays `inactive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    /// Approved and registered but not running.
    Inactive,
    /// Worker started; routes and hooks are live.
    Active,
    /// Last operation failed, but the breaker has not tripped.
    Error,
    /// Breaker open; calls are refused until an explicit reset.
    Degraded,
}

impl std::fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Inactive => "inactive",
            Self::Active => "active",
            Self::Error => "error",
            Self::Degraded => "degraded",
        };
        write!(f, "{s}")
    }
}

/// A persisted plugin record, owned by the registry.
///
/// Created on first discovery; mutated by discovery (manifest diff),
/// registry operations (status/settings/grants) and health updates;
/// deleted only on explicit plugin removal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginRecord {
    /// Unique plugin identifier from the manifest.
    pub id: String,
    /// Stable plugin name — the registry key.
    pub name: String,
    /// Human-readable display name.
    pub display_name: String,
    /// Last-known manifest version.
    pub version: Option<String>,
    /// Last-known manifest description.
    pub description: Option<String>,
    /// Lifecycle status.
    pub status: PluginStatus,
    /// Whether this is a system plugin shipped with the host.
    pub is_system: bool,
    /// Opaque settings blob the plugin may read and write.
    pub settings: serde_json::Value,
    /// Last-known requested permission set, sorted.
    pub permissions: Vec<String>,
    /// When the record was first created.
    pub installed_at: DateTime<Utc>,
}

impl PluginRecord {
    /// Build a fresh record from a validated manifest.
    ///
    /// The record starts `inactive` with the manifest's default settings
    /// and its full requested permission set.
    #[must_use]
    pub fn from_manifest(manifest: &PluginManifest) -> Self {
        Self {
            id: manifest.id.clone(),
            name: manifest.name.clone(),
            display_name: manifest.display_name().to_string(),
            version: manifest.version.clone(),
            description: manifest.description.clone(),
            status: PluginStatus::Inactive,
            is_system: manifest.is_system,
            settings: manifest
                .default_settings
                .clone()
                .unwrap_or_else(|| serde_json::json!({})),
            permissions: manifest.requested_permissions().into_iter().collect(),
            installed_at: Utc::now(),
        }
    }
}

/// A persisted permission grant: one row per permission string per plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionGrant {
    /// The plugin the grant belongs to.
    pub plugin: String,
    /// The granted (or explicitly denied) permission string.
    pub permission: String,
    /// Whether the permission is currently allowed.
    pub granted: bool,
    /// When the grant row was written.
    pub granted_at: DateTime<Utc>,
    /// Who wrote the grant (`"discovery"`, an operator id, ...).
    pub granted_by: Option<String>,
}

impl PermissionGrant {
    /// Build a granted row.
    #[must_use]
    pub fn granted(plugin: &str, permission: &str, granted_by: Option<&str>) -> Self {
        Self {
            plugin: plugin.to_string(),
            permission: permission.to_string(),
            granted: true,
            granted_at: Utc::now(),
            granted_by: granted_by.map(ToString::to_string),
        }
    }
}

/// Health outcome of the most recent invocation or reconciler pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// The last call completed normally.
    Ok,
    /// The last call failed or was refused.
    Error,
}

/// The latest persisted health row for a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    /// Outcome classification.
    pub status: HealthStatus,
    /// Error message, when unhealthy.
    pub error: Option<String>,
    /// Latency of the observed call, when applicable.
    pub latency_ms: Option<u64>,
    /// When the row was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// An incoming health observation, before persistence.
#[derive(Debug, Clone, Default)]
pub struct HealthUpdate {
    /// Whether the observed call succeeded.
    pub healthy: bool,
    /// Error message for a failed call.
    pub error: Option<String>,
    /// Observed latency.
    pub latency_ms: Option<u64>,
    /// When true, the runtime refused the call because the breaker is
    /// open; the recorded error is overridden with
    /// [`BREAKER_OPEN_REASON`] so operators can tell "plugin threw" from
    /// "runtime refused to call it".
    pub breaker_open: bool,
}

impl HealthUpdate {
    /// A healthy observation with a latency.
    #[must_use]
    pub fn ok(latency_ms: u64) -> Self {
        Self {
            healthy: true,
            error: None,
            latency_ms: Some(latency_ms),
            breaker_open: false,
        }
    }

    /// A failed observation with an error message.
    #[must_use]
    pub fn failed(error: impl Into<String>, latency_ms: Option<u64>) -> Self {
        Self {
            healthy: false,
            error: Some(error.into()),
            latency_ms,
            breaker_open: false,
        }
    }

    /// A breaker-open refusal.
    #[must_use]
    pub fn breaker_open() -> Self {
        Self {
            healthy: false,
            error: None,
            latency_ms: None,
            breaker_open: true,
        }
    }
}

/// A plugin record enriched for reads: grants attached, missing
/// permissions computed on read (never cached), latest health row.
#[derive(Debug, Clone)]
pub struct PluginInfo {
    /// The persisted record.
    pub record: PluginRecord,
    /// Active grant rows.
    pub grants: Vec<PermissionGrant>,
    /// Requested permissions without a granted row.
    pub missing_permissions: Vec<String>,
    /// Latest health row, if any call has been observed.
    pub health: Option<HealthRecord>,
}
