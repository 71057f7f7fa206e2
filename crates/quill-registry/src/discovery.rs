//! Plugin discovery.
//!
//! Scans a plugins root directory, loads and verifies each plugin's
//! manifest, and reconciles it against the stored record. The scan is
//! best-effort: one broken plugin directory is logged and skipped, never
//! aborting the rest of the pass.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use quill_manifest::{PluginManifest, SigningConfig, load_from_disk};

use crate::error::{RegistryError, RegistryResult};
use crate::record::{PermissionGrant, PluginRecord};
use crate::registry::PluginRegistry;

/// Grant author recorded for discovery-time auto-grants.
const DISCOVERY_GRANTOR: &str = "discovery";

/// Outcome of reconciling one manifest against the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// First sighting: record created, permissions auto-granted, plugin
    /// queued for approval.
    New,
    /// Manifest changed: version/description/permissions updated, any
    /// added permissions auto-granted.
    Updated,
    /// Nothing changed; zero writes performed.
    Unchanged,
}

/// Summary of one discovery pass.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// Plugins seen for the first time.
    pub discovered: Vec<String>,
    /// Plugins whose stored record was updated.
    pub updated: Vec<String>,
    /// Plugins with no changes.
    pub unchanged: Vec<String>,
    /// Directories whose manifest failed to load, with the error text.
    pub failed: Vec<(PathBuf, String)>,
}

/// Scans plugin directories and reconciles manifests into the registry.
pub struct PluginDiscovery {
    registry: Arc<PluginRegistry>,
    signing: SigningConfig,
    plugins_root: PathBuf,
}

impl PluginDiscovery {
    /// Create a discovery instance over a plugins root directory.
    #[must_use]
    pub fn new(
        registry: Arc<PluginRegistry>,
        signing: SigningConfig,
        plugins_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            signing,
            plugins_root: plugins_root.into(),
        }
    }

    /// Run one discovery pass over every subdirectory of the root.
    ///
    /// # Errors
    ///
    /// Fails only when the root itself cannot be read; individual plugin
    /// failures are collected in the report.
    pub async fn scan(&self) -> RegistryResult<DiscoveryReport> {
        let mut report = DiscoveryReport::default();

        let entries = std::fs::read_dir(&self.plugins_root).map_err(RegistryError::Scan)?;
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Unreadable entry in plugins directory");
                    continue;
                },
            };
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }

            match self.discover_dir(&dir).await {
                Ok((name, DiscoveryOutcome::New)) => report.discovered.push(name),
                Ok((name, DiscoveryOutcome::Updated)) => report.updated.push(name),
                Ok((name, DiscoveryOutcome::Unchanged)) => report.unchanged.push(name),
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Skipping plugin directory");
                    report.failed.push((dir, e.to_string()));
                },
            }
        }

        info!(
            discovered = report.discovered.len(),
            updated = report.updated.len(),
            unchanged = report.unchanged.len(),
            failed = report.failed.len(),
            "Discovery pass complete"
        );
        Ok(report)
    }

    async fn discover_dir(&self, dir: &Path) -> RegistryResult<(String, DiscoveryOutcome)> {
        let manifest = load_from_disk(dir, &self.signing)?;
        let outcome = self.reconcile_manifest(&manifest).await?;
        Ok((manifest.name, outcome))
    }

    /// Reconcile a loaded manifest against the stored record.
    ///
    /// Idempotent: re-running on an unchanged manifest performs zero
    /// writes. A grown permission set auto-grants only the additions; a
    /// shrunk set never revokes previously granted permissions.
    pub async fn reconcile_manifest(
        &self,
        manifest: &PluginManifest,
    ) -> RegistryResult<DiscoveryOutcome> {
        let requested: Vec<String> = manifest.requested_permissions().into_iter().collect();
        let store = self.registry.store();

        let Some(existing) = store.get_record(&manifest.name).await? else {
            let record = PluginRecord::from_manifest(manifest);
            let grants = requested
                .iter()
                .map(|p| PermissionGrant::granted(&manifest.name, p, Some(DISCOVERY_GRANTOR)))
                .collect();
            self.registry.register_new(record, grants).await?;
            return Ok(DiscoveryOutcome::New);
        };

        let unchanged = existing.permissions == requested
            && existing.version == manifest.version
            && existing.description == manifest.description;
        if unchanged {
            debug!(plugin = %manifest.name, "Manifest unchanged, no writes");
            return Ok(DiscoveryOutcome::Unchanged);
        }

        store
            .update_manifest_fields(
                &manifest.name,
                manifest.version.clone(),
                manifest.description.clone(),
                requested.clone(),
            )
            .await?;

        let mut grants = store.grants_for(&manifest.name).await?;
        let added: Vec<&String> = requested
            .iter()
            .filter(|p| !grants.iter().any(|g| &g.permission == *p))
            .collect();
        if !added.is_empty() {
            info!(plugin = %manifest.name, added = added.len(), "Auto-granting added permissions");
            for permission in added {
                grants.push(PermissionGrant::granted(
                    &manifest.name,
                    permission,
                    Some(DISCOVERY_GRANTOR),
                ));
            }
            // Grants for permissions removed from the manifest are kept:
            // shrinking a requested set does not retract prior grants.
            store.replace_grants(&manifest.name, grants).await?;
        }

        Ok(DiscoveryOutcome::Updated)
    }
}

impl std::fmt::Debug for PluginDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginDiscovery")
            .field("plugins_root", &self.plugins_root)
            .finish_non_exhaustive()
    }
}
