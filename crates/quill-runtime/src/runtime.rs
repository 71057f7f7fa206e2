//! The plugin execution runtime.
//!
//! [`PluginRuntime`] is an explicit context object: route tables, hook
//! tables, extension registries, breaker board, rate limiter and metrics
//! all hang off one instance the host owns. Nothing is process-global,
//! so tests and multi-tenant hosts can run several runtimes side by
//! side.

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{info, warn};

use quill_manifest::{HOOK_PREFIX, PluginManifest};
use quill_registry::{HealthUpdate, PluginRegistry, PluginStatus};
use quill_sandbox::{
    DbLimits, DbSandbox, FsSandbox, HttpLimits, HttpSandbox, QueryExecutor, SandboxCapabilities,
};

use crate::breaker::{BreakerBoard, BreakerState};
use crate::error::{RuntimeError, RuntimeResult};
use crate::extensions::{ExtensionRegistries, UiExtensionEntry};
use crate::handler::{HookHandler, RouteHandler, SandboxSet};
use crate::metrics::{MetricsBoard, PluginMetrics};
use crate::rate_limit::RateLimiter;

/// Tunables for one runtime instance.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Consecutive faults at which the breaker trips.
    pub breaker_threshold: u32,
    /// Hard timeout applied to each hook handler invocation.
    pub hook_timeout: Duration,
    /// Requests allowed per plugin per rate-limit window.
    pub rate_limit_max: u32,
    /// Length of the fixed rate-limit window.
    pub rate_limit_window: Duration,
    /// Per-invocation DB sandbox limits.
    pub db_limits: DbLimits,
    /// Per-invocation HTTP sandbox limits.
    pub http_limits: HttpLimits,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            breaker_threshold: 5,
            hook_timeout: Duration::from_secs(5),
            rate_limit_max: 60,
            rate_limit_window: Duration::from_secs(60),
            db_limits: DbLimits::default(),
            http_limits: HttpLimits::default(),
        }
    }
}

/// A committed route registration.
pub(crate) struct RegisteredRoute {
    pub(crate) plugin: String,
    pub(crate) method: String,
    pub(crate) path: String,
    pub(crate) capabilities: SandboxCapabilities,
    pub(crate) plugin_dir: PathBuf,
    pub(crate) handler: Arc<dyn RouteHandler>,
}

/// A committed hook registration.
pub(crate) struct RegisteredHook {
    pub(crate) plugin: String,
    pub(crate) capabilities: SandboxCapabilities,
    pub(crate) plugin_dir: PathBuf,
    pub(crate) handler: Arc<dyn HookHandler>,
}

#[derive(Default)]
pub(crate) struct RuntimeTables {
    /// Exact-match route index, keyed `METHOD:plugin:path`.
    pub(crate) routes: HashMap<String, Arc<RegisteredRoute>>,
    /// Hook handlers per hook name, in registration order.
    pub(crate) hooks: HashMap<String, Vec<Arc<RegisteredHook>>>,
    pub(crate) extensions: ExtensionRegistries,
    pub(crate) plugin_dirs: HashMap<String, PathBuf>,
}

pub(crate) fn route_key(method: &str, plugin: &str, path: &str) -> String {
    format!("{}:{plugin}:{path}", method.to_uppercase())
}

/// The execution runtime for capability-gated plugins.
pub struct PluginRuntime {
    pub(crate) registry: Arc<PluginRegistry>,
    pub(crate) executor: Arc<dyn QueryExecutor>,
    pub(crate) config: RuntimeConfig,
    pub(crate) tables: RwLock<RuntimeTables>,
    pub(crate) breakers: BreakerBoard,
    pub(crate) limiter: RateLimiter,
    pub(crate) metrics: MetricsBoard,
}

impl PluginRuntime {
    /// Create a runtime over a registry and the host's query executor.
    #[must_use]
    pub fn new(
        registry: Arc<PluginRegistry>,
        executor: Arc<dyn QueryExecutor>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            registry,
            executor,
            breakers: BreakerBoard::new(config.breaker_threshold),
            limiter: RateLimiter::new(config.rate_limit_max, config.rate_limit_window),
            metrics: MetricsBoard::new(),
            config,
            tables: RwLock::new(RuntimeTables::default()),
        }
    }

    /// The registry this runtime reads and updates.
    #[must_use]
    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Start a plugin worker.
    ///
    /// Asserts the full grant set up front, runs the plugin's
    /// registration callback against a [`PluginRegistrar`], and commits
    /// the collected registrations atomically. On any failure nothing is
    /// committed and the plugin's tables are left as they were.
    ///
    /// # Errors
    ///
    /// Fails when the plugin is unknown or unapproved, when any requested
    /// permission lacks a grant, or when the registration callback
    /// returns an error.
    pub async fn start_plugin<F>(
        &self,
        manifest: &PluginManifest,
        plugin_dir: impl Into<PathBuf>,
        setup: F,
    ) -> RuntimeResult<()>
    where
        F: FnOnce(&mut PluginRegistrar<'_>) -> RuntimeResult<()>,
    {
        let name = manifest.name.as_str();
        if self.registry.is_pending(name).await {
            return Err(quill_registry::RegistryError::PendingApproval(name.to_string()).into());
        }
        let info = self
            .registry
            .get_plugin_by_name(name)
            .await?
            .ok_or_else(|| RuntimeError::UnknownPlugin(name.to_string()))?;

        let granted: HashSet<String> = info
            .grants
            .iter()
            .filter(|g| g.granted)
            .map(|g| g.permission.clone())
            .collect();
        let missing = manifest.missing_permissions(granted.iter().map(String::as_str));
        if !missing.is_empty() {
            return Err(RuntimeError::MissingPermissions {
                plugin: name.to_string(),
                missing,
            });
        }

        let plugin_dir = plugin_dir.into();
        let mut registrar = PluginRegistrar {
            manifest,
            plugin_dir: plugin_dir.clone(),
            granted,
            capabilities: SandboxCapabilities::new(
                manifest.capabilities.db.read,
                manifest.capabilities.fs.read,
                manifest.capabilities.http.outbound,
                manifest.http_allowlist.clone(),
            ),
            routes: Vec::new(),
            hooks: Vec::new(),
            slots: Vec::new(),
            widgets: Vec::new(),
            assets: Vec::new(),
        };
        setup(&mut registrar)?;

        let route_count = registrar.routes.len();
        let hook_count = registrar.hooks.len();

        // Commit: replace any previous registrations for this plugin.
        {
            let mut tables = self.tables.write().await;
            remove_plugin_entries(&mut tables, name);
            for route in registrar.routes {
                let key = route_key(&route.method, name, &route.path);
                tables.routes.insert(key, Arc::new(route));
            }
            for (hook_name, hook) in registrar.hooks {
                tables.hooks.entry(hook_name).or_default().push(Arc::new(hook));
            }
            tables.extensions.slots.extend(registrar.slots);
            tables.extensions.widgets.extend(registrar.widgets);
            tables.extensions.assets.extend(registrar.assets);
            tables.plugin_dirs.insert(name.to_string(), plugin_dir);
        }

        // Fresh worker, fresh failure history.
        self.breakers.reset(name);
        self.limiter.clear(name);

        self.registry.set_status(name, PluginStatus::Active).await?;
        info!(
            plugin = %name,
            routes = route_count,
            hooks = hook_count,
            "Plugin worker started"
        );
        Ok(())
    }

    /// Stop a plugin worker: clear its registrations and mark it
    /// inactive.
    ///
    /// # Errors
    ///
    /// Fails when the plugin has no registry record.
    pub async fn stop_plugin(&self, name: &str) -> RuntimeResult<()> {
        self.clear_plugin(name).await;
        self.registry.set_status(name, PluginStatus::Inactive).await?;
        info!(plugin = %name, "Plugin worker stopped");
        Ok(())
    }

    /// Remove every live registration belonging to a plugin: routes,
    /// hooks, extensions, directory mapping, breaker and rate-limit
    /// state. Metrics are kept; they are history, not worker state.
    pub async fn clear_plugin(&self, name: &str) {
        let mut tables = self.tables.write().await;
        remove_plugin_entries(&mut tables, name);
        drop(tables);
        self.breakers.reset(name);
        self.limiter.clear(name);
    }

    /// Explicitly close a plugin's breaker and restore it to `active`.
    ///
    /// This is the only path out of `degraded`; successful calls alone
    /// never close an open breaker.
    ///
    /// # Errors
    ///
    /// Fails when the status update is rejected by the registry.
    pub async fn reset_breaker(&self, name: &str) -> RuntimeResult<()> {
        self.breakers.reset(name);
        let live = self.tables.read().await.plugin_dirs.contains_key(name);
        if live {
            self.registry.set_status(name, PluginStatus::Active).await?;
            self.registry.update_health(name, HealthUpdate::ok(0)).await?;
        }
        info!(plugin = %name, "Breaker reset");
        Ok(())
    }

    /// Whether a plugin's breaker is currently open.
    pub fn breaker_state(&self, name: &str) -> Option<BreakerState> {
        self.breakers.open_state(name)
    }

    /// A point-in-time snapshot of every plugin's counters.
    #[must_use]
    pub fn metrics_snapshot(&self) -> std::collections::BTreeMap<String, PluginMetrics> {
        self.metrics.snapshot()
    }

    /// All registered UI slot entries.
    pub async fn slots(&self) -> Vec<UiExtensionEntry> {
        self.tables.read().await.extensions.slots.clone()
    }

    /// Entries contributed to a named UI slot, in registration order.
    pub async fn slot_entries(&self, slot: &str) -> Vec<UiExtensionEntry> {
        self.tables
            .read()
            .await
            .extensions
            .slots
            .iter()
            .filter(|e| e.name == slot)
            .cloned()
            .collect()
    }

    /// All registered dashboard widgets.
    pub async fn widgets(&self) -> Vec<UiExtensionEntry> {
        self.tables.read().await.extensions.widgets.clone()
    }

    /// All registered static assets.
    pub async fn assets(&self) -> Vec<UiExtensionEntry> {
        self.tables.read().await.extensions.assets.clone()
    }

    /// Resolve a static asset path under a plugin's `public/` directory.
    ///
    /// # Errors
    ///
    /// Fails when the plugin has no live worker or the relative path
    /// tries to escape the public root.
    pub async fn resolve_static(&self, plugin: &str, rel: &str) -> RuntimeResult<PathBuf> {
        let tables = self.tables.read().await;
        let dir = tables
            .plugin_dirs
            .get(plugin)
            .ok_or_else(|| RuntimeError::UnknownPlugin(plugin.to_string()))?;

        let rel_path = Path::new(rel);
        if rel_path.is_absolute() {
            return Err(RuntimeError::PathEscape(rel.to_string()));
        }
        for component in rel_path.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {},
                _ => return Err(RuntimeError::PathEscape(rel.to_string())),
            }
        }
        Ok(dir.join("public").join(rel_path))
    }

    /// Build the per-invocation sandbox set for a registration.
    pub(crate) fn build_sandboxes(
        &self,
        capabilities: &SandboxCapabilities,
        plugin_dir: &Path,
    ) -> SandboxSet {
        SandboxSet {
            db: DbSandbox::new(
                self.executor.clone(),
                capabilities.db_read,
                self.config.db_limits.clone(),
            ),
            fs: if capabilities.fs_read {
                FsSandbox::rooted(plugin_dir)
            } else {
                FsSandbox::denied()
            },
            http: HttpSandbox::new(
                capabilities.http_allowlist.clone(),
                self.config.http_limits.clone(),
            ),
        }
    }

    /// Record a plugin fault: bump the breaker, and persist either an
    /// error health row or, when this fault tripped the breaker, the
    /// degraded status with a breaker-open health row.
    pub(crate) async fn note_failure(&self, plugin: &str, message: &str, latency_ms: Option<u64>) {
        if let Some(state) = self.breakers.record_failure(plugin, message) {
            warn!(plugin = %plugin, reason = %state.reason, "Circuit breaker tripped");
            if let Err(e) = self.registry.set_status(plugin, PluginStatus::Degraded).await {
                warn!(plugin = %plugin, error = %e, "Failed to persist degraded status");
            }
            if let Err(e) = self
                .registry
                .update_health(plugin, HealthUpdate::breaker_open())
                .await
            {
                warn!(plugin = %plugin, error = %e, "Failed to persist breaker health");
            }
        } else {
            if let Err(e) = self.registry.set_status(plugin, PluginStatus::Error).await {
                warn!(plugin = %plugin, error = %e, "Failed to persist error status");
            }
            if let Err(e) = self
                .registry
                .update_health(plugin, HealthUpdate::failed(message, latency_ms))
                .await
            {
                warn!(plugin = %plugin, error = %e, "Failed to persist failure health");
            }
        }
    }

    /// Record a successful invocation: reset the fault count and persist
    /// a healthy row (which restores `error` status to `active`).
    pub(crate) async fn note_success(&self, plugin: &str, latency_ms: u64) {
        self.breakers.record_success(plugin);
        if let Err(e) = self
            .registry
            .update_health(plugin, HealthUpdate::ok(latency_ms))
            .await
        {
            warn!(plugin = %plugin, error = %e, "Failed to persist healthy row");
        }
    }
}

impl std::fmt::Debug for PluginRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRuntime")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn remove_plugin_entries(tables: &mut RuntimeTables, name: &str) {
    tables.routes.retain(|_, r| r.plugin != name);
    for handlers in tables.hooks.values_mut() {
        handlers.retain(|h| h.plugin != name);
    }
    tables.hooks.retain(|_, handlers| !handlers.is_empty());
    tables.extensions.clear_plugin(name);
    tables.plugin_dirs.remove(name);
}

/// Collects one worker's registrations during [`PluginRuntime::start_plugin`].
///
/// Every route and hook registration is checked against the plugin's
/// granted permissions at call time; the whole batch is committed only
/// if the setup callback returns `Ok`.
pub struct PluginRegistrar<'a> {
    manifest: &'a PluginManifest,
    plugin_dir: PathBuf,
    granted: HashSet<String>,
    capabilities: SandboxCapabilities,
    routes: Vec<RegisteredRoute>,
    hooks: Vec<(String, RegisteredHook)>,
    slots: Vec<UiExtensionEntry>,
    widgets: Vec<UiExtensionEntry>,
    assets: Vec<UiExtensionEntry>,
}

impl PluginRegistrar<'_> {
    fn plugin(&self) -> &str {
        &self.manifest.name
    }

    fn assert_granted(&self, permission: String) -> RuntimeResult<()> {
        if self.granted.contains(&permission) {
            Ok(())
        } else {
            Err(RuntimeError::PermissionDenied {
                plugin: self.plugin().to_string(),
                permission,
            })
        }
    }

    /// Register an HTTP route under the plugin's mount.
    ///
    /// # Errors
    ///
    /// Fails when the route's permission is not granted or the method
    /// and path collide with an earlier registration in this worker.
    pub fn route(
        &mut self,
        method: &str,
        path: &str,
        handler: Arc<dyn RouteHandler>,
    ) -> RuntimeResult<()> {
        let method = method.to_uppercase();
        let permission = self
            .manifest
            .routes
            .iter()
            .find(|r| r.method.eq_ignore_ascii_case(&method) && r.path == path)
            .map_or_else(
                || format!("route:{method}:{path}"),
                quill_manifest::ManifestRoute::required_permission,
            );
        self.assert_granted(permission)?;

        if self
            .routes
            .iter()
            .any(|r| r.method == method && r.path == path)
        {
            return Err(RuntimeError::DuplicateRoute {
                plugin: self.plugin().to_string(),
                route: format!("{method} {path}"),
            });
        }

        self.routes.push(RegisteredRoute {
            plugin: self.plugin().to_string(),
            method,
            path: path.to_string(),
            capabilities: self.capabilities.clone(),
            plugin_dir: self.plugin_dir.clone(),
            handler,
        });
        Ok(())
    }

    /// Register a lifecycle hook handler.
    ///
    /// # Errors
    ///
    /// Fails when the name lacks the reserved prefix or the hook's
    /// permission is not granted.
    pub fn hook(&mut self, name: &str, handler: Arc<dyn HookHandler>) -> RuntimeResult<()> {
        if !name.starts_with(HOOK_PREFIX) {
            return Err(RuntimeError::InvalidHookName(name.to_string()));
        }
        let permission = self
            .manifest
            .hooks
            .iter()
            .find(|h| h.name == name)
            .map_or_else(
                || name.to_string(),
                quill_manifest::ManifestHook::required_permission,
            );
        self.assert_granted(permission)?;

        self.hooks.push((
            name.to_string(),
            RegisteredHook {
                plugin: self.plugin().to_string(),
                capabilities: self.capabilities.clone(),
                plugin_dir: self.plugin_dir.clone(),
                handler,
            },
        ));
        Ok(())
    }

    /// Contribute an entry to a named UI slot.
    pub fn slot(&mut self, name: &str, path: &str) {
        self.slots.push(self.entry(name, path));
    }

    /// Contribute a dashboard widget.
    pub fn widget(&mut self, name: &str, path: &str) {
        self.widgets.push(self.entry(name, path));
    }

    /// Expose a static asset.
    pub fn asset(&mut self, name: &str, path: &str) {
        self.assets.push(self.entry(name, path));
    }

    fn entry(&self, name: &str, path: &str) -> UiExtensionEntry {
        UiExtensionEntry {
            plugin: self.plugin().to_string(),
            name: name.to_string(),
            path: path.to_string(),
        }
    }
}

impl std::fmt::Debug for PluginRegistrar<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistrar")
            .field("plugin", &self.plugin())
            .field("routes", &self.routes.len())
            .field("hooks", &self.hooks.len())
            .finish_non_exhaustive()
    }
}
