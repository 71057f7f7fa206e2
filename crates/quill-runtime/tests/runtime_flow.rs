//! End-to-end runtime behavior: discovery to dispatch, breaker and rate
//! limit enforcement, hook fan-out, and reconciliation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use quill_manifest::{PluginManifest, SigningConfig};
use quill_registry::{
    BREAKER_OPEN_REASON, HealthStatus, MemoryRegistryStore, PluginDiscovery, PluginRegistry,
    PluginStatus, RegistryError,
};
use quill_runtime::{
    HandlerError, HookHandler, HookOutcome, PluginRequest, PluginRuntime, RouteContext,
    RouteHandler, RouteReply, RuntimeConfig, RuntimeError, SandboxSet,
};
use quill_sandbox::QueryExecutor;

struct RowsExecutor;

#[async_trait]
impl QueryExecutor for RowsExecutor {
    async fn query(
        &self,
        _statement: &str,
        _params: &[serde_json::Value],
    ) -> Result<Vec<serde_json::Value>, String> {
        Ok(vec![json!({ "n": 1 })])
    }
}

struct EchoRoute;

#[async_trait]
impl RouteHandler for EchoRoute {
    async fn handle(&self, ctx: RouteContext) -> Result<RouteReply, HandlerError> {
        Ok(RouteReply::Json(json!({
            "path": ctx.request.path,
            "id": ctx.request.params.get("id"),
        })))
    }
}

struct FailingRoute;

#[async_trait]
impl RouteHandler for FailingRoute {
    async fn handle(&self, _ctx: RouteContext) -> Result<RouteReply, HandlerError> {
        Err("boom".into())
    }
}

/// Reports which sandboxes actually allowed access.
struct ProbeRoute;

#[async_trait]
impl RouteHandler for ProbeRoute {
    async fn handle(&self, ctx: RouteContext) -> Result<RouteReply, HandlerError> {
        let db_ok = ctx.sandboxes.db.query("SELECT 1", &[]).await.is_ok();
        let fs_ok = ctx.sandboxes.fs.exists("manifest.json").await.is_ok();
        Ok(RouteReply::Json(json!({ "dbOk": db_ok, "fsOk": fs_ok })))
    }
}

struct CountingHook {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl HookHandler for CountingHook {
    async fn handle(
        &self,
        _payload: &serde_json::Value,
        _sandboxes: &SandboxSet,
    ) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FailingHook;

#[async_trait]
impl HookHandler for FailingHook {
    async fn handle(
        &self,
        _payload: &serde_json::Value,
        _sandboxes: &SandboxSet,
    ) -> Result<(), HandlerError> {
        Err("hook boom".into())
    }
}

/// Sleeps past any test timeout; `finished` records whether the body
/// ever ran to completion.
struct SlowHook {
    finished: Arc<AtomicBool>,
}

#[async_trait]
impl HookHandler for SlowHook {
    async fn handle(
        &self,
        _payload: &serde_json::Value,
        _sandboxes: &SandboxSet,
    ) -> Result<(), HandlerError> {
        tokio::time::sleep(Duration::from_secs(600)).await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn gallery_manifest() -> PluginManifest {
    PluginManifest::from_value(json!({
        "manifestVersion": "v2",
        "id": "com.example.gallery",
        "name": "gallery",
        "permissions": ["content:read"],
        "routes": [
            { "method": "GET", "path": "/photos", "permission": "content:read" },
            { "method": "GET", "path": "/photos/:id", "permission": "content:read" },
            { "method": "POST", "path": "/fail", "permission": "content:read" }
        ],
        "hooks": [{ "name": "cms_post_save" }],
        "capabilities": { "db": { "read": true }, "fs": { "read": true } }
    }))
    .unwrap()
}

fn test_config() -> RuntimeConfig {
    RuntimeConfig {
        breaker_threshold: 3,
        hook_timeout: Duration::from_secs(1),
        ..RuntimeConfig::default()
    }
}

/// Discover the manifest into a fresh registry, approve it, and build a
/// runtime around it. The plugin is ready to start but not yet started.
async fn ready_runtime(
    manifest: &PluginManifest,
    config: RuntimeConfig,
) -> (Arc<PluginRuntime>, Arc<PluginRegistry>) {
    let registry = Arc::new(PluginRegistry::new(Arc::new(MemoryRegistryStore::new())));
    let discovery = PluginDiscovery::new(registry.clone(), SigningConfig::unsigned(), "/unused");
    discovery.reconcile_manifest(manifest).await.unwrap();
    registry.approve(&manifest.name).await.unwrap();
    let runtime = Arc::new(PluginRuntime::new(
        registry.clone(),
        Arc::new(RowsExecutor),
        config,
    ));
    (runtime, registry)
}

async fn status_of(registry: &PluginRegistry, name: &str) -> PluginStatus {
    registry
        .get_plugin_by_name(name)
        .await
        .unwrap()
        .unwrap()
        .record
        .status
}

#[tokio::test]
async fn test_full_flow_start_dispatch_and_hook() {
    let manifest = gallery_manifest();
    let registry = Arc::new(PluginRegistry::new(Arc::new(MemoryRegistryStore::new())));
    let discovery = PluginDiscovery::new(registry.clone(), SigningConfig::unsigned(), "/unused");
    discovery.reconcile_manifest(&manifest).await.unwrap();
    let runtime = PluginRuntime::new(registry.clone(), Arc::new(RowsExecutor), test_config());

    // Unapproved plugins cannot start.
    let err = runtime
        .start_plugin(&manifest, "/plugins/gallery", |reg| {
            reg.route("GET", "/photos", Arc::new(EchoRoute))
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Registry(RegistryError::PendingApproval(_))
    ));

    registry.approve("gallery").await.unwrap();

    let hook_calls = Arc::new(AtomicUsize::new(0));
    let calls = hook_calls.clone();
    runtime
        .start_plugin(&manifest, "/plugins/gallery", move |reg| {
            reg.route("GET", "/photos", Arc::new(EchoRoute))?;
            reg.route("GET", "/photos/:id", Arc::new(EchoRoute))?;
            reg.hook("cms_post_save", Arc::new(CountingHook { calls }))?;
            reg.slot("editor-toolbar", "ui/toolbar.js");
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(status_of(&registry, "gallery").await, PluginStatus::Active);

    // Exact route.
    let response = runtime
        .dispatch("GET", "gallery", "/photos", PluginRequest::new())
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body_json().unwrap()["path"], "/photos");

    // Pattern route captures the parameter.
    let response = runtime
        .dispatch("GET", "gallery", "/photos/42", PluginRequest::new())
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body_json().unwrap()["id"], "42");

    // Unknown route is a 404, not a fault.
    let response = runtime
        .dispatch("DELETE", "gallery", "/photos", PluginRequest::new())
        .await;
    assert_eq!(response.status, 404);

    // Hook fan-out invokes the handler exactly once per emission.
    let outcomes = runtime
        .emit_hook("cms_post_save", &json!({ "post": 7 }))
        .await;
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].is_completed());
    assert_eq!(hook_calls.load(Ordering::SeqCst), 1);

    // Emitting a hook nobody registered is a no-op.
    assert!(runtime.emit_hook("cms_post_delete", &json!({})).await.is_empty());

    let slots = runtime.slot_entries("editor-toolbar").await;
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0].plugin, "gallery");
}

#[tokio::test]
async fn test_start_refused_when_grants_are_missing() {
    let manifest = gallery_manifest();
    let (runtime, registry) = ready_runtime(&manifest, test_config()).await;

    // Revoke everything but the base permission.
    registry
        .set_permission_grants(
            "gallery",
            vec![quill_registry::PermissionGrant::granted(
                "gallery",
                "content:read",
                None,
            )],
        )
        .await
        .unwrap();

    let err = runtime
        .start_plugin(&manifest, "/plugins/gallery", |_| Ok(()))
        .await
        .unwrap_err();
    match err {
        RuntimeError::MissingPermissions { plugin, missing } => {
            assert_eq!(plugin, "gallery");
            assert!(missing.contains(&"cms_post_save".to_string()));
        },
        other => panic!("expected MissingPermissions, got {other:?}"),
    }
    assert_eq!(status_of(&registry, "gallery").await, PluginStatus::Inactive);
}

#[tokio::test]
async fn test_undeclared_route_registration_is_denied_and_nothing_commits() {
    let manifest = gallery_manifest();
    let (runtime, registry) = ready_runtime(&manifest, test_config()).await;

    let err = runtime
        .start_plugin(&manifest, "/plugins/gallery", |reg| {
            reg.route("GET", "/photos", Arc::new(EchoRoute))?;
            // Not in the manifest, so its default permission has no grant.
            reg.route("GET", "/secret", Arc::new(EchoRoute))
        })
        .await
        .unwrap_err();
    match err {
        RuntimeError::PermissionDenied { permission, .. } => {
            assert_eq!(permission, "route:GET:/secret");
        },
        other => panic!("expected PermissionDenied, got {other:?}"),
    }

    // The batch failed, so even the valid route was not committed.
    let response = runtime
        .dispatch("GET", "gallery", "/photos", PluginRequest::new())
        .await;
    assert_eq!(response.status, 404);
    assert_eq!(status_of(&registry, "gallery").await, PluginStatus::Inactive);
}

#[tokio::test]
async fn test_hook_registration_requires_reserved_prefix() {
    let manifest = gallery_manifest();
    let (runtime, _) = ready_runtime(&manifest, test_config()).await;

    let err = runtime
        .start_plugin(&manifest, "/plugins/gallery", |reg| {
            reg.hook("post_save", Arc::new(FailingHook))
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::InvalidHookName(n) if n == "post_save"));
}

#[tokio::test]
async fn test_breaker_trips_at_threshold_and_requires_explicit_reset() {
    let manifest = gallery_manifest();
    let (runtime, registry) = ready_runtime(&manifest, test_config()).await;
    let hook_calls = Arc::new(AtomicUsize::new(0));
    let calls = hook_calls.clone();
    runtime
        .start_plugin(&manifest, "/plugins/gallery", move |reg| {
            reg.route("POST", "/fail", Arc::new(FailingRoute))?;
            reg.route("GET", "/photos", Arc::new(EchoRoute))?;
            reg.hook("cms_post_save", Arc::new(CountingHook { calls }))
        })
        .await
        .unwrap();

    // Two faults: breaker stays closed, status is error.
    for _ in 0..2 {
        let response = runtime
            .dispatch("POST", "gallery", "/fail", PluginRequest::new())
            .await;
        assert_eq!(response.status, 500);
    }
    assert!(runtime.breaker_state("gallery").is_none());
    assert_eq!(status_of(&registry, "gallery").await, PluginStatus::Error);

    // Third fault trips the breaker exactly at the threshold.
    let response = runtime
        .dispatch("POST", "gallery", "/fail", PluginRequest::new())
        .await;
    assert_eq!(response.status, 500);
    assert!(runtime.breaker_state("gallery").is_some());
    assert_eq!(status_of(&registry, "gallery").await, PluginStatus::Degraded);

    let info = registry.get_plugin_by_name("gallery").await.unwrap().unwrap();
    let health = info.health.unwrap();
    assert_eq!(health.status, HealthStatus::Error);
    assert_eq!(health.error.as_deref(), Some(BREAKER_OPEN_REASON));

    // Open breaker refuses calls, including ones that would succeed.
    let response = runtime
        .dispatch("GET", "gallery", "/photos", PluginRequest::new())
        .await;
    assert_eq!(response.status, 503);
    let body = response.body_json().unwrap();
    assert_eq!(body["error"], "plugin unavailable");
    assert!(body["reason"].as_str().unwrap().contains("3 consecutive failures"));

    // Refusals are not plugin faults: the error counter is unchanged.
    let metrics = runtime.metrics_snapshot();
    assert_eq!(metrics["gallery"].routes.errors, 3);
    assert_eq!(metrics["gallery"].routes.calls, 3);

    // Hook handlers of a tripped plugin are skipped without running.
    let outcomes = runtime.emit_hook("cms_post_save", &json!({})).await;
    assert!(matches!(
        outcomes[0],
        HookOutcome::Skipped { reason: "breaker open", .. }
    ));
    assert_eq!(hook_calls.load(Ordering::SeqCst), 0);

    // Reset is the only way out.
    runtime.reset_breaker("gallery").await.unwrap();
    assert!(runtime.breaker_state("gallery").is_none());
    assert_eq!(status_of(&registry, "gallery").await, PluginStatus::Active);
    let response = runtime
        .dispatch("GET", "gallery", "/photos", PluginRequest::new())
        .await;
    assert_eq!(response.status, 200);
}

#[tokio::test]
async fn test_success_resets_the_consecutive_fault_count() {
    let manifest = gallery_manifest();
    let config = RuntimeConfig {
        breaker_threshold: 2,
        ..test_config()
    };
    let (runtime, _) = ready_runtime(&manifest, config).await;
    runtime
        .start_plugin(&manifest, "/plugins/gallery", |reg| {
            reg.route("POST", "/fail", Arc::new(FailingRoute))?;
            reg.route("GET", "/photos", Arc::new(EchoRoute))
        })
        .await
        .unwrap();

    runtime.dispatch("POST", "gallery", "/fail", PluginRequest::new()).await;
    runtime.dispatch("GET", "gallery", "/photos", PluginRequest::new()).await;
    // The earlier fault no longer counts toward the threshold.
    runtime.dispatch("POST", "gallery", "/fail", PluginRequest::new()).await;
    assert!(runtime.breaker_state("gallery").is_none());

    runtime.dispatch("POST", "gallery", "/fail", PluginRequest::new()).await;
    assert!(runtime.breaker_state("gallery").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_fixed_window_resets_lazily() {
    let manifest = gallery_manifest();
    let config = RuntimeConfig {
        rate_limit_max: 3,
        rate_limit_window: Duration::from_secs(60),
        ..test_config()
    };
    let (runtime, _) = ready_runtime(&manifest, config).await;
    runtime
        .start_plugin(&manifest, "/plugins/gallery", |reg| {
            reg.route("GET", "/photos", Arc::new(EchoRoute))
        })
        .await
        .unwrap();

    for _ in 0..3 {
        let response = runtime
            .dispatch("GET", "gallery", "/photos", PluginRequest::new())
            .await;
        assert_eq!(response.status, 200);
    }
    let response = runtime
        .dispatch("GET", "gallery", "/photos", PluginRequest::new())
        .await;
    assert_eq!(response.status, 429);

    // Being throttled is not a fault and not an invocation.
    assert!(runtime.breaker_state("gallery").is_none());
    assert_eq!(runtime.metrics_snapshot()["gallery"].routes.calls, 3);

    tokio::time::advance(Duration::from_secs(61)).await;
    let response = runtime
        .dispatch("GET", "gallery", "/photos", PluginRequest::new())
        .await;
    assert_eq!(response.status, 200);
}

#[tokio::test(start_paused = true)]
async fn test_hook_timeout_cancels_the_handler() {
    let manifest = gallery_manifest();
    let (runtime, _) = ready_runtime(&manifest, test_config()).await;
    let finished = Arc::new(AtomicBool::new(false));
    let flag = finished.clone();
    runtime
        .start_plugin(&manifest, "/plugins/gallery", move |reg| {
            reg.hook("cms_post_save", Arc::new(SlowHook { finished: flag }))
        })
        .await
        .unwrap();

    let outcomes = runtime.emit_hook("cms_post_save", &json!({})).await;
    assert!(matches!(outcomes[0], HookOutcome::TimedOut { .. }));
    // The future was dropped at the deadline, not left running.
    assert!(!finished.load(Ordering::SeqCst));
    // A timeout counts as a fault like any other handler error.
    assert_eq!(runtime.metrics_snapshot()["gallery"].hooks.errors, 1);
}

#[tokio::test]
async fn test_hook_fanout_isolates_failures_and_keeps_order() {
    let failing = PluginManifest::from_value(json!({
        "manifestVersion": "v2",
        "id": "com.example.audit",
        "name": "audit",
        "hooks": [{ "name": "cms_post_save" }],
        "capabilities": {}
    }))
    .unwrap();
    let counting = PluginManifest::from_value(json!({
        "manifestVersion": "v2",
        "id": "com.example.notify",
        "name": "notify",
        "hooks": [{ "name": "cms_post_save" }],
        "capabilities": {}
    }))
    .unwrap();

    let registry = Arc::new(PluginRegistry::new(Arc::new(MemoryRegistryStore::new())));
    let discovery = PluginDiscovery::new(registry.clone(), SigningConfig::unsigned(), "/unused");
    for manifest in [&failing, &counting] {
        discovery.reconcile_manifest(manifest).await.unwrap();
        registry.approve(&manifest.name).await.unwrap();
    }
    let runtime = PluginRuntime::new(registry, Arc::new(RowsExecutor), test_config());

    runtime
        .start_plugin(&failing, "/plugins/audit", |reg| {
            reg.hook("cms_post_save", Arc::new(FailingHook))
        })
        .await
        .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    runtime
        .start_plugin(&counting, "/plugins/notify", move |reg| {
            reg.hook("cms_post_save", Arc::new(CountingHook { calls: counter }))
        })
        .await
        .unwrap();

    let outcomes = runtime.emit_hook("cms_post_save", &json!({})).await;
    assert_eq!(outcomes.len(), 2);
    assert!(matches!(&outcomes[0], HookOutcome::Failed { plugin, .. } if plugin == "audit"));
    assert!(matches!(&outcomes[1], HookOutcome::Completed { plugin, .. } if plugin == "notify"));
    assert_eq!(calls.load(Ordering::SeqCst), 1, "failure upstream must not block fan-out");
}

#[tokio::test]
async fn test_capabilities_flow_into_sandboxes() {
    let manifest = gallery_manifest();
    let (runtime, _) = ready_runtime(&manifest, test_config()).await;
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("manifest.json"), "{}").unwrap();
    runtime
        .start_plugin(&manifest, dir.path(), |reg| {
            reg.route("GET", "/photos", Arc::new(ProbeRoute))
        })
        .await
        .unwrap();

    let body = runtime
        .dispatch("GET", "gallery", "/photos", PluginRequest::new())
        .await
        .body_json()
        .unwrap();
    assert_eq!(body["dbOk"], true);
    assert_eq!(body["fsOk"], true);

    // Same handler under a capability-free manifest gets denied sandboxes.
    let bare = PluginManifest::from_value(json!({
        "manifestVersion": "v2",
        "id": "com.example.bare",
        "name": "bare",
        "routes": [{ "method": "GET", "path": "/probe", "permission": "probe" }],
        "permissions": ["probe"],
        "capabilities": {}
    }))
    .unwrap();
    let (runtime, _) = ready_runtime(&bare, test_config()).await;
    runtime
        .start_plugin(&bare, dir.path(), |reg| {
            reg.route("GET", "/probe", Arc::new(ProbeRoute))
        })
        .await
        .unwrap();
    let body = runtime
        .dispatch("GET", "bare", "/probe", PluginRequest::new())
        .await
        .body_json()
        .unwrap();
    assert_eq!(body["dbOk"], false);
    assert_eq!(body["fsOk"], false);
}

#[tokio::test]
async fn test_stop_plugin_clears_all_registrations() {
    let manifest = gallery_manifest();
    let (runtime, registry) = ready_runtime(&manifest, test_config()).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    runtime
        .start_plugin(&manifest, "/plugins/gallery", move |reg| {
            reg.route("GET", "/photos", Arc::new(EchoRoute))?;
            reg.hook("cms_post_save", Arc::new(CountingHook { calls: counter }))?;
            reg.widget("stats", "ui/stats.js");
            Ok(())
        })
        .await
        .unwrap();

    runtime.stop_plugin("gallery").await.unwrap();
    assert_eq!(status_of(&registry, "gallery").await, PluginStatus::Inactive);

    let response = runtime
        .dispatch("GET", "gallery", "/photos", PluginRequest::new())
        .await;
    assert_eq!(response.status, 404);
    assert!(runtime.emit_hook("cms_post_save", &json!({})).await.is_empty());
    assert!(runtime.widgets().await.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_reconcile_repairs_status_drift() {
    let manifest = gallery_manifest();
    let (runtime, registry) = ready_runtime(&manifest, test_config()).await;

    // Active on record, but no worker was ever started.
    registry.set_status("gallery", PluginStatus::Active).await.unwrap();
    let report = runtime.reconcile().await.unwrap();
    assert_eq!(report.demoted, ["gallery"]);
    assert_eq!(status_of(&registry, "gallery").await, PluginStatus::Error);

    // Degraded on record while the worker is live and the breaker closed.
    runtime
        .start_plugin(&manifest, "/plugins/gallery", |reg| {
            reg.route("GET", "/photos", Arc::new(EchoRoute))
        })
        .await
        .unwrap();
    registry.set_status("gallery", PluginStatus::Degraded).await.unwrap();
    let report = runtime.reconcile().await.unwrap();
    assert_eq!(report.restored, ["gallery"]);
    assert_eq!(status_of(&registry, "gallery").await, PluginStatus::Active);
}

#[tokio::test]
async fn test_resolve_static_guards_traversal() {
    let manifest = gallery_manifest();
    let (runtime, _) = ready_runtime(&manifest, test_config()).await;
    runtime
        .start_plugin(&manifest, "/plugins/gallery", |_| Ok(()))
        .await
        .unwrap();

    let path = runtime.resolve_static("gallery", "ui/app.js").await.unwrap();
    assert!(path.ends_with("gallery/public/ui/app.js"));

    let err = runtime.resolve_static("gallery", "../manifest.json").await.unwrap_err();
    assert!(matches!(err, RuntimeError::PathEscape(_)));
    let err = runtime.resolve_static("gallery", "/etc/passwd").await.unwrap_err();
    assert!(matches!(err, RuntimeError::PathEscape(_)));
    let err = runtime.resolve_static("ghost", "ui/app.js").await.unwrap_err();
    assert!(matches!(err, RuntimeError::UnknownPlugin(_)));
}
