//! Route dispatch.
//!
//! Refusal checks run in a fixed order before the handler is reached:
//! route lookup (404), breaker (503), rate limit (429). Breaker and
//! rate-limit refusals are runtime decisions, never plugin faults, so
//! they leave the fault counters untouched.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::handler::{PluginRequest, PluginResponse, RequestView, RouteContext};
use crate::runtime::{PluginRuntime, RegisteredRoute, route_key};

impl PluginRuntime {
    /// Dispatch one request to a plugin route.
    ///
    /// `path` is relative to the plugin's mount. The return value is
    /// always a response; refusals and handler failures become error
    /// bodies rather than `Err`, since from the host's point of view the
    /// dispatch itself succeeded.
    pub async fn dispatch(
        &self,
        method: &str,
        plugin: &str,
        path: &str,
        request: PluginRequest,
    ) -> PluginResponse {
        let Some((route, params)) = self.find_route(method, plugin, path).await else {
            return PluginResponse::json(
                404,
                &serde_json::json!({ "error": "route not found" }),
            );
        };

        if let Some(state) = self.breakers.open_state(plugin) {
            debug!(plugin = %plugin, "Refusing call, breaker open");
            return PluginResponse::json(
                503,
                &serde_json::json!({
                    "error": "plugin unavailable",
                    "reason": state.reason,
                }),
            );
        }

        if !self.limiter.try_acquire(plugin) {
            debug!(plugin = %plugin, "Refusing call, rate limit exceeded");
            return PluginResponse::json(
                429,
                &serde_json::json!({ "error": "rate limit exceeded" }),
            );
        }

        let ctx = RouteContext {
            request: RequestView {
                method: route.method.clone(),
                path: path.to_string(),
                params,
                headers: request.headers,
                body: request.body,
            },
            sandboxes: self.build_sandboxes(&route.capabilities, &route.plugin_dir),
        };

        let start = Instant::now();
        let result = route.handler.handle(ctx).await;
        let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(reply) => {
                self.metrics.record_route(plugin, true, latency_ms);
                self.note_success(plugin, latency_ms).await;
                reply.into_response()
            },
            Err(e) => {
                let message = e.to_string();
                self.metrics.record_route(plugin, false, latency_ms);
                self.note_failure(plugin, &message, Some(latency_ms)).await;
                PluginResponse::json(500, &serde_json::json!({ "error": message }))
            },
        }
    }

    async fn find_route(
        &self,
        method: &str,
        plugin: &str,
        path: &str,
    ) -> Option<(Arc<RegisteredRoute>, HashMap<String, String>)> {
        let tables = self.tables.read().await;

        if let Some(route) = tables.routes.get(&route_key(method, plugin, path)) {
            return Some((route.clone(), HashMap::new()));
        }

        // Fall back to pattern routes with `:param` segments.
        let method = method.to_uppercase();
        tables
            .routes
            .values()
            .filter(|r| r.plugin == plugin && r.method == method)
            .find_map(|r| match_pattern(&r.path, path).map(|params| (r.clone(), params)))
    }
}

/// Match a request path against a route pattern, capturing `:param`
/// segments. Segment counts must agree exactly.
fn match_pattern(pattern: &str, path: &str) -> Option<HashMap<String, String>> {
    let pattern_segments: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if pattern_segments.len() != path_segments.len() {
        return None;
    }

    let mut params = HashMap::new();
    for (expected, actual) in pattern_segments.iter().zip(&path_segments) {
        if let Some(name) = expected.strip_prefix(':') {
            params.insert(name.to_string(), (*actual).to_string());
        } else if expected != actual {
            return None;
        }
    }
    Some(params)
}
