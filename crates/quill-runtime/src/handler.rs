//! Handler seams and invocation types.
//!
//! Plugins implement [`RouteHandler`] and [`HookHandler`]; the runtime
//! hands each invocation an explicit context carrying the request view
//! and a fresh [`SandboxSet`]. There is no ambient state: everything a
//! handler may touch arrives through its arguments.

use std::collections::HashMap;

use async_trait::async_trait;

use quill_sandbox::{DbSandbox, FsSandbox, HttpSandbox};

/// Opaque handler failure, surfaced as a 500 body and a breaker fault.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// The resource sandboxes built fresh for one invocation.
///
/// Quota counters live inside the sandboxes, so dropping the set at the
/// end of the call discards them; nothing carries over to the next
/// request.
pub struct SandboxSet {
    /// Read-only, quota-enforcing database access.
    pub db: DbSandbox,
    /// Read-only filesystem access under the plugin directory.
    pub fs: FsSandbox,
    /// Allowlist-restricted outbound HTTP.
    pub http: HttpSandbox,
}

impl std::fmt::Debug for SandboxSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxSet").finish_non_exhaustive()
    }
}

/// An incoming request, as the host hands it to [`dispatch`].
///
/// [`dispatch`]: crate::PluginRuntime::dispatch
#[derive(Debug, Clone, Default)]
pub struct PluginRequest {
    /// Request headers.
    pub headers: HashMap<String, String>,
    /// Decoded JSON body, if any.
    pub body: Option<serde_json::Value>,
}

impl PluginRequest {
    /// An empty request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a JSON body.
    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Attach a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// The request as a route handler sees it: plugin-scoped path, matched
/// path parameters, and the original headers and body.
#[derive(Debug, Clone)]
pub struct RequestView {
    /// Uppercased HTTP method.
    pub method: String,
    /// Path relative to the plugin mount.
    pub path: String,
    /// Values captured by `:param` segments of the route pattern.
    pub params: HashMap<String, String>,
    /// Request headers.
    pub headers: HashMap<String, String>,
    /// Decoded JSON body, if any.
    pub body: Option<serde_json::Value>,
}

/// Everything a route handler receives for one invocation.
pub struct RouteContext {
    /// The scoped request.
    pub request: RequestView,
    /// Fresh sandboxes for this invocation.
    pub sandboxes: SandboxSet,
}

impl std::fmt::Debug for RouteContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteContext")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

/// A route handler's successful result.
#[derive(Debug)]
pub enum RouteReply {
    /// A JSON value, sent as a 200 with `application/json`.
    Json(serde_json::Value),
    /// A fully-formed response.
    Response(PluginResponse),
}

impl RouteReply {
    pub(crate) fn into_response(self) -> PluginResponse {
        match self {
            Self::Json(value) => PluginResponse::json(200, &value),
            Self::Response(response) => response,
        }
    }
}

/// An HTTP response produced by the runtime or a handler.
#[derive(Debug, Clone)]
pub struct PluginResponse {
    /// HTTP status code.
    pub status: u16,
    /// Content type of the body.
    pub content_type: String,
    /// Raw response body.
    pub body: Vec<u8>,
}

impl PluginResponse {
    /// A JSON response with the given status.
    #[must_use]
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self {
            status,
            content_type: "application/json".to_string(),
            body: value.to_string().into_bytes(),
        }
    }

    /// Decode the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when the body is not valid JSON.
    pub fn body_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// A registered HTTP route endpoint.
#[async_trait]
pub trait RouteHandler: Send + Sync {
    /// Handle one request.
    async fn handle(&self, ctx: RouteContext) -> Result<RouteReply, HandlerError>;
}

/// A registered lifecycle hook endpoint.
#[async_trait]
pub trait HookHandler: Send + Sync {
    /// Handle one hook emission.
    async fn handle(
        &self,
        payload: &serde_json::Value,
        sandboxes: &SandboxSet,
    ) -> Result<(), HandlerError>;
}
