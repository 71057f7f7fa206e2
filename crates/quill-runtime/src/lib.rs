//! Execution runtime for Quill plugins.
//!
//! The runtime owns the live side of the plugin system: it starts
//! workers against their granted permissions, dispatches HTTP requests
//! to registered routes, fans lifecycle hooks out to handlers, and
//! protects the host with a per-plugin circuit breaker, fixed-window
//! rate limiting, and fresh resource sandboxes on every invocation.
//!
//! Persisted state (records, grants, health) lives in
//! [`quill_registry`]; manifests come from [`quill_manifest`]; the
//! sandboxes themselves are [`quill_sandbox`] types.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod breaker;
mod dispatch;
mod error;
mod extensions;
mod handler;
mod hooks;
mod metrics;
mod rate_limit;
mod reconcile;
mod runtime;

pub use breaker::BreakerState;
pub use error::{RuntimeError, RuntimeResult};
pub use extensions::UiExtensionEntry;
pub use handler::{
    HandlerError, HookHandler, PluginRequest, PluginResponse, RequestView, RouteContext,
    RouteHandler, RouteReply, SandboxSet,
};
pub use hooks::HookOutcome;
pub use metrics::{CounterSnapshot, PluginMetrics, spawn_metrics_reporter};
pub use reconcile::ReconcileReport;
pub use runtime::{PluginRegistrar, PluginRuntime, RuntimeConfig};
