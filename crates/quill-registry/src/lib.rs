//! Quill Registry — durable plugin state and discovery.
//!
//! The registry owns every persisted fact about a plugin: its record
//! (status, settings, last-known requested permissions), its permission
//! grants, and its latest health row. All mutation goes through
//! [`PluginRegistry`] — other components never write storage directly,
//! preserving a single source of truth for plugin state.
//!
//! Discovery scans plugin directories, diffs manifests against stored
//! records, auto-grants permissions and routes brand-new plugins into a
//! pending-approval queue. Approval is an explicit, separate action.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod discovery;
mod error;
mod record;
mod registry;
mod store;

pub use discovery::{DiscoveryOutcome, DiscoveryReport, PluginDiscovery};
pub use error::{RegistryError, RegistryResult};
pub use record::{
    BREAKER_OPEN_REASON, HealthRecord, HealthStatus, HealthUpdate, PermissionGrant, PluginInfo,
    PluginRecord, PluginStatus,
};
pub use registry::PluginRegistry;
pub use store::{MemoryRegistryStore, RegistryStore};
