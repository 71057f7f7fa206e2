//! Quill Manifest — plugin contract parsing and verification.
//!
//! A plugin manifest (`manifest.json`) describes a plugin's identity,
//! declared capabilities, permissions, HTTP routes and lifecycle hooks.
//! Manifests are loaded from disk during plugin discovery and verified
//! against their declared checksum and (optionally) signature before the
//! runtime will touch them.
//!
//! Two distinct concepts live here:
//!
//! - **Capabilities** gate what a plugin's handlers may do at runtime
//!   (database reads, filesystem reads, outbound HTTP to an allowlist).
//! - **Permissions** are named strings gating *registration* of routes and
//!   hooks, checked against persisted grants at worker start.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod integrity;
mod manifest;
mod permissions;

pub use error::{ManifestError, ManifestResult};
pub use integrity::{SigningConfig, load_from_disk};
pub use manifest::{
    Capabilities, CapabilityFlags, HttpCapability, ManifestHook, ManifestRoute, PermissionDecl,
    PluginManifest, UiExtension,
};

/// Required value of the `manifestVersion` field.
pub const MANIFEST_VERSION: &str = "v2";

/// Required prefix for hook names declared in a manifest.
pub const HOOK_PREFIX: &str = "cms_";

/// Name of the manifest file inside a plugin directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Environment variable holding the operator-configured signing secret.
pub const SIGNING_SECRET_ENV: &str = "QUILL_MANIFEST_SECRET";
