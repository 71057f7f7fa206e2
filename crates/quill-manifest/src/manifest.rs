//! Plugin manifest types.
//!
//! A manifest is the plugin's declared contract: identity, capabilities,
//! permissions, routes, hooks and UI extension points. The on-disk format
//! is camelCase JSON (`manifest.json`).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{ManifestError, ManifestResult};
use crate::{HOOK_PREFIX, MANIFEST_VERSION};

/// A plugin manifest loaded from `manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    /// Manifest schema version. Only `"v2"` is accepted.
    pub manifest_version: String,
    /// Unique plugin identifier.
    pub id: String,
    /// Stable plugin name, used as the registry key and route mount.
    pub name: String,
    /// Human-readable display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Semantic version string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional author.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Base permissions the plugin requests, beyond per-route/per-hook ones.
    #[serde(default)]
    pub permissions: PermissionDecl,
    /// HTTP routes the plugin wants to register.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<ManifestRoute>,
    /// Lifecycle hooks the plugin wants to register.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<ManifestHook>,
    /// Hostnames the plugin may reach via the outbound HTTP sandbox.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http_allowlist: Vec<String>,
    /// Capability flags gating runtime resource access.
    ///
    /// Mandatory: absence is a parse error, not an implicit deny-all.
    pub capabilities: Capabilities,
    /// UI slots the plugin contributes to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub slots: Vec<UiExtension>,
    /// Dashboard widgets the plugin contributes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub widgets: Vec<UiExtension>,
    /// Static assets the plugin exposes under its public directory.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assets: Vec<UiExtension>,
    /// JSON schema describing the plugin's settings blob.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings_schema: Option<serde_json::Value>,
    /// Settings applied when the plugin is first registered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_settings: Option<serde_json::Value>,
    /// Whether this is a system plugin shipped with the host.
    #[serde(default)]
    pub is_system: bool,
    /// Declared content checksum, verified against the recomputed one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Declared signature, verified against the manifest MAC.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Base permission declaration.
///
/// Accepts either a flat list (`"permissions": ["a", "b"]`) or the object
/// form (`"permissions": {"required": ["a", "b"]}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PermissionDecl {
    /// Flat list of permission strings.
    Flat(Vec<String>),
    /// Object form with an explicit `required` list.
    Required {
        /// The required permission strings.
        required: Vec<String>,
    },
}

impl Default for PermissionDecl {
    fn default() -> Self {
        Self::Flat(Vec::new())
    }
}

impl PermissionDecl {
    /// The declared permission strings, regardless of declaration form.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        match self {
            Self::Flat(list) | Self::Required { required: list } => list,
        }
    }
}

/// An HTTP route declared in a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestRoute {
    /// HTTP method (`GET`, `POST`, ...).
    pub method: String,
    /// Path relative to the plugin's mount, may contain `:param` segments.
    pub path: String,
    /// Permission gating registration of this route.
    ///
    /// Defaults to `route:METHOD:path` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission: Option<String>,
}

impl ManifestRoute {
    /// The permission string required to register this route.
    #[must_use]
    pub fn required_permission(&self) -> String {
        self.permission.clone().unwrap_or_else(|| {
            format!("route:{}:{}", self.method.to_uppercase(), self.path)
        })
    }
}

/// A lifecycle hook declared in a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestHook {
    /// Hook name. Must be unique within the manifest and start with `cms_`.
    pub name: String,
    /// Permission gating registration of this hook.
    ///
    /// Defaults to the hook name when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission: Option<String>,
}

impl ManifestHook {
    /// The permission string required to register this hook.
    #[must_use]
    pub fn required_permission(&self) -> String {
        self.permission.clone().unwrap_or_else(|| self.name.clone())
    }
}

/// A UI extension point entry (slot, widget or asset).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiExtension {
    /// Extension point name (e.g. `"editor-toolbar"`).
    pub name: String,
    /// Path to the contributed resource, relative to the plugin directory.
    pub path: String,
}

/// Capability flags declared by a plugin.
///
/// These gate runtime resource access inside already-registered handlers
/// and are distinct from permission grants, which gate registration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    /// Database access flags.
    #[serde(default)]
    pub db: CapabilityFlags,
    /// Filesystem access flags.
    #[serde(default)]
    pub fs: CapabilityFlags,
    /// Outbound HTTP flags.
    #[serde(default)]
    pub http: HttpCapability,
}

/// Read/write capability flags for a resource.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityFlags {
    /// Read access.
    #[serde(default)]
    pub read: bool,
    /// Write access.
    #[serde(default)]
    pub write: bool,
}

/// Outbound HTTP capability flag.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpCapability {
    /// Whether outbound HTTP to the allowlist is permitted at all.
    #[serde(default)]
    pub outbound: bool,
}

impl PluginManifest {
    /// Parse a manifest from its raw JSON text.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the text is not valid JSON, the
    /// `manifestVersion` is not `"v2"`, `id`/`name` are missing or empty,
    /// the `capabilities` object is absent, or any hook name is malformed
    /// or duplicated.
    pub fn parse(raw: &str) -> ManifestResult<Self> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| ManifestError::Parse(e.to_string()))?;
        Self::from_value(value)
    }

    /// Parse a manifest from an already-decoded JSON value.
    ///
    /// # Errors
    ///
    /// Same validation errors as [`PluginManifest::parse`].
    pub fn from_value(value: serde_json::Value) -> ManifestResult<Self> {
        // Checked before deserialization so the absence of the object is
        // reported distinctly from a generic serde error.
        if value.get("capabilities").is_none() {
            return Err(ManifestError::MissingCapabilities);
        }

        let manifest: Self =
            serde_json::from_value(value).map_err(|e| ManifestError::Parse(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> ManifestResult<()> {
        if self.manifest_version != MANIFEST_VERSION {
            return Err(ManifestError::UnsupportedVersion(
                self.manifest_version.clone(),
            ));
        }
        if self.id.trim().is_empty() {
            return Err(ManifestError::MissingField("id"));
        }
        if self.name.trim().is_empty() {
            return Err(ManifestError::MissingField("name"));
        }

        for route in &self.routes {
            if route.method.trim().is_empty() || route.path.trim().is_empty() {
                return Err(ManifestError::InvalidRoute(format!(
                    "{} {}",
                    route.method, route.path
                )));
            }
        }

        let mut seen = HashSet::new();
        for hook in &self.hooks {
            if !hook.name.starts_with(HOOK_PREFIX) {
                return Err(ManifestError::InvalidHookName(hook.name.clone()));
            }
            if !seen.insert(hook.name.as_str()) {
                return Err(ManifestError::DuplicateHook(hook.name.clone()));
            }
        }

        Ok(())
    }

    /// The display name, falling back to the stable name.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}
