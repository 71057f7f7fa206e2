//! Runtime error types.

use thiserror::Error;

/// Errors raised by the execution runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The plugin has no registry record.
    #[error("unknown plugin: {0}")]
    UnknownPlugin(String),

    /// Worker start refused: requested permissions lack grants.
    #[error("plugin {plugin} is missing grants for: {missing:?}")]
    MissingPermissions {
        /// The plugin that attempted to start.
        plugin: String,
        /// Requested permissions without a granted row.
        missing: Vec<String>,
    },

    /// A registration was refused because its permission is not granted.
    #[error("plugin {plugin} lacks permission {permission}")]
    PermissionDenied {
        /// The registering plugin.
        plugin: String,
        /// The permission the registration requires.
        permission: String,
    },

    /// A hook registration used a name outside the reserved prefix.
    #[error("invalid hook name: {0}")]
    InvalidHookName(String),

    /// Two registrations in one worker claimed the same method and path.
    #[error("plugin {plugin} registered route {route} twice")]
    DuplicateRoute {
        /// The registering plugin.
        plugin: String,
        /// The colliding `METHOD path` pair.
        route: String,
    },

    /// A static asset path tried to leave the plugin's public root.
    #[error("static asset path escapes the plugin public root: {0}")]
    PathEscape(String),

    /// The plugin's registration callback failed.
    #[error("plugin {plugin} setup failed: {message}")]
    Setup {
        /// The plugin whose setup ran.
        plugin: String,
        /// The failure message.
        message: String,
    },

    /// A registry operation failed.
    #[error(transparent)]
    Registry(#[from] quill_registry::RegistryError),
}

/// Convenience alias for runtime results.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
