//! Registry error types.

/// Errors from registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No plugin record with the given name exists.
    #[error("plugin not found: {0}")]
    NotFound(String),

    /// A record with this name already exists.
    #[error("plugin already registered: {0}")]
    AlreadyRegistered(String),

    /// The plugin is awaiting approval; only `inactive` is permitted.
    #[error("plugin {0} is pending approval")]
    PendingApproval(String),

    /// The backing store failed.
    #[error("store error: {0}")]
    Store(String),

    /// Manifest loading or validation failed during discovery.
    #[error(transparent)]
    Manifest(#[from] quill_manifest::ManifestError),

    /// Failed to read the plugins root directory.
    #[error("failed to scan plugins directory: {0}")]
    Scan(std::io::Error),
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;
