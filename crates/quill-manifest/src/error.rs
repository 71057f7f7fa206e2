//! Manifest error types.

use std::path::PathBuf;

/// Errors from manifest parsing and verification.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// The manifest is not valid JSON.
    #[error("manifest parse error: {0}")]
    Parse(String),

    /// The manifest declares an unsupported `manifestVersion`.
    #[error("unsupported manifest version: {0:?} (expected \"v2\")")]
    UnsupportedVersion(String),

    /// A required field is missing or empty.
    #[error("missing required manifest field: {0}")]
    MissingField(&'static str),

    /// The mandatory `capabilities` object is absent.
    ///
    /// Capabilities are deny-by-omission, but the object itself must be
    /// present — its absence is a parse error, not an implicit deny-all.
    #[error("manifest has no capabilities object")]
    MissingCapabilities,

    /// A declared hook name does not carry the `cms_` prefix.
    #[error("invalid hook name: {0:?} (hook names must start with \"cms_\")")]
    InvalidHookName(String),

    /// The same hook name is declared twice in one manifest.
    #[error("duplicate hook name: {0:?}")]
    DuplicateHook(String),

    /// A declared route has an empty method or path.
    #[error("invalid route declaration: {0}")]
    InvalidRoute(String),

    /// The declared checksum does not match the recomputed one.
    #[error("checksum mismatch: declared {declared}, computed {computed}")]
    ChecksumMismatch {
        /// Checksum declared in the manifest file.
        declared: String,
        /// Checksum recomputed from the manifest content.
        computed: String,
    },

    /// The declared signature failed verification.
    #[error("signature verification failed for plugin {plugin}")]
    SignatureMismatch {
        /// The plugin whose signature failed.
        plugin: String,
    },

    /// Failed to read the manifest file from disk.
    #[error("failed to read manifest at {path}: {source}")]
    Read {
        /// Path to the manifest file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Result type for manifest operations.
pub type ManifestResult<T> = Result<T, ManifestError>;
