//! Sandbox error types.
//!
//! Every variant here is a plugin fault by definition: the execution
//! runtime classifies a `SandboxError` surfacing from a handler as the
//! plugin misusing its sandbox, never as a host failure.

/// Errors from sandboxed resource access.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The plugin lacks the capability for this resource entirely.
    #[error("capability denied: {0}")]
    CapabilityDenied(&'static str),

    /// A database statement was not SELECT-shaped.
    #[error("statement rejected (read-only sandbox): {0}")]
    StatementRejected(String),

    /// A database statement exceeded the length ceiling.
    #[error("statement too long: {len} bytes (limit {limit})")]
    StatementTooLong {
        /// Actual statement length.
        len: usize,
        /// Maximum allowed length.
        limit: usize,
    },

    /// A per-request quota was exhausted.
    #[error("quota exceeded: {resource} (limit {limit})")]
    QuotaExceeded {
        /// Which quota was hit (e.g. `"db queries"`).
        resource: &'static str,
        /// The configured limit.
        limit: u64,
    },

    /// The target host is not in the plugin's allowlist.
    #[error("host not allowed: {0}")]
    HostNotAllowed(String),

    /// The URL could not be parsed or carries no host.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The sandboxed call did not complete within the hard timeout.
    #[error("sandboxed call timed out after {seconds}s")]
    Timeout {
        /// The timeout that elapsed, in seconds.
        seconds: u64,
    },

    /// The HTTP response exceeded the size cap.
    #[error("response too large (limit {limit} bytes)")]
    ResponseTooLarge {
        /// Maximum allowed response size in bytes.
        limit: u64,
    },

    /// A path resolved outside the plugin's root directory.
    #[error("path escapes plugin directory: {0}")]
    PathEscape(String),

    /// The underlying query executor failed.
    #[error("query backend error: {0}")]
    Backend(String),

    /// The outbound HTTP request failed at the transport level.
    #[error("http error: {0}")]
    Http(String),

    /// Filesystem I/O failed inside the sandbox root.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for sandboxed operations.
pub type SandboxResult<T> = Result<T, SandboxError>;
