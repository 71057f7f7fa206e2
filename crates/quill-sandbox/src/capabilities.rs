//! Per-registration capability snapshots.

/// The capability snapshot taken for a route or hook at registration time.
///
/// This is the only object the execution runtime consults when deciding
/// whether to allow a DB/FS/HTTP call inside an already-registered
/// handler. It is distinct from permission grants, which gate registration
/// itself.
#[derive(Debug, Clone, Default)]
pub struct SandboxCapabilities {
    /// Whether the DB sandbox permits read queries.
    pub db_read: bool,
    /// Whether the FS sandbox permits reads under the plugin directory.
    pub fs_read: bool,
    /// Hostnames reachable through the HTTP sandbox. Empty means outbound
    /// HTTP is denied entirely.
    pub http_allowlist: Vec<String>,
}

impl SandboxCapabilities {
    /// Build a snapshot from raw flags.
    ///
    /// When `http_outbound` is false the allowlist is discarded, so a
    /// manifest that lists hosts without requesting the outbound
    /// capability still gets no network access.
    #[must_use]
    pub fn new(db_read: bool, fs_read: bool, http_outbound: bool, allowlist: Vec<String>) -> Self {
        Self {
            db_read,
            fs_read,
            http_allowlist: if http_outbound { allowlist } else { Vec::new() },
        }
    }

    /// A snapshot that denies everything.
    #[must_use]
    pub fn deny_all() -> Self {
        Self::default()
    }
}
