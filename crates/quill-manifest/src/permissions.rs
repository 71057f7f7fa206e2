//! Requested-permission flattening and grant diffing.
//!
//! A manifest's requested permissions are the union of its base
//! permissions, one synthesized permission per route and one per hook.
//! The diff against the granted set is computed both at worker start
//! (hard failure) and on registry reads (display only) — it is never
//! cached.

use std::collections::BTreeSet;

use crate::manifest::PluginManifest;

impl PluginManifest {
    /// Flatten this manifest's declared permissions into a single
    /// deduplicated, deterministically-ordered set.
    ///
    /// The set is base permissions ∪ {route `permission` or
    /// `route:METHOD:path` default} ∪ {hook `permission` or hook name
    /// default}.
    #[must_use]
    pub fn requested_permissions(&self) -> BTreeSet<String> {
        let mut requested: BTreeSet<String> =
            self.permissions.as_slice().iter().cloned().collect();
        for route in &self.routes {
            requested.insert(route.required_permission());
        }
        for hook in &self.hooks {
            requested.insert(hook.required_permission());
        }
        requested
    }

    /// Requested permissions not present in `granted`.
    ///
    /// Used at worker start (where a non-empty result is a hard failure)
    /// and for display (soft warning).
    #[must_use]
    pub fn missing_permissions<'a, I>(&self, granted: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let granted: BTreeSet<&str> = granted.into_iter().collect();
        self.requested_permissions()
            .into_iter()
            .filter(|p| !granted.contains(p.as_str()))
            .collect()
    }
}
