//! UI extension point registries.
//!
//! Plugins contribute entries to named slots, dashboard widgets, and
//! static assets. The host UI queries these registries; the runtime only
//! stores them and resolves asset paths safely.

/// One UI extension contribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiExtensionEntry {
    /// The contributing plugin.
    pub plugin: String,
    /// Extension point name (slot name, widget id, asset id).
    pub name: String,
    /// Resource path relative to the plugin directory.
    pub path: String,
}

/// The three extension registries for one runtime.
#[derive(Debug, Default)]
pub(crate) struct ExtensionRegistries {
    pub(crate) slots: Vec<UiExtensionEntry>,
    pub(crate) widgets: Vec<UiExtensionEntry>,
    pub(crate) assets: Vec<UiExtensionEntry>,
}

impl ExtensionRegistries {
    /// Drop every entry contributed by `plugin`.
    pub(crate) fn clear_plugin(&mut self, plugin: &str) {
        self.slots.retain(|e| e.plugin != plugin);
        self.widgets.retain(|e| e.plugin != plugin);
        self.assets.retain(|e| e.plugin != plugin);
    }
}
