//! Read-only filesystem sandbox rooted at the plugin's own directory.
//!
//! Writes are impossible by construction: no write method exists on this
//! type. When the registration lacks the `fs:read` capability the sandbox
//! is built in its denied form and every read fails with a capability
//! error; the interface shape never changes based on capabilities.

use std::path::{Component, Path, PathBuf};

use crate::error::{SandboxError, SandboxResult};

/// Filesystem access handed to plugin handlers.
#[derive(Debug, Clone)]
pub struct FsSandbox {
    access: FsAccess,
}

#[derive(Debug, Clone)]
enum FsAccess {
    Enabled { root: PathBuf },
    Denied,
}

impl FsSandbox {
    /// Create a sandbox rooted at the plugin's directory.
    #[must_use]
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        Self {
            access: FsAccess::Enabled { root: root.into() },
        }
    }

    /// Create a sandbox that fails every read with a capability error.
    #[must_use]
    pub fn denied() -> Self {
        Self {
            access: FsAccess::Denied,
        }
    }

    /// Resolve a plugin-relative path inside the root.
    ///
    /// Absolute paths and any `..` component are rejected outright rather
    /// than canonicalized, so a path can never name anything outside the
    /// plugin directory.
    fn resolve(&self, rel: &str) -> SandboxResult<PathBuf> {
        let root = match &self.access {
            FsAccess::Enabled { root } => root,
            FsAccess::Denied => return Err(SandboxError::CapabilityDenied("fs:read")),
        };

        let rel_path = Path::new(rel);
        if rel_path.is_absolute() {
            return Err(SandboxError::PathEscape(rel.to_string()));
        }
        for component in rel_path.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {},
                _ => return Err(SandboxError::PathEscape(rel.to_string())),
            }
        }
        Ok(root.join(rel_path))
    }

    /// Read a file as UTF-8 text.
    pub async fn read_to_string(&self, rel: &str) -> SandboxResult<String> {
        let path = self.resolve(rel)?;
        Ok(tokio::fs::read_to_string(path).await?)
    }

    /// Read a file as raw bytes.
    pub async fn read(&self, rel: &str) -> SandboxResult<Vec<u8>> {
        let path = self.resolve(rel)?;
        Ok(tokio::fs::read(path).await?)
    }

    /// Whether a file or directory exists under the root.
    pub async fn exists(&self, rel: &str) -> SandboxResult<bool> {
        let path = self.resolve(rel)?;
        Ok(tokio::fs::try_exists(path).await?)
    }

    /// List the entry names of a directory under the root.
    pub async fn list_dir(&self, rel: &str) -> SandboxResult<Vec<String>> {
        let path = self.resolve(rel)?;
        let mut entries = tokio::fs::read_dir(path).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }
}
