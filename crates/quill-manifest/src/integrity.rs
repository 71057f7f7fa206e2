//! Manifest integrity: content checksum and signature verification.
//!
//! The checksum is a BLAKE3 hash of the manifest's canonical text — the
//! JSON object with the `checksum` and `signature` fields stripped,
//! re-serialized with sorted keys. The signature is a keyed BLAKE3 MAC of
//! the same canonical text under an operator-configured secret.
//!
//! When no secret is configured, a declared signature is accepted iff it
//! literally equals the checksum. This is a fallback trust mode for
//! installations without signing infrastructure — it proves nothing about
//! authenticity and is advisory only.

use std::path::Path;

use tracing::debug;

use crate::error::{ManifestError, ManifestResult};
use crate::manifest::PluginManifest;
use crate::{MANIFEST_FILE, SIGNING_SECRET_ENV};

/// Domain separation string for the manifest MAC key derivation.
const MAC_DOMAIN: &str = "quill manifest signature v1";

/// Operator signing configuration for manifest verification.
#[derive(Debug, Clone, Default)]
pub struct SigningConfig {
    secret: Option<String>,
}

impl SigningConfig {
    /// Build a config with an explicit secret.
    #[must_use]
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            secret: Some(secret.into()),
        }
    }

    /// Build a config with no secret (checksum-equality fallback mode).
    #[must_use]
    pub fn unsigned() -> Self {
        Self { secret: None }
    }

    /// Read the signing secret from the process environment.
    ///
    /// Absence of [`SIGNING_SECRET_ENV`] downgrades signature checking to
    /// the checksum-equality fallback.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            secret: std::env::var(SIGNING_SECRET_ENV).ok(),
        }
    }

    /// Whether a real signing secret is configured.
    #[must_use]
    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    /// Compute the expected signature for a canonical manifest text.
    ///
    /// Returns `None` when no secret is configured.
    #[must_use]
    pub fn sign(&self, canonical_text: &str) -> Option<String> {
        let secret = self.secret.as_ref()?;
        let key = blake3::derive_key(MAC_DOMAIN, secret.as_bytes());
        Some(blake3::keyed_hash(&key, canonical_text.as_bytes()).to_hex().to_string())
    }
}

impl PluginManifest {
    /// Deterministic canonical serialization of this manifest.
    ///
    /// The `checksum` and `signature` fields are stripped; `serde_json`
    /// serializes object keys in sorted order, making the text stable
    /// across declaration order in the source file.
    #[must_use]
    pub fn canonical_text(&self) -> String {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(object) = value.as_object_mut() {
            object.remove("checksum");
            object.remove("signature");
        }
        value.to_string()
    }

    /// Compute the content checksum (BLAKE3 hex of the canonical text).
    #[must_use]
    pub fn compute_checksum(&self) -> String {
        blake3::hash(self.canonical_text().as_bytes())
            .to_hex()
            .to_string()
    }

    /// Verify the declared checksum and signature, when present.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::ChecksumMismatch`] when a declared checksum
    /// disagrees with the recomputed one, and
    /// [`ManifestError::SignatureMismatch`] when a declared signature fails
    /// MAC verification (or, in fallback mode, does not equal the checksum).
    pub fn verify_integrity(&self, signing: &SigningConfig) -> ManifestResult<()> {
        let computed = self.compute_checksum();

        if let Some(declared) = &self.checksum {
            if declared != &computed {
                return Err(ManifestError::ChecksumMismatch {
                    declared: declared.clone(),
                    computed,
                });
            }
        }

        if let Some(declared_sig) = &self.signature {
            let expected = match signing.sign(&self.canonical_text()) {
                Some(mac) => mac,
                // Fallback trust mode: no secret configured, the signature
                // must literally equal the checksum. Advisory only.
                None => computed,
            };
            if declared_sig != &expected {
                return Err(ManifestError::SignatureMismatch {
                    plugin: self.name.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Load and verify a plugin manifest from a plugin directory.
///
/// Reads `manifest.json`, parses and validates it, then verifies the
/// declared checksum/signature against recomputed values.
///
/// # Errors
///
/// Returns [`ManifestError::Read`] when the file cannot be read, plus any
/// parse/validation/integrity error from [`PluginManifest::parse`] and
/// [`PluginManifest::verify_integrity`].
pub fn load_from_disk(plugin_dir: &Path, signing: &SigningConfig) -> ManifestResult<PluginManifest> {
    let path = plugin_dir.join(MANIFEST_FILE);
    let raw = std::fs::read_to_string(&path).map_err(|source| ManifestError::Read {
        path: path.clone(),
        source,
    })?;

    let manifest = PluginManifest::parse(&raw)?;
    manifest.verify_integrity(signing)?;

    debug!(plugin = %manifest.name, path = %path.display(), "Loaded plugin manifest");
    Ok(manifest)
}
