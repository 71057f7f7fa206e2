//! Outbound HTTP sandbox.
//!
//! Fetches are permitted only to hosts on the registration's allowlist
//! (exact match or dot-boundary subdomain). Every call is raced against a
//! hard timeout, responses are size-capped, and a per-request call quota
//! applies in the same shape as the DB sandbox's query quota.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures::StreamExt;
use tracing::debug;

use crate::error::{SandboxError, SandboxResult};

/// Per-request limits for the HTTP sandbox.
#[derive(Debug, Clone)]
pub struct HttpLimits {
    /// Maximum outbound calls per request.
    pub max_calls: u32,
    /// Hard per-call timeout.
    pub timeout: Duration,
    /// Maximum response body size in bytes.
    pub max_response_bytes: u64,
}

impl Default for HttpLimits {
    fn default() -> Self {
        Self {
            max_calls: 5,
            timeout: Duration::from_secs(10),
            max_response_bytes: 5 * 1024 * 1024,
        }
    }
}

/// A completed sandboxed response.
#[derive(Debug, Clone)]
pub struct SandboxResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body, already capped at the configured maximum.
    pub body: Vec<u8>,
}

impl SandboxResponse {
    /// The body as UTF-8 text (lossy).
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when the body is not valid JSON.
    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Outbound HTTP access handed to plugin handlers.
pub struct HttpSandbox {
    mode: Mode,
    limits: HttpLimits,
    calls_used: AtomicU32,
}

enum Mode {
    Enabled {
        client: reqwest::Client,
        allowlist: Vec<String>,
    },
    Denied,
}

impl HttpSandbox {
    /// Create a sandbox restricted to `allowlist`.
    ///
    /// An empty allowlist (including the case where the manifest never
    /// requested the outbound capability) produces the denied form.
    #[must_use]
    pub fn new(allowlist: Vec<String>, limits: HttpLimits) -> Self {
        let mode = if allowlist.is_empty() {
            Mode::Denied
        } else {
            Mode::Enabled {
                client: reqwest::Client::new(),
                allowlist,
            }
        };
        Self {
            mode,
            limits,
            calls_used: AtomicU32::new(0),
        }
    }

    /// Create a sandbox that fails every call with a capability error.
    #[must_use]
    pub fn denied(limits: HttpLimits) -> Self {
        Self {
            mode: Mode::Denied,
            limits,
            calls_used: AtomicU32::new(0),
        }
    }

    /// Perform an outbound request.
    ///
    /// # Errors
    ///
    /// Fails before any network I/O when the capability is absent, the
    /// call quota is exhausted, the URL is invalid, or the host is not
    /// allowlisted. Fails during the call on timeout, transport errors,
    /// or a response exceeding the size cap.
    pub async fn fetch(
        &self,
        method: &str,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> SandboxResult<SandboxResponse> {
        let (client, allowlist) = match &self.mode {
            Mode::Enabled { client, allowlist } => (client, allowlist),
            Mode::Denied => return Err(SandboxError::CapabilityDenied("http:outbound")),
        };

        if self.calls_used.load(Ordering::Relaxed) >= self.limits.max_calls {
            return Err(SandboxError::QuotaExceeded {
                resource: "http calls",
                limit: u64::from(self.limits.max_calls),
            });
        }

        let parsed = url::Url::parse(url).map_err(|e| SandboxError::InvalidUrl(e.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| SandboxError::InvalidUrl(format!("no host in {url}")))?;
        if !host_allowed(host, allowlist) {
            return Err(SandboxError::HostNotAllowed(host.to_string()));
        }

        let http_method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|_| SandboxError::Http(format!("invalid method: {method}")))?;

        self.calls_used.fetch_add(1, Ordering::Relaxed);
        debug!(%host, method = %http_method, "Sandboxed outbound request");

        let limits = self.limits.clone();
        let request = async move {
            let mut builder = client.request(http_method, parsed);
            if let Some(json_body) = body {
                builder = builder.json(&json_body);
            }
            let response = builder
                .send()
                .await
                .map_err(|e| SandboxError::Http(e.to_string()))?;
            let status = response.status().as_u16();

            if let Some(length) = response.content_length() {
                if length > limits.max_response_bytes {
                    return Err(SandboxError::ResponseTooLarge {
                        limit: limits.max_response_bytes,
                    });
                }
            }

            // No (trustworthy) Content-Length: stream with a running byte
            // counter and abort the read once the cap is crossed.
            let mut collected: Vec<u8> = Vec::new();
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| SandboxError::Http(e.to_string()))?;
                if (collected.len() as u64).saturating_add(chunk.len() as u64)
                    > limits.max_response_bytes
                {
                    return Err(SandboxError::ResponseTooLarge {
                        limit: limits.max_response_bytes,
                    });
                }
                collected.extend_from_slice(&chunk);
            }

            Ok(SandboxResponse {
                status,
                body: collected,
            })
        };

        tokio::time::timeout(self.limits.timeout, request)
            .await
            .map_err(|_| SandboxError::Timeout {
                seconds: self.limits.timeout.as_secs(),
            })?
    }
}

impl std::fmt::Debug for HttpSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSandbox")
            .field("denied", &matches!(self.mode, Mode::Denied))
            .field("calls_used", &self.calls_used)
            .finish_non_exhaustive()
    }
}

/// Exact host match, or a subdomain separated at a dot boundary.
///
/// `notexample.com` must not match an allowlisted `example.com`.
fn host_allowed(host: &str, allowlist: &[String]) -> bool {
    allowlist.iter().any(|allowed| {
        host.eq_ignore_ascii_case(allowed)
            || (host.len() > allowed.len()
                && host[..host.len() - allowed.len()].ends_with('.')
                && host[host.len() - allowed.len()..].eq_ignore_ascii_case(allowed))
    })
}
