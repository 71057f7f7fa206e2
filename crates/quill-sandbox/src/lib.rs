//! Quill Sandbox — capability-enforcing resource wrappers.
//!
//! Plugin handlers never see raw database, filesystem or HTTP primitives.
//! They receive the three wrappers in this crate, each constructed per
//! invocation from the capabilities snapshot taken when the route or hook
//! was registered:
//!
//! - [`DbSandbox`] — read-only database access with statement-shape
//!   checks and per-request query/time quotas.
//! - [`FsSandbox`] — read-only filesystem access rooted at the plugin's
//!   own directory, or a denied variant that always fails.
//! - [`HttpSandbox`] — outbound HTTP restricted to an allowlist, with a
//!   hard per-call timeout, a response size cap and a call quota.
//!
//! All violations surface as [`SandboxError`], distinguishable from host
//! faults so the execution runtime can attribute them to the plugin.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod capabilities;
mod db;
mod error;
mod fs;
mod http;

pub use capabilities::SandboxCapabilities;
pub use db::{DbLimits, DbSandbox, QueryExecutor};
pub use error::{SandboxError, SandboxResult};
pub use fs::FsSandbox;
pub use http::{HttpLimits, HttpSandbox, SandboxResponse};
