//! GateMCP: an OAuth 2.0 / OIDC gate in front of Model Context Protocol
//! servers.
//!
//! Clients reach the MCP server only through this proxy. The proxy
//! advertises authorization-server metadata so clients can discover the
//! identity provider, verifies bearer JWTs against the provider's JWKS on
//! every guarded request, and rewrites in-band SSE `endpoint` events so
//! clients keep posting back through the proxy. When the MCP server speaks
//! stdio instead of HTTP, a supervised bridge child exposes it locally and
//! the proxy fronts that.
//!
//! Module map:
//! - [`config`]: YAML configuration, defaulting, validation
//! - [`cli`]: command-line flags
//! - [`external`]: public base-URL resolution (env, config, forwarded headers)
//! - [`providers`]: default / hosted OAuth metadata and registration policy
//! - [`proxy`]: router, CORS, bearer middleware, reverse proxy, SSE rewrite
//! - [`subprocess`]: stdio-bridge child supervision
//! - [`lifecycle`]: startup ordering and graceful teardown
//! - [`diagnostics`]: operator-facing remediation output

pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod external;
pub mod lifecycle;
pub mod providers;
pub mod proxy;
pub mod subprocess;

pub use cli::Cli;
pub use config::Config;
pub use error::{GateError, GateResult};
