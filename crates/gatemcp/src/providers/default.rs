//! Metadata synthesis for self-hosted identity providers.

use axum::Json;
use axum::response::{IntoResponse, Response};
use http::HeaderMap;
use serde_json::json;
use tracing::debug;

use crate::config::{Config, ResponseConfig};
use crate::error::GateError;
use crate::external::external_base_url;

/// Provider for IDPs configured under the `default` section.
///
/// The well-known document is assembled from the configured `response`
/// overrides; endpoint fields left out of config are synthesized against the
/// proxy's external base URL so clients route their OAuth flow through the
/// proxy. Registration is not handled here, the router forwards it upstream.
#[derive(Debug, Default)]
pub struct DefaultProvider;

impl DefaultProvider {
    pub fn new() -> Self {
        Self
    }

    /// Build the RFC 8414 authorization-server metadata response.
    pub fn well_known(&self, cfg: &Config, headers: &HeaderMap) -> Result<Response, GateError> {
        let overrides = cfg
            .default_idp
            .path
            .get("/.well-known/oauth-authorization-server")
            .and_then(|p| p.response.clone())
            .unwrap_or_default();

        let base = external_base_url(cfg, headers);
        debug!(base_url = %base, "synthesizing authorization-server metadata");

        let metadata = metadata_document(&overrides, &base, cfg);
        Ok(Json(metadata).into_response())
    }
}

fn metadata_document(
    overrides: &ResponseConfig,
    base: &str,
    cfg: &Config,
) -> serde_json::Value {
    let issuer = overrides
        .issuer
        .clone()
        .unwrap_or_else(|| cfg.auth_server_base_url.clone());
    let jwks_uri = overrides
        .jwks_uri
        .clone()
        .unwrap_or_else(|| cfg.jwks_url.clone());
    let authorization_endpoint = overrides
        .authorization_endpoint
        .clone()
        .unwrap_or_else(|| format!("{base}/authorize"));
    let token_endpoint = overrides
        .token_endpoint
        .clone()
        .unwrap_or_else(|| format!("{base}/token"));
    let registration_endpoint = overrides
        .registration_endpoint
        .clone()
        .unwrap_or_else(|| format!("{base}/register"));
    let response_types = overrides
        .response_types_supported
        .clone()
        .unwrap_or_else(|| vec!["code".to_string()]);
    let grant_types = overrides
        .grant_types_supported
        .clone()
        .unwrap_or_else(|| vec!["authorization_code".to_string(), "refresh_token".to_string()]);
    let code_challenge_methods = overrides
        .code_challenge_methods_supported
        .clone()
        .unwrap_or_else(|| vec!["S256".to_string()]);

    json!({
        "issuer": issuer,
        "jwks_uri": jwks_uri,
        "authorization_endpoint": authorization_endpoint,
        "token_endpoint": token_endpoint,
        "registration_endpoint": registration_endpoint,
        "response_types_supported": response_types,
        "grant_types_supported": grant_types,
        "code_challenge_methods_supported": code_challenge_methods,
        "token_endpoint_auth_methods_supported": ["client_secret_basic"],
    })
}
