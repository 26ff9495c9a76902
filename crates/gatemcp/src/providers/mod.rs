//! Provider policy for the OAuth discovery and registration surface.
//!
//! Two kinds of identity provider sit behind the proxy: a self-hosted IDP
//! described entirely by config (`default`), and a hosted vendor org with a
//! predictable URL shape (`demo` / `hosted`). Each supplies the well-known
//! metadata handler and, for the hosted kind, dynamic client registration.

mod default;
mod hosted;

pub use default::DefaultProvider;
pub use hosted::HostedProvider;

use axum::response::Response;
use bytes::Bytes;
use http::HeaderMap;

use crate::config::{Config, ProviderMode};
use crate::error::GateError;

/// Hosted vendor base; orgs hang off it as `<base><org>/oauth2`.
pub const HOSTED_IDP_BASE_URL: &str = "https://api.asgardeo.io/t/";

/// The active provider policy.
#[derive(Debug)]
pub enum Provider {
    /// Self-hosted IDP, metadata synthesized from config
    Default(DefaultProvider),
    /// Hosted vendor org, metadata proxied and rewritten
    Hosted(HostedProvider),
}

impl Provider {
    /// Select the provider for the configured mode.
    pub fn from_config(cfg: &Config) -> Self {
        match cfg.mode {
            ProviderMode::Default => Self::Default(DefaultProvider::new()),
            ProviderMode::Demo => Self::Hosted(HostedProvider::new(cfg.demo.clone(), cfg)),
            ProviderMode::Hosted => Self::Hosted(HostedProvider::new(cfg.hosted.clone(), cfg)),
        }
    }

    /// Serve `/.well-known/oauth-authorization-server`.
    pub async fn well_known(
        &self,
        cfg: &Config,
        headers: &HeaderMap,
    ) -> Result<Response, GateError> {
        match self {
            Self::Default(p) => p.well_known(cfg, headers),
            Self::Hosted(p) => p.well_known(cfg, headers).await,
        }
    }

    /// Whether this provider handles `/register` itself.
    ///
    /// When `false`, registration requests are proxied to the upstream
    /// authorization server instead.
    pub fn has_register_handler(&self) -> bool {
        matches!(self, Self::Hosted(_))
    }

    /// Handle a dynamic client registration request.
    pub async fn register(&self, cfg: &Config, body: Bytes) -> Result<Response, GateError> {
        match self {
            Self::Default(_) => Err(GateError::internal(
                "default provider does not handle registration",
            )),
            Self::Hosted(p) => p.register(cfg, body).await,
        }
    }
}

/// Derive the effective auth-server and JWKS URLs for the selected mode.
pub fn derive_auth_endpoints(cfg: &mut Config) {
    match cfg.mode {
        ProviderMode::Demo => {
            cfg.auth_server_base_url =
                format!("{HOSTED_IDP_BASE_URL}{}/oauth2", cfg.demo.org_name);
            cfg.jwks_url = format!("{}/jwks", cfg.auth_server_base_url);
        }
        ProviderMode::Hosted => {
            cfg.auth_server_base_url =
                format!("{HOSTED_IDP_BASE_URL}{}/oauth2", cfg.hosted.org_name);
            cfg.jwks_url = format!("{}/jwks", cfg.auth_server_base_url);
        }
        ProviderMode::Default => {
            cfg.auth_server_base_url = cfg.default_idp.base_url.clone();
            cfg.jwks_url = cfg.default_idp.jwks_url.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrgConfig;

    #[test]
    fn demo_mode_derives_vendor_urls() {
        let mut cfg = Config {
            mode: ProviderMode::Demo,
            demo: OrgConfig {
                org_name: "acme".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        derive_auth_endpoints(&mut cfg);
        assert_eq!(
            cfg.auth_server_base_url,
            "https://api.asgardeo.io/t/acme/oauth2"
        );
        assert_eq!(cfg.jwks_url, "https://api.asgardeo.io/t/acme/oauth2/jwks");
    }

    #[test]
    fn default_mode_uses_configured_idp() {
        let mut cfg = Config::default();
        cfg.default_idp.base_url = "https://idp.example.com".to_string();
        cfg.default_idp.jwks_url = "https://idp.example.com/jwks".to_string();
        derive_auth_endpoints(&mut cfg);
        assert_eq!(cfg.auth_server_base_url, "https://idp.example.com");
        assert_eq!(cfg.jwks_url, "https://idp.example.com/jwks");
    }

    #[test]
    fn register_handler_presence_follows_provider_kind() {
        let mut cfg = Config::default();
        assert!(!Provider::from_config(&cfg).has_register_handler());

        cfg.mode = ProviderMode::Hosted;
        assert!(Provider::from_config(&cfg).has_register_handler());
    }
}
