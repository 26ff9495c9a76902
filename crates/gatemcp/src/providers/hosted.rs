//! Hosted-vendor provider: proxied metadata and translated registration.

use std::time::Duration;

use axum::Json;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::HOSTED_IDP_BASE_URL;
use crate::config::{Config, OrgConfig};
use crate::error::GateError;
use crate::external::external_base_url;

/// Incoming RFC 7591 dynamic registration request, the fields we map.
#[derive(Debug, Deserialize)]
struct RegistrationRequest {
    client_name: Option<String>,
    #[serde(default)]
    redirect_uris: Vec<String>,
    grant_types: Option<Vec<String>>,
}

/// Provider for hosted vendor organizations (demo and hosted modes).
#[derive(Debug)]
pub struct HostedProvider {
    org: OrgConfig,
    client: reqwest::Client,
}

impl HostedProvider {
    pub fn new(org: OrgConfig, cfg: &Config) -> Self {
        Self {
            org,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(cfg.timeout_seconds))
                .build()
                .expect("failed to build HTTP client"),
        }
    }

    /// Whether admin credentials for the vendor API are configured.
    fn can_register(&self) -> bool {
        !self.org.client_id.is_empty() && !self.org.client_secret.is_empty()
    }

    /// Vendor dynamic-client-registration endpoint for this org.
    fn dcr_endpoint(&self) -> String {
        format!(
            "{HOSTED_IDP_BASE_URL}{}/api/identity/oauth2/dcr/v1.1/register",
            self.org.org_name
        )
    }

    /// Relay the vendor's well-known document, pointing the interactive
    /// endpoints back at the proxy so the flow stays gated.
    pub async fn well_known(
        &self,
        cfg: &Config,
        headers: &HeaderMap,
    ) -> Result<Response, GateError> {
        let url = format!(
            "{}/.well-known/oauth-authorization-server",
            cfg.auth_server_base_url
        );
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(GateError::upstream(
                response.status().as_u16(),
                format!("well-known fetch from {url} failed"),
            ));
        }

        let mut metadata: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GateError::network(format!("invalid well-known document: {e}")))?;

        let base = external_base_url(cfg, headers);
        if let Some(doc) = metadata.as_object_mut() {
            doc.insert("authorization_endpoint".into(), json!(format!("{base}/authorize")));
            doc.insert("token_endpoint".into(), json!(format!("{base}/token")));
            doc.insert("registration_endpoint".into(), json!(format!("{base}/register")));
        }
        debug!(org = %self.org.org_name, base_url = %base, "relayed hosted well-known metadata");

        Ok(Json(metadata).into_response())
    }

    /// Translate a client's dynamic registration into the vendor admin API.
    ///
    /// Without configured credentials there is nothing to authenticate the
    /// admin call with, so the endpoint reports itself unimplemented.
    pub async fn register(&self, _cfg: &Config, body: Bytes) -> Result<Response, GateError> {
        if !self.can_register() {
            return Ok((
                StatusCode::NOT_IMPLEMENTED,
                Json(json!({
                    "error": "registration_not_supported",
                    "error_description": "dynamic client registration requires vendor credentials",
                })),
            )
                .into_response());
        }

        let request: RegistrationRequest = serde_json::from_slice(&body)
            .map_err(|e| GateError::upstream(400, format!("invalid registration request: {e}")))?;

        let payload = json!({
            "client_name": request.client_name.unwrap_or_else(|| "mcp-client".to_string()),
            "redirect_uris": request.redirect_uris,
            "grant_types": request
                .grant_types
                .unwrap_or_else(|| vec!["authorization_code".to_string()]),
        });

        let endpoint = self.dcr_endpoint();
        let response = self
            .client
            .post(&endpoint)
            .basic_auth(&self.org.client_id, Some(&self.org.client_secret))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, endpoint = %endpoint, "vendor registration failed");
            return Err(GateError::upstream(
                status.as_u16(),
                "vendor registration failed",
            ));
        }

        let created: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GateError::network(format!("invalid registration response: {e}")))?;

        Ok((StatusCode::CREATED, Json(created)).into_response())
    }
}
