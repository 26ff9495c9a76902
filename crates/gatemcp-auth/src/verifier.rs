//! Bearer-token verification.

use std::sync::Arc;

use jsonwebtoken::{Algorithm, Validation, decode, decode_header, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::AuthError;
use crate::jwks::KeyStore;

/// Allowed clock skew when checking `exp`, in seconds.
const CLOCK_SKEW_LEEWAY: u64 = 60;

/// Claims extracted from a verified token.
///
/// Carried through the request for logging; the proxy never modifies or
/// re-issues them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject the token was issued to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Issuer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Audience (string or array, provider-dependent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<serde_json::Value>,

    /// Expiry as a Unix timestamp
    pub exp: u64,

    /// Issued-at as a Unix timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,

    /// Any further claims the provider includes
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Verifies bearer JWTs against the cached key set.
///
/// Verification is pure over the current cache contents: the same token
/// against the same keys always yields the same result. An unknown `kid`
/// schedules a single background key refresh (subject to the store's
/// cool-down) and rejects the current token; the next request benefits
/// from the refreshed keys.
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    store: Arc<KeyStore>,
}

impl TokenVerifier {
    /// Create a verifier over the given key store.
    pub fn new(store: Arc<KeyStore>) -> Self {
        Self { store }
    }

    /// The underlying key store.
    pub fn store(&self) -> &Arc<KeyStore> {
        &self.store
    }

    /// Verify a compact JWT and return its claims.
    ///
    /// Rejects tokens that are malformed, name an algorithm outside
    /// RS256/ES256, carry no `kid`, reference an unknown key, fail the
    /// signature check, or are expired beyond a 60-second skew allowance.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let header = decode_header(token).map_err(|e| AuthError::Malformed(e.to_string()))?;

        if !matches!(header.alg, Algorithm::RS256 | Algorithm::ES256) {
            return Err(AuthError::UnsupportedAlgorithm {
                alg: format!("{:?}", header.alg),
            });
        }

        let kid = header.kid.ok_or(AuthError::MissingKid)?;

        let Some(vk) = self.store.key(&kid) else {
            self.schedule_refresh(&kid);
            return Err(AuthError::UnknownKid { kid });
        };

        let mut validation = Validation::new(vk.algorithm);
        validation.leeway = CLOCK_SKEW_LEEWAY;
        validation.validate_aud = false;

        match decode::<Claims>(token, &vk.key, &validation) {
            Ok(data) => {
                debug!(kid = %kid, sub = ?data.claims.sub, "token verified");
                Ok(data.claims)
            }
            Err(e) => Err(match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                ErrorKind::InvalidSignature => AuthError::BadSignature,
                ErrorKind::InvalidAlgorithm => AuthError::UnsupportedAlgorithm {
                    alg: format!("{:?}", header.alg),
                },
                _ => AuthError::Malformed(e.to_string()),
            }),
        }
    }

    /// Kick off a background key refresh after an unknown-`kid` miss.
    ///
    /// At most one refresh runs per cool-down window; the current request is
    /// rejected either way, there is no in-band retry.
    fn schedule_refresh(&self, kid: &str) {
        if !self.store.try_begin_refresh() {
            return;
        }
        debug!(kid, "unknown kid, scheduling JWKS refresh");
        let store = Arc::clone(&self.store);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = store.fetch().await {
                    warn!(error = %e, "background JWKS refresh failed");
                }
            });
        }
    }
}
