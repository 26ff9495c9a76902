//! JSON Web Key Set fetching and caching.
//!
//! Keys are fetched from the provider's JWKS endpoint, decoded once, and held
//! in a `kid`-indexed map behind a reader/writer lock. Lookups take the read
//! lock only; a fetch atomically swaps the whole map. Either the store is
//! empty (nothing verifies, requests fail closed) or every held key decoded
//! successfully.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::AuthError;

/// Minimum interval between key-set refreshes triggered by failed lookups.
const REFRESH_COOLDOWN: Duration = Duration::from_secs(60);

/// A single JSON Web Key as published by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type (RSA, EC)
    pub kty: String,

    /// Key ID used for key selection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// Public key use (sig, enc)
    #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,

    /// Algorithm (RS256, ES256)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    /// RSA modulus (base64url)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA exponent (base64url)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    /// Elliptic curve name (P-256)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// EC X coordinate (base64url)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// EC Y coordinate (base64url)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

impl Jwk {
    /// Resolve the signing algorithm for this key.
    ///
    /// Uses the `alg` field when present, otherwise infers from the key type.
    /// Anything outside RS256/ES256 is rejected.
    pub fn algorithm(&self) -> Result<Algorithm, AuthError> {
        match self.alg.as_deref() {
            Some("RS256") => Ok(Algorithm::RS256),
            Some("ES256") => Ok(Algorithm::ES256),
            Some(other) => Err(AuthError::UnsupportedAlgorithm {
                alg: other.to_string(),
            }),
            None => match self.kty.as_str() {
                "RSA" => Ok(Algorithm::RS256),
                "EC" => Ok(Algorithm::ES256),
                other => Err(AuthError::UnsupportedKeyType {
                    kty: other.to_string(),
                }),
            },
        }
    }

    /// Decode this JWK into a verification key.
    pub fn to_verification_key(&self) -> Result<VerificationKey, AuthError> {
        let algorithm = self.algorithm()?;
        let key = match self.kty.as_str() {
            "RSA" => self.to_rsa_key()?,
            "EC" => self.to_ec_key()?,
            other => {
                return Err(AuthError::UnsupportedKeyType {
                    kty: other.to_string(),
                });
            }
        };
        Ok(VerificationKey { key, algorithm })
    }

    fn to_rsa_key(&self) -> Result<DecodingKey, AuthError> {
        let n = self.n.as_ref().ok_or_else(|| {
            AuthError::InvalidKeyMaterial("RSA key missing 'n' parameter".into())
        })?;
        let e = self.e.as_ref().ok_or_else(|| {
            AuthError::InvalidKeyMaterial("RSA key missing 'e' parameter".into())
        })?;

        // Reject undecodable parameters up front; from_rsa_components takes
        // the base64url strings as-is.
        URL_SAFE_NO_PAD.decode(n)?;
        URL_SAFE_NO_PAD.decode(e)?;

        DecodingKey::from_rsa_components(n, e)
            .map_err(|e| AuthError::InvalidKeyMaterial(format!("failed to build RSA key: {e}")))
    }

    fn to_ec_key(&self) -> Result<DecodingKey, AuthError> {
        if let Some(crv) = self.crv.as_deref()
            && crv != "P-256"
        {
            return Err(AuthError::InvalidKeyMaterial(format!(
                "unsupported EC curve: {crv}"
            )));
        }
        let x = self
            .x
            .as_ref()
            .ok_or_else(|| AuthError::InvalidKeyMaterial("EC key missing 'x' parameter".into()))?;
        let y = self
            .y
            .as_ref()
            .ok_or_else(|| AuthError::InvalidKeyMaterial("EC key missing 'y' parameter".into()))?;

        URL_SAFE_NO_PAD.decode(x)?;
        URL_SAFE_NO_PAD.decode(y)?;

        DecodingKey::from_ec_components(x, y)
            .map_err(|e| AuthError::InvalidKeyMaterial(format!("failed to build EC key: {e}")))
    }
}

/// JSON Web Key Set document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwkSet {
    /// The published keys
    pub keys: Vec<Jwk>,
}

/// A decoded public key ready for signature checks.
#[derive(Clone)]
pub struct VerificationKey {
    /// The decoded key
    pub key: DecodingKey,
    /// Algorithm the key signs with
    pub algorithm: Algorithm,
}

impl std::fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationKey")
            .field("key", &"<decoded>")
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

/// `kid`-indexed cache of the identity provider's verification keys.
pub struct KeyStore {
    url: Option<String>,
    client: reqwest::Client,
    keys: RwLock<HashMap<String, VerificationKey>>,
    last_refresh: Mutex<Option<Instant>>,
    refresh_cooldown: Duration,
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("url", &self.url)
            .field("keys", &self.keys.read().len())
            .finish()
    }
}

impl KeyStore {
    /// Create a store for the given JWKS endpoint.
    ///
    /// With no URL the store stays empty forever and every verification
    /// fails closed.
    pub fn new(url: Option<String>, timeout: Duration) -> Self {
        Self {
            url,
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("failed to build HTTP client"),
            keys: RwLock::new(HashMap::new()),
            last_refresh: Mutex::new(None),
            refresh_cooldown: REFRESH_COOLDOWN,
        }
    }

    /// Whether a JWKS endpoint is configured.
    pub fn has_url(&self) -> bool {
        self.url.is_some()
    }

    /// Fetch the key set and atomically replace the cache.
    ///
    /// Keys that fail to decode are skipped with a warning; a document that
    /// yields no usable key at all leaves the cache untouched and errors.
    pub async fn fetch(&self) -> Result<usize, AuthError> {
        let url = self.url.as_deref().ok_or(AuthError::NoJwksUrl)?;
        info!(url, "fetching JWKS");
        *self.last_refresh.lock() = Some(Instant::now());

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AuthError::InvalidResponse(format!(
                "JWKS endpoint returned HTTP {}",
                response.status()
            )));
        }

        let jwk_set: JwkSet = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(format!("failed to parse JWKS JSON: {e}")))?;

        let mut keys = HashMap::new();
        for jwk in &jwk_set.keys {
            let Some(kid) = jwk.kid.clone() else {
                warn!(kty = %jwk.kty, "skipping JWK without kid");
                continue;
            };
            match jwk.to_verification_key() {
                Ok(key) => {
                    debug!(kid = %kid, kty = %jwk.kty, alg = ?jwk.alg, "decoded JWK");
                    keys.insert(kid, key);
                }
                Err(e) => {
                    warn!(kid = %kid, error = %e, "skipping undecodable JWK");
                }
            }
        }

        if keys.is_empty() {
            return Err(AuthError::EmptyKeySet);
        }

        let count = keys.len();
        self.install(keys);
        info!(num_keys = count, "JWKS cache updated");
        Ok(count)
    }

    /// Atomically replace the cached keys.
    pub fn install(&self, keys: HashMap<String, VerificationKey>) {
        *self.keys.write() = keys;
    }

    /// Look up a verification key by `kid`.
    pub fn key(&self, kid: &str) -> Option<VerificationKey> {
        self.keys.read().get(kid).cloned()
    }

    /// Number of cached keys.
    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    /// Whether the cache holds no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }

    /// Claim a refresh slot, enforcing the cool-down.
    ///
    /// Returns `true` at most once per cool-down window; the caller is then
    /// expected to run [`fetch`](Self::fetch). Returns `false` when no URL is
    /// configured or another refresh ran too recently.
    pub fn try_begin_refresh(&self) -> bool {
        if self.url.is_none() {
            return false;
        }
        let mut last = self.last_refresh.lock();
        match *last {
            Some(at) if at.elapsed() < self.refresh_cooldown => false,
            _ => {
                *last = Some(Instant::now());
                true
            }
        }
    }
}
