//! Error types for JWKS fetching and token verification.

use thiserror::Error;

/// Errors produced while fetching keys or verifying tokens.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// HTTP request to the JWKS endpoint failed
    #[error("JWKS request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JWKS response was not a valid key-set document
    #[error("invalid JWKS response: {0}")]
    InvalidResponse(String),

    /// JWKS document parsed but contained no usable keys
    #[error("JWKS document contained no usable keys")]
    EmptyKeySet,

    /// No JWKS endpoint configured; verification fails closed
    #[error("no JWKS endpoint configured")]
    NoJwksUrl,

    /// Key type is not supported (only RSA and EC are)
    #[error("unsupported key type: {kty}")]
    UnsupportedKeyType {
        /// The unsupported `kty` value
        kty: String,
    },

    /// Token or key names an algorithm outside RS256/ES256
    #[error("unsupported algorithm: {alg}")]
    UnsupportedAlgorithm {
        /// The offending algorithm name
        alg: String,
    },

    /// Key parameters were missing or undecodable
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// Base64url decoding of a key parameter failed
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Token could not be parsed at all
    #[error("malformed token: {0}")]
    Malformed(String),

    /// Token header carries no `kid`
    #[error("token header has no kid")]
    MissingKid,

    /// Token `kid` matches no cached key
    #[error("no key matches kid {kid:?}")]
    UnknownKid {
        /// The `kid` the token asked for
        kid: String,
    },

    /// Signature did not verify against the selected key
    #[error("token signature is invalid")]
    BadSignature,

    /// Token `exp` is in the past (beyond the allowed skew)
    #[error("token is expired")]
    Expired,
}

impl AuthError {
    /// Whether the error is one a client can fix by obtaining a fresh token.
    pub fn is_token_error(&self) -> bool {
        matches!(
            self,
            Self::Malformed(_)
                | Self::MissingKid
                | Self::UnknownKid { .. }
                | Self::BadSignature
                | Self::Expired
                | Self::UnsupportedAlgorithm { .. }
        )
    }
}
