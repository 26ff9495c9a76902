//! Error types for the proxy.

use axum::Json;
use axum::response::{IntoResponse, Response};
use http::{StatusCode, header};
use thiserror::Error;

/// Result type for proxy operations.
pub type GateResult<T> = std::result::Result<T, GateError>;

/// Main error type for the proxy.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GateError {
    /// Invalid or inconsistent configuration
    #[error("configuration error: {message}")]
    Config {
        message: String,
        /// Config key the error is about, when known
        key: Option<String>,
    },

    /// Network failure talking to the JWKS endpoint, auth server, or upstream
    #[error("network error: {message}")]
    Network { message: String },

    /// Bearer token missing, malformed, expired, or unverifiable
    #[error("authentication failed: {0}")]
    Auth(#[from] gatemcp_auth::AuthError),

    /// Auth server or MCP server answered with a non-success status
    #[error("upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    /// Child process could not be spawned or died unexpectedly
    #[error("subprocess error: {message}")]
    Subprocess { message: String },

    /// Everything else
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl GateError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            key: None,
        }
    }

    /// Create a configuration error tied to a config key.
    pub fn config_with_key(message: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create an upstream error carrying the status to propagate.
    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
        }
    }

    /// Create a subprocess error.
    pub fn subprocess(message: impl Into<String>) -> Self {
        Self::Subprocess {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error came from configuration validation.
    pub fn is_validation_error(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Client-safe description; internal detail never leaves the process.
    fn sanitize(&self) -> String {
        match self {
            Self::Config { .. } => "configuration error".to_string(),
            Self::Network { .. } => "upstream service unreachable".to_string(),
            Self::Auth(e) => e.to_string(),
            Self::Upstream { status, .. } => format!("upstream returned HTTP {status}"),
            Self::Subprocess { .. } => "upstream bridge unavailable".to_string(),
            Self::Internal { .. } => "internal server error".to_string(),
        }
    }
}

impl From<reqwest::Error> for GateError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network {
            message: err.to_string(),
        }
    }
}

/// RFC 6749-style JSON error responses.
impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let (status, slug) = match &self {
            Self::Auth(_) => (StatusCode::UNAUTHORIZED, "invalid_token"),
            Self::Network { .. } => (StatusCode::BAD_GATEWAY, "server_error"),
            Self::Upstream { status, .. } => (
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
                "server_error",
            ),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "server_error"),
        };

        let body = Json(serde_json::json!({
            "error": slug,
            "error_description": self.sanitize(),
        }));

        let mut response = (status, body).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                header::HeaderValue::from_static("Bearer error=\"invalid_token\""),
            );
        }
        response
    }
}
