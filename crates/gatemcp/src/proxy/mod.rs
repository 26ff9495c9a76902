//! Request routing: OAuth surface, bearer enforcement, CORS, reverse proxy.
//!
//! Route table, evaluated by axum after the CORS wrapper has answered any
//! preflight:
//!
//! | Path | Method | Behavior |
//! |------|--------|----------|
//! | `/.well-known/oauth-authorization-server` | GET | provider metadata |
//! | `/register` | POST | provider DCR, or forwarded to the auth server |
//! | `/authorize` | GET | 302 to the auth server with merged query params |
//! | `/token` | POST | form forwarded to the auth server, response relayed |
//! | `paths.sse` | GET | bearer check, reverse proxy, SSE rewrite |
//! | `paths.messages` | POST | bearer check, reverse proxy |
//! | anything else | any | 404 |

pub mod forward;
pub mod sse;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, RawQuery, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE, LOCATION, ORIGIN};
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use serde_json::json;
use tracing::{Instrument, debug, info_span, warn};
use uuid::Uuid;

use gatemcp_auth::{AuthError, TokenVerifier};

use crate::config::{Config, CorsConfig, ParamConfig};
use crate::error::GateError;
use crate::providers::Provider;

/// Identifier attached to every request for log correlation.
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub Uuid);

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub provider: Arc<Provider>,
    pub verifier: TokenVerifier,
    /// Upstream client; per-request timeouts, none globally (SSE streams)
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(config: Arc<Config>, provider: Arc<Provider>, verifier: TokenVerifier) -> Self {
        Self {
            config,
            provider,
            verifier,
            http: reqwest::Client::new(),
        }
    }
}

/// Build the full route table.
pub fn build_router(state: AppState) -> Router {
    let guarded = Router::new()
        .route(&state.config.paths.sse, get(sse_proxy))
        .route(&state.config.paths.messages, post(messages_proxy))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_bearer,
        ));

    Router::new()
        .route(
            "/.well-known/oauth-authorization-server",
            get(well_known),
        )
        .route("/register", post(register))
        .route("/authorize", get(authorize))
        .route("/token", post(token))
        .merge(guarded)
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), cors))
        .layer(middleware::from_fn(request_id))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

// ---- middleware ----

/// Tag each request with a UUID and a tracing span.
async fn request_id(mut req: Request, next: Next) -> Response {
    let id = Uuid::new_v4();
    req.extensions_mut().insert(RequestId(id));
    let span = info_span!("request", id = %id, method = %req.method(), path = %req.uri().path());
    next.run(req).instrument(span).await
}

/// Single CORS wrapper around the whole route table.
///
/// Discovery endpoints always carry the permissive browser policy so any
/// client can run metadata discovery; everything else follows config.
async fn cors(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let discovery = req.uri().path().starts_with("/.well-known") || req.uri().path() == "/register";
    let origin = req.headers().get(ORIGIN).cloned();

    if req.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply_cors(response.headers_mut(), &state.config.cors, discovery, origin.as_ref());
        return response;
    }

    let mut response = next.run(req).await;
    apply_cors(response.headers_mut(), &state.config.cors, discovery, origin.as_ref());
    response
}

fn apply_cors(
    headers: &mut HeaderMap,
    cfg: &CorsConfig,
    discovery: bool,
    origin: Option<&HeaderValue>,
) {
    let (allow_origin, methods, allow_headers, credentials) = if discovery {
        (
            Some(HeaderValue::from_static("*")),
            "GET, POST, OPTIONS".to_string(),
            "Authorization, Content-Type".to_string(),
            false,
        )
    } else {
        if cfg.allowed_origins.is_empty() {
            return;
        }
        let allow_origin = if cfg.allowed_origins.iter().any(|o| o == "*") {
            Some(HeaderValue::from_static("*"))
        } else {
            // Echo the request origin only when the allowlist names it
            origin
                .filter(|o| {
                    o.to_str()
                        .is_ok_and(|o| cfg.allowed_origins.iter().any(|a| a == o))
                })
                .cloned()
        };
        (
            allow_origin,
            cfg.allowed_methods.join(", "),
            cfg.allowed_headers.join(", "),
            cfg.allow_credentials,
        )
    };

    let Some(allow_origin) = allow_origin else {
        return;
    };

    let set = |headers: &mut HeaderMap, name: &'static str, value: HeaderValue| {
        if !headers.contains_key(name) {
            headers.insert(name, value);
        }
    };
    set(headers, "access-control-allow-origin", allow_origin);
    if let Ok(value) = HeaderValue::from_str(&methods) {
        set(headers, "access-control-allow-methods", value);
    }
    if let Ok(value) = HeaderValue::from_str(&allow_headers) {
        set(headers, "access-control-allow-headers", value);
    }
    if credentials {
        set(
            headers,
            "access-control-allow-credentials",
            HeaderValue::from_static("true"),
        );
    }
}

/// Enforce `Authorization: Bearer <jwt>` on guarded routes.
///
/// The upstream is never dialed for a request that fails here; verified
/// claims ride along in request extensions for downstream logging.
async fn require_bearer(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let Some(token) = token else {
        return GateError::Auth(AuthError::Malformed("missing bearer token".into()))
            .into_response();
    };

    match state.verifier.verify(token) {
        Ok(claims) => {
            debug!(sub = ?claims.sub, "bearer token accepted");
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        Err(e) => {
            warn!(path = %req.uri().path(), error = %e, "bearer token rejected");
            GateError::Auth(e).into_response()
        }
    }
}

// ---- handlers ----

async fn well_known(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, GateError> {
    state.provider.well_known(&state.config, &headers).await
}

async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, GateError> {
    if state.provider.has_register_handler() {
        state.provider.register(&state.config, body).await
    } else {
        forward_register(&state, &headers, body).await
    }
}

/// 302 to the auth server's authorize endpoint with merged query params.
async fn authorize(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Response, GateError> {
    let cfg = &state.config;
    let params = path_params(cfg, "/authorize");
    let query = merge_params(query.as_deref().unwrap_or(""), params);

    let location = if query.is_empty() {
        format!("{}/authorize", cfg.auth_server_base_url)
    } else {
        format!("{}/authorize?{}", cfg.auth_server_base_url, query)
    };
    debug!(%location, "redirecting authorization request");

    let value = HeaderValue::from_str(&location)
        .map_err(|e| GateError::internal(format!("invalid redirect location: {e}")))?;
    Ok((StatusCode::FOUND, [(LOCATION, value)]).into_response())
}

/// Forward the token form to the auth server and relay its answer.
async fn token(State(state): State<AppState>, body: Bytes) -> Result<Response, GateError> {
    let cfg = &state.config;
    let form = String::from_utf8_lossy(&body);
    let form = merge_params(&form, path_params(cfg, "/token"));

    let response = state
        .http
        .post(format!("{}/token", cfg.auth_server_base_url))
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .timeout(Duration::from_secs(cfg.timeout_seconds))
        .body(form)
        .send()
        .await?;

    relay_buffered(response).await
}

async fn sse_proxy(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, GateError> {
    forward::proxy_to_upstream(&state, Method::GET, &uri, &headers, Some(addr), None, true).await
}

async fn messages_proxy(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, GateError> {
    forward::proxy_to_upstream(
        &state,
        Method::POST,
        &uri,
        &headers,
        Some(addr),
        Some(body),
        false,
    )
    .await
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "not_found",
            "error_description": "no such endpoint",
        })),
    )
        .into_response()
}

// ---- helpers ----

fn path_params<'a>(cfg: &'a Config, path: &str) -> &'a [ParamConfig] {
    cfg.default_idp
        .path
        .get(path)
        .map(|p| match path {
            "/authorize" => p.add_query_params.as_slice(),
            _ => p.add_body_params.as_slice(),
        })
        .unwrap_or(&[])
}

/// Merge configured params into a form/query string.
///
/// A configured param replaces any client-supplied value of the same name;
/// with nothing configured the input passes through untouched.
fn merge_params(existing: &str, params: &[ParamConfig]) -> String {
    if params.is_empty() {
        return existing.to_string();
    }

    let mut pairs: Vec<(String, String)> = url::form_urlencoded::parse(existing.as_bytes())
        .into_owned()
        .collect();
    for param in params {
        if let Some(pair) = pairs.iter_mut().find(|(name, _)| *name == param.name) {
            pair.1 = param.value.clone();
        } else {
            pairs.push((param.name.clone(), param.value.clone()));
        }
    }

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    serializer.extend_pairs(pairs);
    serializer.finish()
}

/// Forward a registration request to the upstream auth server.
async fn forward_register(
    state: &AppState,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, GateError> {
    let cfg = &state.config;
    let body = merge_json_params(body, path_params(cfg, "/register"));
    let content_type = headers
        .get(CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("application/json"));

    let response = state
        .http
        .post(format!("{}/register", cfg.auth_server_base_url))
        .header(CONTENT_TYPE, content_type)
        .timeout(Duration::from_secs(cfg.timeout_seconds))
        .body(body)
        .send()
        .await?;

    relay_buffered(response).await
}

/// Merge configured body params into a JSON object body.
fn merge_json_params(body: Bytes, params: &[ParamConfig]) -> Bytes {
    if params.is_empty() {
        return body;
    }
    match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(mut value) if value.is_object() => {
            for param in params {
                value[&param.name] = json!(param.value);
            }
            Bytes::from(value.to_string())
        }
        _ => body,
    }
}

/// Relay a buffered upstream response (status, content type, body).
async fn relay_buffered(response: reqwest::Response) -> Result<Response, GateError> {
    let status = response.status();
    let content_type = response.headers().get(CONTENT_TYPE).cloned();
    let body = response.bytes().await?;

    let mut builder = Response::builder().status(status);
    if let Some(ct) = content_type {
        builder = builder.header(CONTENT_TYPE, ct);
    }
    builder
        .body(Body::from(body))
        .map_err(|e| GateError::internal(format!("failed to build response: {e}")))
}
