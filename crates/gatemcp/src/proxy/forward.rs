//! Reverse proxying of guarded requests to the upstream MCP server.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::response::Response;
use futures::StreamExt;
use http::header::{CACHE_CONTROL, CONTENT_TYPE, HOST};
use http::{HeaderMap, HeaderValue, Method, Uri};
use tracing::{debug, warn};
use url::Url;

use super::sse::{RewriteContext, rewrite_sse_stream};
use super::AppState;
use crate::error::GateError;
use crate::external::external_host;

/// How long the upstream may take to produce SSE response headers. The body
/// itself has no deadline, streams live as long as the session.
const SSE_HEADER_TIMEOUT: Duration = Duration::from_secs(30);

/// Request headers owned by the proxy or the transport, never forwarded.
/// `accept-encoding` stays home because the rewriter needs plain-text lines.
const SKIP_REQUEST_HEADERS: &[&str] = &[
    "host",
    "connection",
    "content-length",
    "transfer-encoding",
    "accept-encoding",
    "upgrade",
    "te",
    "trailer",
    "keep-alive",
    "proxy-authorization",
];

/// Response headers recomputed by the transport on the way back out.
const SKIP_RESPONSE_HEADERS: &[&str] = &[
    "connection",
    "content-length",
    "transfer-encoding",
    "upgrade",
    "trailer",
    "keep-alive",
];

/// Forward a guarded request to the upstream MCP server and relay the
/// response, wrapping SSE bodies in the endpoint rewriter.
pub async fn proxy_to_upstream(
    state: &AppState,
    method: Method,
    uri: &Uri,
    request_headers: &HeaderMap,
    client_addr: Option<SocketAddr>,
    body: Option<bytes::Bytes>,
    sse: bool,
) -> Result<Response, GateError> {
    let cfg = &state.config;
    let url = upstream_url(&cfg.base_url, uri);
    debug!(%method, upstream = %url, "proxying request");

    let headers = forwarded_headers(request_headers, client_addr);
    let mut request = state.http.request(method, &url).headers(headers);
    if let Some(body) = body {
        request = request.body(body);
    }

    let response = if sse {
        // Only the response head is bounded here
        tokio::time::timeout(SSE_HEADER_TIMEOUT, request.send())
            .await
            .map_err(|_| GateError::network(format!("upstream {url} timed out")))?
    } else {
        request
            .timeout(Duration::from_secs(cfg.timeout_seconds))
            .send()
            .await
    }
    .map_err(|e| {
        warn!(upstream = %url, error = %e, "upstream request failed");
        GateError::network(format!("upstream {url} unreachable: {e}"))
    })?;

    relay_response(state, request_headers, response, sse)
}

/// Turn the upstream reqwest response into a client-facing axum response.
fn relay_response(
    state: &AppState,
    request_headers: &HeaderMap,
    upstream: reqwest::Response,
    sse: bool,
) -> Result<Response, GateError> {
    let cfg = &state.config;
    let status = upstream.status();

    let mut builder = Response::builder().status(status);
    if let Some(headers) = builder.headers_mut() {
        for (name, value) in upstream.headers() {
            if SKIP_RESPONSE_HEADERS.contains(&name.as_str()) {
                continue;
            }
            headers.insert(name.clone(), value.clone());
        }
    }

    let is_event_stream = upstream
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("text/event-stream"));

    let body = if sse && is_event_stream {
        let request_host = request_headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("localhost");
        let ctx = RewriteContext {
            target_host: host_of(&cfg.base_url),
            proxy_host: external_host(cfg, request_host),
            messages_path: cfg.paths.messages.clone(),
        };

        if let Some(headers) = builder.headers_mut() {
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
        }

        Body::from_stream(rewrite_sse_stream(upstream.bytes_stream(), ctx))
    } else {
        Body::from_stream(upstream.bytes_stream().map(|r| r.map_err(io::Error::other)))
    };

    builder
        .body(body)
        .map_err(|e| GateError::internal(format!("failed to build response: {e}")))
}

/// Build the header set forwarded upstream.
fn forwarded_headers(request_headers: &HeaderMap, client_addr: Option<SocketAddr>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in request_headers {
        if SKIP_REQUEST_HEADERS.contains(&name.as_str()) {
            continue;
        }
        headers.insert(name.clone(), value.clone());
    }

    if let Some(addr) = client_addr {
        let ip = addr.ip().to_string();
        let xff = match request_headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
        {
            Some(existing) => format!("{existing}, {ip}"),
            None => ip,
        };
        if let Ok(value) = HeaderValue::from_str(&xff) {
            headers.insert("x-forwarded-for", value);
        }
    }
    headers.insert("x-forwarded-proto", HeaderValue::from_static("http"));
    if let Some(host) = request_headers.get(HOST) {
        headers.insert("x-forwarded-host", host.clone());
    }

    headers
}

/// Upstream URL for a proxied request, preserving the raw query.
fn upstream_url(base_url: &str, uri: &Uri) -> String {
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    format!("{}{}", base_url.trim_end_matches('/'), path_and_query)
}

/// Host (and port) component of the upstream base URL.
fn host_of(base_url: &str) -> String {
    match Url::parse(base_url) {
        Ok(url) => {
            let host = url.host_str().unwrap_or_default();
            match url.port() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            }
        }
        Err(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_url_preserves_path_and_query() {
        let uri: Uri = "/messages?sessionId=abc&x=1".parse().unwrap();
        assert_eq!(
            upstream_url("http://localhost:9000", &uri),
            "http://localhost:9000/messages?sessionId=abc&x=1"
        );
        assert_eq!(
            upstream_url("http://localhost:9000/", &uri),
            "http://localhost:9000/messages?sessionId=abc&x=1"
        );
    }

    #[test]
    fn host_extraction_keeps_the_port() {
        assert_eq!(host_of("http://localhost:9000"), "localhost:9000");
        assert_eq!(host_of("https://mcp.example.com"), "mcp.example.com");
        assert_eq!(host_of("not a url"), "");
    }

    #[test]
    fn forwarded_headers_skip_hop_by_hop_and_append_client() {
        let mut incoming = HeaderMap::new();
        incoming.insert(HOST, HeaderValue::from_static("proxy.example.com"));
        incoming.insert("authorization", HeaderValue::from_static("Bearer tok"));
        incoming.insert("accept-encoding", HeaderValue::from_static("gzip"));
        incoming.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));

        let addr: SocketAddr = "192.168.7.9:55000".parse().unwrap();
        let headers = forwarded_headers(&incoming, Some(addr));

        assert!(headers.get(HOST).is_none());
        assert!(headers.get("accept-encoding").is_none());
        assert_eq!(headers.get("authorization").unwrap(), "Bearer tok");
        assert_eq!(
            headers.get("x-forwarded-for").unwrap(),
            "10.0.0.1, 192.168.7.9"
        );
        assert_eq!(
            headers.get("x-forwarded-host").unwrap(),
            "proxy.example.com"
        );
        assert_eq!(headers.get("x-forwarded-proto").unwrap(), "http");
    }
}
