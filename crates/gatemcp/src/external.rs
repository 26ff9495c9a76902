//! Resolution of the proxy's public base URL.
//!
//! Clients may reach the proxy through a load balancer or tunnel, so the
//! hostname the proxy should advertise is not necessarily the one it binds.
//! Priority: `EXTERNAL_HOST` env var, then `external_host` from config, then
//! forwarded headers, then the request's own `Host`.

use http::HeaderMap;
use http::header::HOST;

use crate::config::Config;

/// Public origin of the proxy (scheme + host) for the given request.
pub fn external_base_url(cfg: &Config, headers: &HeaderMap) -> String {
    base_url_from_parts(configured_external(cfg).as_deref(), headers)
}

/// Public host (no scheme) for the given fallback, used by the SSE rewriter.
pub fn external_host(cfg: &Config, fallback: &str) -> String {
    host_from_parts(configured_external(cfg).as_deref(), fallback)
}

/// The statically configured external host, env var winning over config.
fn configured_external(cfg: &Config) -> Option<String> {
    std::env::var("EXTERNAL_HOST")
        .ok()
        .filter(|v| !v.is_empty())
        .or_else(|| cfg.external_host.clone().filter(|v| !v.is_empty()))
}

/// Core resolution over explicit parts; the entry points above feed it.
pub(crate) fn base_url_from_parts(external: Option<&str>, headers: &HeaderMap) -> String {
    if let Some(host) = external {
        if host.starts_with("http://") || host.starts_with("https://") {
            return host.trim_end_matches('/').to_string();
        }
        // A bare hostname is assumed to sit behind TLS
        return format!("https://{}", host.trim_end_matches('/'));
    }

    // The proxy itself serves plain HTTP; a terminating load balancer
    // announces the original scheme in forwarded headers.
    let mut scheme = "http";
    if let Some(proto) = header_value(headers, "x-forwarded-proto") {
        scheme = proto;
    }
    if let Some(proto) = header_value(headers, "x-forwarded-scheme") {
        scheme = proto;
    }

    let mut host = header_value(headers, HOST.as_str()).unwrap_or("localhost");
    if let Some(forwarded) = header_value(headers, "x-forwarded-host") {
        host = forwarded;
    }
    if let Some(original) = header_value(headers, "x-original-host") {
        host = original;
    }

    format!("{scheme}://{host}")
}

/// Same resolution minus the scheme.
pub(crate) fn host_from_parts(external: Option<&str>, fallback: &str) -> String {
    match external {
        Some(host) => {
            let host = host
                .strip_prefix("http://")
                .or_else(|| host.strip_prefix("https://"))
                .unwrap_or(host);
            host.trim_end_matches('/').to_string()
        }
        None => fallback.to_string(),
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}
