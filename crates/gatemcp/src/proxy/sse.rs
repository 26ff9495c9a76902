//! Streaming rewriter for SSE `endpoint` events.
//!
//! The upstream MCP server announces its session message URL in an in-band
//! `event: endpoint` frame. Left alone, clients would POST straight to the
//! origin and bypass token verification, so the proxy rewrites that URL to
//! point back at itself while streaming everything else through untouched.
//!
//! The transformer works line-by-line over the upstream body with a single
//! flag of look-ahead state (`event: endpoint` seen, `data:` expected next).
//! It never buffers more than one partial line, so a slow client
//! back-pressures the upstream read instead of growing a queue.

use std::io;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tracing::debug;

/// Upper bound on a single SSE line; larger events indicate a broken peer.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Hosts and paths the rewriter needs to reshape endpoint URLs.
#[derive(Debug, Clone)]
pub struct RewriteContext {
    /// Host (and port) of the upstream target, e.g. `localhost:9000`
    pub target_host: String,
    /// Host clients use to reach the proxy, scheme optional
    pub proxy_host: String,
    /// Configured messages path, e.g. `/messages`
    pub messages_path: String,
}

/// Rewrite one endpoint URL so the client posts back through the proxy.
///
/// Absolute URLs naming the upstream host and relative URLs are both rebuilt
/// as `<scheme>://<proxy_host><messages_path><query>`; only the query string
/// survives, since that is where the upstream encodes the session. Absolute
/// URLs pointing elsewhere pass through unchanged.
///
/// Scheme policy: an explicit scheme on `proxy_host` wins; otherwise loopback
/// hosts get `http` and everything else `https`.
pub fn rewrite_endpoint(endpoint: &str, ctx: &RewriteContext) -> String {
    let absolute = endpoint.starts_with("http://") || endpoint.starts_with("https://");
    if absolute && (ctx.target_host.is_empty() || !endpoint.contains(&ctx.target_host)) {
        return endpoint.to_string();
    }

    let query = endpoint.find('?').map(|i| &endpoint[i..]).unwrap_or("");

    let (scheme, host) = if let Some(host) = ctx.proxy_host.strip_prefix("http://") {
        ("http", host)
    } else if let Some(host) = ctx.proxy_host.strip_prefix("https://") {
        ("https", host)
    } else if is_loopback_host(&ctx.proxy_host) {
        ("http", ctx.proxy_host.as_str())
    } else {
        ("https", ctx.proxy_host.as_str())
    };

    let rewritten = format!(
        "{scheme}://{}{}{query}",
        host.trim_end_matches('/'),
        ctx.messages_path
    );
    debug!(from = endpoint, to = %rewritten, "rewrote SSE endpoint");
    rewritten
}

fn is_loopback_host(host: &str) -> bool {
    host.starts_with("localhost") || host.starts_with("127.") || host.starts_with("[::1]")
}

/// Wrap an upstream SSE body, rewriting `endpoint` frames on the fly.
///
/// Lines may arrive split across arbitrary chunk boundaries; output lines are
/// LF-terminated (CRLF input is normalized). Any upstream error or an
/// oversized line ends the stream with an error, which tears down the client
/// connection.
pub fn rewrite_sse_stream<S, E>(
    upstream: S,
    ctx: RewriteContext,
) -> impl Stream<Item = Result<Bytes, io::Error>>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    async_stream::stream! {
        let mut upstream = std::pin::pin!(upstream);
        let mut partial: Vec<u8> = Vec::new();
        let mut awaiting_endpoint_data = false;

        while let Some(chunk) = upstream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(io::Error::other(e));
                    return;
                }
            };

            partial.extend_from_slice(&chunk);

            let mut out: Vec<u8> = Vec::new();
            let mut consumed = 0;
            while let Some(nl) = partial[consumed..].iter().position(|&b| b == b'\n') {
                let line = &partial[consumed..consumed + nl];
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                out.extend_from_slice(&transform_line(line, &mut awaiting_endpoint_data, &ctx));
                out.push(b'\n');
                consumed += nl + 1;
            }
            partial.drain(..consumed);

            if partial.len() > MAX_LINE_BYTES {
                yield Err(io::Error::other("SSE line exceeds maximum length"));
                return;
            }
            if !out.is_empty() {
                yield Ok(Bytes::from(out));
            }
        }

        // Final line without a trailing newline still gets delivered
        if !partial.is_empty() {
            if partial.last() == Some(&b'\r') {
                partial.pop();
            }
            let mut out = transform_line(&partial, &mut awaiting_endpoint_data, &ctx);
            out.push(b'\n');
            yield Ok(Bytes::from(out));
        }
    }
}

/// Apply the endpoint rewrite to a single line.
///
/// `awaiting` carries the one-line look-ahead: set after `event: endpoint`,
/// consumed by the following line whether or not it turned out to be `data:`.
fn transform_line(line: &[u8], awaiting: &mut bool, ctx: &RewriteContext) -> Vec<u8> {
    if std::mem::take(awaiting)
        && let Some(url) = line.strip_prefix(b"data: ")
    {
        let url = String::from_utf8_lossy(url);
        return format!("data: {}", rewrite_endpoint(&url, ctx)).into_bytes();
    }
    if line.starts_with(b"event: endpoint") {
        *awaiting = true;
    }
    line.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn ctx(target: &str, proxy: &str) -> RewriteContext {
        RewriteContext {
            target_host: target.to_string(),
            proxy_host: proxy.to_string(),
            messages_path: "/messages".to_string(),
        }
    }

    async fn collect<E>(
        chunks: Vec<Result<Bytes, E>>,
        ctx: RewriteContext,
    ) -> Result<String, io::Error>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let out: Vec<Result<Bytes, io::Error>> =
            rewrite_sse_stream(stream::iter(chunks), ctx).collect().await;
        let mut body = String::new();
        for item in out {
            body.push_str(std::str::from_utf8(&item?).unwrap());
        }
        Ok(body)
    }

    fn ok_chunks(parts: &[&str]) -> Vec<Result<Bytes, io::Error>> {
        parts
            .iter()
            .map(|p| Ok(Bytes::copy_from_slice(p.as_bytes())))
            .collect()
    }

    #[test]
    fn absolute_upstream_url_is_rewritten() {
        assert_eq!(
            rewrite_endpoint(
                "http://upstream:9000/msg?x=1",
                &ctx("upstream:9000", "proxy.example.com")
            ),
            "https://proxy.example.com/messages?x=1"
        );
    }

    #[test]
    fn relative_url_is_rebuilt_on_the_proxy() {
        assert_eq!(
            rewrite_endpoint(
                "/sessions/abc/messages?sid=42",
                &ctx("localhost:9000", "localhost:8080")
            ),
            "http://localhost:8080/messages?sid=42"
        );
    }

    #[test]
    fn unrelated_absolute_url_passes_through() {
        assert_eq!(
            rewrite_endpoint(
                "https://elsewhere.example.com/hook?x=1",
                &ctx("localhost:9000", "proxy.example.com")
            ),
            "https://elsewhere.example.com/hook?x=1"
        );
    }

    #[test]
    fn explicit_scheme_on_proxy_host_wins() {
        assert_eq!(
            rewrite_endpoint("/m?sid=1", &ctx("localhost:9000", "http://proxy.example.com")),
            "http://proxy.example.com/messages?sid=1"
        );
        assert_eq!(
            rewrite_endpoint("/m?sid=1", &ctx("localhost:9000", "https://localhost:8080")),
            "https://localhost:8080/messages?sid=1"
        );
    }

    #[test]
    fn relative_url_without_query_keeps_none() {
        assert_eq!(
            rewrite_endpoint("/messages", &ctx("localhost:9000", "localhost:8080")),
            "http://localhost:8080/messages"
        );
    }

    #[tokio::test]
    async fn endpoint_frame_is_rewritten_in_stream() {
        let body = collect(
            ok_chunks(&[
                "event: endpoint\ndata: http://localhost:9000/messages?sessionId=abc\n\nevent: message\ndata: {\"x\":1}\n\n",
            ]),
            ctx("localhost:9000", "localhost:8080"),
        )
        .await
        .unwrap();

        assert_eq!(
            body,
            "event: endpoint\ndata: http://localhost:8080/messages?sessionId=abc\n\nevent: message\ndata: {\"x\":1}\n\n"
        );
    }

    #[tokio::test]
    async fn frames_survive_chunk_boundaries() {
        let body = collect(
            ok_chunks(&[
                "event: end",
                "point\ndata: /sessi",
                "ons/abc?sid=42\n",
                "\n",
            ]),
            ctx("localhost:9000", "localhost:8080"),
        )
        .await
        .unwrap();

        assert_eq!(
            body,
            "event: endpoint\ndata: http://localhost:8080/messages?sid=42\n\n"
        );
    }

    #[tokio::test]
    async fn unrelated_lines_pass_through_byte_identical() {
        let input = ": keepalive\n\nevent: message\ndata: http://localhost:9000/not-an-endpoint\n\n";
        let body = collect(ok_chunks(&[input]), ctx("localhost:9000", "localhost:8080"))
            .await
            .unwrap();
        assert_eq!(body, input);
    }

    #[tokio::test]
    async fn endpoint_event_without_data_line_is_left_alone() {
        let input = "event: endpoint\nevent: message\ndata: hi\n\n";
        let body = collect(ok_chunks(&[input]), ctx("localhost:9000", "localhost:8080"))
            .await
            .unwrap();
        assert_eq!(body, input);
    }

    #[tokio::test]
    async fn crlf_input_is_normalized_to_lf() {
        let body = collect(
            ok_chunks(&["event: endpoint\r\ndata: /m?sid=7\r\n\r\n"]),
            ctx("localhost:9000", "localhost:8080"),
        )
        .await
        .unwrap();
        assert_eq!(
            body,
            "event: endpoint\ndata: http://localhost:8080/messages?sid=7\n\n"
        );
    }

    #[tokio::test]
    async fn trailing_line_without_newline_is_flushed() {
        let body = collect(
            ok_chunks(&["event: message\ndata: tail"]),
            ctx("localhost:9000", "localhost:8080"),
        )
        .await
        .unwrap();
        assert_eq!(body, "event: message\ndata: tail\n");
    }

    #[tokio::test]
    async fn upstream_error_ends_the_stream() {
        let chunks: Vec<Result<Bytes, io::Error>> = vec![
            Ok(Bytes::from_static(b"event: message\ndata: ok\n\n")),
            Err(io::Error::other("upstream reset")),
        ];
        let err = collect(chunks, ctx("localhost:9000", "localhost:8080"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("upstream reset"));
    }
}
