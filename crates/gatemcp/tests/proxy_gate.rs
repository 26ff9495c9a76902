//! End-to-end tests: auth gate, SSE rewriting, and upstream forwarding
//! against a live in-process upstream.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::response::Response;
use axum::routing::{get, post};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use bytes::Bytes;
use http::HeaderMap;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};

use gatemcp::config::Config;
use gatemcp::providers::Provider;
use gatemcp::proxy::{AppState, build_router};
use gatemcp_auth::{Jwk, KeyStore, TokenVerifier};

const KID: &str = "integration-key";

struct TestKey {
    pem: String,
    n: String,
    e: String,
}

fn test_key() -> &'static TestKey {
    static KEY: OnceLock<TestKey> = OnceLock::new();
    KEY.get_or_init(|| {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, 2048).expect("keygen failed");
        let public = RsaPublicKey::from(&private);
        TestKey {
            pem: private
                .to_pkcs8_pem(LineEnding::LF)
                .expect("PEM encoding failed")
                .to_string(),
            n: URL_SAFE_NO_PAD.encode(public.n().to_bytes_be()),
            e: URL_SAFE_NO_PAD.encode(public.e().to_bytes_be()),
        }
    })
}

fn sign_token(exp: u64) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(KID.to_string());
    let key = EncodingKey::from_rsa_pem(test_key().pem.as_bytes()).unwrap();
    jsonwebtoken::encode(
        &header,
        &serde_json::json!({ "sub": "alice", "exp": exp }),
        &key,
    )
    .unwrap()
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

#[derive(Clone)]
struct UpstreamState {
    sse_body: String,
    sse_hits: Arc<AtomicUsize>,
    messages_hits: Arc<AtomicUsize>,
    last_forwarded_for: Arc<Mutex<Option<String>>>,
}

async fn upstream_sse(State(state): State<UpstreamState>) -> Response {
    state.sse_hits.fetch_add(1, Ordering::SeqCst);
    Response::builder()
        .header("content-type", "text/event-stream")
        .body(Body::from(state.sse_body.clone()))
        .unwrap()
}

async fn upstream_messages(
    State(state): State<UpstreamState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.messages_hits.fetch_add(1, Ordering::SeqCst);
    *state.last_forwarded_for.lock().unwrap() = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    Response::new(Body::from(body))
}

struct Harness {
    proxy_addr: SocketAddr,
    sse_hits: Arc<AtomicUsize>,
    messages_hits: Arc<AtomicUsize>,
    last_forwarded_for: Arc<Mutex<Option<String>>>,
}

impl Harness {
    fn upstream_hits(&self) -> usize {
        self.sse_hits.load(Ordering::SeqCst) + self.messages_hits.load(Ordering::SeqCst)
    }

    fn proxy_url(&self, path: &str) -> String {
        format!("http://{}{path}", self.proxy_addr)
    }
}

/// Boot an upstream emitting an `endpoint` event plus a proxy fronting it.
async fn start_harness() -> Harness {
    let upstream_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream_listener.local_addr().unwrap();

    let sse_hits = Arc::new(AtomicUsize::new(0));
    let messages_hits = Arc::new(AtomicUsize::new(0));
    let last_forwarded_for = Arc::new(Mutex::new(None));
    let upstream_state = UpstreamState {
        sse_body: format!(
            "event: endpoint\ndata: http://{upstream_addr}/messages?sessionId=abc\n\nevent: message\ndata: {{\"ok\":true}}\n\n"
        ),
        sse_hits: Arc::clone(&sse_hits),
        messages_hits: Arc::clone(&messages_hits),
        last_forwarded_for: Arc::clone(&last_forwarded_for),
    };
    let upstream = Router::new()
        .route("/sse", get(upstream_sse))
        .route("/messages", post(upstream_messages))
        .with_state(upstream_state);
    tokio::spawn(async move {
        axum::serve(upstream_listener, upstream).await.unwrap();
    });

    let mut cfg = Config {
        base_url: format!("http://{upstream_addr}"),
        ..Default::default()
    };
    cfg.validate().unwrap();

    let store = Arc::new(KeyStore::new(None, Duration::from_secs(5)));
    let jwk = Jwk {
        kty: "RSA".to_string(),
        kid: Some(KID.to_string()),
        key_use: Some("sig".to_string()),
        alg: Some("RS256".to_string()),
        n: Some(test_key().n.clone()),
        e: Some(test_key().e.clone()),
        crv: None,
        x: None,
        y: None,
    };
    let mut keys = HashMap::new();
    keys.insert(KID.to_string(), jwk.to_verification_key().unwrap());
    store.install(keys);

    let provider = Provider::from_config(&cfg);
    let state = AppState::new(
        Arc::new(cfg),
        Arc::new(provider),
        TokenVerifier::new(store),
    );
    let router = build_router(state);

    let proxy_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = proxy_listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            proxy_listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    Harness {
        proxy_addr,
        sse_hits,
        messages_hits,
        last_forwarded_for,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn requests_without_valid_tokens_never_reach_the_upstream() {
    let harness = start_harness().await;
    let client = reqwest::Client::new();

    // No Authorization header
    let response = client.get(harness.proxy_url("/sse")).send().await.unwrap();
    assert_eq!(response.status(), 401);
    assert_eq!(
        response.headers().get("www-authenticate").unwrap(),
        "Bearer error=\"invalid_token\""
    );

    // Garbage token
    let response = client
        .post(harness.proxy_url("/messages"))
        .bearer_auth("garbage")
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // Well-signed but expired token
    let response = client
        .get(harness.proxy_url("/sse"))
        .bearer_auth(sign_token(now() - 600))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    assert_eq!(harness.upstream_hits(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn sse_endpoint_event_is_rewritten_to_the_proxy() {
    let harness = start_harness().await;
    let client = reqwest::Client::new();

    let response = client
        .get(harness.proxy_url("/sse"))
        .bearer_auth(sign_token(now() + 600))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("cache-control").unwrap(),
        "no-cache"
    );

    let body = response.text().await.unwrap();
    assert_eq!(
        body,
        format!(
            "event: endpoint\ndata: http://{}/messages?sessionId=abc\n\nevent: message\ndata: {{\"ok\":true}}\n\n",
            harness.proxy_addr
        )
    );
    assert_eq!(harness.sse_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn messages_are_forwarded_with_proxy_headers() {
    let harness = start_harness().await;
    let client = reqwest::Client::new();

    let response = client
        .post(harness.proxy_url("/messages?sessionId=abc"))
        .bearer_auth(sign_token(now() + 600))
        .body("{\"method\":\"ping\"}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "{\"method\":\"ping\"}");

    assert_eq!(harness.messages_hits.load(Ordering::SeqCst), 1);
    let forwarded_for = harness.last_forwarded_for.lock().unwrap().clone();
    assert_eq!(forwarded_for.as_deref(), Some("127.0.0.1"));
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_authorized_requests_all_succeed() {
    let harness = start_harness().await;
    let token = sign_token(now() + 600);

    let client = reqwest::Client::new();
    let mut tasks = Vec::new();
    for _ in 0..100 {
        let client = client.clone();
        let url = harness.proxy_url("/messages");
        let token = token.clone();
        tasks.push(tokio::spawn(async move {
            client
                .post(url)
                .bearer_auth(token)
                .body("{}")
                .send()
                .await
                .unwrap()
                .status()
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), 200);
    }
    assert_eq!(harness.messages_hits.load(Ordering::SeqCst), 100);
}
