//! Startup ordering, signal handling, and ordered teardown.
//!
//! Startup: load config, apply CLI overrides, re-validate, select provider,
//! fetch JWKS (fatal if configured), start the bridge child (best-effort),
//! bind, serve. Shutdown on SIGINT/SIGTERM tears the child down first, then
//! drains the HTTP server against a five-second deadline, so in-flight SSE
//! connections see an upstream EOF before the listener closes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{error, info, warn};

use gatemcp_auth::{KeyStore, TokenVerifier};

use crate::cli::Cli;
use crate::config::{Config, TransportMode};
use crate::diagnostics;
use crate::error::GateError;
use crate::providers::{self, Provider};
use crate::proxy::{self, AppState};
use crate::subprocess::{self, Supervisor};

/// Deadline for draining in-flight requests after the child is down.
const HTTP_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// Run the proxy until a shutdown signal arrives.
///
/// An `Err` return means startup failed; the caller exits non-zero.
pub async fn run(cli: Cli) -> Result<(), GateError> {
    let config_path =
        std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.yaml".to_string());
    info!(path = %config_path, "loading configuration");

    let mut cfg = Config::load(&config_path).inspect_err(|e| {
        if e.is_validation_error() {
            diagnostics::report_config_error(e, "config_load");
        } else {
            error!("error loading config: {e}");
        }
    })?;

    apply_cli_overrides(&mut cfg, &cli)?;
    providers::derive_auth_endpoints(&mut cfg);
    log_startup_summary(&cfg);

    let provider = Provider::from_config(&cfg);

    let store = Arc::new(KeyStore::new(
        (!cfg.jwks_url.is_empty()).then(|| cfg.jwks_url.clone()),
        Duration::from_secs(cfg.timeout_seconds),
    ));
    if store.has_url() {
        if let Err(e) = store.fetch().await {
            let err = GateError::network(format!("JWKS fetch failed: {e}"));
            diagnostics::report_startup_error(&err, "jwks");
            return Err(err);
        }
        info!("JWKS fetched successfully");
    } else {
        warn!("no jwks_url configured, all guarded requests will be rejected");
    }

    let supervisor = start_subprocess(&cfg);

    let listen_port = cfg.listen_port;
    let state = AppState::new(
        Arc::new(cfg),
        Arc::new(provider),
        TokenVerifier::new(store),
    );
    let router = proxy::build_router(state);

    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], listen_port)))
        .await
        .map_err(|e| {
            let err = GateError::network(format!("failed to bind port {listen_port}: {e}"));
            diagnostics::report_startup_error(&err, "server");
            err
        })?;
    info!(port = listen_port, "auth proxy ready to accept connections");

    serve_until_shutdown(listener, router, supervisor).await
}

/// Fold CLI flags into the configuration and re-validate.
fn apply_cli_overrides(cfg: &mut Config, cli: &Cli) -> Result<(), GateError> {
    if cli.demo {
        cfg.mode = crate::config::ProviderMode::Demo;
    } else if cli.hosted {
        cfg.mode = crate::config::ProviderMode::Hosted;
    }

    if cli.stdio {
        info!("overriding transport mode to stdio via command line flag");
        cfg.transport_mode = TransportMode::Stdio;
        cfg.stdio.enabled = true;
        cfg.validate()
            .inspect_err(|e| diagnostics::report_config_error(e, "stdio_flag"))?;
    }
    Ok(())
}

fn log_startup_summary(cfg: &Config) {
    info!(mode = ?cfg.mode, transport = ?cfg.transport_mode, "provider and transport selected");
    info!(base_url = %cfg.base_url, "using MCP server base URL");
    info!(sse = %cfg.paths.sse, messages = %cfg.paths.messages, "using MCP paths");
    if let Ok(host) = std::env::var("EXTERNAL_HOST") {
        info!(%host, "using external host from environment");
    } else if let Some(host) = cfg.external_host.as_deref() {
        info!(host, "using external host from config");
    }
}

/// Start the bridge child when stdio mode asks for one.
///
/// Failures here are warn-only: the proxy keeps serving so the
/// misconfiguration shows up in logs rather than as a crash loop.
fn start_subprocess(cfg: &Config) -> Option<Arc<Supervisor>> {
    if cfg.transport_mode != TransportMode::Stdio || !cfg.stdio.enabled {
        info!("using SSE transport mode, not starting subprocess");
        return None;
    }

    if let Err(e) = subprocess::ensure_dependencies(&cfg.stdio.user_command) {
        warn!("{e}");
        warn!("subprocess may fail to start due to missing dependencies");
    }

    match Supervisor::spawn(cfg) {
        Ok(supervisor) => Some(Arc::new(supervisor)),
        Err(e) => {
            diagnostics::report_startup_error(&e, "subprocess");
            None
        }
    }
}

/// Serve until a signal arrives, then tear down child-first.
async fn serve_until_shutdown(
    listener: tokio::net::TcpListener,
    router: axum::Router,
    supervisor: Option<Arc<Supervisor>>,
) -> Result<(), GateError> {
    let (drained_tx, drained_rx) = oneshot::channel::<()>();

    let shutdown = async move {
        wait_for_signal().await;
        info!("shutting down");
        // The child goes down before the HTTP server so draining SSE
        // connections observe an upstream EOF and close cleanly.
        if let Some(supervisor) = supervisor {
            supervisor.shutdown().await;
        }
        let _ = drained_tx.send(());
    };

    let mut server = tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
    });

    tokio::select! {
        result = &mut server => match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(GateError::network(format!("server error: {e}"))),
            Err(e) => Err(GateError::internal(format!("server task failed: {e}"))),
        },
        _ = drained_rx => {
            info!("shutting down HTTP server");
            match tokio::time::timeout(HTTP_SHUTDOWN_DEADLINE, &mut server).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => error!("HTTP server shutdown error: {e}"),
                Ok(Err(e)) => error!("server task failed: {e}"),
                Err(_) => {
                    warn!("graceful shutdown deadline exceeded, aborting server");
                    server.abort();
                }
            }
            info!("stopped");
            Ok(())
        }
    }
}

/// Resolve on SIGINT or, on Unix, SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("interrupt received"),
        _ = terminate => info!("SIGTERM received"),
    }
}
