//! gatemcp entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use gatemcp::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.debug {
        "gatemcp=debug,gatemcp_auth=debug,info"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    if let Err(e) = gatemcp::lifecycle::run(cli).await {
        tracing::error!("startup failed: {e}");
        std::process::exit(1);
    }
}
