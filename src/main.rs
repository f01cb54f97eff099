use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use watch_concierge::config::Config;
use watch_concierge::server;
use watch_concierge::service::ConciergeService;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load();

    let bind: SocketAddr = config
        .server
        .bind
        .parse()
        .context("Invalid server.bind (expected host:port)")?;

    let service = Arc::new(ConciergeService::from_config(&config).await?);
    let router = server::router(service, config.server.bearer_token.clone());

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(
        %bind,
        auth = %config.server.bearer_token.as_deref().map(|_| "bearer").unwrap_or("none"),
        "Starting watch concierge HTTP server"
    );

    axum::serve(listener, router).await?;
    Ok(())
}
