use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use ragchat::config::Config;
use ragchat::server;
use ragchat::service::ChatService;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout stays free for the binary's own output
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load()?;
    let service = Arc::new(ChatService::from_config(&config).await?);

    let bind: SocketAddr = config.server.bind.parse()?;
    let router = server::router(service, config.server.bearer_token.clone());

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(
        %bind,
        auth = %config.server.bearer_token.as_deref().map(|_| "bearer").unwrap_or("none"),
        "Starting chat server"
    );

    axum::serve(listener, router).await?;
    Ok(())
}
