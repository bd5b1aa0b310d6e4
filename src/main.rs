//! # chat-relay
//!
//! Messaging and file-relay server. Configuration comes from `CHAT_RELAY_*`
//! environment variables; logging honours `RUST_LOG`.

use chat_relay::{Server, ServerConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,chat_relay=debug")),
        )
        .init();

    info!("Starting chat-relay v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    let server = Server::builder().config(config).bind().await?;

    server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!("Stopped");
    Ok(())
}
