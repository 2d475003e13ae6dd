//! CodeSwap Server
//!
//! Pairs editor clients into sessions and swaps their code every round.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use code_swap::{ServerConfig, SwapServer, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let default_level = if cfg!(feature = "debug-tracing") {
        "debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let config = ServerConfig::from_env();

    info!("CodeSwap Server v{}", VERSION);
    info!(
        "Round Duration: {} seconds (warning at {})",
        config.session.round_duration_secs, config.session.swap_warning_secs
    );

    let server = Arc::new(SwapServer::new(config));

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            signal_server.shutdown();
        }
    });

    server.run().await.context("Server failed")?;

    info!("Server stopped");
    Ok(())
}
