//! `anchorshare-index-service` entry point.
//!
//! Loads the service config, opens the backing table (created lazily on the
//! first request), and serves the HTTP index until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use anchorshare_index_service::AnchorIndex;
use anchorshare_index_service::config::IndexServiceConfig;
use anchorshare_index_service::table::open_table;
use clap::Parser;

#[derive(Debug, Parser)]
#[command(version, about = "Grouping-key anchor index service")]
struct Cli {
    /// Path to the service config (TOML).
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the bind address, e.g. 0.0.0.0:8080.
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = IndexServiceConfig::load(cli.config.as_deref())
        .map_err(|e| std::io::Error::other(format!("Failed to load config: {e}")))?;
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    let addr = config
        .bind_addr()
        .map_err(|e| std::io::Error::other(e.to_string()))?;

    tracing::info!(
        "anchorshare-index-service v{} starting (backend={:?}, table={})",
        env!("CARGO_PKG_VERSION"),
        config.storage.backend,
        config.storage.table,
    );

    let table = open_table(&config.storage)
        .map_err(|e| std::io::Error::other(format!("Failed to open anchor table: {e}")))?;
    let index = Arc::new(AnchorIndex::new(table, config.storage.partition_key.clone()));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    anchorshare_index_service::http::serve(listener, index, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Signal received, shutting down");
    })
    .await?;

    tracing::info!("anchorshare-index-service exiting cleanly");
    Ok(())
}
