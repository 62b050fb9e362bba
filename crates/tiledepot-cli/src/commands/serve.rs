//! `tiledepot serve` — run the tile server

use anyhow::Context;
use clap::Args;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tiledepot::repository::{Config, Repository};
use tiledepot::server::{ServerConfig, TileServer};

#[derive(Args)]
pub struct ServeArgs {
    /// Data directory holding config.json and the tile stores
    #[arg(long = "data_dir", env = "DATA_DIR")]
    pub data_dir: PathBuf,

    /// Bind address
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub bind: SocketAddr,

    /// Disable the in-memory tile cache
    #[arg(long)]
    pub no_cache: bool,

    /// In-memory tile cache capacity
    #[arg(long, default_value_t = 1000)]
    pub cache_size: u64,
}

pub async fn execute(args: ServeArgs) -> anyhow::Result<()> {
    let config = Config::load(&args.data_dir)
        .await
        .context("loading config.json")?;
    let repo = Arc::new(
        Repository::open(&args.data_dir, config)
            .await
            .context("opening repository")?,
    );

    if repo.datas.is_empty() {
        tracing::warn!("no tilesets are being served");
    }

    let server_config = ServerConfig {
        bind_addr: args.bind,
        cache_enabled: !args.no_cache,
        cache_size: args.cache_size,
        ..ServerConfig::default()
    };
    let server = TileServer::with_config(Arc::clone(&repo), server_config);

    tokio::select! {
        result = server.run() => result.context("tile server")?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            repo.close().await.ok();
        }
    }
    Ok(())
}
