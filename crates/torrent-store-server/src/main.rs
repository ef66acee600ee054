//! Torrent Store - tiered torrent metainfo storage service
//!
//! Serves torrents from an ordered set of storage tiers, promoting reads into
//! the faster tiers and suppressing lookups for keys that keep missing.

mod abuse;
mod config;
mod error;
mod metainfo;
mod server;
mod stoplist;
mod types;

use crate::abuse::{AbuseChecker, AbuseClient};
use crate::config::Config;
use crate::error::{Result, ServerError};
use crate::server::{start_server, ServerState, SharedState};
use crate::stoplist::Stoplist;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use torrent_store::providers::{FsProvider, HttpProvider, MemoryProvider};
use torrent_store::{StoreProvider, TieredStore};
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    // Initialize logging
    let env_filter = EnvFilter::from_default_env()
        .add_directive("torrent_store_server=info".parse()?)
        .add_directive("torrent_store=info".parse()?);

    // Use JSON format for cloud logging when LOG_FORMAT=json
    if config.json_logs() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting Torrent Store...");

    let providers = build_providers(&config).await?;
    let store = TieredStore::new(providers, config.store_config());
    info!("Tiers: {}", store.providers().join(" -> "));

    let abuse = match &config.abuse_url {
        Some(url) => {
            info!("Abuse checks: {}", url);
            let client = AbuseClient::new(url.as_str())
                .map_err(|e| ServerError::Config(format!("Abuse client: {}", e)))?;
            Some(Arc::new(client) as Arc<dyn AbuseChecker>)
        }
        None => None,
    };

    let stoplist = match &config.stoplist_path {
        Some(path) => Some(Stoplist::load(path).await?),
        None => None,
    };

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| ServerError::Config(format!("Invalid listen address: {}", e)))?;

    let state: SharedState = Arc::new(ServerState::new(store, abuse, stoplist));

    // Start HTTP server (blocking)
    start_server(state, addr)
        .await
        .map_err(|e| ServerError::Config(format!("Server error: {}", e)))?;

    Ok(())
}

/// Tiers in lookup order: memory, peer, disk
async fn build_providers(config: &Config) -> Result<Vec<Arc<dyn StoreProvider>>> {
    let mut providers: Vec<Arc<dyn StoreProvider>> = Vec::new();

    info!(
        "Memory tier: {} entries, {} seconds",
        config.memory_capacity, config.memory_expire_secs
    );
    providers.push(Arc::new(MemoryProvider::new(
        Duration::from_secs(config.memory_expire_secs),
        config.memory_capacity,
    )));

    if let Some(url) = &config.peer_url {
        info!("Peer tier: {}", url);
        providers.push(Arc::new(HttpProvider::new(
            url.as_str(),
            Duration::from_secs(config.peer_timeout_secs),
        )?));
    }

    if let Some(dir) = &config.store_dir {
        info!("Disk tier: {:?}", dir);
        providers.push(Arc::new(FsProvider::open(dir).await?));
    }

    Ok(providers)
}
