//! Service configuration, read from flags or the environment

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use torrent_store::StoreConfig;
use url::Url;

#[derive(Debug, Clone, Parser)]
#[command(name = "torrent-store-server", about = "Tiered torrent metainfo store")]
pub struct Config {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// "json" switches to structured cloud logging
    #[arg(long, env = "LOG_FORMAT")]
    pub log_format: Option<String>,

    #[arg(long, env = "MEMORY_EXPIRE_SECS", default_value_t = 3600)]
    pub memory_expire_secs: u64,

    #[arg(long, env = "MEMORY_CAPACITY", default_value_t = 10_000)]
    pub memory_capacity: u64,

    /// Peer torrent store, enables the http tier
    #[arg(long, env = "PEER_URL")]
    pub peer_url: Option<Url>,

    #[arg(long, env = "PEER_TIMEOUT_SECS", default_value_t = 10)]
    pub peer_timeout_secs: u64,

    /// Directory for the durable fs tier
    #[arg(long, env = "STORE_DIR")]
    pub store_dir: Option<PathBuf>,

    /// Abuse report service, lookups are skipped when unset
    #[arg(long, env = "ABUSE_URL")]
    pub abuse_url: Option<Url>,

    /// JSON stoplist rules, checks are skipped when unset
    #[arg(long, env = "STOPLIST_PATH")]
    pub stoplist_path: Option<PathBuf>,

    #[arg(long, env = "OP_CACHE_TTL_SECS", default_value_t = 300)]
    pub op_cache_ttl_secs: u64,

    #[arg(long, env = "RATE_THRESHOLD", default_value_t = 10)]
    pub rate_threshold: i64,

    #[arg(long, env = "RATE_WINDOW_SECS", default_value_t = 60)]
    pub rate_window_secs: u64,

    #[arg(long, env = "PROVIDER_TIMEOUT_SECS", default_value_t = 30)]
    pub provider_timeout_secs: u64,
}

impl Config {
    pub fn json_logs(&self) -> bool {
        self.log_format.as_deref() == Some("json")
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            op_expire: Duration::from_secs(self.op_cache_ttl_secs),
            rate_threshold: self.rate_threshold,
            rate_window: Duration::from_secs(self.rate_window_secs),
            provider_timeout: Duration::from_secs(self.provider_timeout_secs),
            ..Default::default()
        }
    }
}
