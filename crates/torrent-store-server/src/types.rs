//! Response types

use serde::{Deserialize, Serialize};
use torrent_store::StoreStats;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    /// Tier names, fastest first
    pub providers: Vec<String>,
    pub cache: StoreStats,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PushResponse {
    pub info_hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TouchResponse {
    pub ok: bool,
}
