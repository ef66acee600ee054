//! Remote tier backed by a peer torrent store service

use crate::error::ProviderError;
use crate::provider::StoreProvider;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct PushResponse {
    info_hash: String,
}

/// Talks to another instance of the torrent store over its HTTP API
pub struct HttpProvider {
    client: Client,
    base_url: String,
}

impl HttpProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn torrent_url(&self, key: &str) -> String {
        format!("{}/torrents/{}", self.base_url, urlencoding::encode(key))
    }

    fn check_status(response: Response, url: &str) -> Result<Response, ProviderError> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound);
        }
        if !status.is_success() {
            warn!(status = %status, url = %url, "Peer request failed");
            return Err(ProviderError::Backend(format!("peer returned status {}", status)));
        }
        Ok(response)
    }
}

#[async_trait]
impl StoreProvider for HttpProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn push(&self, key: &str, torrent: &[u8]) -> Result<(), ProviderError> {
        let url = format!("{}/torrents", self.base_url);
        debug!(infohash = key, url = %url, "Pushing torrent to peer");

        let response = self.client.post(&url).body(torrent.to_vec()).send().await?;
        let body: PushResponse = Self::check_status(response, &url)?.json().await?;

        // The peer derives the key itself; a mismatch means we sent the wrong payload
        if body.info_hash != key {
            return Err(ProviderError::Backend(format!(
                "peer stored torrent as {} instead of {}",
                body.info_hash, key
            )));
        }
        Ok(())
    }

    async fn pull(&self, key: &str) -> Result<Vec<u8>, ProviderError> {
        let url = self.torrent_url(key);
        debug!(infohash = key, url = %url, "Pulling torrent from peer");

        let response = self.client.get(&url).send().await?;
        let data = Self::check_status(response, &url)?.bytes().await?;
        Ok(data.to_vec())
    }

    async fn touch(&self, key: &str) -> Result<(), ProviderError> {
        let url = format!("{}/touch", self.torrent_url(key));

        let response = self.client.post(&url).send().await?;
        Self::check_status(response, &url)?;
        Ok(())
    }
}
