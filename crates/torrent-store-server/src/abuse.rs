//! Abuse report lookups

use async_trait::async_trait;
use keyed_task_cache::{CacheConfig, Evicted, KeyedTaskCache};
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const VERDICT_TTL: Duration = Duration::from_secs(60);
const FAILURE_TTL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub enum AbuseError {
    Http(Arc<reqwest::Error>),
    Status(u16),
    Evicted,
}

impl fmt::Display for AbuseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbuseError::Http(err) => write!(f, "abuse check failed: {}", err),
            AbuseError::Status(status) => write!(f, "abuse service returned status {}", status),
            AbuseError::Evicted => write!(f, "abuse check evicted before completion"),
        }
    }
}

impl std::error::Error for AbuseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AbuseError::Http(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for AbuseError {
    fn from(err: reqwest::Error) -> Self {
        AbuseError::Http(Arc::new(err))
    }
}

impl From<Evicted> for AbuseError {
    fn from(_: Evicted) -> Self {
        AbuseError::Evicted
    }
}

/// Answers whether an info hash has been reported
#[async_trait]
pub trait AbuseChecker: Send + Sync {
    async fn is_abused(&self, info_hash: &str) -> Result<bool, AbuseError>;
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    exists: bool,
}

/// Client for the abuse report service, with memoized verdicts
pub struct AbuseClient {
    client: Client,
    base_url: String,
    verdicts: KeyedTaskCache<bool, AbuseError>,
}

impl AbuseClient {
    pub fn new(base_url: &str) -> Result<Self, AbuseError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let verdicts = KeyedTaskCache::new(CacheConfig {
            expire: VERDICT_TTL,
            error_expire: Some(FAILURE_TTL),
            ..Default::default()
        });

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            verdicts,
        })
    }

    async fn fetch(&self, info_hash: &str) -> Result<bool, AbuseError> {
        let url = format!("{}/check/{}", self.base_url, urlencoding::encode(info_hash));
        debug!(infohash = info_hash, url = %url, "Checking abuse reports");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            warn!(status = %response.status(), url = %url, "Abuse check failed");
            return Err(AbuseError::Status(response.status().as_u16()));
        }

        let body: CheckResponse = response.json().await?;
        Ok(body.exists)
    }
}

#[async_trait]
impl AbuseChecker for AbuseClient {
    async fn is_abused(&self, info_hash: &str) -> Result<bool, AbuseError> {
        self.verdicts
            .get(info_hash, || self.fetch(info_hash))
            .await
    }
}
