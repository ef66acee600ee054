//! Error types for the tiered store

use keyed_task_cache::Evicted;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Errors returned by a single storage provider
#[derive(Debug)]
pub enum ProviderError {
    /// The provider does not hold the key
    NotFound,
    /// The call did not finish before its deadline
    Timeout(Duration),
    Io(Box<std::io::Error>),
    Http(Box<reqwest::Error>),
    Backend(String),
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound)
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::NotFound => write!(f, "not found"),
            ProviderError::Timeout(after) => write!(f, "timed out after {:?}", after),
            ProviderError::Io(err) => write!(f, "IO error: {}", err),
            ProviderError::Http(err) => write!(f, "HTTP error: {}", err),
            ProviderError::Backend(msg) => write!(f, "backend error: {}", msg),
        }
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProviderError::Io(err) => Some(err.as_ref()),
            ProviderError::Http(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ProviderError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            ProviderError::NotFound
        } else {
            ProviderError::Io(Box::new(err))
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Http(Box::new(err))
    }
}

/// Errors returned by [`TieredStore`](crate::TieredStore) operations
#[derive(Debug, Clone)]
pub enum StoreError {
    /// No tier holds the key
    NotFound,
    /// The key was recently missing too often and no tier was consulted
    RateLimited,
    /// The shared operation was evicted before it finished, retry
    Evicted,
    /// A provider failed for a reason other than a missing key
    Provider {
        provider: String,
        source: Arc<ProviderError>,
    },
}

impl StoreError {
    pub fn provider(name: &str, err: ProviderError) -> Self {
        StoreError::Provider {
            provider: name.to_string(),
            source: Arc::new(err),
        }
    }

    /// True for every outcome callers should report as "not found",
    /// rate suppression included
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound | StoreError::RateLimited)
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound => write!(f, "torrent not found"),
            StoreError::RateLimited => write!(f, "torrent not found (rate limited)"),
            StoreError::Evicted => write!(f, "operation evicted before completion"),
            StoreError::Provider { provider, source } => {
                write!(f, "provider {} failed: {}", provider, source)
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Provider { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<Evicted> for StoreError {
    fn from(_: Evicted) -> Self {
        StoreError::Evicted
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
