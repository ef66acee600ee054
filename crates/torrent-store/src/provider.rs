//! Storage provider contract

use crate::error::ProviderError;
use async_trait::async_trait;

/// One storage tier.
///
/// Every method must report a missing key as [`ProviderError::NotFound`] so
/// the store can tell "keep looking" apart from a real failure.
#[async_trait]
pub trait StoreProvider: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Store `torrent` under `key`
    async fn push(&self, key: &str, torrent: &[u8]) -> Result<(), ProviderError>;

    /// Fetch the torrent stored under `key`
    async fn pull(&self, key: &str) -> Result<Vec<u8>, ProviderError>;

    /// Confirm the key exists, extending its lifetime where the tier expires entries
    async fn touch(&self, key: &str) -> Result<(), ProviderError>;
}
