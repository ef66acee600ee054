//! Durable tier storing one file per torrent

use crate::error::ProviderError;
use crate::provider::StoreProvider;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::{debug, info};

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Stores torrents under `root`, sharded by the first byte of the hashed key
pub struct FsProvider {
    root: PathBuf,
}

impl FsProvider {
    /// Open the tier, creating `root` if needed
    pub async fn open(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        info!(root = ?root, "Filesystem store initialized");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        let digest = hex::encode(hasher.finalize());
        self.root.join(&digest[..2]).join(digest)
    }
}

#[async_trait]
impl StoreProvider for FsProvider {
    fn name(&self) -> &str {
        "fs"
    }

    async fn push(&self, key: &str, torrent: &[u8]) -> Result<(), ProviderError> {
        let path = self.path_for(key);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }

        // Write beside the target then rename so readers never see a partial
        // file. Each writer gets its own temp name.
        let tmp = path.with_extension(format!(
            "{}.{}.tmp",
            std::process::id(),
            TMP_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        let written = match fs::write(&tmp, torrent).await {
            Ok(()) => fs::rename(&tmp, &path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(infohash = key, size = torrent.len(), "Stored torrent on disk");
        Ok(())
    }

    async fn pull(&self, key: &str) -> Result<Vec<u8>, ProviderError> {
        Ok(fs::read(self.path_for(key)).await?)
    }

    async fn touch(&self, key: &str) -> Result<(), ProviderError> {
        fs::metadata(self.path_for(key)).await?;
        Ok(())
    }
}
