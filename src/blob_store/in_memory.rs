use std::{collections::HashMap, sync::RwLock};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::blob_store::{available_path, BlobStore};

/// In-memory blob storage for testing
///
/// Stores blobs in a HashMap. Not persistent. Used for testing and development.
pub struct InMemoryStore {
    /// Map of paths to blob data
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    base_url: String,
}

impl InMemoryStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            base_url: base_url.into(),
        }
    }

    /// Paths currently stored, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = self
            .blobs
            .read()
            .map(|blobs| blobs.keys().cloned().collect())
            .unwrap_or_default();
        paths.sort();
        paths
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new("http://localhost:8000/media")
    }
}

#[async_trait]
impl BlobStore for InMemoryStore {
    async fn init(&mut self) -> Result<()> {
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        log::trace!("check exists {path}.");

        let blobs = self.blobs.read().map_err(|_| anyhow!("blob map poisoned"))?;

        Ok(blobs.contains_key(path))
    }

    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        log::trace!("read {path}.");

        let blobs = self.blobs.read().map_err(|_| anyhow!("blob map poisoned"))?;

        Ok(blobs.get(path).map(ToOwned::to_owned))
    }

    async fn save(&self, path: &str, blob: Vec<u8>) -> Result<String> {
        let path = available_path(self, path).await?;

        log::trace!("save {path}. blob size: {}", blob.len());

        let mut blobs = self.blobs.write().map_err(|_| anyhow!("blob map poisoned"))?;
        blobs.insert(path.clone(), blob);

        Ok(path)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        log::trace!("delete {path}.");

        let mut blobs = self.blobs.write().map_err(|_| anyhow!("blob map poisoned"))?;
        blobs.remove(path);

        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.trim_end_matches('/'))
    }
}
