use std::{fs, path::PathBuf};

use anyhow::{bail, Result};
use async_trait::async_trait;
use log::{debug, trace};

use crate::blob_store::{available_path, BlobStore};

pub struct LocalFs {
    path: PathBuf,
    base_url: String,
}

impl LocalFs {
    pub fn new(path: PathBuf, base_url: impl Into<String>) -> Self {
        Self {
            path,
            base_url: base_url.into(),
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        if path.split('/').any(|segment| segment == "..") || path.starts_with('/') {
            bail!("blob path '{path}' escapes the store root");
        }
        Ok(self.path.join(path))
    }
}

#[async_trait]
impl BlobStore for LocalFs {
    async fn init(&mut self) -> Result<()> {
        fs::create_dir_all(&self.path)?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        trace!("check exists {path}.");

        Ok(self.resolve(path)?.exists())
    }

    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        trace!("read {path}.");

        let path = self.resolve(path)?;
        if path.exists() {
            let blob = fs::read(path)?;
            Ok(Some(blob))
        } else {
            Ok(None)
        }
    }

    async fn save(&self, path: &str, blob: Vec<u8>) -> Result<String> {
        let stored = available_path(self, path).await?;

        trace!("save {stored}. blob size: {}", blob.len());

        let full = self.resolve(&stored)?;
        if let Some(dir) = full.parent() {
            fs::create_dir_all(dir)?;
        }

        // write to a temporary sibling then rename, so readers never see a partial file
        let tmp = full.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        fs::write(&tmp, &blob)?;
        fs::rename(&tmp, &full)?;

        Ok(stored)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        if full.exists() {
            fs::remove_file(full)?;
        } else {
            debug!("blob {path} already absent.");
        }
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = LocalFs::new(dir.path().to_path_buf(), "http://localhost:8000/media");
        store.init().await.unwrap();

        let path = store
            .save("baked/2_0/assertion-abc-2_0.png", b"png".to_vec())
            .await
            .unwrap();
        assert_eq!(path, "baked/2_0/assertion-abc-2_0.png");
        assert_eq!(store.read(&path).await.unwrap().unwrap(), b"png");

        let again = store
            .save("baked/2_0/assertion-abc-2_0.png", b"png2".to_vec())
            .await
            .unwrap();
        assert_ne!(again, path);

        store.delete(&path).await.unwrap();
        assert!(!store.exists(&path).await.unwrap());
        assert!(store.exists(&again).await.unwrap());
    }

    #[tokio::test]
    async fn rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFs::new(dir.path().to_path_buf(), "http://localhost:8000/media");

        assert!(store.read("../etc/passwd").await.is_err());
        assert!(store.save("/abs.png", vec![]).await.is_err());
    }
}
