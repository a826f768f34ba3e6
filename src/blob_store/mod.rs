use anyhow::{bail, Result};
use async_trait::async_trait;

#[cfg(feature = "blob-memory")]
pub mod in_memory;
#[cfg(feature = "blob-local")]
pub mod local_fs;

#[cfg(feature = "blob-memory")]
pub use in_memory::InMemoryStore;
#[cfg(feature = "blob-local")]
pub use local_fs::LocalFs;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Initialize the store
    async fn init(&mut self) -> Result<()>;

    /// Check if a path exists in the store
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Get a blob from the store
    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Put a blob into the store under `path`, or under a free variant of it
    /// if `path` is taken. Existing blobs are never overwritten.
    /// Returns the path the blob was stored at.
    async fn save(&self, path: &str, blob: Vec<u8>) -> Result<String>;

    /// Remove a blob. Removing a missing path is not an error.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Public URL of a stored path
    fn url(&self, path: &str) -> String;
}

/// Splits `dir/name.ext` into (`dir/name`, `.ext`).
pub fn split_extension(path: &str) -> (&str, &str) {
    let name_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    match path[name_start..].rfind('.') {
        Some(dot) if dot > 0 => path.split_at(name_start + dot),
        _ => (path, ""),
    }
}

/// A variant of `path` with a short random suffix before the extension.
fn alternative_path(path: &str) -> String {
    let (stem, ext) = split_extension(path);
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{stem}_{}{ext}", &suffix[..7])
}

/// Picks `path` if unused, otherwise the first unused random variant of it.
async fn available_path<S: BlobStore + ?Sized>(store: &S, path: &str) -> Result<String> {
    if path.is_empty() || path.ends_with('/') {
        bail!("invalid blob path '{path}'");
    }

    let mut candidate = path.to_owned();
    for _ in 0..16 {
        if !store.exists(&candidate).await? {
            return Ok(candidate);
        }
        candidate = alternative_path(path);
    }
    bail!("no free blob path found for '{path}'")
}

/// Joins a media URL prefix and a stored path, resolving relative prefixes against `origin`.
pub fn media_url(origin: &str, media_url: &str, path: &str) -> String {
    let prefix = media_url.trim_end_matches('/');
    if prefix.starts_with("http://") || prefix.starts_with("https://") {
        format!("{prefix}/{path}")
    } else {
        format!("{}{prefix}/{path}", origin.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_extension_of_last_segment() {
        assert_eq!(
            split_extension("uploads/badges/abc.png"),
            ("uploads/badges/abc", ".png")
        );
        assert_eq!(split_extension("baked/2_0/name"), ("baked/2_0/name", ""));
        assert_eq!(split_extension("dir.d/name"), ("dir.d/name", ""));
        assert_eq!(split_extension(".hidden"), (".hidden", ""));
    }

    #[test]
    fn alternative_keeps_extension() {
        let alt = alternative_path("uploads/badges/assertion-abc.svg");
        assert!(alt.starts_with("uploads/badges/assertion-abc_"));
        assert!(alt.ends_with(".svg"));
        assert_eq!(alt.len(), "uploads/badges/assertion-abc_1234567.svg".len());
    }

    #[test]
    fn media_urls() {
        assert_eq!(
            media_url("http://localhost:8000", "/media/", "a/b.png"),
            "http://localhost:8000/media/a/b.png"
        );
        assert_eq!(
            media_url("http://localhost:8000", "https://cdn.example.org/m/", "a/b.png"),
            "https://cdn.example.org/m/a/b.png"
        );
    }
}
