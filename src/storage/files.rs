use std::path::{Path, PathBuf};

use anyhow::Result;
use tokio::fs;

#[derive(Clone, Debug)]
pub struct LocalFileStorage {
    base_dir: PathBuf,
    base_url: String,
}

impl LocalFileStorage {
    pub fn new(base_dir: PathBuf, base_url: String) -> Self {
        Self { base_dir, base_url }
    }

    pub async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.resolve_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, data).await?;
        Ok(())
    }

    /// Public url for a stored key. Pure function of the key and base url.
    pub fn public_url(&self, key: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let key = key.trim_start_matches('/');
        format!("{base}/{key}")
    }

    pub fn image_key(id: &str) -> String {
        format!("images/{id}")
    }

    pub fn resolve_path(&self, key: &str) -> PathBuf {
        let normalized = key.trim_start_matches('/');
        self.base_dir.join(Path::new(normalized))
    }
}
