//! Local filesystem state store.
//!
//! Durable across restarts. Each checker's state is one pretty-printed JSON
//! file, replaced atomically (write to a temp file, then rename).
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── switch.json
//! └── ps5%2Ddigital.json
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::StoreError;
use crate::models::CheckState;
use crate::storage::{StateStore, key_for};

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct FileStore {
    root_dir: PathBuf,
}

impl FileStore {
    /// Create a new FileStore rooted at the given directory.
    ///
    /// The directory is created on first write.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// Get the full path for a checker name.
    fn path(&self, name: &str) -> PathBuf {
        self.root_dir.join(key_for(name))
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.root_dir).await?;

        let tmp = path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Read bytes, returning None if the file doesn't exist.
    async fn read_bytes(&self, path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

#[async_trait]
impl StateStore for FileStore {
    async fn read(&self, name: &str) -> Result<Option<CheckState>, StoreError> {
        match self.read_bytes(&self.path(name)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn write(&self, name: &str, state: &CheckState) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(state)?;
        self.write_bytes(&self.path(name), &bytes).await?;
        log::debug!("Wrote state for '{}' to {}", name, self.path(name).display());
        Ok(())
    }
}
