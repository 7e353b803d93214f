//! Storage abstractions for check state.
//!
//! One record per checker, keyed by checker name. Backends:
//!
//! - [`MemoryStore`]: volatile map, empty on every launch
//! - [`FileStore`]: one JSON file per checker under a root directory
//! - `S3Store` (feature `s3`): one JSON object per checker in a bucket
//!
//! ```text
//! {root or prefix}/
//! ├── switch.json
//! └── ps5%2Ddigital.json
//! ```

pub mod local;
pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Result, StoreError};
use crate::models::{CheckState, StoreBackend, StoreConfig};

// Re-export for convenience
pub use local::FileStore;
pub use memory::MemoryStore;
#[cfg(feature = "s3")]
pub use s3::S3Store;

/// Key-value persistence for check state.
///
/// Calls for different names may run concurrently. Calls for the same name
/// are never issued concurrently by the scheduler, so backends do not
/// serialize them.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// The stored state, or `None` if the checker has never been recorded.
    async fn read(&self, name: &str) -> std::result::Result<Option<CheckState>, StoreError>;

    /// Replace the stored state for `name`.
    async fn write(&self, name: &str, state: &CheckState) -> std::result::Result<(), StoreError>;
}

/// Open the backend selected in the config.
pub async fn open(config: &StoreConfig) -> Result<Arc<dyn StateStore>> {
    match config.backend {
        StoreBackend::Memory => {
            log::info!("Using in-memory state store (not persisted)");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::File => {
            log::info!("Using file state store at {}", config.dir);
            Ok(Arc::new(FileStore::new(&config.dir)))
        }
        #[cfg(feature = "s3")]
        StoreBackend::S3 => {
            let store = S3Store::from_env(&config.bucket, &config.prefix).await;
            log::info!(
                "Using S3 state store at s3://{}/{}",
                config.bucket,
                config.prefix
            );
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "s3"))]
        StoreBackend::S3 => Err(crate::error::AppError::config(
            "store backend 's3' requires building with the 's3' feature",
        )),
    }
}

/// File/object name for a checker. Anything outside `[a-z0-9_]` is
/// percent-encoded, uppercase letters included, so names can never escape
/// the root or collide on a case-insensitive filesystem.
pub(crate) fn key_for(name: &str) -> String {
    let mut key = String::with_capacity(name.len() + 5);
    for byte in name.bytes() {
        if byte.is_ascii_lowercase() || byte.is_ascii_digit() || byte == b'_' {
            key.push(byte as char);
        } else {
            key.push_str(&format!("%{byte:02X}"));
        }
    }
    key.push_str(".json");
    key
}
