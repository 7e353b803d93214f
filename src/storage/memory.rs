//! In-process state store.
//!
//! Nothing survives a restart; every checker starts without a baseline.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::models::CheckState;
use crate::storage::StateStore;

#[derive(Debug, Default)]
pub struct MemoryStore {
    states: RwLock<HashMap<String, CheckState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn read(&self, name: &str) -> Result<Option<CheckState>, StoreError> {
        Ok(self.states.read().await.get(name).cloned())
    }

    async fn write(&self, name: &str, state: &CheckState) -> Result<(), StoreError> {
        self.states
            .write()
            .await
            .insert(name.to_string(), state.clone());
        Ok(())
    }
}
