//! AWS S3 state store.
//!
//! The durable network backend: each checker's state is the object
//! `{bucket}/{prefix}/{key}.json`. A missing object reads as "never checked".

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;

use crate::error::StoreError;
use crate::models::CheckState;
use crate::storage::{StateStore, key_for};

/// S3-based check state storage.
#[derive(Debug, Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Store {
    /// Create a new S3 store instance.
    pub fn new(client: Client, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    /// Create an S3 store using credentials and region from the environment.
    pub async fn from_env(bucket: &str, prefix: &str) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(Client::new(&config), bucket, prefix)
    }

    fn object_key(&self, name: &str) -> String {
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            key_for(name)
        } else {
            format!("{}/{}", prefix, key_for(name))
        }
    }
}

#[async_trait]
impl StateStore for S3Store {
    async fn read(&self, name: &str) -> Result<Option<CheckState>, StoreError> {
        let key = self.object_key(name);
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let bytes = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
                Ok(Some(serde_json::from_slice(&bytes.into_bytes())?))
            }
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_no_such_key() {
                    log::debug!("No state at s3://{}/{}", self.bucket, key);
                    Ok(None)
                } else {
                    Err(StoreError::Backend(service_err.to_string()))
                }
            }
        }
    }

    async fn write(&self, name: &str, state: &CheckState) -> Result<(), StoreError> {
        let key = self.object_key(name);
        let json = serde_json::to_vec_pretty(state)?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(json))
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        log::debug!("Wrote state for '{}' to s3://{}/{}", name, self.bucket, key);
        Ok(())
    }
}
