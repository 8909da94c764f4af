//! Object storage for uploaded CV files and backup snapshots.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use tracing::warn;

use crate::config::Config;

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put_object(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    /// Removes every key. Keeps going after a failure and reports all failed keys at the end.
    async fn remove_objects(&self, keys: &[String]) -> Result<()>;
}

pub struct S3Storage {
    client: S3Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn put_object(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .with_context(|| format!("failed to upload s3://{}/{key}", self.bucket))?;
        Ok(())
    }

    async fn remove_objects(&self, keys: &[String]) -> Result<()> {
        let mut failed = Vec::new();
        for key in keys {
            if let Err(err) = self
                .client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
            {
                warn!(bucket = %self.bucket, key = %key, error = %err, "failed to delete object");
                failed.push(key.as_str());
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(anyhow!(
                "{} of {} objects could not be deleted: {}",
                failed.len(),
                keys.len(),
                failed.join(", ")
            ))
        }
    }
}

/// Constructs an S3 client for MinIO (custom endpoint) or AWS (default chain).
pub async fn build_s3_client(config: &Config) -> S3Client {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new(config.aws_region.clone()));

    if let (Some(access_key), Some(secret_key)) =
        (&config.aws_access_key_id, &config.aws_secret_access_key)
    {
        loader = loader.credentials_provider(Credentials::new(
            access_key,
            secret_key,
            None,
            None,
            "jobfit-static",
        ));
    }

    if let Some(endpoint) = &config.s3_endpoint {
        loader = loader.endpoint_url(endpoint);
    }

    let shared = loader.load().await;
    let s3_config = aws_sdk_s3::config::Builder::from(&shared)
        .force_path_style(config.s3_endpoint.is_some())
        .build();
    S3Client::from_conf(s3_config)
}

#[cfg(test)]
pub mod memory {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct MemoryStorage {
        objects: Mutex<BTreeMap<String, (Vec<u8>, String)>>,
        fail_removals: AtomicBool,
    }

    impl MemoryStorage {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, key: &str) {
            self.objects
                .lock()
                .unwrap()
                .insert(key.to_string(), (Vec::new(), "application/octet-stream".to_string()));
        }

        pub fn contains(&self, key: &str) -> bool {
            self.objects.lock().unwrap().contains_key(key)
        }

        pub fn get(&self, key: &str) -> Option<(Vec<u8>, String)> {
            self.objects.lock().unwrap().get(key).cloned()
        }

        pub fn keys(&self) -> Vec<String> {
            self.objects.lock().unwrap().keys().cloned().collect()
        }

        pub fn set_fail_removals(&self, fail: bool) {
            self.fail_removals.store(fail, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ObjectStorage for MemoryStorage {
        async fn put_object(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
            self.objects
                .lock()
                .unwrap()
                .insert(key.to_string(), (bytes, content_type.to_string()));
            Ok(())
        }

        async fn remove_objects(&self, keys: &[String]) -> Result<()> {
            if self.fail_removals.load(Ordering::SeqCst) {
                return Err(anyhow!("storage backend rejected delete of {} objects", keys.len()));
            }
            let mut objects = self.objects.lock().unwrap();
            for key in keys {
                objects.remove(key);
            }
            Ok(())
        }
    }
}
