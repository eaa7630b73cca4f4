// src/driver/mod.rs
//
// Storage backend capability set used by the benchmarks.
//
// A driver hides one object-storage backend behind a uniform async API.
// Optional backend features (tags, locks, CORS...) are probes that answer
// `FeatureUnsupported` unless a driver overrides them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::DriverConfig;
use crate::constants::{
    default_max_concurrency, DEFAULT_MULTIPART_CHUNKSIZE, DEFAULT_MULTIPART_THRESHOLD,
};
use crate::errors::{DriverError, DriverResult};
use crate::http::{HttpClient, HttpSession, RetryPolicy};
use crate::multipart::{Part, TransferJob};

pub mod fs;
pub mod ram;
pub mod registry;

pub use registry::DriverRegistry;

/// Inclusive byte range, as sent in an HTTP `Range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

impl From<&Part> for ByteRange {
    fn from(part: &Part) -> Self {
        ByteRange {
            start: part.offset,
            end: part.last_byte(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timeouts {
    pub connect: Duration,
    pub read: Duration,
}

impl Timeouts {
    pub fn from_config(cfg: &DriverConfig) -> Self {
        Self {
            connect: cfg.connect_timeout(),
            read: cfg.read_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub id: String,
    pub name: String,
}

/// An object known to exist in a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub bucket: String,
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectVersion {
    pub name: String,
    pub version_id: String,
}

/// How `Driver::upload` splits its payload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadOptions {
    /// Payloads of at least this many bytes go through the multipart path
    pub multipart_threshold: u64,
    pub multipart_chunksize: u64,
    pub max_concurrency: usize,
    pub storage_class: Option<String>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            multipart_chunksize: DEFAULT_MULTIPART_CHUNKSIZE,
            max_concurrency: default_max_concurrency(),
            storage_class: None,
        }
    }
}

impl UploadOptions {
    /// Multipart job for `size` bytes, `None` below the threshold.
    pub fn multipart_job(&self, size: u64) -> DriverResult<Option<TransferJob>> {
        if size == 0 || size < self.multipart_threshold {
            return Ok(None);
        }
        TransferJob::new(size, self.multipart_chunksize, self.max_concurrency)
            .map(Some)
            .map_err(|e| DriverError::Config(e.to_string()))
    }
}

/// A download context bounded to a fixed number of connections.
#[async_trait]
pub trait Session: Send + Sync {
    /// Read `url` (or the given range of it) to the end and return the
    /// number of bytes received.
    async fn fetch(&self, url: &str, range: Option<ByteRange>) -> DriverResult<u64>;
}

#[async_trait]
pub trait Driver: Send + Sync {
    fn id(&self) -> &str;

    fn config(&self) -> &DriverConfig;

    fn timeouts(&self) -> Timeouts {
        Timeouts::from_config(self.config())
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_attempts(self.config().retry())
    }

    /// Whether another process built from the same config sees the same
    /// buckets. In-memory drivers answer false.
    fn shared_across_processes(&self) -> bool {
        true
    }

    async fn setup(&self) -> DriverResult<()> {
        Ok(())
    }

    async fn list_buckets(&self) -> DriverResult<Vec<Bucket>>;

    async fn get_bucket(&self, bucket_id: &str) -> DriverResult<Bucket> {
        self.list_buckets()
            .await?
            .into_iter()
            .find(|b| b.id == bucket_id)
            .ok_or_else(|| DriverError::BucketUnfound(bucket_id.to_string()))
    }

    async fn create_bucket(&self, name: &str, storage_class: Option<&str>) -> DriverResult<Bucket>;

    async fn delete_bucket(&self, bucket_id: &str) -> DriverResult<()>;

    async fn list_objects(&self, bucket_id: &str) -> DriverResult<Vec<StoredObject>>;

    async fn upload(
        &self,
        bucket_id: &str,
        name: &str,
        content: Bytes,
        opts: &UploadOptions,
    ) -> DriverResult<StoredObject>;

    async fn get_url(&self, bucket_id: &str, name: &str, presigned: bool) -> DriverResult<String>;

    /// Session over `max_connections` pooled connections. The default goes
    /// through the HTTP client component.
    async fn session(&self, max_connections: usize) -> DriverResult<Arc<dyn Session>> {
        let client = HttpClient::new(self.timeouts(), self.retry_policy(), max_connections)?;
        Ok(Arc::new(HttpSession::new(Arc::new(client), max_connections)))
    }

    async fn download(&self, url: &str) -> DriverResult<u64> {
        self.session(1).await?.fetch(url, None).await
    }

    async fn delete_object(&self, bucket_id: &str, name: &str) -> DriverResult<()>;

    async fn delete_objects(&self, bucket_id: &str, names: &[String]) -> DriverResult<()> {
        for name in names {
            self.delete_object(bucket_id, name).await?;
        }
        Ok(())
    }

    async fn copy_object(
        &self,
        bucket_id: &str,
        name: &str,
        dst_bucket_id: &str,
        dst_name: &str,
    ) -> DriverResult<()>;

    async fn object_exists(&self, bucket_id: &str, name: &str) -> DriverResult<bool> {
        Ok(self
            .list_objects(bucket_id)
            .await?
            .iter()
            .any(|o| o.name == name))
    }

    /// Remove every object (and version, when versioning is supported) of a
    /// bucket, then the bucket itself.
    async fn clean_bucket(&self, bucket_id: &str) -> DriverResult<()> {
        let names: Vec<String> = match self.list_objects(bucket_id).await {
            Ok(objects) => objects.into_iter().map(|o| o.name).collect(),
            Err(DriverError::BucketUnfound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        debug!(bucket = bucket_id, objects = names.len(), "cleaning bucket");
        if !names.is_empty() {
            match self.delete_objects(bucket_id, &names).await {
                Err(DriverError::FeatureUnsupported(_)) => {
                    for name in &names {
                        self.delete_object(bucket_id, name).await?;
                    }
                }
                other => other?,
            }
        }

        match self.list_object_versions(bucket_id).await {
            Ok(versions) => {
                for v in versions {
                    self.delete_object_version(bucket_id, &v.name, &v.version_id)
                        .await?;
                }
            }
            Err(DriverError::FeatureUnsupported(_)) => {}
            Err(e) => warn!(bucket = bucket_id, "cannot list versions: {}", e),
        }

        self.delete_bucket(bucket_id).await
    }

    // Feature probes

    async fn put_object_tags(
        &self,
        _bucket_id: &str,
        _name: &str,
        _tags: &BTreeMap<String, String>,
    ) -> DriverResult<()> {
        Err(unsupported(self.id(), "put_object_tags"))
    }

    async fn put_object_lock(&self, _bucket_id: &str, _name: &str) -> DriverResult<()> {
        Err(unsupported(self.id(), "put_object_lock"))
    }

    async fn put_bucket_cors(&self, _bucket_id: &str, _allowed_origins: &[String]) -> DriverResult<()> {
        Err(unsupported(self.id(), "put_bucket_cors"))
    }

    async fn put_bucket_tags(&self, _bucket_id: &str, _tags: &BTreeMap<String, String>) -> DriverResult<()> {
        Err(unsupported(self.id(), "put_bucket_tags"))
    }

    async fn get_object_torrent(&self, _bucket_id: &str, _name: &str) -> DriverResult<Bytes> {
        Err(unsupported(self.id(), "get_object_torrent"))
    }

    async fn list_object_versions(&self, _bucket_id: &str) -> DriverResult<Vec<ObjectVersion>> {
        Err(unsupported(self.id(), "list_object_versions"))
    }

    async fn delete_object_version(
        &self,
        _bucket_id: &str,
        _name: &str,
        _version_id: &str,
    ) -> DriverResult<()> {
        Err(unsupported(self.id(), "delete_object_version"))
    }
}

fn unsupported(driver: &str, feature: &str) -> DriverError {
    DriverError::FeatureUnsupported(format!("{} does not implement {}", driver, feature))
}

impl fmt::Debug for dyn Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver").field("id", &self.id()).finish()
    }
}
