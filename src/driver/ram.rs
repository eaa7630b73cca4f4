// src/driver/ram.rs
//
// In-memory driver. Buckets live in the process, so it is the reference
// backend for tests and dry runs; it cannot be shared with child processes.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use super::{Bucket, ByteRange, Driver, Session, StoredObject, UploadOptions};
use crate::config::DriverConfig;
use crate::errors::{DriverError, DriverResult};
use crate::multipart::MultipartUploader;

const SCHEME: &str = "ram://";

#[derive(Default)]
struct RamBucket {
    objects: BTreeMap<String, Bytes>,
    object_tags: BTreeMap<String, BTreeMap<String, String>>,
    tags: BTreeMap<String, String>,
    cors: Vec<String>,
}

type Store = Arc<Mutex<BTreeMap<String, RamBucket>>>;

pub struct RamDriver {
    config: DriverConfig,
    store: Store,
}

impl RamDriver {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            store: Store::default(),
        }
    }

    pub fn build(config: &DriverConfig) -> DriverResult<Arc<dyn Driver>> {
        Ok(Arc::new(Self::new(config.clone())))
    }

    fn put(&self, bucket_id: &str, name: &str, content: Bytes) -> DriverResult<StoredObject> {
        let mut store = self.store.lock();
        let bucket = store
            .get_mut(bucket_id)
            .ok_or_else(|| DriverError::BucketUnfound(bucket_id.to_string()))?;
        let size = content.len() as u64;
        bucket.objects.insert(name.to_string(), content);
        Ok(StoredObject {
            bucket: bucket_id.to_string(),
            name: name.to_string(),
            size,
        })
    }

    fn with_bucket<T>(
        &self,
        bucket_id: &str,
        f: impl FnOnce(&mut RamBucket) -> DriverResult<T>,
    ) -> DriverResult<T> {
        let mut store = self.store.lock();
        let bucket = store
            .get_mut(bucket_id)
            .ok_or_else(|| DriverError::BucketUnfound(bucket_id.to_string()))?;
        f(bucket)
    }
}

fn signature(bucket_id: &str, name: &str) -> String {
    format!("{:x}", Sha256::digest(format!("{}/{}", bucket_id, name)))
}

/// Split `ram://bucket/name[?query]` into its bucket and object name.
fn parse_url(url: &str) -> DriverResult<(&str, &str)> {
    let path = url
        .strip_prefix(SCHEME)
        .ok_or_else(|| DriverError::Config(format!("not a ram URL: {}", url)))?;
    let path = path.split_once('?').map_or(path, |(p, _)| p);
    path.split_once('/')
        .ok_or_else(|| DriverError::Config(format!("missing object name in {}", url)))
}

#[async_trait]
impl Driver for RamDriver {
    fn id(&self) -> &str {
        "ram"
    }

    fn config(&self) -> &DriverConfig {
        &self.config
    }

    fn shared_across_processes(&self) -> bool {
        false
    }

    async fn list_buckets(&self) -> DriverResult<Vec<Bucket>> {
        Ok(self
            .store
            .lock()
            .keys()
            .map(|id| Bucket {
                id: id.clone(),
                name: id.clone(),
            })
            .collect())
    }

    async fn get_bucket(&self, bucket_id: &str) -> DriverResult<Bucket> {
        if self.store.lock().contains_key(bucket_id) {
            Ok(Bucket {
                id: bucket_id.to_string(),
                name: bucket_id.to_string(),
            })
        } else {
            Err(DriverError::BucketUnfound(bucket_id.to_string()))
        }
    }

    async fn create_bucket(&self, name: &str, _storage_class: Option<&str>) -> DriverResult<Bucket> {
        self.store.lock().entry(name.to_string()).or_default();
        debug!(bucket = name, "created bucket");
        Ok(Bucket {
            id: name.to_string(),
            name: name.to_string(),
        })
    }

    async fn delete_bucket(&self, bucket_id: &str) -> DriverResult<()> {
        let mut store = self.store.lock();
        match store.get(bucket_id) {
            None => Err(DriverError::BucketUnfound(bucket_id.to_string())),
            Some(b) if !b.objects.is_empty() => {
                Err(DriverError::NonEmptyBucket(bucket_id.to_string()))
            }
            Some(_) => {
                store.remove(bucket_id);
                Ok(())
            }
        }
    }

    async fn list_objects(&self, bucket_id: &str) -> DriverResult<Vec<StoredObject>> {
        self.with_bucket(bucket_id, |b| {
            Ok(b.objects
                .iter()
                .map(|(name, data)| StoredObject {
                    bucket: bucket_id.to_string(),
                    name: name.clone(),
                    size: data.len() as u64,
                })
                .collect())
        })
    }

    #[instrument(level = "debug", skip(self, content, opts), fields(size = content.len()))]
    async fn upload(
        &self,
        bucket_id: &str,
        name: &str,
        content: Bytes,
        opts: &UploadOptions,
    ) -> DriverResult<StoredObject> {
        self.get_bucket(bucket_id).await?;
        let Some(job) = opts.multipart_job(content.len() as u64)? else {
            return self.put(bucket_id, name, content);
        };

        let staged: Arc<Mutex<BTreeMap<usize, Bytes>>> = Arc::default();
        let stage = staged.clone();
        let parts = MultipartUploader::new(job)
            .run(content, move |part, data| {
                let stage = stage.clone();
                async move {
                    let token = format!("{:x}", Sha256::digest(&data));
                    stage.lock().insert(part.index, data);
                    Ok(token)
                }
            })
            .await?;

        // Commit: assemble the staged parts in index order
        let mut staged = std::mem::take(&mut *staged.lock());
        let mut assembled = BytesMut::with_capacity(job.total_length() as usize);
        for part in &parts {
            let data = staged
                .remove(&part.index)
                .ok_or_else(|| DriverError::Server(format!("part {} missing at commit", part.index)))?;
            assembled.extend_from_slice(&data);
        }
        debug!(parts = parts.len(), "multipart upload committed");
        self.put(bucket_id, name, assembled.freeze())
    }

    async fn get_url(&self, bucket_id: &str, name: &str, presigned: bool) -> DriverResult<String> {
        let mut url = format!("{}{}/{}", SCHEME, bucket_id, name);
        if presigned {
            url.push_str("?signature=");
            url.push_str(&signature(bucket_id, name));
        }
        Ok(url)
    }

    async fn session(&self, _max_connections: usize) -> DriverResult<Arc<dyn Session>> {
        Ok(Arc::new(RamSession {
            store: self.store.clone(),
        }))
    }

    async fn delete_object(&self, bucket_id: &str, name: &str) -> DriverResult<()> {
        self.with_bucket(bucket_id, |b| {
            b.object_tags.remove(name);
            b.objects
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| DriverError::ObjectUnfound(format!("{}/{}", bucket_id, name)))
        })
    }

    async fn delete_objects(&self, bucket_id: &str, names: &[String]) -> DriverResult<()> {
        self.with_bucket(bucket_id, |b| {
            for name in names {
                b.objects.remove(name);
                b.object_tags.remove(name);
            }
            Ok(())
        })
    }

    async fn copy_object(
        &self,
        bucket_id: &str,
        name: &str,
        dst_bucket_id: &str,
        dst_name: &str,
    ) -> DriverResult<()> {
        let data = self.with_bucket(bucket_id, |b| {
            b.objects
                .get(name)
                .cloned()
                .ok_or_else(|| DriverError::ObjectUnfound(format!("{}/{}", bucket_id, name)))
        })?;
        self.put(dst_bucket_id, dst_name, data).map(|_| ())
    }

    async fn object_exists(&self, bucket_id: &str, name: &str) -> DriverResult<bool> {
        self.with_bucket(bucket_id, |b| Ok(b.objects.contains_key(name)))
    }

    async fn put_object_tags(
        &self,
        bucket_id: &str,
        name: &str,
        tags: &BTreeMap<String, String>,
    ) -> DriverResult<()> {
        self.with_bucket(bucket_id, |b| {
            if !b.objects.contains_key(name) {
                return Err(DriverError::ObjectUnfound(name.to_string()));
            }
            b.object_tags.insert(name.to_string(), tags.clone());
            Ok(())
        })
    }

    async fn put_bucket_cors(&self, bucket_id: &str, allowed_origins: &[String]) -> DriverResult<()> {
        self.with_bucket(bucket_id, |b| {
            b.cors = allowed_origins.to_vec();
            Ok(())
        })
    }

    async fn put_bucket_tags(&self, bucket_id: &str, tags: &BTreeMap<String, String>) -> DriverResult<()> {
        self.with_bucket(bucket_id, |b| {
            b.tags = tags.clone();
            Ok(())
        })
    }
}

struct RamSession {
    store: Store,
}

#[async_trait]
impl Session for RamSession {
    async fn fetch(&self, url: &str, range: Option<ByteRange>) -> DriverResult<u64> {
        let (bucket_id, name) = parse_url(url)?;
        let store = self.store.lock();
        let data = store
            .get(bucket_id)
            .ok_or_else(|| DriverError::BucketUnfound(bucket_id.to_string()))?
            .objects
            .get(name)
            .ok_or_else(|| DriverError::ObjectUnfound(format!("{}/{}", bucket_id, name)))?;

        let len = data.len() as u64;
        match range {
            None => Ok(len),
            Some(r) if r.start >= len || r.end < r.start => {
                Err(DriverError::from_status(416, format!("range {:?} of {}", r, url)))
            }
            Some(r) => Ok(data.slice(r.start as usize..=r.end.min(len - 1) as usize).len() as u64),
        }
    }
}
