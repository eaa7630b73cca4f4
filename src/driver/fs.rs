// src/driver/fs.rs
//
// Local filesystem driver: buckets are directories under a root path,
// objects are files, URLs are file:// URIs. Unlike the ram driver its state
// is visible to child processes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;
use url::Url;

use super::{Bucket, ByteRange, Driver, Session, StoredObject, UploadOptions};
use crate::config::DriverConfig;
use crate::constants::DOWNLOAD_BLOCK_SIZE;
use crate::errors::{DriverError, DriverResult};
use crate::multipart::{MultipartUploader, PartResult, TransferJob};

/// Prefix of in-progress multipart files, hidden from listings
const STAGING_PREFIX: &str = ".osb-part-";

pub struct FsDriver {
    config: DriverConfig,
    root: PathBuf,
}

impl FsDriver {
    /// The root directory comes from the profile's `path` setting.
    pub fn new(config: DriverConfig) -> DriverResult<Self> {
        let root = config
            .extra_str("path")
            .map(PathBuf::from)
            .ok_or_else(|| DriverError::Config("fs driver requires a 'path' setting".into()))?;
        Ok(Self { config, root })
    }

    pub fn build(config: &DriverConfig) -> DriverResult<Arc<dyn Driver>> {
        Ok(Arc::new(Self::new(config.clone())?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_path(&self, bucket_id: &str) -> DriverResult<PathBuf> {
        check_name(bucket_id)?;
        Ok(self.root.join(bucket_id))
    }

    fn object_path(&self, bucket_id: &str, name: &str) -> DriverResult<PathBuf> {
        check_name(name)?;
        Ok(self.bucket_path(bucket_id)?.join(name))
    }

    async fn require_bucket(&self, bucket_id: &str) -> DriverResult<PathBuf> {
        let path = self.bucket_path(bucket_id)?;
        match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_dir() => Ok(path),
            Ok(_) => Err(DriverError::BucketUnfound(bucket_id.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(DriverError::BucketUnfound(bucket_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write each part to its own staging file, then concatenate them in
    /// index order into `dst`. Staging files never outlive the call.
    async fn upload_parts(
        &self,
        bucket_path: &Path,
        dst: &Path,
        name: &str,
        content: Bytes,
        job: TransferJob,
    ) -> DriverResult<()> {
        let staged: Vec<PathBuf> = (0..job.part_count())
            .map(|i| bucket_path.join(format!("{}{}.{}", STAGING_PREFIX, name, i)))
            .collect();
        let targets = Arc::new(staged.clone());

        let outcome = match MultipartUploader::new(job)
            .run(content, move |part, data| {
                let path = targets[part.index].clone();
                async move {
                    tokio::fs::write(&path, &data).await?;
                    Ok(format!("{:x}", Sha256::digest(&data)))
                }
            })
            .await
        {
            Ok(parts) => commit(dst, &staged, &parts).await,
            Err(e) => Err(e),
        };
        remove_quietly(&staged).await;
        if outcome.is_ok() {
            debug!(object = name, parts = staged.len(), "multipart upload committed");
        }
        outcome
    }
}

async fn commit(dst: &Path, staged: &[PathBuf], parts: &[PartResult]) -> DriverResult<()> {
    let mut out = tokio::fs::File::create(dst).await?;
    for part in parts {
        let data = tokio::fs::read(&staged[part.index]).await?;
        out.write_all(&data).await?;
    }
    out.flush().await?;
    Ok(())
}

async fn remove_quietly(paths: &[PathBuf]) {
    for p in paths {
        let _ = tokio::fs::remove_file(p).await;
    }
}

/// Bucket and object names must be single path components.
fn check_name(name: &str) -> DriverResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\\') {
        return Err(DriverError::Config(format!("invalid name '{}'", name)));
    }
    Ok(())
}

fn url_to_path(url: &str) -> DriverResult<PathBuf> {
    let parsed = Url::parse(url).map_err(|e| DriverError::Config(format!("{}: {}", url, e)))?;
    if parsed.scheme() != "file" {
        return Err(DriverError::Config(format!("not a file URL: {}", url)));
    }
    parsed
        .to_file_path()
        .map_err(|_| DriverError::Config(format!("not a local path: {}", url)))
}

#[async_trait]
impl Driver for FsDriver {
    fn id(&self) -> &str {
        "fs"
    }

    fn config(&self) -> &DriverConfig {
        &self.config
    }

    async fn setup(&self) -> DriverResult<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    async fn list_buckets(&self) -> DriverResult<Vec<Bucket>> {
        let mut buckets = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                let name = entry.file_name().to_string_lossy().into_owned();
                buckets.push(Bucket {
                    id: name.clone(),
                    name,
                });
            }
        }
        buckets.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(buckets)
    }

    async fn get_bucket(&self, bucket_id: &str) -> DriverResult<Bucket> {
        self.require_bucket(bucket_id).await?;
        Ok(Bucket {
            id: bucket_id.to_string(),
            name: bucket_id.to_string(),
        })
    }

    async fn create_bucket(&self, name: &str, _storage_class: Option<&str>) -> DriverResult<Bucket> {
        let path = self.bucket_path(name)?;
        tokio::fs::create_dir_all(&path).await?;
        debug!("mkdir: {}", path.display());
        Ok(Bucket {
            id: name.to_string(),
            name: name.to_string(),
        })
    }

    async fn delete_bucket(&self, bucket_id: &str) -> DriverResult<()> {
        let path = self.require_bucket(bucket_id).await?;
        let mut entries = tokio::fs::read_dir(&path).await?;
        if entries.next_entry().await?.is_some() {
            return Err(DriverError::NonEmptyBucket(bucket_id.to_string()));
        }
        tokio::fs::remove_dir(&path).await?;
        debug!("rmdir: {}", path.display());
        Ok(())
    }

    async fn list_objects(&self, bucket_id: &str) -> DriverResult<Vec<StoredObject>> {
        let path = self.require_bucket(bucket_id).await?;
        let mut objects = Vec::new();
        let mut entries = tokio::fs::read_dir(&path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let meta = entry.metadata().await?;
            if !meta.is_file() || name.starts_with(STAGING_PREFIX) {
                continue;
            }
            objects.push(StoredObject {
                bucket: bucket_id.to_string(),
                name,
                size: meta.len(),
            });
        }
        objects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(objects)
    }

    async fn upload(
        &self,
        bucket_id: &str,
        name: &str,
        content: Bytes,
        opts: &UploadOptions,
    ) -> DriverResult<StoredObject> {
        let bucket_path = self.require_bucket(bucket_id).await?;
        let dst = self.object_path(bucket_id, name)?;
        let size = content.len() as u64;

        match opts.multipart_job(size)? {
            None => tokio::fs::write(&dst, &content).await?,
            Some(job) => {
                self.upload_parts(&bucket_path, &dst, name, content, job)
                    .await?
            }
        }

        Ok(StoredObject {
            bucket: bucket_id.to_string(),
            name: name.to_string(),
            size,
        })
    }

    async fn get_url(&self, bucket_id: &str, name: &str, _presigned: bool) -> DriverResult<String> {
        let path = self.object_path(bucket_id, name)?;
        let path = if path.is_absolute() {
            path
        } else {
            std::env::current_dir()?.join(path)
        };
        Url::from_file_path(&path)
            .map(|u| u.to_string())
            .map_err(|_| DriverError::Config(format!("cannot build URL for {}", path.display())))
    }

    async fn session(&self, _max_connections: usize) -> DriverResult<Arc<dyn Session>> {
        Ok(Arc::new(FsSession))
    }

    async fn delete_object(&self, bucket_id: &str, name: &str) -> DriverResult<()> {
        let path = self.object_path(bucket_id, name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(DriverError::ObjectUnfound(format!("{}/{}", bucket_id, name)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn copy_object(
        &self,
        bucket_id: &str,
        name: &str,
        dst_bucket_id: &str,
        dst_name: &str,
    ) -> DriverResult<()> {
        let src = self.object_path(bucket_id, name)?;
        self.require_bucket(dst_bucket_id).await?;
        let dst = self.object_path(dst_bucket_id, dst_name)?;
        tokio::fs::copy(&src, &dst).await?;
        Ok(())
    }

    async fn object_exists(&self, bucket_id: &str, name: &str) -> DriverResult<bool> {
        Ok(tokio::fs::try_exists(self.object_path(bucket_id, name)?).await?)
    }
}

struct FsSession;

#[async_trait]
impl Session for FsSession {
    async fn fetch(&self, url: &str, range: Option<ByteRange>) -> DriverResult<u64> {
        let path = url_to_path(url)?;
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DriverError::ObjectUnfound(url.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let len = file.metadata().await?.len();
        let (start, mut remaining) = match range {
            None => (0, len),
            Some(r) if r.start >= len || r.end < r.start => {
                return Err(DriverError::from_status(416, format!("range {:?} of {}", r, url)))
            }
            Some(r) => (r.start, r.end.min(len - 1) - r.start + 1),
        };
        file.seek(std::io::SeekFrom::Start(start)).await?;

        let mut buf = vec![0u8; DOWNLOAD_BLOCK_SIZE];
        let mut received = 0u64;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = file.read(&mut buf[..want]).await?;
            if n == 0 {
                break;
            }
            received += n as u64;
            remaining -= n as u64;
        }
        Ok(received)
    }
}
