// src/multipart.rs
//
// Multipart transfer orchestration: split a payload into contiguous parts and
// drive a bounded pool of part workers over them.

use std::future::Future;
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn, Instrument, Span};

use crate::errors::{BenchmarkError, BenchmarkResult, DriverError, DriverResult};

/// A contiguous byte sub-range of a transfer job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Part {
    pub index: usize,
    pub offset: u64,
    pub length: u64,
}

impl Part {
    pub fn range(&self) -> Range<u64> {
        self.offset..self.offset + self.length
    }

    /// Inclusive last byte, as used by HTTP `Range` headers.
    pub fn last_byte(&self) -> u64 {
        self.offset + self.length.saturating_sub(1)
    }
}

/// Outcome of one part transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct PartResult {
    pub index: usize,
    /// Opaque value returned by the driver (e.g. an integrity tag)
    pub token: String,
    pub duration: Duration,
}

/// A payload of known length to be moved in `chunk_size` parts with at most
/// `concurrency` parts in flight.
#[derive(Debug, Clone, Copy)]
pub struct TransferJob {
    total_length: u64,
    chunk_size: u64,
    concurrency: usize,
}

impl TransferJob {
    pub fn new(total_length: u64, chunk_size: u64, concurrency: usize) -> BenchmarkResult<Self> {
        if chunk_size == 0 {
            return Err(BenchmarkError::invalid_param("multipart_chunksize", "must be > 0"));
        }
        if concurrency == 0 {
            return Err(BenchmarkError::invalid_param("max_concurrency", "must be >= 1"));
        }
        Ok(Self {
            total_length,
            chunk_size,
            concurrency,
        })
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn part_count(&self) -> usize {
        self.total_length.div_ceil(self.chunk_size) as usize
    }

    /// Derive the part list. Deterministic: same job, same parts.
    pub fn parts(&self) -> Vec<Part> {
        let count = self.part_count();
        let mut parts = Vec::with_capacity(count);
        let mut offset = 0u64;
        for index in 0..count {
            let length = self.chunk_size.min(self.total_length - offset);
            parts.push(Part {
                index,
                offset,
                length,
            });
            offset += length;
        }
        parts
    }
}

/// Drives part uploads for one object.
///
/// Each worker receives its own `Bytes` slice of the payload, so concurrent
/// part readers never share a cursor.
pub struct MultipartUploader {
    job: TransferJob,
    span: Span,
}

impl MultipartUploader {
    pub fn new(job: TransferJob) -> Self {
        Self {
            job,
            span: tracing::debug_span!(
                "multipart",
                total = job.total_length,
                chunk = job.chunk_size,
                concurrency = job.concurrency
            ),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn job(&self) -> &TransferJob {
        &self.job
    }

    /// Upload every part of `content` through `upload_part`.
    ///
    /// Waits for all submitted parts even after a failure; the error of the
    /// lowest failing part index is returned once everything has finished.
    /// On success results are ordered by part index.
    pub async fn run<F, Fut>(&self, content: Bytes, upload_part: F) -> DriverResult<Vec<PartResult>>
    where
        F: Fn(Part, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DriverResult<String>> + Send + 'static,
    {
        if content.len() as u64 != self.job.total_length {
            return Err(DriverError::Config(format!(
                "content length {} does not match job length {}",
                content.len(),
                self.job.total_length
            )));
        }

        let parts = self.job.parts();
        let sem = Arc::new(Semaphore::new(self.job.concurrency));
        let upload_part = Arc::new(upload_part);
        let mut tasks = JoinSet::new();

        for part in parts.iter().copied() {
            let sem = sem.clone();
            let upload_part = upload_part.clone();
            let view = content.slice(part.offset as usize..(part.offset + part.length) as usize);
            tasks.spawn(
                async move {
                    let outcome: DriverResult<PartResult> = async {
                        let _permit = sem
                            .acquire_owned()
                            .await
                            .map_err(|e| DriverError::ClientCapacity(e.to_string()))?;
                        let t0 = Instant::now();
                        let token = upload_part(part, view).await?;
                        debug!(part = part.index, offset = part.offset, "part uploaded");
                        Ok(PartResult {
                            index: part.index,
                            token,
                            duration: t0.elapsed(),
                        })
                    }
                    .await;
                    outcome.map_err(|e| (part.index, e))
                }
                .instrument(self.span.clone()),
            );
            debug!(parent: &self.span, part = part.index, offset = part.offset, "submitted part");
        }

        let mut results = Vec::with_capacity(parts.len());
        let mut failures: Vec<(usize, DriverError)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(result)) => results.push(result),
                Ok(Err(failure)) => failures.push(failure),
                Err(e) => failures.push((usize::MAX, DriverError::ClientCapacity(format!("part worker panicked: {e}")))),
            }
        }

        if !failures.is_empty() {
            failures.sort_by_key(|(index, _)| *index);
            warn!(parent: &self.span, failed = failures.len(), "multipart upload failed");
            let (_, first) = failures.remove(0);
            return Err(first);
        }

        results.sort_by_key(|r| r.index);
        Ok(results)
    }
}
