// src/engine.rs
//
// Concurrent transfer engine: ranged downloads with cooperative
// concurrency inside one task, and paced, staggered virtual clients.
//
// Workers never share a result buffer. Each returns its own RunResults and
// the owner merges them after joining.

use std::time::{Duration, Instant};

use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn, Instrument};

use crate::driver::{ByteRange, Driver, Session};
use crate::errors::{DriverResult, ErrorRecord};
use crate::multipart::TransferJob;

/// Timings and failures of one run (or one worker of a run).
///
/// `timings[i]` and `sizes[i]` describe the same successful operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunResults {
    pub timings: Vec<f64>,
    pub sizes: Vec<u64>,
    pub errors: Vec<ErrorRecord>,
}

impl RunResults {
    pub fn push_ok(&mut self, elapsed: Duration, bytes: u64) {
        self.timings.push(elapsed.as_secs_f64());
        self.sizes.push(bytes);
    }

    pub fn push_err(&mut self, record: ErrorRecord) {
        self.errors.push(record);
    }

    pub fn record(&mut self, outcome: Result<(Duration, u64), ErrorRecord>) {
        match outcome {
            Ok((elapsed, bytes)) => self.push_ok(elapsed, bytes),
            Err(record) => self.push_err(record),
        }
    }

    pub fn merge(&mut self, other: RunResults) {
        self.timings.extend(other.timings);
        self.sizes.extend(other.sizes);
        self.errors.extend(other.errors);
    }

    /// Successful plus failed operations.
    pub fn attempted(&self) -> usize {
        self.timings.len() + self.errors.len()
    }

    pub fn total_bytes(&self) -> u64 {
        self.sizes.iter().sum()
    }

    pub fn test_time(&self) -> f64 {
        self.timings.iter().sum()
    }
}

/// One GET of a ranged download.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeRequest {
    pub url: String,
    pub range: Option<ByteRange>,
}

/// Run `requests` through `session` with at most `max_concurrency` in
/// flight. Results come back in request order.
pub async fn fetch_ranges(
    session: &dyn Session,
    requests: &[RangeRequest],
    max_concurrency: usize,
) -> Vec<DriverResult<u64>> {
    let limit = max_concurrency.max(1);
    let mut slots: Vec<Option<DriverResult<u64>>> = requests.iter().map(|_| None).collect();
    let mut pending = 0..requests.len();
    let mut in_flight = FuturesUnordered::new();

    let start = |index: usize| {
        let req = &requests[index];
        async move { (index, session.fetch(&req.url, req.range).await) }
    };

    for next in pending.by_ref().take(limit) {
        in_flight.push(start(next));
    }
    while let Some((index, result)) = in_flight.next().await {
        slots[index] = Some(result);
        if let Some(next) = pending.next() {
            in_flight.push(start(next));
        }
    }

    slots.into_iter().flatten().collect()
}

/// Download one object of `object_size` bytes as `chunk_size` ranges and
/// time the whole object. Any failed range fails the object.
pub async fn download_ranged(
    session: &dyn Session,
    url: &str,
    object_size: u64,
    chunk_size: u64,
    max_concurrency: usize,
) -> Result<(Duration, u64), ErrorRecord> {
    let job = TransferJob::new(object_size, chunk_size, max_concurrency)
        .map_err(|e| ErrorRecord::from(&crate::errors::DriverError::Config(e.to_string())))?;

    let mut requests: Vec<RangeRequest> = job
        .parts()
        .iter()
        .map(|part| RangeRequest {
            url: url.to_string(),
            range: Some(ByteRange::from(part)),
        })
        .collect();
    if requests.is_empty() {
        // Empty object: a single plain GET
        requests.push(RangeRequest {
            url: url.to_string(),
            range: None,
        });
    }

    let t0 = Instant::now();
    let results = fetch_ranges(session, &requests, job.concurrency()).await;
    let elapsed = t0.elapsed();

    let mut received = 0;
    for result in results {
        match result {
            Ok(n) => received += n,
            Err(e) => {
                debug!(url, "range failed: {}", e);
                return Err(ErrorRecord::from(&e));
            }
        }
    }
    Ok((elapsed, received))
}

/// Start offsets of `client_count` staggered clients: client i waits
/// `i * delay_time`.
pub fn client_offsets(client_count: usize, delay_time: Duration) -> Vec<Duration> {
    (0..client_count).map(|i| delay_time * i as u32).collect()
}

/// Pacing of a group of streaming clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientPlan {
    pub urls: Vec<String>,
    pub client_count: usize,
    /// Pause before each request
    pub sleep_time: Duration,
    /// Start offset step between clients
    pub delay_time: Duration,
    /// Connections per client session
    pub max_concurrency: usize,
}

/// Run the clients of `plan` concurrently in the current task and merge
/// their results once all of them are done.
pub async fn run_clients(driver: &dyn Driver, plan: &ClientPlan) -> RunResults {
    info!(
        clients = plan.client_count,
        urls = plan.urls.len(),
        "starting streaming clients"
    );
    let clients = client_offsets(plan.client_count, plan.delay_time)
        .into_iter()
        .enumerate()
        .map(|(id, offset)| {
            run_client(driver, plan, offset).instrument(tracing::debug_span!("client", id))
        });

    let mut merged = RunResults::default();
    for results in join_all(clients).await {
        merged.merge(results);
    }
    merged
}

async fn run_client(driver: &dyn Driver, plan: &ClientPlan, offset: Duration) -> RunResults {
    let mut results = RunResults::default();
    tokio::time::sleep(offset).await;

    let session = match driver.session(plan.max_concurrency).await {
        Ok(s) => s,
        Err(e) => {
            warn!("cannot open session: {}", e);
            // Every planned request of this client counts as failed
            let record = ErrorRecord::from(&e);
            for _ in &plan.urls {
                results.push_err(record.clone());
            }
            return results;
        }
    };

    for url in &plan.urls {
        tokio::time::sleep(plan.sleep_time).await;
        let t0 = Instant::now();
        match session.fetch(url, None).await {
            Ok(n) => results.push_ok(t0.elapsed(), n),
            Err(e) => {
                debug!(url = %url, "download failed: {}", e);
                results.push_err(ErrorRecord::from(&e));
            }
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriverConfig;
    use crate::driver::ram::RamDriver;
    use crate::driver::UploadOptions;
    use crate::errors::{DriverError, ErrorKind};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Session that answers with the range length after a delay that
    /// shrinks with the offset, so later ranges finish first.
    struct SlowSession {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        fail_offset: Option<u64>,
    }

    impl SlowSession {
        fn new(fail_offset: Option<u64>) -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                fail_offset,
            }
        }
    }

    #[async_trait]
    impl Session for SlowSession {
        async fn fetch(&self, _url: &str, range: Option<ByteRange>) -> DriverResult<u64> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let range = range.unwrap_or(ByteRange { start: 0, end: 0 });
            tokio::time::sleep(Duration::from_millis(50 - (range.start % 50))).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if Some(range.start) == self.fail_offset {
                return Err(DriverError::from_status(500, "boom"));
            }
            Ok(range.len())
        }
    }

    #[tokio::test]
    async fn test_fetch_ranges_keeps_order_and_limit() {
        let session = SlowSession::new(None);
        let requests: Vec<RangeRequest> = (0..6)
            .map(|i| RangeRequest {
                url: "u".into(),
                range: Some(ByteRange {
                    start: i * 10,
                    end: i * 10 + i,
                }),
            })
            .collect();
        let results = fetch_ranges(&session, &requests, 2).await;
        let lens: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(lens, vec![1, 2, 3, 4, 5, 6]);
        assert!(session.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_download_ranged_sums_parts() {
        let session = SlowSession::new(None);
        let (_, received) = download_ranged(&session, "u", 95, 10, 4).await.unwrap();
        assert_eq!(received, 95);
        assert!(session.peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn test_download_ranged_one_failure_fails_object() {
        let session = SlowSession::new(Some(20));
        let record = download_ranged(&session, "u", 40, 10, 4).await.unwrap_err();
        assert_eq!(record.class_key(), "server");
    }

    #[test]
    fn test_client_offsets() {
        let offsets = client_offsets(3, Duration::from_millis(250));
        assert_eq!(
            offsets,
            vec![Duration::ZERO, Duration::from_millis(250), Duration::from_millis(500)]
        );
        assert!(client_offsets(0, Duration::from_secs(1)).is_empty());
    }

    async fn ram_with_objects(n: usize) -> (Arc<RamDriver>, Vec<String>) {
        let driver = Arc::new(RamDriver::new(DriverConfig::new("ram")));
        driver.create_bucket("b", None).await.unwrap();
        let mut urls = Vec::new();
        for i in 0..n {
            let name = format!("o{}", i);
            driver
                .upload("b", &name, Bytes::from(vec![0u8; 64]), &UploadOptions::default())
                .await
                .unwrap();
            urls.push(driver.get_url("b", &name, false).await.unwrap());
        }
        (driver, urls)
    }

    #[tokio::test]
    async fn test_run_clients_counts_every_request() {
        let (driver, mut urls) = ram_with_objects(2).await;
        urls.push("ram://b/missing".to_string());
        let plan = ClientPlan {
            urls,
            client_count: 3,
            sleep_time: Duration::ZERO,
            delay_time: Duration::ZERO,
            max_concurrency: 1,
        };
        let results = run_clients(driver.as_ref(), &plan).await;
        assert_eq!(results.timings.len(), 6);
        assert_eq!(results.errors.len(), 3);
        assert_eq!(results.attempted(), 9);
        assert!(results.errors.iter().all(|e| e.kind == ErrorKind::ObjectUnfound));
        assert_eq!(results.total_bytes(), 6 * 64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_clients_paced_and_staggered() {
        let (driver, urls) = ram_with_objects(2).await;
        let plan = ClientPlan {
            urls,
            client_count: 3,
            sleep_time: Duration::from_millis(100),
            delay_time: Duration::from_millis(250),
            max_concurrency: 1,
        };
        let start = tokio::time::Instant::now();
        let results = run_clients(driver.as_ref(), &plan).await;
        // Last client starts at 500ms, then sleeps twice
        assert!(start.elapsed() >= Duration::from_millis(700));
        assert_eq!(results.timings.len(), 6);
    }

    #[test]
    fn test_merge_preserves_counts() {
        let mut a = RunResults::default();
        a.push_ok(Duration::from_secs(1), 10);
        let mut b = RunResults::default();
        b.push_err(ErrorRecord::new(ErrorKind::Connection, None, "x"));
        b.push_ok(Duration::from_secs(2), 20);
        a.merge(b);
        assert_eq!(a.attempted(), 3);
        assert_eq!(a.test_time(), 3.0);
        assert_eq!(a.total_bytes(), 30);
    }
}
