// src/benchmark/mod.rs
//
// Benchmark lifecycle: setup -> run -> tear_down -> make_stats.
//
// One `Benchmark` drives one kind of workload against a driver. Setup creates
// the fixtures, run times the workload once (per-operation failures are
// recorded, not raised), tear_down releases the fixtures and make_stats turns
// the recorded samples into a flat report.

pub mod features;

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tracing::{debug, info, warn, Span};

use crate::config::{
    BucketConfig, CopyConfig, DownloadConfig, FeaturesConfig, FixtureConfig, MultiDownloadConfig,
    Params, StreamingConfig, UploadConfig,
};
use crate::constants::DEFAULT_OBJECT_NAME_SIZE;
use crate::data_gen::{random_content, random_name};
use crate::driver::{Driver, StoredObject};
use crate::engine::{download_ranged, run_clients, ClientPlan};
use crate::errors::{
    BenchmarkError, BenchmarkResult, DriverError, DriverResult, ErrorKind, ErrorRecord,
};
use crate::multiprocess::{run_fanout, WorkerPlan};
use crate::stats::{error_counts, make_aggr, throughput, StatsReport};

pub use crate::engine::RunResults;
pub use features::ProbeOutcome;

/// Names accepted by `Benchmark::new`.
pub const BENCHMARK_NAMES: [&str; 6] = [
    "upload",
    "download",
    "multi_download",
    "copy",
    "streaming",
    "features",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Created,
    SetUp,
    Ran,
    TornDown,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Created => "created",
            State::SetUp => "set up",
            State::Ran => "ran",
            State::TornDown => "torn down",
        }
    }
}

/// Validated configuration of one benchmark kind.
#[derive(Debug, Clone, PartialEq)]
pub enum BenchmarkKind {
    Upload(UploadConfig),
    Download(DownloadConfig),
    MultiDownload(MultiDownloadConfig),
    Copy(CopyConfig),
    Streaming(StreamingConfig),
    Features(FeaturesConfig),
}

impl BenchmarkKind {
    pub fn from_params(name: &str, params: &Params) -> BenchmarkResult<Self> {
        Ok(match name {
            "upload" => BenchmarkKind::Upload(UploadConfig::from_params(params)?),
            "download" => BenchmarkKind::Download(DownloadConfig::from_params(params)?),
            "multi_download" => {
                BenchmarkKind::MultiDownload(MultiDownloadConfig::from_params(params)?)
            }
            "copy" => BenchmarkKind::Copy(CopyConfig::from_params(params)?),
            "streaming" => BenchmarkKind::Streaming(StreamingConfig::from_params(params)?),
            "features" => BenchmarkKind::Features(FeaturesConfig::from_params(params)?),
            other => {
                return Err(BenchmarkError::invalid_param(
                    "benchmark",
                    format!("unknown benchmark '{}'", other),
                ))
            }
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            BenchmarkKind::Upload(_) => "upload",
            BenchmarkKind::Download(_) => "download",
            BenchmarkKind::MultiDownload(_) => "multi_download",
            BenchmarkKind::Copy(_) => "copy",
            BenchmarkKind::Streaming(_) => "streaming",
            BenchmarkKind::Features(_) => "features",
        }
    }

    fn fixture(&self) -> Option<&FixtureConfig> {
        match self {
            BenchmarkKind::Download(c) => Some(&c.fixture),
            BenchmarkKind::MultiDownload(c) => Some(&c.fixture),
            BenchmarkKind::Copy(c) => Some(&c.fixture),
            BenchmarkKind::Streaming(c) => Some(&c.fixture),
            BenchmarkKind::Upload(_) | BenchmarkKind::Features(_) => None,
        }
    }

    fn bucket(&self) -> Option<&BucketConfig> {
        match self {
            BenchmarkKind::Upload(c) => Some(&c.bucket),
            other => other.fixture().map(|f| &f.bucket),
        }
    }

    fn warmup_sleep(&self) -> Duration {
        match self {
            BenchmarkKind::Download(c) => c.warmup_sleep,
            BenchmarkKind::MultiDownload(c) => c.warmup_sleep,
            BenchmarkKind::Copy(c) => c.warmup_sleep,
            BenchmarkKind::Streaming(c) => c.warmup_sleep,
            BenchmarkKind::Upload(_) | BenchmarkKind::Features(_) => Duration::ZERO,
        }
    }
}

#[derive(Debug)]
struct FixtureBucket {
    id: String,
    /// Existing bucket named by `bucket_id`; only our own objects are removed
    reused: bool,
    created_objects: Vec<String>,
}

#[derive(Debug, Default)]
struct Fixtures {
    buckets: Vec<FixtureBucket>,
    objects: Vec<StoredObject>,
    urls: Vec<String>,
    dst_bucket: Option<String>,
}

impl Fixtures {
    fn primary_bucket(&self) -> Option<&str> {
        self.buckets.first().map(|b| b.id.as_str())
    }

    fn bucket_mut(&mut self, id: &str) -> Option<&mut FixtureBucket> {
        self.buckets.iter_mut().find(|b| b.id == id)
    }
}

pub struct Benchmark {
    name: String,
    driver: Arc<dyn Driver>,
    params: Params,
    kind: Option<BenchmarkKind>,
    state: State,
    ran: bool,
    fixtures: Fixtures,
    /// Primary bucket of the run, kept for the report after tear_down
    bucket_id: Option<String>,
    results: RunResults,
    probes: Vec<(String, ProbeOutcome)>,
    total_time: f64,
    span: Span,
}

impl Benchmark {
    pub fn new(name: &str, driver: Arc<dyn Driver>) -> BenchmarkResult<Self> {
        if !BENCHMARK_NAMES.contains(&name) {
            return Err(BenchmarkError::invalid_param(
                "benchmark",
                format!("unknown benchmark '{}'", name),
            ));
        }
        let span = tracing::info_span!("benchmark", name, driver = driver.id());
        Ok(Self {
            name: name.to_string(),
            driver,
            params: Params::new(),
            kind: None,
            state: State::Created,
            ran: false,
            fixtures: Fixtures::default(),
            bucket_id: None,
            results: RunResults::default(),
            probes: Vec::new(),
            total_time: 0.0,
            span,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn results(&self) -> &RunResults {
        &self.results
    }

    /// Wall-clock seconds of the timed section of `run`.
    pub fn total_time(&self) -> f64 {
        self.total_time
    }

    pub fn urls(&self) -> &[String] {
        &self.fixtures.urls
    }

    /// Buckets currently held as fixtures.
    pub fn bucket_ids(&self) -> Vec<String> {
        self.fixtures.buckets.iter().map(|b| b.id.clone()).collect()
    }

    /// Merge `params` into the current ones. Only allowed before setup.
    pub fn set_params(&mut self, params: Params) -> BenchmarkResult<()> {
        self.expect_state(State::Created, "set_params")?;
        self.params.merge(params);
        Ok(())
    }

    fn expect_state(&self, expected: State, operation: &'static str) -> BenchmarkResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(BenchmarkError::InvalidState {
                operation,
                state: self.state.as_str(),
            })
        }
    }

    // -------------------------------------------------------------------------
    // setup
    // -------------------------------------------------------------------------

    pub async fn setup(&mut self) -> BenchmarkResult<()> {
        self.expect_state(State::Created, "setup")?;
        let kind = BenchmarkKind::from_params(&self.name, &self.params)?;
        info!(parent: &self.span, "setup");

        self.driver.setup().await?;
        if let Err(e) = self.create_fixtures(&kind).await {
            warn!(parent: &self.span, "setup failed, removing partial fixtures: {}", e);
            self.release_fixtures().await;
            return Err(e.into());
        }

        debug!(
            parent: &self.span,
            buckets = self.fixtures.buckets.len(),
            objects = self.fixtures.objects.len(),
            "fixtures ready"
        );
        self.bucket_id = self.fixtures.primary_bucket().map(str::to_string);
        self.kind = Some(kind);
        self.state = State::SetUp;
        Ok(())
    }

    async fn create_fixtures(&mut self, kind: &BenchmarkKind) -> DriverResult<()> {
        match kind {
            BenchmarkKind::Upload(cfg) => {
                self.prepare_bucket(&cfg.bucket).await?;
            }
            BenchmarkKind::Download(_)
            | BenchmarkKind::MultiDownload(_)
            | BenchmarkKind::Streaming(_) => {
                if let Some(fixture) = kind.fixture() {
                    self.prepare_objects(fixture).await?;
                }
            }
            BenchmarkKind::Copy(cfg) => {
                self.prepare_objects(&cfg.fixture).await?;
                let bucket = &cfg.fixture.bucket;
                let name = random_name(
                    bucket.bucket_name_size,
                    bucket.bucket_prefix.as_deref(),
                    bucket.bucket_suffix.as_deref(),
                );
                let dst = self
                    .driver
                    .create_bucket(&name, bucket.storage_class.as_deref())
                    .await?;
                self.fixtures.buckets.push(FixtureBucket {
                    id: dst.id.clone(),
                    reused: false,
                    created_objects: Vec::new(),
                });
                self.fixtures.dst_bucket = Some(dst.id);
            }
            BenchmarkKind::Features(_) => {}
        }
        Ok(())
    }

    /// Create the benchmark bucket, or adopt the one named by `bucket_id`.
    async fn prepare_bucket(&mut self, cfg: &BucketConfig) -> DriverResult<String> {
        if let Some(id) = &cfg.bucket_id {
            match self.driver.get_bucket(id).await {
                Ok(bucket) => {
                    info!(parent: &self.span, bucket = %bucket.id, "reusing bucket");
                    self.fixtures.buckets.push(FixtureBucket {
                        id: bucket.id.clone(),
                        reused: true,
                        created_objects: Vec::new(),
                    });
                    return Ok(bucket.id);
                }
                Err(DriverError::BucketUnfound(_)) => {
                    debug!(parent: &self.span, bucket = %id, "bucket not found, creating it");
                }
                Err(e) => return Err(e),
            }
        }

        let name = cfg.bucket_id.clone().unwrap_or_else(|| {
            random_name(
                cfg.bucket_name_size,
                cfg.bucket_prefix.as_deref(),
                cfg.bucket_suffix.as_deref(),
            )
        });
        let bucket = self
            .driver
            .create_bucket(&name, cfg.storage_class.as_deref())
            .await?;
        self.fixtures.buckets.push(FixtureBucket {
            id: bucket.id.clone(),
            reused: false,
            created_objects: Vec::new(),
        });
        Ok(bucket.id)
    }

    async fn prepare_objects(&mut self, cfg: &FixtureConfig) -> DriverResult<()> {
        let bucket_id = self.prepare_bucket(&cfg.bucket).await?;
        let reused = self.fixtures.buckets.last().is_some_and(|b| b.reused);

        let mut objects = if reused {
            self.driver.list_objects(&bucket_id).await?
        } else {
            Vec::new()
        };
        if objects.is_empty() {
            objects = self.upload_fixtures(&bucket_id, cfg).await?;
        } else {
            info!(parent: &self.span, count = objects.len(), "reusing existing objects");
        }

        let mut urls = Vec::with_capacity(objects.len());
        for object in &objects {
            urls.push(
                self.driver
                    .get_url(&object.bucket, &object.name, cfg.presigned)
                    .await?,
            );
        }
        self.fixtures.objects = objects;
        self.fixtures.urls = urls;
        Ok(())
    }

    async fn upload_fixtures(
        &mut self,
        bucket_id: &str,
        cfg: &FixtureConfig,
    ) -> DriverResult<Vec<StoredObject>> {
        info!(
            parent: &self.span,
            count = cfg.object_number,
            size = cfg.object_size,
            workers = cfg.setup_workers,
            "uploading fixture objects"
        );
        let driver = self.driver.clone();
        let bucket = bucket_id.to_string();
        let prefix = cfg.object_prefix.clone();
        let size = cfg.object_size;
        let opts = Arc::new(cfg.upload.clone());

        let outcomes = run_bounded(cfg.object_number, cfg.setup_workers, move |_| {
            let driver = driver.clone();
            let bucket = bucket.clone();
            let opts = opts.clone();
            let name = random_name(DEFAULT_OBJECT_NAME_SIZE, prefix.as_deref(), None);
            async move {
                driver
                    .upload(&bucket, &name, random_content(size), &opts)
                    .await
            }
        })
        .await;

        let mut objects = Vec::with_capacity(outcomes.len());
        let mut first_error = None;
        for joined in outcomes {
            let outcome = joined
                .map_err(|e| DriverError::ClientCapacity(format!("fixture upload aborted: {}", e)))
                .and_then(|uploaded| uploaded);
            match outcome {
                Ok(object) => objects.push(object),
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(e) => debug!(parent: &self.span, "fixture upload failed: {}", e),
            }
        }
        if let Some(bucket) = self.fixtures.bucket_mut(bucket_id) {
            bucket
                .created_objects
                .extend(objects.iter().map(|o| o.name.clone()));
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(objects),
        }
    }

    // -------------------------------------------------------------------------
    // run
    // -------------------------------------------------------------------------

    pub async fn run(&mut self) -> BenchmarkResult<()> {
        self.expect_state(State::SetUp, "run")?;
        let Some(kind) = self.kind.clone() else {
            return Err(BenchmarkError::InvalidState {
                operation: "run",
                state: self.state.as_str(),
            });
        };

        let warmup = kind.warmup_sleep();
        if !warmup.is_zero() {
            debug!(parent: &self.span, "warmup sleep {:?}", warmup);
            tokio::time::sleep(warmup).await;
        }

        info!(parent: &self.span, "run");
        let t0 = Instant::now();
        let results = match &kind {
            BenchmarkKind::Upload(cfg) => self.run_upload(cfg).await,
            BenchmarkKind::Download(cfg) => self.run_download(cfg).await,
            BenchmarkKind::MultiDownload(cfg) => self.run_multi_download(cfg).await,
            BenchmarkKind::Copy(_) => self.run_copy().await,
            BenchmarkKind::Streaming(cfg) => self.run_streaming(cfg).await?,
            BenchmarkKind::Features(cfg) => {
                self.probes = features::run_probes(self.driver.as_ref(), cfg).await;
                RunResults::default()
            }
        };
        self.total_time = t0.elapsed().as_secs_f64();

        info!(
            parent: &self.span,
            ops = results.timings.len(),
            errors = results.errors.len(),
            "run finished in {:.3}s",
            self.total_time
        );
        self.results = results;
        self.state = State::Ran;
        self.ran = true;
        Ok(())
    }

    async fn run_upload(&mut self, cfg: &UploadConfig) -> RunResults {
        let bucket_id = self.fixtures.primary_bucket().unwrap_or_default().to_string();
        let driver = self.driver.clone();
        let bucket = bucket_id.clone();
        let prefix = cfg.object_prefix.clone();
        let size = cfg.object_size;
        let opts = Arc::new(cfg.upload.clone());

        let outcomes = run_bounded(cfg.object_number, cfg.parallel_objects, move |_| {
            let driver = driver.clone();
            let bucket = bucket.clone();
            let opts = opts.clone();
            let name = random_name(DEFAULT_OBJECT_NAME_SIZE, prefix.as_deref(), None);
            async move {
                let content = random_content(size);
                let t0 = Instant::now();
                let outcome = driver.upload(&bucket, &name, content, &opts).await;
                (outcome, t0.elapsed())
            }
        })
        .await;

        let mut results = RunResults::default();
        let mut uploaded = Vec::new();
        for joined in outcomes {
            match joined {
                Ok((Ok(object), elapsed)) => {
                    results.push_ok(elapsed, object.size);
                    uploaded.push(object.name);
                }
                Ok((Err(e), _)) => {
                    debug!(parent: &self.span, "upload failed: {}", e);
                    results.push_err(ErrorRecord::from(&e));
                }
                Err(e) => results.push_err(aborted(&e)),
            }
        }
        if let Some(bucket) = self.fixtures.bucket_mut(&bucket_id) {
            bucket.created_objects.extend(uploaded);
        }
        results
    }

    async fn run_download(&self, cfg: &DownloadConfig) -> RunResults {
        let driver = self.driver.clone();
        let urls = Arc::new(self.fixtures.urls.clone());

        let outcomes = run_bounded(urls.len(), cfg.parallel_objects, move |i| {
            let driver = driver.clone();
            let urls = urls.clone();
            async move {
                let t0 = Instant::now();
                let outcome = driver.download(&urls[i]).await;
                (outcome, t0.elapsed())
            }
        })
        .await;

        let mut results = RunResults::default();
        for joined in outcomes {
            match joined {
                Ok((outcome, elapsed)) => results.record(
                    outcome
                        .map(|bytes| (elapsed, bytes))
                        .map_err(|e| ErrorRecord::from(&e)),
                ),
                Err(e) => results.push_err(aborted(&e)),
            }
        }
        results
    }

    async fn run_multi_download(&self, cfg: &MultiDownloadConfig) -> RunResults {
        let mut results = RunResults::default();
        let session = match self.driver.session(cfg.max_concurrency).await {
            Ok(s) => s,
            Err(e) => {
                warn!(parent: &self.span, "cannot open session: {}", e);
                for _ in &self.fixtures.urls {
                    results.push_err(ErrorRecord::from(&e));
                }
                return results;
            }
        };

        for (object, url) in self.fixtures.objects.iter().zip(&self.fixtures.urls) {
            let outcome = download_ranged(
                session.as_ref(),
                url,
                object.size,
                cfg.chunk_for(object.size),
                cfg.max_concurrency,
            )
            .await;
            results.record(outcome);
        }
        results
    }

    async fn run_copy(&self) -> RunResults {
        let mut results = RunResults::default();
        let Some(dst) = self.fixtures.dst_bucket.as_deref() else {
            return results;
        };
        for object in &self.fixtures.objects {
            let dst_name = random_name(DEFAULT_OBJECT_NAME_SIZE, None, None);
            let t0 = Instant::now();
            match self
                .driver
                .copy_object(&object.bucket, &object.name, dst, &dst_name)
                .await
            {
                Ok(()) => results.push_ok(t0.elapsed(), object.size),
                Err(e) => {
                    debug!(parent: &self.span, "copy failed: {}", e);
                    results.push_err(ErrorRecord::from(&e));
                }
            }
        }
        results
    }

    async fn run_streaming(&self, cfg: &StreamingConfig) -> BenchmarkResult<RunResults> {
        let plan = ClientPlan {
            urls: self.fixtures.urls.clone(),
            client_count: cfg.client_number,
            sleep_time: cfg.sleep_time,
            delay_time: cfg.delay_time,
            max_concurrency: cfg.max_concurrency,
        };

        let processes = cfg.processes.resolve();
        if processes <= 1 {
            return Ok(run_clients(self.driver.as_ref(), &plan).await);
        }
        if !self.driver.shared_across_processes() {
            return Err(BenchmarkError::invalid_param(
                "process_number",
                format!(
                    "driver '{}' keeps its objects in process memory",
                    self.driver.id()
                ),
            ));
        }

        let worker_plan = WorkerPlan {
            worker_id: 0,
            driver: self.driver.config().clone(),
            clients: plan,
        };
        run_fanout(&worker_plan, processes)
            .await
            .map_err(|e| BenchmarkError::Worker(format!("{:#}", e)))
    }

    // -------------------------------------------------------------------------
    // tear_down
    // -------------------------------------------------------------------------

    /// Release the fixtures. A second call is a no-op.
    pub async fn tear_down(&mut self) -> BenchmarkResult<()> {
        match self.state {
            State::TornDown => return Ok(()),
            State::Created => {
                return Err(BenchmarkError::InvalidState {
                    operation: "tear_down",
                    state: self.state.as_str(),
                })
            }
            State::SetUp | State::Ran => {}
        }

        let keep = self
            .kind
            .as_ref()
            .and_then(|k| k.bucket())
            .is_some_and(|b| b.keep_objects);
        if keep {
            info!(parent: &self.span, buckets = ?self.bucket_ids(), "keeping objects");
            self.fixtures = Fixtures::default();
        } else {
            info!(parent: &self.span, "tear down");
            self.release_fixtures().await;
        }
        self.state = State::TornDown;
        Ok(())
    }

    /// Best effort: failures are logged and the fixtures are forgotten.
    async fn release_fixtures(&mut self) {
        let fixtures = std::mem::take(&mut self.fixtures);
        for bucket in fixtures.buckets.iter().rev() {
            let outcome = if bucket.reused {
                if bucket.created_objects.is_empty() {
                    continue;
                }
                self.driver
                    .delete_objects(&bucket.id, &bucket.created_objects)
                    .await
            } else {
                self.driver.clean_bucket(&bucket.id).await
            };
            match outcome {
                Ok(()) => debug!(parent: &self.span, bucket = %bucket.id, "released"),
                Err(DriverError::NonEmptyBucket(_)) => {
                    warn!(parent: &self.span, bucket = %bucket.id, "bucket still has objects, left in place")
                }
                Err(e) => warn!(parent: &self.span, bucket = %bucket.id, "cleanup failed: {}", e),
            }
        }
    }

    // -------------------------------------------------------------------------
    // make_stats
    // -------------------------------------------------------------------------

    /// Flat report of the last run. Pure: calling it twice gives the same map.
    pub fn make_stats(&self) -> BenchmarkResult<StatsReport> {
        let kind = match (&self.kind, self.ran) {
            (Some(kind), true) => kind,
            _ => {
                return Err(BenchmarkError::InvalidState {
                    operation: "make_stats",
                    state: self.state.as_str(),
                })
            }
        };

        let mut report = StatsReport::new();
        report.insert("operation", kind.name());
        report.insert("driver", self.driver.id());
        let timeouts = self.driver.timeouts();
        report.insert("read_timeout", timeouts.read.as_secs_f64());
        report.insert("connect_timeout", timeouts.connect.as_secs_f64());

        match kind {
            BenchmarkKind::Features(_) => {
                for (name, outcome) in &self.probes {
                    report.insert(name.as_str(), outcome.as_str());
                }
                return Ok(report);
            }
            BenchmarkKind::Upload(cfg) => {
                report.insert("bucket_id", self.bucket_id.clone());
                report.insert("bucket_prefix", cfg.bucket.bucket_prefix.clone());
                report.insert("object_size", cfg.object_size);
                report.insert("object_number", cfg.object_number);
                report.insert("object_prefix", cfg.object_prefix.clone());
                report.insert("parallel_objects", cfg.parallel_objects);
                report.insert("multipart_threshold", cfg.upload.multipart_threshold);
                report.insert("multipart_chunksize", cfg.upload.multipart_chunksize);
                report.insert("max_concurrency", cfg.upload.max_concurrency);
            }
            BenchmarkKind::Download(cfg) => {
                echo_fixture(&mut report, &cfg.fixture);
                report.insert("parallel_objects", cfg.parallel_objects);
                report.insert("warmup_sleep", cfg.warmup_sleep.as_secs_f64());
            }
            BenchmarkKind::MultiDownload(cfg) => {
                echo_fixture(&mut report, &cfg.fixture);
                report.insert("multipart_chunksize", cfg.chunk_size);
                let size = cfg.fixture.object_size;
                report.insert("chunk_number", size.div_ceil(cfg.chunk_for(size)));
                report.insert("max_concurrency", cfg.max_concurrency);
                report.insert("warmup_sleep", cfg.warmup_sleep.as_secs_f64());
            }
            BenchmarkKind::Copy(cfg) => {
                echo_fixture(&mut report, &cfg.fixture);
                report.insert("warmup_sleep", cfg.warmup_sleep.as_secs_f64());
            }
            BenchmarkKind::Streaming(cfg) => {
                echo_fixture(&mut report, &cfg.fixture);
                report.insert("warmup_sleep", cfg.warmup_sleep.as_secs_f64());
                report.insert("sleep_time", cfg.sleep_time.as_secs_f64());
                report.insert("delay_time", cfg.delay_time.as_secs_f64());
                report.insert("client_number", cfg.client_number);
                report.insert("process_number", cfg.processes.resolve());
                report.insert("max_concurrency", cfg.max_concurrency);
            }
        }

        let results = &self.results;
        let ops = results.timings.len();
        let test_time = results.test_time();
        let total_size = results.total_bytes();
        let (bw, rate) = throughput(ops, total_size, test_time);
        report.insert("ops", ops);
        report.insert("time", self.total_time);
        report.insert("test_time", test_time);
        report.insert("total_size", total_size);
        report.insert("bw", bw);
        report.insert("rate", rate);
        report.extend(make_aggr(&results.timings, None, None));

        if let BenchmarkKind::Streaming(_) = kind {
            let bws: Vec<f64> = results
                .timings
                .iter()
                .zip(&results.sizes)
                .filter(|(t, _)| **t > 0.0)
                .map(|(t, size)| *size as f64 / t)
                .collect();
            report.extend(make_aggr(&results.timings, Some("time"), None));
            report.extend(make_aggr(&bws, Some("bw"), Some(3)));
        }

        report.extend(error_counts(&results.errors));
        Ok(report)
    }
}

fn echo_fixture(report: &mut StatsReport, cfg: &FixtureConfig) {
    report.insert("bucket_prefix", cfg.bucket.bucket_prefix.clone());
    report.insert("object_size", cfg.object_size);
    report.insert("object_number", cfg.object_number);
    report.insert("object_prefix", cfg.object_prefix.clone());
    report.insert("presigned", i64::from(cfg.presigned));
}

/// Failed join of an operation task, recorded like any failed operation.
fn aborted(err: &JoinError) -> ErrorRecord {
    ErrorRecord::new(ErrorKind::Other, None, format!("operation aborted: {}", err))
}

/// Run `count` operations with at most `workers` in flight, each on its own
/// tokio task. One outcome per operation comes back, in operation order; a
/// task that panicked yields its `JoinError`.
async fn run_bounded<T, F, Fut>(count: usize, workers: usize, op: F) -> Vec<Result<T, JoinError>>
where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let sem = Arc::new(Semaphore::new(workers.max(1)));
    let mut futs = FuturesUnordered::new();
    for index in 0..count {
        let sem = sem.clone();
        let fut = op(index);
        futs.push(async move {
            let handle = tokio::spawn(async move {
                let _permit = sem.acquire_owned().await;
                fut.await
            });
            (index, handle.await)
        });
    }

    let mut slots: Vec<Option<Result<T, JoinError>>> = (0..count).map(|_| None).collect();
    while let Some((index, joined)) = futs.next().await {
        if let Err(e) = &joined {
            warn!("operation {} aborted: {}", index, e);
        }
        slots[index] = Some(joined);
    }
    slots.into_iter().flatten().collect()
}
