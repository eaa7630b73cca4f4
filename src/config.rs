// src/config.rs
//
// Benchmark parameters, driver profiles and the per-kind configuration
// structs validated from them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::constants::{
    default_max_concurrency, CONFIG_FILE_ENV, DEFAULT_BUCKET_NAME_SIZE, DEFAULT_CLIENT_NUMBER,
    DEFAULT_CLIENT_POOL_SIZE, DEFAULT_CONFIG_FILES, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_FIXTURE_MULTIPART_SIZE, DEFAULT_MULTIPART_CHUNKSIZE, DEFAULT_MULTIPART_THRESHOLD,
    DEFAULT_PARALLEL_OBJECTS, DEFAULT_RANGE_CHUNKSIZE, DEFAULT_READ_TIMEOUT,
    DEFAULT_RETRY_ATTEMPTS, MAX_FIXTURE_WORKERS,
};
use crate::driver::UploadOptions;
use crate::errors::{BenchmarkError, BenchmarkResult};

// -----------------------------------------------------------------------------
// Params: open key -> value map
// -----------------------------------------------------------------------------

/// Open benchmark parameter map, merged additively by `merge`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, Value>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Later values win; keys absent from `other` are kept.
    pub fn merge(&mut self, other: Params) {
        self.0.extend(other.0);
    }

    pub fn raw(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Parse `key=value` pairs; values are read as JSON when they parse,
    /// as plain strings otherwise.
    pub fn from_pairs<S: AsRef<str>>(pairs: &[S]) -> BenchmarkResult<Self> {
        let mut params = Params::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| BenchmarkError::invalid_param(pair, "expected key=value"))?;
            let value = serde_json::from_str::<Value>(value)
                .unwrap_or_else(|_| Value::String(value.to_string()));
            params.set(key.trim().replace('-', "_"), value);
        }
        Ok(params)
    }

    /// Load a YAML (or JSON) map of parameters.
    pub fn from_file(path: &Path) -> Result<Self> {
        let buf = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
        serde_yaml::from_slice(&buf).with_context(|| format!("parse {}", path.display()))
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.raw(key)? {
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn get_f64(&self, key: &str) -> BenchmarkResult<Option<f64>> {
        match self.raw(key) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_f64()
                .map(Some)
                .ok_or_else(|| BenchmarkError::invalid_param(key, "not a number")),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|e| BenchmarkError::invalid_param(key, e.to_string())),
            Some(other) => Err(BenchmarkError::invalid_param(key, format!("not a number: {}", other))),
        }
    }

    pub fn get_u64(&self, key: &str) -> BenchmarkResult<Option<u64>> {
        match self.get_f64(key)? {
            None => Ok(None),
            Some(v) if v >= 0.0 && v.fract() == 0.0 => Ok(Some(v as u64)),
            Some(v) => Err(BenchmarkError::invalid_param(
                key,
                format!("expected a non-negative integer, got {}", v),
            )),
        }
    }

    pub fn get_usize(&self, key: &str) -> BenchmarkResult<Option<usize>> {
        Ok(self.get_u64(key)?.map(|v| v as usize))
    }

    pub fn get_bool(&self, key: &str) -> BenchmarkResult<bool> {
        match self.raw(key) {
            None => Ok(false),
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::Number(n)) => Ok(n.as_f64().unwrap_or(0.0) != 0.0),
            Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(true),
                "false" | "no" | "0" | "" => Ok(false),
                _ => Err(BenchmarkError::invalid_param(key, format!("not a boolean: {}", s))),
            },
            Some(other) => Err(BenchmarkError::invalid_param(key, format!("not a boolean: {}", other))),
        }
    }

    /// First key present among `keys`.
    fn first_u64(&self, keys: &[&str]) -> BenchmarkResult<Option<u64>> {
        for key in keys {
            if let Some(v) = self.get_u64(key)? {
                return Ok(Some(v));
            }
        }
        Ok(None)
    }

    fn require_u64(&self, key: &str) -> BenchmarkResult<u64> {
        self.get_u64(key)?
            .ok_or_else(|| BenchmarkError::invalid_param(key, "required"))
    }

    fn seconds(&self, key: &str) -> BenchmarkResult<Duration> {
        match self.get_f64(key)? {
            None => Ok(Duration::ZERO),
            Some(v) => Duration::try_from_secs_f64(v)
                .map_err(|e| BenchmarkError::invalid_param(key, format!("invalid delay {}: {}", v, e))),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Params(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

fn positive(key: &str, value: u64) -> BenchmarkResult<u64> {
    if value == 0 {
        Err(BenchmarkError::invalid_param(key, "must be > 0"))
    } else {
        Ok(value)
    }
}

// -----------------------------------------------------------------------------
// Per-kind configuration
// -----------------------------------------------------------------------------

/// Where the benchmark's bucket comes from and what happens to it afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketConfig {
    /// Reuse this bucket instead of creating one
    pub bucket_id: Option<String>,
    pub bucket_prefix: Option<String>,
    pub bucket_suffix: Option<String>,
    pub bucket_name_size: usize,
    pub storage_class: Option<String>,
    pub keep_objects: bool,
}

impl BucketConfig {
    pub fn from_params(params: &Params) -> BenchmarkResult<Self> {
        Ok(Self {
            bucket_id: params.get_str("bucket_id"),
            bucket_prefix: params.get_str("bucket_prefix"),
            bucket_suffix: params.get_str("bucket_suffix"),
            bucket_name_size: params
                .get_usize("bucket_name_size")?
                .unwrap_or(DEFAULT_BUCKET_NAME_SIZE),
            storage_class: params.get_str("storage_class"),
            keep_objects: params.get_bool("keep_objects")?,
        })
    }
}

/// Objects created during setup for the read-side benchmarks.
#[derive(Debug, Clone, PartialEq)]
pub struct FixtureConfig {
    pub bucket: BucketConfig,
    pub object_size: u64,
    pub object_number: usize,
    pub object_prefix: Option<String>,
    pub presigned: bool,
    /// Concurrent fixture uploads during setup
    pub setup_workers: usize,
    pub upload: UploadOptions,
}

impl FixtureConfig {
    pub fn from_params(params: &Params) -> BenchmarkResult<Self> {
        let bucket = BucketConfig::from_params(params)?;
        // Reused buckets may not need a size; default to zero then
        let object_size = if bucket.bucket_id.is_some() {
            params.get_u64("object_size")?.unwrap_or(0)
        } else {
            params.require_u64("object_size")?
        };
        let object_number = params.get_usize("object_number")?.unwrap_or(1);
        let setup_workers = params
            .get_usize("parallel_objects")?
            .filter(|n| *n > 0)
            .unwrap_or_else(|| num_cpus::get().clamp(1, MAX_FIXTURE_WORKERS));

        let upload = UploadOptions {
            multipart_threshold: params
                .first_u64(&["upload_multipart_threshold", "multipart_threshold"])?
                .unwrap_or(DEFAULT_FIXTURE_MULTIPART_SIZE),
            multipart_chunksize: positive(
                "multipart_chunksize",
                params
                    .first_u64(&["upload_multipart_chunksize", "multipart_chunksize"])?
                    .unwrap_or(DEFAULT_FIXTURE_MULTIPART_SIZE),
            )?,
            max_concurrency: positive(
                "max_concurrency",
                params
                    .first_u64(&["upload_max_concurrency", "max_concurrency"])?
                    .unwrap_or(default_max_concurrency() as u64),
            )? as usize,
            storage_class: bucket.storage_class.clone(),
        };

        Ok(Self {
            bucket,
            object_size,
            object_number,
            object_prefix: params.get_str("object_prefix"),
            presigned: params.get_bool("presigned")?,
            setup_workers,
            upload,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadConfig {
    pub bucket: BucketConfig,
    pub object_size: u64,
    pub object_number: usize,
    pub object_prefix: Option<String>,
    pub parallel_objects: usize,
    pub upload: UploadOptions,
}

impl UploadConfig {
    pub fn from_params(params: &Params) -> BenchmarkResult<Self> {
        let bucket = BucketConfig::from_params(params)?;
        let upload = UploadOptions {
            multipart_threshold: params
                .get_u64("multipart_threshold")?
                .unwrap_or(DEFAULT_MULTIPART_THRESHOLD),
            multipart_chunksize: positive(
                "multipart_chunksize",
                params
                    .get_u64("multipart_chunksize")?
                    .unwrap_or(DEFAULT_MULTIPART_CHUNKSIZE),
            )?,
            max_concurrency: positive(
                "max_concurrency",
                params
                    .get_u64("max_concurrency")?
                    .unwrap_or(default_max_concurrency() as u64),
            )? as usize,
            storage_class: bucket.storage_class.clone(),
        };
        Ok(Self {
            bucket,
            object_size: params.require_u64("object_size")?,
            object_number: params.require_u64("object_number")? as usize,
            object_prefix: params.get_str("object_prefix"),
            parallel_objects: positive(
                "parallel_objects",
                params
                    .get_u64("parallel_objects")?
                    .unwrap_or(DEFAULT_PARALLEL_OBJECTS as u64),
            )? as usize,
            upload,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadConfig {
    pub fixture: FixtureConfig,
    pub warmup_sleep: Duration,
    pub parallel_objects: usize,
}

impl DownloadConfig {
    pub fn from_params(params: &Params) -> BenchmarkResult<Self> {
        Ok(Self {
            fixture: FixtureConfig::from_params(params)?,
            warmup_sleep: params.seconds("warmup_sleep")?,
            parallel_objects: positive(
                "parallel_objects",
                params
                    .get_u64("parallel_objects")?
                    .unwrap_or(DEFAULT_PARALLEL_OBJECTS as u64),
            )? as usize,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiDownloadConfig {
    pub fixture: FixtureConfig,
    pub warmup_sleep: Duration,
    /// Bytes per range request; the object size (capped) when unset
    pub chunk_size: Option<u64>,
    /// Range requests in flight per object
    pub max_concurrency: usize,
}

impl MultiDownloadConfig {
    /// Range size used for an object of `object_size` bytes.
    pub fn chunk_for(&self, object_size: u64) -> u64 {
        self.chunk_size
            .unwrap_or_else(|| object_size.clamp(1, DEFAULT_RANGE_CHUNKSIZE))
    }

    pub fn from_params(params: &Params) -> BenchmarkResult<Self> {
        let fixture = FixtureConfig::from_params(params)?;
        let chunk_size = params
            .get_u64("multipart_chunksize")?
            .map(|c| positive("multipart_chunksize", c))
            .transpose()?;
        Ok(Self {
            warmup_sleep: params.seconds("warmup_sleep")?,
            chunk_size,
            max_concurrency: positive(
                "max_concurrency",
                params
                    .get_u64("max_concurrency")?
                    .unwrap_or(default_max_concurrency() as u64),
            )? as usize,
            fixture,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CopyConfig {
    pub fixture: FixtureConfig,
    pub warmup_sleep: Duration,
}

impl CopyConfig {
    pub fn from_params(params: &Params) -> BenchmarkResult<Self> {
        Ok(Self {
            fixture: FixtureConfig::from_params(params)?,
            warmup_sleep: params.seconds("warmup_sleep")?,
        })
    }
}

/// Number of OS processes hosting streaming clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessScaling {
    Single,
    Auto,
    Manual(usize),
}

impl ProcessScaling {
    fn from_params(params: &Params) -> BenchmarkResult<Self> {
        let key = if params.raw("process_number").is_some() {
            "process_number"
        } else {
            "process_count"
        };
        match params.get_str(key).as_deref() {
            None | Some("1") | Some("single") => Ok(ProcessScaling::Single),
            Some("auto") => Ok(ProcessScaling::Auto),
            Some(_) => match params.get_usize(key)? {
                Some(0) | None => Err(BenchmarkError::invalid_param(key, "must be >= 1")),
                Some(1) => Ok(ProcessScaling::Single),
                Some(n) => Ok(ProcessScaling::Manual(n)),
            },
        }
    }

    /// Resolve the actual number of processes to spawn
    /// For Auto mode, detects physical CPU cores
    pub fn resolve(&self) -> usize {
        match self {
            ProcessScaling::Single => 1,
            ProcessScaling::Auto => num_cpus::get_physical().max(1),
            ProcessScaling::Manual(n) => *n,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamingConfig {
    pub fixture: FixtureConfig,
    pub warmup_sleep: Duration,
    /// Pause before every request of a client
    pub sleep_time: Duration,
    /// Start offset step between consecutive clients
    pub delay_time: Duration,
    pub client_number: usize,
    pub processes: ProcessScaling,
    /// Connection pool size of each client session
    pub max_concurrency: usize,
}

impl StreamingConfig {
    pub fn from_params(params: &Params) -> BenchmarkResult<Self> {
        let client_number = params
            .first_u64(&["client_number", "client_count"])?
            .unwrap_or(DEFAULT_CLIENT_NUMBER as u64);
        Ok(Self {
            fixture: FixtureConfig::from_params(params)?,
            warmup_sleep: params.seconds("warmup_sleep")?,
            sleep_time: params.seconds("sleep_time")?,
            delay_time: params.seconds("delay_time")?,
            client_number: positive("client_number", client_number)? as usize,
            processes: ProcessScaling::from_params(params)?,
            max_concurrency: positive(
                "max_concurrency",
                params
                    .get_u64("max_concurrency")?
                    .unwrap_or(DEFAULT_CLIENT_POOL_SIZE as u64),
            )? as usize,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeaturesConfig {
    pub storage_class: Option<String>,
}

impl FeaturesConfig {
    pub fn from_params(params: &Params) -> BenchmarkResult<Self> {
        Ok(Self {
            storage_class: params.get_str("storage_class"),
        })
    }
}

// -----------------------------------------------------------------------------
// Driver profiles
// -----------------------------------------------------------------------------

/// One named driver profile of the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Registry id of the driver (e.g. "ram", "fs")
    pub driver: String,

    /// Seconds; overridden by the CLI when given
    #[serde(default)]
    pub connect_timeout: Option<f64>,

    #[serde(default)]
    pub read_timeout: Option<f64>,

    /// Attempts per HTTP request
    #[serde(default)]
    pub retry: Option<u32>,

    /// Driver-specific settings (paths, endpoints, credentials...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl DriverConfig {
    pub fn new(driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            connect_timeout: None,
            read_timeout: None,
            retry: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
            .map(Duration::from_secs_f64)
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
            .map(Duration::from_secs_f64)
            .unwrap_or(DEFAULT_READ_TIMEOUT)
    }

    pub fn retry(&self) -> u32 {
        self.retry.unwrap_or(DEFAULT_RETRY_ATTEMPTS).max(1)
    }

    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }
}

/// Candidate configuration files, in lookup order.
fn config_candidates(explicit: Option<&Path>) -> Vec<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
        return vec![PathBuf::from(path)];
    }
    if let Some(path) = explicit {
        return vec![path.to_path_buf()];
    }
    DEFAULT_CONFIG_FILES
        .iter()
        .map(|p| match (p.strip_prefix("~/"), std::env::var("HOME")) {
            (Some(rest), Ok(home)) => Path::new(&home).join(rest),
            _ => PathBuf::from(p),
        })
        .collect()
}

/// Load all driver profiles from the first configuration file found.
pub fn load_driver_profiles(explicit: Option<&Path>) -> Result<BTreeMap<String, DriverConfig>> {
    for path in config_candidates(explicit) {
        let buf = match std::fs::read(&path) {
            Ok(buf) => buf,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config file at {}", path.display());
                continue;
            }
            Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
        };
        info!("Use config file '{}'", path.display());
        let profiles: BTreeMap<String, DriverConfig> =
            serde_yaml::from_slice(&buf).with_context(|| format!("parse {}", path.display()))?;
        if profiles.is_empty() {
            bail!("Configuration file {} is empty", path.display());
        }
        return Ok(profiles);
    }
    bail!("No configuration file found.")
}

/// Pick a profile by name; a lone profile is selected implicitly.
pub fn select_profile(
    mut profiles: BTreeMap<String, DriverConfig>,
    name: Option<&str>,
) -> Result<DriverConfig> {
    match name {
        Some(name) => profiles
            .remove(name)
            .with_context(|| format!("'{}' config not found", name)),
        None if profiles.len() == 1 => {
            let (name, cfg) = profiles.into_iter().next().context("no profile")?;
            debug!("Use the single driver config '{}'", name);
            Ok(cfg)
        }
        None => bail!(
            "Unknown configuration, please specify one in {}",
            profiles.keys().cloned().collect::<Vec<_>>().join(", ")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[&str]) -> Params {
        Params::from_pairs(pairs).unwrap()
    }

    #[test]
    fn test_params_merge_is_additive() {
        let mut p = params(&["object_size=10", "object_number=2"]);
        p.merge(params(&["object_size=20", "presigned=true"]));
        assert_eq!(p.get_u64("object_size").unwrap(), Some(20));
        assert_eq!(p.get_u64("object_number").unwrap(), Some(2));
        assert!(p.get_bool("presigned").unwrap());
    }

    #[test]
    fn test_pairs_parse_json_and_strings() {
        let p = params(&["bucket-prefix=osb-", "sleep_time=0.5", "keep_objects=1"]);
        assert_eq!(p.get_str("bucket_prefix").as_deref(), Some("osb-"));
        assert_eq!(p.get_f64("sleep_time").unwrap(), Some(0.5));
        assert!(p.get_bool("keep_objects").unwrap());
        assert!(Params::from_pairs(&["novalue"]).is_err());
    }

    #[test]
    fn test_invalid_numbers_rejected() {
        let p = params(&["object_size=abc"]);
        assert!(p.get_u64("object_size").is_err());
        let p = params(&["object_size=1.5"]);
        assert!(p.get_u64("object_size").is_err());
    }

    #[test]
    fn test_out_of_range_delays_rejected() {
        for bad in ["warmup_sleep=1e30", "warmup_sleep=-1"] {
            let p = params(&["object_size=1", bad]);
            let err = DownloadConfig::from_params(&p).unwrap_err();
            assert!(matches!(err, BenchmarkError::InvalidParam { ref key, .. } if key == "warmup_sleep"));
        }
        let p = params(&["object_size=1", "sleep_time=1e300"]);
        assert!(StreamingConfig::from_params(&p).is_err());
        let p = params(&["object_size=1", "delay_time=0.25"]);
        let cfg = StreamingConfig::from_params(&p).unwrap();
        assert_eq!(cfg.delay_time, Duration::from_millis(250));
    }

    #[test]
    fn test_upload_config_requires_size_and_number() {
        assert!(UploadConfig::from_params(&params(&["object_number=1"])).is_err());
        let cfg = UploadConfig::from_params(&params(&[
            "object_size=30",
            "object_number=2",
            "multipart_chunksize=10",
            "max_concurrency=2",
        ]))
        .unwrap();
        assert_eq!(cfg.upload.multipart_chunksize, 10);
        assert_eq!(cfg.upload.max_concurrency, 2);
        assert_eq!(cfg.upload.multipart_threshold, DEFAULT_MULTIPART_THRESHOLD);
        assert_eq!(cfg.parallel_objects, 1);
    }

    #[test]
    fn test_zero_chunksize_rejected() {
        let p = params(&["object_size=30", "object_number=1", "multipart_chunksize=0"]);
        assert!(UploadConfig::from_params(&p).is_err());
    }

    #[test]
    fn test_fixture_upload_overrides() {
        let cfg = FixtureConfig::from_params(&params(&[
            "object_size=1",
            "multipart_chunksize=100",
            "upload_multipart_chunksize=50",
        ]))
        .unwrap();
        assert_eq!(cfg.upload.multipart_chunksize, 50);
        assert_eq!(cfg.upload.multipart_threshold, DEFAULT_FIXTURE_MULTIPART_SIZE);
    }

    #[test]
    fn test_multi_download_chunk_defaults_to_object_size() {
        let cfg = MultiDownloadConfig::from_params(&params(&["object_size=1000"])).unwrap();
        assert_eq!(cfg.chunk_size, None);
        assert_eq!(cfg.chunk_for(1000), 1000);
        assert_eq!(cfg.chunk_for(0), 1);
        assert_eq!(cfg.chunk_for(u64::MAX), DEFAULT_RANGE_CHUNKSIZE);

        let cfg = MultiDownloadConfig::from_params(&params(&["object_size=1000", "multipart_chunksize=300"])).unwrap();
        assert_eq!(cfg.chunk_for(1000), 300);
        assert!(MultiDownloadConfig::from_params(&params(&["object_size=1", "multipart_chunksize=0"])).is_err());
    }

    #[test]
    fn test_streaming_config() {
        let cfg = StreamingConfig::from_params(&params(&[
            "object_size=10",
            "client_count=3",
            "delay_time=0.25",
            "process_number=auto",
        ]))
        .unwrap();
        assert_eq!(cfg.client_number, 3);
        assert_eq!(cfg.delay_time, Duration::from_millis(250));
        assert_eq!(cfg.processes, ProcessScaling::Auto);
        assert!(cfg.processes.resolve() >= 1);
        assert_eq!(cfg.max_concurrency, 1);

        let cfg = StreamingConfig::from_params(&params(&["object_size=10", "process_number=4"])).unwrap();
        assert_eq!(cfg.processes.resolve(), 4);
        assert!(StreamingConfig::from_params(&params(&["object_size=10", "process_number=0"])).is_err());
    }

    #[test]
    fn test_driver_profiles_from_yaml() {
        let yaml = r#"
myRam:
  driver: ram
myFs:
  driver: fs
  path: /tmp/osb
  read_timeout: 2.5
"#;
        let profiles: BTreeMap<String, DriverConfig> = serde_yaml::from_str(yaml).unwrap();
        let fs = select_profile(profiles.clone(), Some("myFs")).unwrap();
        assert_eq!(fs.driver, "fs");
        assert_eq!(fs.extra_str("path"), Some("/tmp/osb"));
        assert_eq!(fs.read_timeout(), Duration::from_millis(2500));
        assert_eq!(fs.connect_timeout(), DEFAULT_CONNECT_TIMEOUT);

        assert!(select_profile(profiles.clone(), None).is_err());
        assert!(select_profile(profiles, Some("nope")).is_err());
    }

    #[test]
    fn test_single_profile_selected_implicitly() {
        let mut profiles = BTreeMap::new();
        profiles.insert("only".to_string(), DriverConfig::new("ram"));
        assert_eq!(select_profile(profiles, None).unwrap().driver, "ram");
    }
}
