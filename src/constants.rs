// src/constants.rs
//
// Central location for the defaults used throughout osbench
// This keeps tuning in one place instead of scattered magic numbers

use std::time::Duration;

// =============================================================================
// Multipart Transfer Defaults
// =============================================================================

/// Objects at or above this size are uploaded in parts
/// User can override via params: multipart_threshold
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 64 * 1024 * 1024; // 64 MiB

/// Size of each part of a multipart upload
/// User can override via params: multipart_chunksize
pub const DEFAULT_MULTIPART_CHUNKSIZE: u64 = 8 * 1024 * 1024; // 8 MiB

/// Threshold and chunk size used for fixture uploads during setup
/// User can override via params: upload_multipart_threshold / upload_multipart_chunksize
pub const DEFAULT_FIXTURE_MULTIPART_SIZE: u64 = 128 * 1024 * 1024; // 128 MiB

/// Largest range requested per read by the ranged-download benchmark
/// Objects smaller than this are read in a single range
pub const DEFAULT_RANGE_CHUNKSIZE: u64 = 64 * 1024 * 1024; // 64 MiB

/// Default concurrency limit for part transfers (2 x logical CPUs)
pub fn default_max_concurrency() -> usize {
    num_cpus::get().max(1) * 2
}

// =============================================================================
// Driver / HTTP Defaults
// =============================================================================

/// TCP connect timeout applied by the HTTP client component
/// User can override via CLI: --connect-timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Read timeout applied by the HTTP client component
/// User can override via CLI: --read-timeout
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Attempts per request (first try included)
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Statuses the HTTP client retries on
pub const DEFAULT_RETRY_STATUSES: [u16; 6] = [408, 413, 429, 500, 503, 504];

/// Body read granularity when draining downloads
pub const DOWNLOAD_BLOCK_SIZE: usize = 64 * 1024;

// =============================================================================
// Benchmark Defaults
// =============================================================================

/// Length of generated bucket names
pub const DEFAULT_BUCKET_NAME_SIZE: usize = 30;

/// Length of generated object names
pub const DEFAULT_OBJECT_NAME_SIZE: usize = 30;

/// Concurrent object transfers when parallel_objects is unset
pub const DEFAULT_PARALLEL_OBJECTS: usize = 1;

/// Upper bound on fixture upload workers during setup
pub const MAX_FIXTURE_WORKERS: usize = 64;

/// Streaming clients per process when client_number is unset
pub const DEFAULT_CLIENT_NUMBER: usize = 1;

/// Connections per streaming client session
pub const DEFAULT_CLIENT_POOL_SIZE: usize = 1;

/// Metrics rendered as text use this many decimals
pub const REPORT_FLOAT_PRECISION: usize = 6;

/// Sub-command used for fan-out child processes
pub const INTERNAL_WORKER_COMMAND: &str = "internal-worker";

/// Environment variable pointing at the driver configuration file
pub const CONFIG_FILE_ENV: &str = "OSB_CONFIG_FILE";

/// Configuration files tried in order when no path is given
pub const DEFAULT_CONFIG_FILES: [&str; 2] = ["~/.osb.yml", "/etc/osb.yml"];
