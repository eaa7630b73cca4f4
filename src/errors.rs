// src/errors.rs
//
// Error taxonomy shared by drivers, the transfer layers and the benchmark
// lifecycle. Driver errors are typed so that the run loop can classify them;
// application plumbing (CLI, child processes) uses anyhow on top.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("connection timeout: {0}")]
    ConnectionTimeout(String),

    #[error("read timeout: {0}")]
    ReadTimeout(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("object ACL error: {0}")]
    ObjectAcl(String),

    #[error("bucket not found: {0}")]
    BucketUnfound(String),

    #[error("object not found: {0}")]
    ObjectUnfound(String),

    #[error("bucket not empty: {0}")]
    NonEmptyBucket(String),

    #[error("feature unsupported: {0}")]
    FeatureUnsupported(String),

    #[error("client capacity exhausted: {0}")]
    ClientCapacity(String),

    #[error("invalid HTTP code {status}: {detail}")]
    InvalidHttpCode { status: u16, detail: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("driver configuration error: {0}")]
    Config(String),
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

impl DriverError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DriverError::Connection(_) => ErrorKind::Connection,
            DriverError::ConnectionTimeout(_) => ErrorKind::ConnectionTimeout,
            DriverError::ReadTimeout(_) => ErrorKind::ReadTimeout,
            DriverError::Authentication(_) => ErrorKind::Authentication,
            DriverError::Permission(_) => ErrorKind::Permission,
            DriverError::Server(_) => ErrorKind::Server,
            DriverError::RateLimit(_) => ErrorKind::RateLimit,
            DriverError::ObjectAcl(_) => ErrorKind::ObjectAcl,
            DriverError::BucketUnfound(_) => ErrorKind::BucketUnfound,
            DriverError::ObjectUnfound(_) => ErrorKind::ObjectUnfound,
            DriverError::NonEmptyBucket(_) => ErrorKind::NonEmptyBucket,
            DriverError::FeatureUnsupported(_) => ErrorKind::FeatureUnsupported,
            DriverError::ClientCapacity(_) => ErrorKind::ClientCapacity,
            DriverError::InvalidHttpCode { .. } => ErrorKind::InvalidHttpCode,
            DriverError::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorKind::ObjectUnfound,
                std::io::ErrorKind::PermissionDenied => ErrorKind::Permission,
                std::io::ErrorKind::TimedOut => ErrorKind::ReadTimeout,
                std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted => ErrorKind::Connection,
                _ => ErrorKind::Other,
            },
            DriverError::Config(_) => ErrorKind::Other,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            DriverError::InvalidHttpCode { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Map an HTTP status to the closest error class.
    ///
    /// Statuses without a dedicated class stay as `InvalidHttpCode` so the
    /// report can break them down by number.
    pub fn from_status(status: u16, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match status {
            401 => DriverError::Authentication(detail),
            403 => DriverError::Permission(detail),
            429 => DriverError::RateLimit(detail),
            _ => DriverError::InvalidHttpCode { status, detail },
        }
    }
}

/// Payload-free classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    ConnectionTimeout,
    ReadTimeout,
    Authentication,
    Permission,
    Server,
    RateLimit,
    ObjectAcl,
    BucketUnfound,
    ObjectUnfound,
    NonEmptyBucket,
    FeatureUnsupported,
    ClientCapacity,
    InvalidHttpCode,
    Other,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::ConnectionTimeout | ErrorKind::ReadTimeout => "timeout",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Permission => "permission",
            ErrorKind::Server => "server",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::ObjectAcl => "object_acl",
            ErrorKind::BucketUnfound => "bucket_unfound",
            ErrorKind::ObjectUnfound => "object_unfound",
            ErrorKind::NonEmptyBucket => "non_empty_bucket",
            ErrorKind::FeatureUnsupported => "feature_unsupported",
            ErrorKind::ClientCapacity => "client_capacity",
            ErrorKind::InvalidHttpCode => "http_status",
            ErrorKind::Other => "other",
        }
    }
}

/// One failed operation, as kept in the run results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub status: Option<u16>,
    pub detail: String,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, status: Option<u16>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            detail: detail.into(),
        }
    }

    /// Key used for the `error_count_<class>` metrics.
    ///
    /// HTTP status errors are keyed by their number (`error_count_404`),
    /// 5xx statuses fold into `server`.
    pub fn class_key(&self) -> String {
        match (self.kind, self.status) {
            (ErrorKind::InvalidHttpCode, Some(s)) if (500..600).contains(&s) => {
                ErrorKind::Server.as_str().to_string()
            }
            (ErrorKind::InvalidHttpCode, Some(s)) => s.to_string(),
            (kind, _) => kind.as_str().to_string(),
        }
    }
}

impl From<&DriverError> for ErrorRecord {
    fn from(err: &DriverError) -> Self {
        ErrorRecord::new(err.kind(), err.status(), err.to_string())
    }
}

/// Lifecycle-level errors surfaced to the caller of a benchmark.
#[derive(Error, Debug)]
pub enum BenchmarkError {
    #[error("invalid lifecycle state: cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("invalid parameter '{key}': {reason}")]
    InvalidParam { key: String, reason: String },

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("worker failed: {0}")]
    Worker(String),
}

impl BenchmarkError {
    pub fn invalid_param(key: &str, reason: impl Into<String>) -> Self {
        BenchmarkError::InvalidParam {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

pub type BenchmarkResult<T> = std::result::Result<T, BenchmarkError>;
