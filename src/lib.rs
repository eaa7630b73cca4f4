// src/lib.rs

pub mod benchmark;
pub mod config;
pub mod constants;
pub mod data_gen;
pub mod driver;
pub mod engine;
pub mod errors;
pub mod http;
pub mod multipart;
pub mod multiprocess;
pub mod stats;

pub use benchmark::{Benchmark, BenchmarkKind};
pub use errors::{BenchmarkError, DriverError, ErrorKind, ErrorRecord};
pub use stats::StatsReport;
