// src/main.rs
//
// -----------------------------------------------------------------------------
// osbench - object-storage benchmark CLI
// -----------------------------------------------------------------------------

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::io::AsyncReadExt;
use tokio::runtime::Builder as RtBuilder;
use tracing::{debug, info};

use osbench::benchmark::Benchmark;
use osbench::config::{load_driver_profiles, select_profile, DriverConfig, Params};
use osbench::constants::{DEFAULT_BUCKET_NAME_SIZE, DEFAULT_OBJECT_NAME_SIZE};
use osbench::data_gen::{random_content, random_name};
use osbench::driver::{Driver, DriverRegistry, UploadOptions};
use osbench::multiprocess::run_internal_worker;
use osbench::stats::StatsReport;

// -----------------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------------
#[derive(Parser)]
#[command(name = "osbench", version, about = "Time object-storage operations against a pluggable driver")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (-v for info, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Driver configuration file (default: $OSB_CONFIG_FILE, ~/.osb.yml, /etc/osb.yml)
    #[arg(long, global = true)]
    config_file: Option<PathBuf>,

    /// Driver configuration as inline JSON, bypasses the config file
    #[arg(long, global = true)]
    config_raw: Option<String>,

    /// Profile to use from the configuration file
    #[arg(long, global = true)]
    config_name: Option<String>,

    /// Connect timeout in seconds
    #[arg(short = 'C', long, global = true)]
    connect_timeout: Option<f64>,

    /// Read timeout in seconds
    #[arg(short = 'R', long, global = true)]
    read_timeout: Option<f64>,

    /// Print reports as JSON instead of tab-separated lines
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Args, Clone)]
struct BenchArgs {
    /// Benchmark parameter as key=value, repeatable
    ///
    /// Examples:
    ///   -p object_size=1048576 -p object_number=10
    ///   -p bucket_id=existing-bucket -p keep_objects=true
    #[arg(short = 'p', long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,

    /// YAML or JSON file of parameters, merged before --param values
    #[arg(long)]
    params_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List buckets
    ListBuckets,
    /// Create a bucket (random name when omitted)
    CreateBucket {
        name: Option<String>,
        #[arg(long)]
        storage_class: Option<String>,
    },
    /// Delete an empty bucket
    DeleteBucket { bucket_id: String },
    /// List the objects of a bucket
    ListObjects { bucket_id: String },
    /// Delete every object of a bucket, then the bucket
    CleanBucket { bucket_id: String },
    /// Upload one random object and print its URL
    Upload {
        bucket_id: String,
        #[arg(long, default_value_t = 1024)]
        object_size: u64,
        #[arg(long)]
        name: Option<String>,
    },
    /// Time object uploads
    TimeUpload(BenchArgs),
    /// Time whole-object downloads
    TimeDownload(BenchArgs),
    /// Time ranged downloads with concurrent ranges per object
    TimeMultiDownload(BenchArgs),
    /// Time server-side copies
    TimeCopy(BenchArgs),
    /// Time paced, staggered streaming clients
    TimeStreaming(BenchArgs),
    /// Probe optional driver features
    Features(BenchArgs),
    /// Child process of a fan-out run: plan on stdin, outcome on stdout
    #[command(hide = true)]
    InternalWorker,
}

// -----------------------------------------------------------------------------
// main
// -----------------------------------------------------------------------------
fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // -v (1): info, -vv (2): debug, -vvv (3+): trace; RUST_LOG wins when set
    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("osbench={}", level)));
    // Logs go to stderr; stdout carries reports and worker JSON
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let rt = RtBuilder::new_multi_thread().enable_all().build()?;
    rt.block_on(dispatch(cli))
}

async fn dispatch(cli: Cli) -> Result<()> {
    if let Commands::InternalWorker = cli.command {
        let mut plan_json = String::new();
        tokio::io::stdin()
            .read_to_string(&mut plan_json)
            .await
            .context("Failed to read worker plan from stdin")?;
        return run_internal_worker(&plan_json).await;
    }

    let driver_config = load_driver_config(&cli)?;
    let driver = DriverRegistry::default()
        .build(&driver_config)
        .context("Failed to build driver")?;
    driver.setup().await.context("Driver setup failed")?;
    debug!("Driver '{}' ready", driver.id());

    match cli.command {
        Commands::ListBuckets => {
            for bucket in driver.list_buckets().await? {
                println!("{}", bucket.id);
            }
        }
        Commands::CreateBucket { name, storage_class } => {
            let name = name.unwrap_or_else(|| random_name(DEFAULT_BUCKET_NAME_SIZE, None, None));
            let bucket = driver.create_bucket(&name, storage_class.as_deref()).await?;
            println!("{}", bucket.id);
        }
        Commands::DeleteBucket { bucket_id } => driver.delete_bucket(&bucket_id).await?,
        Commands::ListObjects { bucket_id } => {
            for object in driver.list_objects(&bucket_id).await? {
                println!("{}\t{}", object.name, object.size);
            }
        }
        Commands::CleanBucket { bucket_id } => {
            driver.clean_bucket(&bucket_id).await?;
            info!("Bucket {} removed", bucket_id);
        }
        Commands::Upload {
            bucket_id,
            object_size,
            name,
        } => {
            let name = name.unwrap_or_else(|| random_name(DEFAULT_OBJECT_NAME_SIZE, None, None));
            let object = driver
                .upload(&bucket_id, &name, random_content(object_size), &UploadOptions::default())
                .await?;
            println!("{}", driver.get_url(&object.bucket, &object.name, false).await?);
        }
        Commands::TimeUpload(args) => run_benchmark("upload", driver, &args, cli.json).await?,
        Commands::TimeDownload(args) => run_benchmark("download", driver, &args, cli.json).await?,
        Commands::TimeMultiDownload(args) => {
            run_benchmark("multi_download", driver, &args, cli.json).await?
        }
        Commands::TimeCopy(args) => run_benchmark("copy", driver, &args, cli.json).await?,
        Commands::TimeStreaming(args) => run_benchmark("streaming", driver, &args, cli.json).await?,
        Commands::Features(args) => run_benchmark("features", driver, &args, cli.json).await?,
        // Served before the driver is built
        Commands::InternalWorker => {}
    }
    Ok(())
}

// -----------------------------------------------------------------------------
// Helpers
// -----------------------------------------------------------------------------
fn load_driver_config(cli: &Cli) -> Result<DriverConfig> {
    let mut cfg: DriverConfig = match &cli.config_raw {
        Some(raw) => serde_json::from_str(raw).context("Invalid --config-raw JSON")?,
        None => select_profile(
            load_driver_profiles(cli.config_file.as_deref())?,
            cli.config_name.as_deref(),
        )?,
    };
    if cli.connect_timeout.is_some() {
        cfg.connect_timeout = cli.connect_timeout;
    }
    if cli.read_timeout.is_some() {
        cfg.read_timeout = cli.read_timeout;
    }
    Ok(cfg)
}

async fn run_benchmark(name: &str, driver: Arc<dyn Driver>, args: &BenchArgs, json: bool) -> Result<()> {
    let mut params = match &args.params_file {
        Some(path) => Params::from_file(path)?,
        None => Params::new(),
    };
    params.merge(Params::from_pairs(&args.params)?);

    let mut bench = Benchmark::new(name, driver)?;
    bench.set_params(params)?;
    bench.setup().await.context("Benchmark setup failed")?;

    // Fixtures are released even when the run itself fails
    let run = bench.run().await;
    bench.tear_down().await?;
    run.context("Benchmark run failed")?;

    print_report(&bench.make_stats()?, json)
}

fn print_report(stats: &StatsReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(stats)?);
    } else {
        print!("{}", stats.to_tsv());
    }
    Ok(())
}
