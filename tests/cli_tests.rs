// tests/cli_tests.rs
//
// End-to-end runs of the osbench binary against the filesystem driver,
// including the multi-process streaming path.

use std::path::Path;
use std::process::{Command, Output};
use std::time::Duration;

use serde_json::Value;
use tempfile::TempDir;

use osbench::config::DriverConfig;
use osbench::driver::fs::FsDriver;
use osbench::driver::{Driver, UploadOptions};
use osbench::engine::ClientPlan;
use osbench::multiprocess::{run_fanout_with, WorkerPlan};

const BIN: &str = env!("CARGO_BIN_EXE_osbench");

fn fs_config(root: &Path) -> String {
    serde_json::json!({ "driver": "fs", "path": root.to_string_lossy() }).to_string()
}

fn osbench(root: &Path, args: &[&str]) -> Output {
    Command::new(BIN)
        .arg("--config-raw")
        .arg(fs_config(root))
        .args(args)
        .output()
        .expect("failed to run osbench")
}

fn json_report(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "osbench failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("report is not JSON")
}

#[test]
fn test_time_upload_json_report() {
    let root = TempDir::new().unwrap();
    let output = osbench(
        root.path(),
        &["--json", "time-upload", "-p", "object_size=128", "-p", "object_number=3"],
    );
    let report = json_report(&output);
    assert_eq!(report["operation"], "upload");
    assert_eq!(report["driver"], "fs");
    assert_eq!(report["ops"], 3);
    assert_eq!(report["errors"], 0);
    assert_eq!(report["total_size"], 384);

    // Fixtures were torn down
    let output = osbench(root.path(), &["list-buckets"]);
    assert!(output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn test_time_download_tsv_report() {
    let root = TempDir::new().unwrap();
    let output = osbench(
        root.path(),
        &["time-download", "-p", "object_size=64", "-p", "object_number=2"],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.lines().any(|l| l == "operation\t\tdownload"), "{}", stdout);
    assert!(stdout.lines().any(|l| l == "ops\t\t2"), "{}", stdout);
}

#[test]
fn test_bucket_commands() {
    let root = TempDir::new().unwrap();
    let output = osbench(root.path(), &["create-bucket", "mybucket"]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "mybucket");

    let output = osbench(root.path(), &["upload", "mybucket", "--object-size", "10", "--name", "obj"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("file://"));

    let output = osbench(root.path(), &["list-objects", "mybucket"]);
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "obj\t10");

    // Non-empty bucket cannot be deleted, clean-bucket removes it all
    assert!(!osbench(root.path(), &["delete-bucket", "mybucket"]).status.success());
    assert!(osbench(root.path(), &["clean-bucket", "mybucket"]).status.success());
    assert!(!root.path().join("mybucket").exists());
}

#[test]
fn test_invalid_param_fails_before_run() {
    let root = TempDir::new().unwrap();
    let output = osbench(root.path(), &["time-upload", "-p", "object_number=2"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("object_size"));
}

#[test]
fn test_streaming_across_processes() {
    let root = TempDir::new().unwrap();
    let output = osbench(
        root.path(),
        &[
            "--json",
            "time-streaming",
            "-p",
            "object_size=32",
            "-p",
            "object_number=2",
            "-p",
            "client_number=2",
            "-p",
            "process_number=2",
        ],
    );
    let report = json_report(&output);
    assert_eq!(report["process_number"], 2);
    // Each process runs every client over every object
    assert_eq!(report["ops"], 8);
    assert_eq!(report["errors"], 0);
    assert!(report.get("bw_avg").is_some());
}

#[tokio::test]
async fn test_fanout_merges_worker_results() {
    let root = TempDir::new().unwrap();
    let config: DriverConfig = serde_json::from_str(&fs_config(root.path())).unwrap();
    let driver = FsDriver::new(config.clone()).unwrap();
    driver.setup().await.unwrap();
    driver.create_bucket("media", None).await.unwrap();
    driver
        .upload("media", "clip", bytes::Bytes::from(vec![7u8; 100]), &UploadOptions::default())
        .await
        .unwrap();
    let good = driver.get_url("media", "clip", false).await.unwrap();
    let missing = driver.get_url("media", "nope", false).await.unwrap();

    let plan = WorkerPlan {
        worker_id: 0,
        driver: config,
        clients: ClientPlan {
            urls: vec![good, missing],
            client_count: 1,
            sleep_time: Duration::ZERO,
            delay_time: Duration::ZERO,
            max_concurrency: 1,
        },
    };
    let results = run_fanout_with(Path::new(BIN), &plan, 3).await.unwrap();
    assert_eq!(results.timings.len(), 3);
    assert_eq!(results.total_bytes(), 300);
    assert_eq!(results.errors.len(), 3);
}
