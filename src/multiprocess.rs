// src/multiprocess.rs
//
// Multi-process execution for streaming clients
// Spawns N child processes, each running the same client plan against its
// own driver instance, and merges their results

use std::path::Path;
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::DriverConfig;
use crate::constants::INTERNAL_WORKER_COMMAND;
use crate::driver::DriverRegistry;
use crate::engine::{run_clients, ClientPlan, RunResults};

/// Everything a child process needs to run its clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerPlan {
    pub worker_id: usize,
    pub driver: DriverConfig,
    pub clients: ClientPlan,
}

/// The single JSON line a child writes to stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerOutcome {
    pub worker_id: usize,
    pub results: RunResults,
}

/// Execute the plan in `process_count` copies of the current executable
/// Returns merged results from all processes
pub async fn run_fanout(plan: &WorkerPlan, process_count: usize) -> Result<RunResults> {
    if process_count <= 1 {
        // Single process mode - run the clients here
        return Ok(run_plan(plan).await?.results);
    }
    let exe = std::env::current_exe().context("Failed to locate current executable")?;
    run_fanout_with(&exe, plan, process_count).await
}

/// Same as `run_fanout`, with an explicit worker executable.
pub async fn run_fanout_with(exe: &Path, plan: &WorkerPlan, process_count: usize) -> Result<RunResults> {
    info!("Starting multi-process execution: {} processes", process_count);

    let mut children = Vec::with_capacity(process_count);
    for proc_id in 0..process_count {
        debug!("Spawning child process {}/{}", proc_id + 1, process_count);

        let mut child_plan = plan.clone();
        child_plan.worker_id = proc_id;
        let child_plan_json =
            serde_json::to_string(&child_plan).context("Failed to serialize worker plan")?;

        let mut child = Command::new(exe)
            .arg(INTERNAL_WORKER_COMMAND)
            .stdin(Stdio::piped()) // Plan JSON goes here
            .stdout(Stdio::piped()) // Outcome JSON comes back
            .stderr(Stdio::inherit()) // Child logs go to parent stderr
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn child process {}", proc_id))?;

        let mut stdin = child
            .stdin
            .take()
            .context("Failed to capture child stdin")?;
        stdin
            .write_all(child_plan_json.as_bytes())
            .await
            .context("Failed to write plan to child stdin")?;
        stdin.shutdown().await?;
        drop(stdin); // EOF tells the child the plan is complete

        children.push((proc_id, child));
    }

    let mut merged = RunResults::default();
    for (proc_id, mut child) in children {
        debug!("Waiting for child process {}", proc_id);

        let stdout = child
            .stdout
            .take()
            .context("Failed to capture child stdout")?;
        let mut lines = BufReader::new(stdout).lines();
        let mut json_line = None;
        while let Some(line) = lines
            .next_line()
            .await
            .context("Failed to read from child stdout")?
        {
            if line.starts_with('{') {
                json_line = Some(line);
                break;
            }
        }

        let status = child
            .wait()
            .await
            .with_context(|| format!("Failed to wait for child {}", proc_id))?;
        if !status.success() {
            bail!("Child process {} exited with status: {:?}", proc_id, status);
        }
        let Some(json_line) = json_line else {
            bail!("Child process {} produced no JSON output", proc_id);
        };

        let outcome: WorkerOutcome = serde_json::from_str(&json_line)
            .with_context(|| format!("Failed to parse JSON from child {}", proc_id))?;
        debug!(
            "Child process {} completed: {} ok, {} errors",
            proc_id,
            outcome.results.timings.len(),
            outcome.results.errors.len()
        );
        merged.merge(outcome.results);
    }

    info!("All child processes completed, merged {} operations", merged.attempted());
    Ok(merged)
}

async fn run_plan(plan: &WorkerPlan) -> Result<WorkerOutcome> {
    let driver = DriverRegistry::default()
        .build(&plan.driver)
        .context("Failed to build driver in worker")?;
    driver.setup().await.context("Driver setup failed in worker")?;
    let results = run_clients(driver.as_ref(), &plan.clients).await;
    Ok(WorkerOutcome {
        worker_id: plan.worker_id,
        results,
    })
}

/// Internal worker mode - run the plan and output one JSON line to stdout
pub async fn run_internal_worker(plan_json: &str) -> Result<()> {
    let plan: WorkerPlan =
        serde_json::from_str(plan_json).context("Failed to parse worker plan from stdin")?;
    info!("Worker {} running {} clients", plan.worker_id, plan.clients.client_count);

    let outcome = run_plan(&plan).await?;

    // Output JSON to stdout (parent reads this)
    let json = serde_json::to_string(&outcome).context("Failed to serialize worker outcome")?;
    println!("{}", json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ErrorKind, ErrorRecord};
    use std::time::Duration;

    fn plan(urls: Vec<String>) -> WorkerPlan {
        WorkerPlan {
            worker_id: 0,
            driver: DriverConfig::new("ram"),
            clients: ClientPlan {
                urls,
                client_count: 2,
                sleep_time: Duration::ZERO,
                delay_time: Duration::from_millis(1),
                max_concurrency: 1,
            },
        }
    }

    #[test]
    fn test_plan_roundtrips_through_json() {
        let p = plan(vec!["ram://b/o".into()]);
        let json = serde_json::to_string(&p).unwrap();
        let back: WorkerPlan = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn test_outcome_is_a_single_line() {
        let mut results = RunResults::default();
        results.push_ok(Duration::from_millis(5), 10);
        results.push_err(ErrorRecord::new(ErrorKind::InvalidHttpCode, Some(404), "nope"));
        let json = serde_json::to_string(&WorkerOutcome { worker_id: 3, results }).unwrap();
        assert!(json.starts_with('{'));
        assert!(!json.contains('\n'));
    }

    #[tokio::test]
    async fn test_single_process_runs_in_place() {
        // A fresh ram driver has no buckets, so every request fails
        let results = run_fanout(&plan(vec!["ram://b/o".into()]), 1).await.unwrap();
        assert_eq!(results.errors.len(), 2);
        assert_eq!(results.errors[0].kind, ErrorKind::BucketUnfound);
    }

    #[tokio::test]
    async fn test_missing_executable_is_an_error() {
        let err = run_fanout_with(Path::new("/nonexistent/osbench"), &plan(vec![]), 2)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to spawn child process 0"));
    }
}
