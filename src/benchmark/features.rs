// src/benchmark/features.rs
//
// Feature probes: each probe sets up its own bucket, exercises one optional
// driver capability and tears the bucket down again.

use std::collections::BTreeMap;

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use crate::config::FeaturesConfig;
use crate::constants::{DEFAULT_BUCKET_NAME_SIZE, DEFAULT_OBJECT_NAME_SIZE};
use crate::data_gen::{random_content, random_name};
use crate::driver::{Driver, UploadOptions};
use crate::errors::{DriverError, DriverResult};

/// Probe names, in report order.
pub const PROBES: [&str; 7] = [
    "delete_objects",
    "copy_object",
    "get_torrent",
    "put_object_tag",
    "lock_object",
    "cors",
    "put_bucket_tag",
];

const PROBE_OBJECT_SIZE: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ok,
    /// The driver reported the feature as unsupported
    Nok,
    Error,
}

impl ProbeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeOutcome::Ok => "ok",
            ProbeOutcome::Nok => "nok",
            ProbeOutcome::Error => "error",
        }
    }
}

pub async fn run_probes(driver: &dyn Driver, cfg: &FeaturesConfig) -> Vec<(String, ProbeOutcome)> {
    let mut outcomes = Vec::with_capacity(PROBES.len());
    for probe in PROBES {
        info!("Run {}", probe);
        let outcome = run_probe(driver, probe, cfg).await;
        outcomes.push((probe.to_string(), outcome));
    }
    outcomes
}

async fn run_probe(driver: &dyn Driver, probe: &str, cfg: &FeaturesConfig) -> ProbeOutcome {
    let bucket_name = random_name(DEFAULT_BUCKET_NAME_SIZE, Some("osb-feature-"), None);
    let bucket = match driver
        .create_bucket(&bucket_name, cfg.storage_class.as_deref())
        .await
    {
        Ok(b) => b,
        Err(e) => {
            error!("{}: cannot create probe bucket: {}", probe, e);
            return ProbeOutcome::Error;
        }
    };

    let outcome = match exercise(driver, probe, &bucket.id).await {
        Ok(()) => ProbeOutcome::Ok,
        Err(DriverError::FeatureUnsupported(msg)) => {
            info!("DriverFeatureUnsupported: {}", msg);
            ProbeOutcome::Nok
        }
        Err(e) => {
            error!("{}: {}", probe, e);
            ProbeOutcome::Error
        }
    };

    if let Err(e) = driver.clean_bucket(&bucket.id).await {
        warn!("{}: cannot remove probe bucket {}: {}", probe, bucket.id, e);
    }
    debug!(probe, outcome = outcome.as_str(), "probe done");
    outcome
}

async fn put_object(driver: &dyn Driver, bucket_id: &str) -> DriverResult<String> {
    let name = random_name(DEFAULT_OBJECT_NAME_SIZE, None, None);
    let content: Bytes = random_content(PROBE_OBJECT_SIZE);
    driver
        .upload(bucket_id, &name, content, &UploadOptions::default())
        .await?;
    Ok(name)
}

fn probe_tags() -> BTreeMap<String, String> {
    BTreeMap::from([("osb-probe".to_string(), "true".to_string())])
}

async fn exercise(driver: &dyn Driver, probe: &str, bucket_id: &str) -> DriverResult<()> {
    match probe {
        "delete_objects" => {
            let names = vec![put_object(driver, bucket_id).await?, put_object(driver, bucket_id).await?];
            driver.delete_objects(bucket_id, &names).await?;
            for name in &names {
                if driver.object_exists(bucket_id, name).await? {
                    return Err(DriverError::Server(format!("{} survived delete_objects", name)));
                }
            }
            Ok(())
        }
        "copy_object" => {
            let name = put_object(driver, bucket_id).await?;
            let copy = format!("{}-copy", name);
            driver.copy_object(bucket_id, &name, bucket_id, &copy).await?;
            if driver.object_exists(bucket_id, &copy).await? {
                Ok(())
            } else {
                Err(DriverError::ObjectUnfound(copy))
            }
        }
        "get_torrent" => {
            let name = put_object(driver, bucket_id).await?;
            driver.get_object_torrent(bucket_id, &name).await.map(|_| ())
        }
        "put_object_tag" => {
            let name = put_object(driver, bucket_id).await?;
            driver.put_object_tags(bucket_id, &name, &probe_tags()).await
        }
        "lock_object" => {
            let name = put_object(driver, bucket_id).await?;
            driver.put_object_lock(bucket_id, &name).await
        }
        "cors" => driver.put_bucket_cors(bucket_id, &["*".to_string()]).await,
        "put_bucket_tag" => driver.put_bucket_tags(bucket_id, &probe_tags()).await,
        other => Err(DriverError::Config(format!("unknown probe '{}'", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriverConfig;
    use crate::driver::ram::RamDriver;

    #[tokio::test]
    async fn test_ram_probes() {
        let driver = RamDriver::new(DriverConfig::new("ram"));
        let cfg = FeaturesConfig { storage_class: None };
        let outcomes: BTreeMap<String, ProbeOutcome> =
            run_probes(&driver, &cfg).await.into_iter().collect();

        assert_eq!(outcomes.len(), PROBES.len());
        assert_eq!(outcomes["delete_objects"], ProbeOutcome::Ok);
        assert_eq!(outcomes["copy_object"], ProbeOutcome::Ok);
        assert_eq!(outcomes["put_object_tag"], ProbeOutcome::Ok);
        assert_eq!(outcomes["cors"], ProbeOutcome::Ok);
        assert_eq!(outcomes["put_bucket_tag"], ProbeOutcome::Ok);
        assert_eq!(outcomes["get_torrent"], ProbeOutcome::Nok);
        assert_eq!(outcomes["lock_object"], ProbeOutcome::Nok);

        // Every probe removed its bucket
        assert!(driver.list_buckets().await.unwrap().is_empty());
    }
}
