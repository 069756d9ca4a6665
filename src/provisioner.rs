//! Bucket creation and the upload of the data file into each new bucket.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use tracing::{error, info};

use crate::config::{Config, FailurePolicy, MAX_BUCKET_COUNT};
use crate::error::{Error, Result};
use crate::naming;
use crate::s3_service::ObjectStore;

/// The file uploaded into every bucket, keyed by its base name.
#[derive(Debug, Clone)]
pub struct Payload {
    pub key: String,
    pub body: Bytes,
}

impl Payload {
    pub async fn load(path: &Path) -> Result<Self> {
        let key = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                Error::config(format!("data file {} has no usable base name", path.display()))
            })?
            .to_owned();
        let body = tokio::fs::read(path).await.map_err(|source| Error::DataFile {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { key, body: Bytes::from(body) })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketOutcome {
    pub name: String,
    pub created: bool,
    pub uploaded: bool,
    pub error: Option<String>,
}

impl BucketOutcome {
    fn new(name: String) -> Self {
        Self { name, created: false, uploaded: false, error: None }
    }

    pub fn succeeded(&self) -> bool {
        self.created && self.uploaded
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    /// one entry per requested bucket, in request order
    pub outcomes: Vec<BucketOutcome>,
    /// key of the uploaded object, `None` when nothing was requested
    pub object_key: Option<String>,
}

impl ProvisionReport {
    /// Names of the buckets that exist after the run.
    pub fn names(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|o| o.created)
            .map(|o| o.name.clone())
            .collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = &BucketOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded())
    }

    pub fn is_complete(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Create one bucket, in the default region when `region` is `None`.
pub async fn create_bucket(store: &dyn ObjectStore, name: &str, region: Option<&str>) -> Result<()> {
    store.create_bucket(name, region).await?;
    match region {
        None => info!("bucket {name} has been created in the default region"),
        Some(region) => info!("bucket {name} has been created in region {region}"),
    }
    Ok(())
}

/// Upload the payload into `bucket` under the payload's key.
pub async fn upload_file(store: &dyn ObjectStore, bucket: &str, payload: &Payload) -> Result<()> {
    store.put_object(bucket, &payload.key, payload.body.clone()).await?;
    info!("data file {} has been uploaded into bucket {bucket}", payload.key);
    Ok(())
}

// record a failed step; the error is handed back only when the run must stop
fn handle_failure(
    policy: FailurePolicy,
    outcome: &mut BucketOutcome,
    step: &str,
    err: Error,
) -> Option<Error> {
    error!("{step} for bucket {} failed: {err}", outcome.name);
    outcome.error = Some(err.to_string());
    policy.is_fail_fast().then_some(err)
}

async fn provision_one(
    store: &dyn ObjectStore,
    config: &Config,
    payload: &Payload,
    name: String,
) -> (BucketOutcome, Option<Error>) {
    let mut outcome = BucketOutcome::new(name);

    if let Err(err) = create_bucket(store, &outcome.name, config.region.as_deref()).await {
        let stop = handle_failure(config.storage_policy, &mut outcome, "create", err);
        return (outcome, stop);
    }
    outcome.created = true;

    let stop = match upload_file(store, &outcome.name, payload).await {
        Ok(()) => {
            outcome.uploaded = true;
            None
        }
        Err(err) => handle_failure(config.storage_policy, &mut outcome, "upload", err),
    };
    (outcome, stop)
}

/// Provision the given buckets: create each one and upload the data file into it.
///
/// The data file is read before the first bucket is created, so a missing file
/// aborts the run without leaving empty buckets behind.
///
/// Under fail-fast no new bucket is started after the first failure; buckets
/// already in flight finish, and the names of every bucket that was created
/// come back in [`Error::ProvisionAborted`].
pub async fn provision_names(
    store: &dyn ObjectStore,
    config: &Config,
    names: Vec<String>,
) -> Result<ProvisionReport> {
    if names.is_empty() {
        info!("no buckets requested");
        return Ok(ProvisionReport::default());
    }
    let payload = Payload::load(&config.data_file).await?;

    let mut outcomes = Vec::with_capacity(names.len());
    let stopped = AtomicBool::new(false);
    let mut aborted = None;
    {
        let (stopped, payload) = (&stopped, &payload);
        let mut results = stream::iter(names)
            .map(move |name| async move {
                if stopped.load(Ordering::SeqCst) {
                    return None;
                }
                Some(provision_one(store, config, payload, name).await)
            })
            .buffered(config.concurrency.max(1));
        while let Some(result) = results.next().await {
            let Some((outcome, err)) = result else { continue };
            outcomes.push(outcome);
            if let Some(err) = err {
                stopped.store(true, Ordering::SeqCst);
                aborted.get_or_insert(err);
            }
        }
    }

    if let Some(source) = aborted {
        let created = outcomes
            .iter()
            .filter(|o| o.created)
            .map(|o| o.name.clone())
            .collect();
        return Err(Error::ProvisionAborted { created, source: Box::new(source) });
    }

    let report = ProvisionReport { outcomes, object_key: Some(payload.key) };
    info!(
        "provisioned {} of {} buckets",
        report.outcomes.iter().filter(|o| o.succeeded()).count(),
        report.outcomes.len()
    );
    Ok(report)
}

/// Generate `config.bucket_count` fresh names and provision them.
pub async fn provision(store: &dyn ObjectStore, config: &Config) -> Result<ProvisionReport> {
    if config.bucket_count > MAX_BUCKET_COUNT {
        return Err(Error::config(format!(
            "bucket count {} exceeds the maximum of {MAX_BUCKET_COUNT}",
            config.bucket_count
        )));
    }
    let names = naming::generate_bucket_names(&config.bucket_prefix, config.bucket_count);
    provision_names(store, config, names).await
}
