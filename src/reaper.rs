//! Emptying and deleting the provisioned buckets.
//!
//! Every candidate goes through EMPTYING (list and batch-delete all objects)
//! and DELETING (delete the bucket itself). The bucket is only deleted when
//! emptying succeeded, and a rejected bucket delete is reported for that
//! bucket instead of being skipped silently.

use std::collections::BTreeSet;

use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};

use crate::config::{Config, ReapSource, MAX_PAGE_SIZE};
use crate::error::{Error, Result};
use crate::listing;
use crate::naming;
use crate::register;
use crate::registry::Registry;
use crate::s3_service::ObjectStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapPhase {
    Emptying,
    Deleting,
    Done,
}

/// What happened to one candidate bucket. `phase` is the last phase entered;
/// a bucket that failed carries the error of that phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketReap {
    pub name: String,
    pub phase: ReapPhase,
    pub objects_deleted: usize,
    pub error: Option<String>,
}

impl BucketReap {
    pub fn is_done(&self) -> bool {
        self.phase == ReapPhase::Done
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReapOptions {
    pub source: ReapSource,
    /// select and report the candidates without deleting anything
    pub dry_run: bool,
    /// delete the registry row of every bucket that was removed
    pub prune_registry: bool,
}

impl Default for ReapOptions {
    fn default() -> Self {
        Self { source: ReapSource::Prefix, dry_run: false, prune_registry: false }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub buckets: Vec<BucketReap>,
    /// live buckets left alone because they do not match
    pub skipped: Vec<String>,
    /// registered names without a live bucket
    pub missing: Vec<String>,
    /// candidates of a dry run
    pub candidates: Vec<String>,
}

impl ReapReport {
    pub fn failures(&self) -> impl Iterator<Item = &BucketReap> {
        self.buckets.iter().filter(|b| !b.is_done())
    }

    pub fn is_complete(&self) -> bool {
        self.failures().next().is_none()
    }
}

struct Candidates {
    targets: Vec<String>,
    skipped: Vec<String>,
    missing: Vec<String>,
}

async fn select_candidates(
    store: &dyn ObjectStore,
    registry: Option<&dyn Registry>,
    config: &Config,
    source: ReapSource,
) -> Result<Candidates> {
    let (matching, skipped) =
        listing::list_buckets_with_prefix(store, &config.bucket_prefix, config.page_size).await?;

    match source {
        ReapSource::Prefix => Ok(Candidates { targets: matching, skipped, missing: Vec::new() }),
        ReapSource::Registry => {
            let registry = registry.ok_or_else(|| {
                Error::config("reaping from the registry needs a registry client")
            })?;
            let registered: BTreeSet<String> = register::registered_names(registry, config)
                .await?
                .into_iter()
                .filter(|name| name.starts_with(&config.bucket_prefix))
                .collect();
            let live: BTreeSet<&String> = matching.iter().collect();
            let missing = registered
                .iter()
                .filter(|name| !live.contains(name))
                .cloned()
                .collect();
            let (targets, unregistered): (Vec<String>, Vec<String>) = matching
                .into_iter()
                .partition(|name| registered.contains(name));
            let skipped = skipped.into_iter().chain(unregistered).collect();
            Ok(Candidates { targets, skipped, missing })
        }
    }
}

/// Delete every object in `bucket`, in batches the service accepts. Returns the number deleted.
pub async fn empty_bucket(store: &dyn ObjectStore, bucket: &str, page_size: usize) -> Result<usize> {
    let keys = listing::list_objects(store, bucket, page_size).await?;
    for batch in keys.chunks(MAX_PAGE_SIZE) {
        store.delete_objects(bucket, batch).await?;
    }
    if !keys.is_empty() {
        info!("deleted {} objects in bucket {bucket}", keys.len());
    }
    Ok(keys.len())
}

// runs the phases for one bucket; the error is returned alongside the progress record
async fn reap_one(
    store: &dyn ObjectStore,
    bucket: String,
    page_size: usize,
) -> (BucketReap, Option<Error>) {
    let mut progress = BucketReap {
        name: bucket,
        phase: ReapPhase::Emptying,
        objects_deleted: 0,
        error: None,
    };

    match empty_bucket(store, &progress.name, page_size).await {
        Ok(deleted) => progress.objects_deleted = deleted,
        Err(err) => {
            error!("emptying bucket {} failed, not deleting it: {err}", progress.name);
            progress.error = Some(err.to_string());
            return (progress, Some(err));
        }
    }

    progress.phase = ReapPhase::Deleting;
    if let Err(err) = store.delete_bucket(&progress.name).await {
        error!("deleting bucket {} failed: {err}", progress.name);
        progress.error = Some(err.to_string());
        return (progress, Some(err));
    }

    info!("deleted bucket {}", progress.name);
    progress.phase = ReapPhase::Done;
    (progress, None)
}

/// Empty and delete every bucket selected by `options.source`.
///
/// Best-effort storage policy records a failed bucket and moves on to the
/// next one; fail-fast stops at the first error and returns it once the
/// buckets already deleted have been pruned from the registry (when asked).
///
/// The prefix is validated before anything is listed: an empty prefix would
/// match every bucket the credentials can see.
pub async fn reap(
    store: &dyn ObjectStore,
    registry: Option<&dyn Registry>,
    config: &Config,
    options: ReapOptions,
) -> Result<ReapReport> {
    naming::validate_prefix(&config.bucket_prefix)?;
    if options.prune_registry && registry.is_none() {
        return Err(Error::config("pruning the registry needs a registry client"));
    }
    let Candidates { targets, skipped, missing } =
        select_candidates(store, registry, config, options.source).await?;
    for name in &skipped {
        info!("bucket {name} does not match, leaving it untouched");
    }
    for name in &missing {
        warn!("registered bucket {name} no longer exists");
    }

    let mut report = ReapReport { skipped, missing, ..ReapReport::default() };
    if options.dry_run {
        for name in &targets {
            info!("would delete bucket {name}");
        }
        report.candidates = targets;
        return Ok(report);
    }

    let mut aborted = None;
    {
        let mut results = stream::iter(targets)
            .map(|bucket| reap_one(store, bucket, config.page_size))
            .buffered(config.concurrency.max(1));
        while let Some((progress, err)) = results.next().await {
            report.buckets.push(progress);
            if let Some(err) = err {
                if config.storage_policy.is_fail_fast() {
                    aborted = Some(err);
                    break;
                }
            }
        }
    }

    if options.prune_registry {
        if let Some(registry) = registry {
            match (prune(registry, config, &report).await, &aborted) {
                (Err(err), None) => return Err(err),
                (Err(err), Some(_)) => error!("pruning the registry after a failed reap: {err}"),
                (Ok(()), _) => {}
            }
        }
    }
    if let Some(err) = aborted {
        return Err(err);
    }

    info!(
        "deleted {} of {} matching buckets",
        report.buckets.iter().filter(|b| b.is_done()).count(),
        report.buckets.len()
    );
    Ok(report)
}

async fn prune(registry: &dyn Registry, config: &Config, report: &ReapReport) -> Result<()> {
    let gone = report
        .buckets
        .iter()
        .filter(|b| b.is_done())
        .map(|b| &b.name)
        .chain(report.missing.iter());
    for name in gone {
        if let Err(err) = register::unregister_name(registry, config, name).await {
            error!("removing {name} from the registry failed: {err}");
            if config.registry_policy.is_fail_fast() {
                return Err(err);
            }
        }
    }
    Ok(())
}
