//! Run configuration shared by the provisioner, the registry writer and the reaper.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::naming;

pub const DEFAULT_BUCKET_PREFIX: &str = "my-pii-data-bucket-";
pub const DEFAULT_DATA_FILE: &str = "mock-up-pii-data-500.csv";
pub const DEFAULT_TABLE_NAME: &str = "pii-bucket-registry";
pub const DEFAULT_KEY_ATTRIBUTE: &str = "bucket_name";
/// Upper bound on the buckets one provisioning run may request (the S3 per-account quota).
pub const MAX_BUCKET_COUNT: usize = 10_000;
/// S3 returns at most 1000 keys per listing page and accepts at most 1000 keys per batch delete.
pub const MAX_PAGE_SIZE: usize = 1000;

/// What to do when a single remote call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum FailurePolicy {
    /// log the failure, record it in the report and carry on with the next item
    BestEffort,
    /// stop at the first failure and return it
    FailFast,
}

impl FailurePolicy {
    pub fn is_fail_fast(self) -> bool {
        matches!(self, FailurePolicy::FailFast)
    }
}

/// Where the reaper finds the buckets it should delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapSource {
    /// every live bucket whose name starts with the prefix
    Prefix,
    /// the names recorded in the registry table (still restricted to the prefix)
    Registry,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bucket_count: usize,
    /// `None` creates buckets in the default region of the storage service.
    pub region: Option<String>,
    pub data_file: PathBuf,
    pub table_name: String,
    pub key_attribute: String,
    pub bucket_prefix: String,
    pub storage_policy: FailurePolicy,
    pub registry_policy: FailurePolicy,
    /// number of buckets processed at the same time; 1 keeps everything sequential
    pub concurrency: usize,
    pub page_size: usize,
    pub table_wait_timeout: Duration,
    pub table_poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bucket_count: 1,
            region: None,
            data_file: PathBuf::from(DEFAULT_DATA_FILE),
            table_name: DEFAULT_TABLE_NAME.to_owned(),
            key_attribute: DEFAULT_KEY_ATTRIBUTE.to_owned(),
            bucket_prefix: DEFAULT_BUCKET_PREFIX.to_owned(),
            storage_policy: FailurePolicy::BestEffort,
            registry_policy: FailurePolicy::FailFast,
            concurrency: 1,
            page_size: MAX_PAGE_SIZE,
            table_wait_timeout: Duration::from_secs(300),
            table_poll_interval: Duration::from_secs(2),
        }
    }
}

impl Config {
    /// Check the settings that would otherwise only fail half-way through a run.
    pub fn validate(&self) -> Result<()> {
        naming::validate_prefix(&self.bucket_prefix)?;
        if self.bucket_count > MAX_BUCKET_COUNT {
            return Err(Error::config(format!(
                "bucket count {} exceeds the maximum of {MAX_BUCKET_COUNT}",
                self.bucket_count
            )));
        }
        if self.concurrency == 0 {
            return Err(Error::config("concurrency must be at least 1"));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(Error::config(format!(
                "page size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        if self.table_name.trim().is_empty() {
            return Err(Error::config("table name must not be empty"));
        }
        if self.key_attribute.trim().is_empty() {
            return Err(Error::config("key attribute must not be empty"));
        }
        if matches!(self.region.as_deref(), Some(r) if r.trim().is_empty()) {
            return Err(Error::config("region must not be an empty string"));
        }
        Ok(())
    }
}
