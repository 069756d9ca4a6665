//! Error types for the provisioning workflow.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    // Storage service errors
    #[error("storage service error: {0}")]
    Storage(String),

    #[error("bucket already exists: {0}")]
    BucketAlreadyExists(String),

    /// A fail-fast provisioning run stopped; `created` lists the buckets that exist anyway.
    #[error("provisioning stopped after creating {} buckets: {source}", .created.len())]
    ProvisionAborted {
        created: Vec<String>,
        #[source]
        source: Box<Error>,
    },

    #[error("failed to delete {failed} objects from bucket {bucket}")]
    DeleteObjects { bucket: String, failed: usize },

    // Registry errors
    #[error("registry error: {0}")]
    Registry(String),

    #[error("registry table {table} did not become active within {waited:?}")]
    TableNotActive { table: String, waited: Duration },

    // Local inputs
    #[error("cannot read data file {}: {source}", .path.display())]
    DataFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn registry(msg: impl Into<String>) -> Self {
        Self::Registry(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
