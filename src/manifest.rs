use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Result;

/// The names created by one provisioning run, written for a later registry run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub prefix: String,
    pub region: Option<String>,
    pub data_file: PathBuf,
    pub buckets: Vec<String>,
}

impl Manifest {
    pub fn for_buckets(config: &Config, buckets: Vec<String>) -> Self {
        Self {
            prefix: config.bucket_prefix.clone(),
            region: config.region.clone(),
            data_file: config.data_file.clone(),
            buckets,
        }
    }

    pub async fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    pub async fn read(path: &Path) -> Result<Self> {
        let json = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&json)?)
    }
}
