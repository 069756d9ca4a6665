//! Recording provisioned bucket names in the registry table.

use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::listing::collect_pages;
use crate::registry::{Registry, TableCreation, TableState};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterReport {
    pub table_created: bool,
    pub written: Vec<String>,
    /// (name, error) for every row that could not be written
    pub failed: Vec<(String, String)>,
}

impl RegisterReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Create the registry table unless it already exists.
pub async fn ensure_table(registry: &dyn Registry, config: &Config) -> Result<TableCreation> {
    let creation = registry
        .create_table(&config.table_name, &config.key_attribute)
        .await?;
    match creation {
        TableCreation::Created => info!("registry table {} created", config.table_name),
        TableCreation::AlreadyExists => {
            warn!("registry table {} already exists, skipping creation", config.table_name)
        }
    }
    Ok(creation)
}

/// Poll the table until it accepts writes or the configured timeout passes.
pub async fn wait_until_active(registry: &dyn Registry, config: &Config) -> Result<()> {
    let started = Instant::now();
    loop {
        let state = registry.table_state(&config.table_name).await?;
        if state == TableState::Active {
            info!("registry table {} is active", config.table_name);
            return Ok(());
        }
        let waited = started.elapsed();
        if waited >= config.table_wait_timeout {
            return Err(Error::TableNotActive {
                table: config.table_name.clone(),
                waited,
            });
        }
        // a freshly created table can still be reported missing for a moment
        info!("waiting for registry table {} ({state:?})", config.table_name);
        sleep(config.table_poll_interval).await;
    }
}

/// Write one row per name into a table that is already active.
pub async fn write_names(
    registry: &dyn Registry,
    config: &Config,
    names: &[String],
) -> Result<RegisterReport> {
    let mut report = RegisterReport::default();
    for name in names {
        match registry
            .put_name(&config.table_name, &config.key_attribute, name)
            .await
        {
            Ok(()) => {
                info!("registered bucket {name} in {}", config.table_name);
                report.written.push(name.clone());
            }
            Err(err) => {
                error!("registering bucket {name} failed: {err}");
                if config.registry_policy.is_fail_fast() {
                    return Err(err);
                }
                report.failed.push((name.clone(), err.to_string()));
            }
        }
    }
    Ok(report)
}

/// Make sure the table exists and is active, then record every name.
pub async fn register_names(
    registry: &dyn Registry,
    config: &Config,
    names: &[String],
) -> Result<RegisterReport> {
    let creation = ensure_table(registry, config).await?;
    wait_until_active(registry, config).await?;
    let mut report = write_names(registry, config, names).await?;
    report.table_created = creation == TableCreation::Created;
    Ok(report)
}

/// Every bucket name recorded in the registry table.
pub async fn registered_names(registry: &dyn Registry, config: &Config) -> Result<Vec<String>> {
    collect_pages(|token| {
        registry.scan_page(&config.table_name, &config.key_attribute, token, config.page_size)
    })
    .await
}

pub async fn unregister_name(registry: &dyn Registry, config: &Config, name: &str) -> Result<()> {
    registry
        .delete_name(&config.table_name, &config.key_attribute, name)
        .await?;
    info!("removed bucket {name} from {}", config.table_name);
    Ok(())
}
