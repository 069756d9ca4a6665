use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use pii_buckets::config::{
    DEFAULT_BUCKET_PREFIX, DEFAULT_DATA_FILE, DEFAULT_KEY_ATTRIBUTE, DEFAULT_TABLE_NAME,
    MAX_PAGE_SIZE,
};
use pii_buckets::manifest::Manifest;
use pii_buckets::reaper::{self, ReapOptions};
use pii_buckets::{
    get_region_clients, listing, provisioner, register, Config, DynamoRegistry, Error,
    FailurePolicy, Registry, ReapSource, S3Service,
};

#[derive(Parser, Debug)]
#[command(name = "pii-buckets")]
#[command(about = "Provision, register and reap S3 buckets holding mock PII data")]
#[command(version)]
struct Args {
    /// Region to create buckets in; the default region when omitted
    #[arg(long, global = true, env = "PII_BUCKETS_REGION")]
    region: Option<String>,

    /// Bucket name prefix, followed by ten random digits
    #[arg(long, global = true, env = "PII_BUCKETS_PREFIX", default_value = DEFAULT_BUCKET_PREFIX)]
    prefix: String,

    /// Registry table name
    #[arg(long, global = true, env = "PII_BUCKETS_TABLE", default_value = DEFAULT_TABLE_NAME)]
    table: String,

    /// Partition key attribute of the registry table
    #[arg(long, global = true, env = "PII_BUCKETS_KEY_ATTRIBUTE", default_value = DEFAULT_KEY_ATTRIBUTE)]
    key_attribute: String,

    /// Failure policy for storage calls
    #[arg(long, global = true, value_enum, env = "PII_BUCKETS_STORAGE_POLICY", default_value_t = FailurePolicy::BestEffort)]
    storage_policy: FailurePolicy,

    /// Failure policy for registry writes
    #[arg(long, global = true, value_enum, env = "PII_BUCKETS_REGISTRY_POLICY", default_value_t = FailurePolicy::FailFast)]
    registry_policy: FailurePolicy,

    /// Buckets processed at the same time
    #[arg(long, global = true, env = "PII_BUCKETS_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Entries requested per listing page
    #[arg(long, global = true, env = "PII_BUCKETS_PAGE_SIZE", default_value_t = MAX_PAGE_SIZE)]
    page_size: usize,

    /// Seconds to wait for the registry table to become active
    #[arg(long, global = true, env = "PII_BUCKETS_TABLE_WAIT_SECS", default_value_t = 300)]
    table_wait_secs: u64,

    /// Log level
    #[arg(long, global = true, env = "PII_BUCKETS_LOG_LEVEL", default_value = "info")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the buckets of the account
    List {
        /// Show every bucket, not only those with the prefix
        #[arg(long)]
        all: bool,
    },
    /// Create buckets and upload the data file into each
    Provision {
        /// Number of buckets to create
        #[arg(long, env = "PII_BUCKETS_COUNT", default_value_t = 1)]
        count: usize,

        /// File uploaded into every bucket
        #[arg(long, env = "PII_BUCKETS_DATA_FILE", default_value = DEFAULT_DATA_FILE)]
        data_file: PathBuf,

        /// Write the created bucket names to this JSON file
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// Record the created buckets in the registry table right away
        #[arg(long)]
        register: bool,
    },
    /// Record bucket names in the registry table
    Register {
        /// Manifest written by `provision --manifest`
        #[arg(long, required_unless_present = "bucket", conflicts_with = "bucket")]
        manifest: Option<PathBuf>,

        /// Bucket name to record (repeatable)
        #[arg(long)]
        bucket: Vec<String>,
    },
    /// Empty and delete the buckets that match the prefix
    Reap {
        /// Only delete buckets recorded in the registry table
        #[arg(long)]
        from_registry: bool,

        /// Remove the registry rows of deleted buckets
        #[arg(long)]
        prune_registry: bool,

        /// Show what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },
}

impl Args {
    fn config(&self) -> Config {
        let mut config = Config {
            region: self.region.clone(),
            bucket_prefix: self.prefix.clone(),
            table_name: self.table.clone(),
            key_attribute: self.key_attribute.clone(),
            storage_policy: self.storage_policy,
            registry_policy: self.registry_policy,
            concurrency: self.concurrency,
            page_size: self.page_size,
            table_wait_timeout: Duration::from_secs(self.table_wait_secs),
            ..Config::default()
        };
        if let Commands::Provision { count, data_file, .. } = &self.command {
            config.bucket_count = *count;
            config.data_file = data_file.clone();
        }
        config
    }
}

fn check_register(report: &register::RegisterReport) -> Result<()> {
    for (name, err) in &report.failed {
        error!("bucket {name} is not registered: {err}");
    }
    if !report.is_complete() {
        bail!(
            "{} of {} registry writes failed",
            report.failed.len(),
            report.failed.len() + report.written.len()
        );
    }
    Ok(())
}

/// Write the manifest and/or register the buckets a provisioning run created.
async fn hand_off(
    registry: &dyn Registry,
    config: &Config,
    manifest: Option<&Path>,
    also_register: bool,
    names: &[String],
) -> Result<()> {
    if let Some(path) = manifest {
        Manifest::for_buckets(config, names.to_vec())
            .write(path)
            .await
            .with_context(|| format!("writing manifest {}", path.display()))?;
        info!("bucket names written to {}", path.display());
    }
    if also_register {
        let registered = register::register_names(registry, config, names).await?;
        check_register(&registered)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        // disable printing the name of the module in every log line.
        .with_target(false)
        .init();

    let config = args.config();
    config.validate().context("invalid configuration")?;

    let (region, s3_client, dynamo_client) = get_region_clients(config.region.as_deref()).await;
    info!("using AWS region {region}");
    let store = S3Service::new(s3_client);
    let registry = DynamoRegistry::new(dynamo_client);

    match args.command {
        Commands::List { all } => {
            let prefix = (!all).then_some(config.bucket_prefix.as_str());
            listing::show_buckets(&store, prefix, config.page_size).await?;
        }
        Commands::Provision { manifest, register: also_register, .. } => {
            let report = match provisioner::provision(&store, &config).await {
                Ok(report) => report,
                Err(err) => {
                    // the buckets of an aborted run exist and still need recording
                    if let Error::ProvisionAborted { created, .. } = &err {
                        if !created.is_empty() {
                            let recorded = hand_off(
                                &registry,
                                &config,
                                manifest.as_deref(),
                                also_register,
                                created,
                            )
                            .await;
                            if let Err(hand_off_err) = recorded {
                                error!("recording the created buckets failed: {hand_off_err:#}");
                            }
                        }
                    }
                    return Err(err.into());
                }
            };
            hand_off(&registry, &config, manifest.as_deref(), also_register, &report.names())
                .await?;
            if let Some(key) = &report.object_key {
                info!(
                    "uploaded {key} into {} buckets",
                    report.outcomes.iter().filter(|o| o.uploaded).count()
                );
            }
            for failed in report.failures() {
                error!(
                    "bucket {} incomplete: {}",
                    failed.name,
                    failed.error.as_deref().unwrap_or("unknown error")
                );
            }
            if !report.is_complete() {
                bail!(
                    "{} of {} buckets were not fully provisioned",
                    report.failures().count(),
                    report.outcomes.len()
                );
            }
        }
        Commands::Register { manifest, bucket } => {
            let names = match manifest {
                Some(path) => {
                    Manifest::read(&path)
                        .await
                        .with_context(|| format!("reading manifest {}", path.display()))?
                        .buckets
                }
                None => bucket,
            };
            let report = register::register_names(&registry, &config, &names).await?;
            check_register(&report)?;
        }
        Commands::Reap { from_registry, prune_registry, dry_run } => {
            let options = ReapOptions {
                source: if from_registry { ReapSource::Registry } else { ReapSource::Prefix },
                dry_run,
                prune_registry,
            };
            let registry: &dyn Registry = &registry;
            let report = reaper::reap(&store, Some(registry), &config, options).await?;
            if !report.is_complete() {
                bail!(
                    "{} of {} buckets could not be deleted",
                    report.failures().count(),
                    report.buckets.len()
                );
            }
        }
    }

    Ok(())
}
