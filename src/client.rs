use aws_config::meta::region::RegionProviderChain;
use aws_config::{BehaviorVersion, Region, SdkConfig};

/// Region used when neither the configuration nor the environment names one.
pub const FALLBACK_REGION: &str = "us-east-1";

// load the shared AWS configuration for the requested region (or the default provider chain)
pub async fn get_sdk_config(region: Option<&str>) -> SdkConfig {
    let region_provider = RegionProviderChain::first_try(region.map(|r| Region::new(r.to_owned())))
        .or_default_provider()
        .or_else(Region::new(FALLBACK_REGION));

    aws_config::defaults(BehaviorVersion::latest())
        .region(region_provider)
        .load()
        .await
}

/// the region the loaded configuration resolved to, and clients for the storage service and the registry
pub async fn get_region_clients(
    region: Option<&str>,
) -> (Region, aws_sdk_s3::Client, aws_sdk_dynamodb::Client) {
    let shared_config = get_sdk_config(region).await;
    let resolved = shared_config
        .region()
        .cloned()
        .unwrap_or_else(|| Region::new(FALLBACK_REGION));

    (
        resolved,
        aws_sdk_s3::Client::new(&shared_config),
        aws_sdk_dynamodb::Client::new(&shared_config),
    )
}
