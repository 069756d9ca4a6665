//! Provision S3 buckets holding a mock PII data file, record them in a DynamoDB
//! table, and clean them up again.
//!
//! The three steps are independent: [`provisioner::provision`] creates the
//! buckets and uploads the file, [`register::register_names`] records the
//! names, and [`reaper::reap`] empties and deletes the buckets that match the
//! configured prefix.

pub mod client;
pub mod config;
pub mod error;
pub mod listing;
pub mod manifest;
pub mod naming;
pub mod provisioner;
pub mod reaper;
pub mod register;
pub mod registry;
pub mod s3_service;

#[cfg(test)]
mod testing;

pub use client::get_region_clients;
pub use config::{Config, FailurePolicy, ReapSource};
pub use error::{Error, Result};
pub use registry::{DynamoRegistry, Registry};
pub use s3_service::{ObjectStore, S3Service};
