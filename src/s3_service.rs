use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CreateBucketConfiguration, Delete, Error as S3Error,
    ObjectIdentifier,
};
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::debug;

use crate::error::{Error, Result};

/// S3 refuses an explicit location constraint for its default region.
pub const DEFAULT_S3_REGION: &str = "us-east-1";

/// One page of a listing together with the token that fetches the next page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub items: Vec<String>,
    pub next: Option<String>,
}

/// The calls the workflow makes against the object-storage service.
///
/// Listing calls return a single page; the helpers in [`crate::listing`]
/// drive them until every page has been read.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn create_bucket(&self, bucket: &str, region: Option<&str>) -> Result<()>;

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<()>;

    async fn list_buckets_page(&self, token: Option<String>, page_size: usize) -> Result<Page>;

    async fn list_objects_page(
        &self,
        bucket: &str,
        token: Option<String>,
        page_size: usize,
    ) -> Result<Page>;

    /// Delete up to [`crate::config::MAX_PAGE_SIZE`] keys in one batch. A key the service
    /// reports as not deleted makes the whole call fail.
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<()>;

    async fn delete_bucket(&self, bucket: &str) -> Result<()>;
}

/// [`ObjectStore`] backed by Amazon S3.
#[derive(Clone, Debug)]
pub struct S3Service {
    client: Client,
}

impl S3Service {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn page_size_i32(page_size: usize) -> i32 {
    i32::try_from(page_size).unwrap_or(i32::MAX)
}

/// The CreateBucket configuration for `region`: none for the default region.
fn bucket_configuration(region: Option<&str>) -> Option<CreateBucketConfiguration> {
    let region = region.filter(|r| *r != DEFAULT_S3_REGION)?;
    Some(
        CreateBucketConfiguration::builder()
            .location_constraint(BucketLocationConstraint::from(region))
            .build(),
    )
}

// a quiet batch delete answers 200 and lists the keys it could not remove
fn check_delete_errors(bucket: &str, failures: &[S3Error]) -> Result<()> {
    if failures.is_empty() {
        return Ok(());
    }
    for failure in failures {
        debug!(
            "object {} in {bucket} not deleted: {} {}",
            failure.key().unwrap_or("?"),
            failure.code().unwrap_or("?"),
            failure.message().unwrap_or("")
        );
    }
    Err(Error::DeleteObjects {
        bucket: bucket.to_owned(),
        failed: failures.len(),
    })
}

#[async_trait]
impl ObjectStore for S3Service {
    async fn create_bucket(&self, bucket: &str, region: Option<&str>) -> Result<()> {
        let request = self
            .client
            .create_bucket()
            .bucket(bucket)
            .set_create_bucket_configuration(bucket_configuration(region));

        match request.send().await {
            Ok(_) => Ok(()),
            Err(err) => {
                let collision = err.as_service_error().map_or(false, |e| {
                    e.is_bucket_already_exists() || e.is_bucket_already_owned_by_you()
                });
                if collision {
                    Err(Error::BucketAlreadyExists(bucket.to_owned()))
                } else {
                    Err(Error::storage(format!(
                        "create bucket {bucket}: {}",
                        DisplayErrorContext(&err)
                    )))
                }
            }
        }
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| {
                Error::storage(format!(
                    "upload {bucket}/{key}: {}",
                    DisplayErrorContext(&err)
                ))
            })?;
        Ok(())
    }

    async fn list_buckets_page(&self, token: Option<String>, page_size: usize) -> Result<Page> {
        let output = self
            .client
            .list_buckets()
            .max_buckets(page_size_i32(page_size))
            .set_continuation_token(token)
            .send()
            .await
            .map_err(|err| Error::storage(format!("list buckets: {}", DisplayErrorContext(&err))))?;

        let items = output
            .buckets()
            .iter()
            .filter_map(|b| b.name().map(str::to_owned))
            .collect();
        let next = output.continuation_token().map(str::to_owned);
        debug!("listed bucket page, more pages: {}", next.is_some());
        Ok(Page { items, next })
    }

    async fn list_objects_page(
        &self,
        bucket: &str,
        token: Option<String>,
        page_size: usize,
    ) -> Result<Page> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .max_keys(page_size_i32(page_size))
            .set_continuation_token(token)
            .send()
            .await
            .map_err(|err| {
                Error::storage(format!(
                    "list objects of {bucket}: {}",
                    DisplayErrorContext(&err)
                ))
            })?;

        let items = output
            .contents()
            .iter()
            .filter_map(|obj| obj.key().map(str::to_owned))
            .collect();
        let next = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(str::to_owned)
        } else {
            None
        };
        Ok(Page { items, next })
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut identifiers = Vec::with_capacity(keys.len());
        for key in keys {
            let id = ObjectIdentifier::builder()
                .key(key)
                .build()
                .map_err(|err| Error::storage(format!("object identifier {key}: {err}")))?;
            identifiers.push(id);
        }
        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .quiet(true)
            .build()
            .map_err(|err| Error::storage(format!("delete request for {bucket}: {err}")))?;

        let output = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|err| {
                Error::storage(format!(
                    "delete objects of {bucket}: {}",
                    DisplayErrorContext(&err)
                ))
            })?;

        check_delete_errors(bucket, output.errors())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|err| {
                Error::storage(format!(
                    "delete bucket {bucket}: {}",
                    DisplayErrorContext(&err)
                ))
            })?;
        Ok(())
    }
}
