//! Exhaustive listings on top of the single-page calls of [`ObjectStore`].

use tracing::{debug, info};

use crate::error::Result;
use crate::s3_service::{ObjectStore, Page};

/// Follow continuation tokens until the listing is exhausted.
pub(crate) async fn collect_pages<F, Fut>(mut fetch: F) -> Result<Vec<String>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: std::future::Future<Output = Result<Page>>,
{
    let mut items = Vec::new();
    let mut token = None;
    let mut pages = 0_usize;
    loop {
        let page = fetch(token.take()).await?;
        pages += 1;
        items.extend(page.items);
        match page.next {
            Some(next) => token = Some(next),
            None => break,
        }
    }
    debug!("collected {} items in {pages} pages", items.len());
    Ok(items)
}

/// Names of every bucket visible to the caller.
pub async fn list_buckets(store: &dyn ObjectStore, page_size: usize) -> Result<Vec<String>> {
    collect_pages(|token| store.list_buckets_page(token, page_size)).await
}

/// Names of the visible buckets that start with `prefix`. The second vector holds the others.
pub async fn list_buckets_with_prefix(
    store: &dyn ObjectStore,
    prefix: &str,
    page_size: usize,
) -> Result<(Vec<String>, Vec<String>)> {
    let buckets = list_buckets(store, page_size).await?;
    Ok(buckets.into_iter().partition(|name| name.starts_with(prefix)))
}

/// Keys of every object in `bucket`.
pub async fn list_objects(
    store: &dyn ObjectStore,
    bucket: &str,
    page_size: usize,
) -> Result<Vec<String>> {
    collect_pages(|token| store.list_objects_page(bucket, token, page_size)).await
}

/// Log the bucket names of the account for human inspection and return them.
pub async fn show_buckets(
    store: &dyn ObjectStore,
    prefix: Option<&str>,
    page_size: usize,
) -> Result<Vec<String>> {
    let mut buckets = list_buckets(store, page_size).await?;
    if let Some(prefix) = prefix {
        buckets.retain(|name| name.starts_with(prefix));
    }
    info!("{} existing buckets within the account", buckets.len());
    for name in &buckets {
        info!("  {name}");
    }
    Ok(buckets)
}
