//! In-memory stand-ins for the storage service and the registry, with fault injection.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::MAX_PAGE_SIZE;
use crate::error::{Error, Result};
use crate::registry::{Registry, TableCreation, TableState};
use crate::s3_service::{ObjectStore, Page};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Create,
    Put,
    ListObjects,
    DeleteObjects,
    DeleteBucket,
}

fn page_after(
    keys: impl Iterator<Item = String>,
    limit: usize,
) -> Page {
    let mut items: Vec<String> = keys.take(limit + 1).collect();
    let next = if items.len() > limit {
        items.truncate(limit);
        items.last().cloned()
    } else {
        None
    };
    Page { items, next }
}

fn after(token: &Option<String>) -> (Bound<String>, Bound<String>) {
    match token {
        Some(t) => (Bound::Excluded(t.clone()), Bound::Unbounded),
        None => (Bound::Unbounded, Bound::Unbounded),
    }
}

#[derive(Default)]
struct StoreState {
    buckets: BTreeMap<String, BTreeMap<String, Bytes>>,
    /// names taken by other accounts
    foreign: BTreeSet<String>,
    regions: BTreeMap<String, Option<String>>,
    faults: HashSet<(Op, String)>,
    /// (operation, bucket) in call order; list_buckets is recorded with an empty bucket
    calls: Vec<(&'static str, String)>,
    largest_delete_batch: usize,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    page_limit: Option<usize>,
}

impl MemoryStore {
    pub fn with_page_limit(limit: usize) -> Self {
        Self { state: Mutex::default(), page_limit: Some(limit) }
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn limit(&self, page_size: usize) -> usize {
        self.page_limit.map_or(page_size, |l| l.min(page_size)).max(1)
    }

    pub fn add_bucket(&self, name: &str, keys: &[&str]) {
        let objects = keys
            .iter()
            .map(|k| (k.to_string(), Bytes::from_static(b"seed")))
            .collect();
        self.state().buckets.insert(name.to_owned(), objects);
    }

    pub fn add_foreign_bucket(&self, name: &str) {
        self.state().foreign.insert(name.to_owned());
    }

    pub fn fail(&self, op: Op, bucket: &str) {
        self.state().faults.insert((op, bucket.to_owned()));
    }

    pub fn bucket_names(&self) -> Vec<String> {
        self.state().buckets.keys().cloned().collect()
    }

    pub fn objects(&self, bucket: &str) -> Option<BTreeMap<String, Bytes>> {
        self.state().buckets.get(bucket).cloned()
    }

    pub fn region_of(&self, bucket: &str) -> Option<Option<String>> {
        self.state().regions.get(bucket).cloned()
    }

    pub fn calls(&self) -> Vec<(&'static str, String)> {
        self.state().calls.clone()
    }

    pub fn count_calls(&self, op: &str) -> usize {
        self.state().calls.iter().filter(|(o, _)| *o == op).count()
    }

    pub fn largest_delete_batch(&self) -> usize {
        self.state().largest_delete_batch
    }

    fn check(state: &StoreState, op: Op, bucket: &str) -> Result<()> {
        if state.faults.contains(&(op, bucket.to_owned())) {
            Err(Error::storage(format!("injected {op:?} failure for {bucket}")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn create_bucket(&self, bucket: &str, region: Option<&str>) -> Result<()> {
        let mut state = self.state();
        state.calls.push(("create_bucket", bucket.to_owned()));
        Self::check(&state, Op::Create, bucket)?;
        if state.foreign.contains(bucket) || state.buckets.contains_key(bucket) {
            return Err(Error::BucketAlreadyExists(bucket.to_owned()));
        }
        state.buckets.insert(bucket.to_owned(), BTreeMap::new());
        state.regions.insert(bucket.to_owned(), region.map(str::to_owned));
        Ok(())
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<()> {
        let mut state = self.state();
        state.calls.push(("put_object", bucket.to_owned()));
        Self::check(&state, Op::Put, bucket)?;
        let objects = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| Error::storage(format!("NoSuchBucket: {bucket}")))?;
        objects.insert(key.to_owned(), body);
        Ok(())
    }

    async fn list_buckets_page(&self, token: Option<String>, page_size: usize) -> Result<Page> {
        let limit = self.limit(page_size);
        let mut state = self.state();
        state.calls.push(("list_buckets", String::new()));
        let names = state.buckets.range(after(&token)).map(|(k, _)| k.clone());
        Ok(page_after(names, limit))
    }

    async fn list_objects_page(
        &self,
        bucket: &str,
        token: Option<String>,
        page_size: usize,
    ) -> Result<Page> {
        let limit = self.limit(page_size);
        let mut state = self.state();
        state.calls.push(("list_objects", bucket.to_owned()));
        Self::check(&state, Op::ListObjects, bucket)?;
        let objects = state
            .buckets
            .get(bucket)
            .ok_or_else(|| Error::storage(format!("NoSuchBucket: {bucket}")))?;
        let keys = objects.range(after(&token)).map(|(k, _)| k.clone());
        Ok(page_after(keys, limit))
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<()> {
        let mut state = self.state();
        state.calls.push(("delete_objects", bucket.to_owned()));
        Self::check(&state, Op::DeleteObjects, bucket)?;
        if keys.len() > MAX_PAGE_SIZE {
            return Err(Error::storage("MalformedXML: more than 1000 keys"));
        }
        state.largest_delete_batch = state.largest_delete_batch.max(keys.len());
        let objects = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| Error::storage(format!("NoSuchBucket: {bucket}")))?;
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        let mut state = self.state();
        state.calls.push(("delete_bucket", bucket.to_owned()));
        Self::check(&state, Op::DeleteBucket, bucket)?;
        let empty = match state.buckets.get(bucket) {
            None => return Err(Error::storage(format!("NoSuchBucket: {bucket}"))),
            Some(objects) => objects.is_empty(),
        };
        if !empty {
            return Err(Error::storage(format!("BucketNotEmpty: {bucket}")));
        }
        state.buckets.remove(bucket);
        Ok(())
    }
}

struct MemoryTable {
    key: String,
    rows: BTreeSet<String>,
    /// number of status checks answered with CREATING before the table turns active
    pending_checks: usize,
}

#[derive(Default)]
struct RegistryState {
    tables: BTreeMap<String, MemoryTable>,
    failing_names: HashSet<String>,
    create_calls: usize,
    status_checks: usize,
    puts: Vec<String>,
}

#[derive(Default)]
pub struct MemoryRegistry {
    state: Mutex<RegistryState>,
    activation_checks: usize,
    page_limit: Option<usize>,
}

impl MemoryRegistry {
    /// New tables report CREATING for `checks` status calls.
    pub fn with_activation_delay(checks: usize) -> Self {
        Self { activation_checks: checks, ..Self::default() }
    }

    pub fn with_page_limit(limit: usize) -> Self {
        Self { page_limit: Some(limit), ..Self::default() }
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn fail_put(&self, name: &str) {
        self.state().failing_names.insert(name.to_owned());
    }

    pub fn rows(&self, table: &str) -> Vec<String> {
        self.state()
            .tables
            .get(table)
            .map(|t| t.rows.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn insert_rows(&self, table: &str, key: &str, names: &[&str]) {
        let mut state = self.state();
        let entry = state.tables.entry(table.to_owned()).or_insert_with(|| MemoryTable {
            key: key.to_owned(),
            rows: BTreeSet::new(),
            pending_checks: 0,
        });
        entry.rows.extend(names.iter().map(|n| n.to_string()));
    }

    pub fn create_calls(&self) -> usize {
        self.state().create_calls
    }

    pub fn status_checks(&self) -> usize {
        self.state().status_checks
    }

    pub fn puts(&self) -> Vec<String> {
        self.state().puts.clone()
    }

    fn table_key<'a>(state: &'a mut RegistryState, table: &str, key: &str) -> Result<&'a mut MemoryTable> {
        let entry = state
            .tables
            .get_mut(table)
            .ok_or_else(|| Error::registry(format!("ResourceNotFoundException: {table}")))?;
        if entry.key != key {
            return Err(Error::registry(format!(
                "ValidationException: {table} is keyed by {}",
                entry.key
            )));
        }
        if entry.pending_checks > 0 {
            return Err(Error::registry(format!("ResourceNotFoundException: {table} is being created")));
        }
        Ok(entry)
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn create_table(&self, table: &str, key: &str) -> Result<TableCreation> {
        let mut state = self.state();
        state.create_calls += 1;
        if state.tables.contains_key(table) {
            return Ok(TableCreation::AlreadyExists);
        }
        state.tables.insert(
            table.to_owned(),
            MemoryTable {
                key: key.to_owned(),
                rows: BTreeSet::new(),
                pending_checks: self.activation_checks,
            },
        );
        Ok(TableCreation::Created)
    }

    async fn table_state(&self, table: &str) -> Result<TableState> {
        let mut state = self.state();
        state.status_checks += 1;
        match state.tables.get_mut(table) {
            None => Ok(TableState::Missing),
            Some(t) if t.pending_checks > 0 => {
                t.pending_checks -= 1;
                Ok(TableState::Pending("CREATING".to_owned()))
            }
            Some(_) => Ok(TableState::Active),
        }
    }

    async fn put_name(&self, table: &str, key: &str, name: &str) -> Result<()> {
        let mut state = self.state();
        if state.failing_names.contains(name) {
            return Err(Error::registry(format!("injected put failure for {name}")));
        }
        Self::table_key(&mut state, table, key)?.rows.insert(name.to_owned());
        state.puts.push(name.to_owned());
        Ok(())
    }

    async fn scan_page(
        &self,
        table: &str,
        key: &str,
        token: Option<String>,
        page_size: usize,
    ) -> Result<Page> {
        let limit = self.page_limit.map_or(page_size, |l| l.min(page_size)).max(1);
        let mut state = self.state();
        let entry = Self::table_key(&mut state, table, key)?;
        let names = entry.rows.range(after(&token)).cloned();
        Ok(page_after(names, limit))
    }

    async fn delete_name(&self, table: &str, key: &str, name: &str) -> Result<()> {
        let mut state = self.state();
        Self::table_key(&mut state, table, key)?.rows.remove(name);
        Ok(())
    }
}
