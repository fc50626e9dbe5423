//! In-memory object store
//!
//! A complete [`ObjectStore`] backed by a `BTreeMap`, with knobs for pacing
//! transfers and injecting failures. The transfer and folder test suites run
//! against it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use jiff::Timestamp;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};
use crate::traits::{
    BatchDeleteResult, BucketInfo, KeyError, ListOptions, ListPage, ObjectInfo, ObjectStore,
    Progress,
};

/// Store-side limit on keys returned per list page
const DEFAULT_PAGE_SIZE: usize = 1000;

type Buckets = BTreeMap<String, BTreeMap<String, StoredObject>>;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    modified: Timestamp,
}

/// Failures to inject into a [`MemoryStore`]
#[derive(Debug, Default)]
struct Faults {
    /// Copies whose source key is in this set fail
    copy_keys: BTreeSet<String>,
    /// Batch-delete calls (zero-based call index) that fail outright
    delete_batches: BTreeSet<usize>,
    /// Single deletes of these keys fail
    delete_keys: BTreeSet<String>,
    /// Remaining rate-limit responses per operation name
    rate_limits: HashMap<&'static str, u32>,
}

/// An in-memory [`ObjectStore`]
pub struct MemoryStore {
    buckets: Mutex<Buckets>,
    faults: Mutex<Faults>,
    page_size: usize,
    chunk_size: usize,
    chunk_delay: Duration,
    batch_sizes: Mutex<Vec<usize>>,
    transfer_starts: Mutex<Vec<String>>,
    active_transfers: AtomicUsize,
    peak_transfers: AtomicUsize,
    list_calls: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(BTreeMap::new()),
            faults: Mutex::new(Faults::default()),
            page_size: DEFAULT_PAGE_SIZE,
            chunk_size: 64 * 1024,
            chunk_delay: Duration::ZERO,
            batch_sizes: Mutex::new(Vec::new()),
            transfer_starts: Mutex::new(Vec::new()),
            active_transfers: AtomicUsize::new(0),
            peak_transfers: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
        }
    }

    /// Maximum keys per list page
    pub fn with_page_size(mut self, n: usize) -> Self {
        self.page_size = n.max(1);
        self
    }

    /// Move data in chunks of `size` bytes, sleeping `delay` before each one
    pub fn with_pacing(mut self, size: usize, delay: Duration) -> Self {
        self.chunk_size = size.max(1);
        self.chunk_delay = delay;
        self
    }

    /// Create a bucket (idempotent)
    pub fn create_bucket(&self, bucket: &str) {
        self.lock_buckets().entry(bucket.to_string()).or_default();
    }

    /// Insert an object directly, creating the bucket if needed
    pub fn insert(&self, bucket: &str, key: &str, data: impl Into<Vec<u8>>) {
        self.lock_buckets()
            .entry(bucket.to_string())
            .or_default()
            .insert(
                key.to_string(),
                StoredObject {
                    data: data.into(),
                    modified: Timestamp::now(),
                },
            );
    }

    /// Whether a key exists
    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.lock_buckets()
            .get(bucket)
            .is_some_and(|objects| objects.contains_key(key))
    }

    /// Object contents, if present
    pub fn data(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.lock_buckets()
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|o| o.data.clone())
    }

    /// All keys in a bucket, sorted
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.lock_buckets()
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Make copies from this source key fail
    pub fn fail_copy_of(&self, key: &str) {
        self.lock_faults().copy_keys.insert(key.to_string());
    }

    /// Make the n-th batch-delete call (zero-based) fail
    pub fn fail_delete_batch(&self, call: usize) {
        self.lock_faults().delete_batches.insert(call);
    }

    /// Make single deletes of this key fail
    pub fn fail_delete_of(&self, key: &str) {
        self.lock_faults().delete_keys.insert(key.to_string());
    }

    /// Answer the next `times` calls of `op` with `RateLimited`
    pub fn rate_limit(&self, op: &'static str, times: u32) {
        self.lock_faults().rate_limits.insert(op, times);
    }

    /// Sizes of every batch-delete call made so far
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Keys of transfers in the order they started
    pub fn transfer_starts(&self) -> Vec<String> {
        self.transfer_starts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Highest number of simultaneous get/put transfers observed
    pub fn peak_transfers(&self) -> usize {
        self.peak_transfers.load(Ordering::SeqCst)
    }

    /// Number of list calls served
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn lock_buckets(&self) -> std::sync::MutexGuard<'_, Buckets> {
        self.buckets.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_rate_limit(&self, op: &'static str) -> Result<()> {
        let mut faults = self.lock_faults();
        if let Some(remaining) = faults.rate_limits.get_mut(op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::RateLimited(format!("{op}: SlowDown")));
            }
        }
        Ok(())
    }

    fn bucket_exists(&self, bucket: &str) -> Result<()> {
        if self.lock_buckets().contains_key(bucket) {
            Ok(())
        } else {
            Err(Error::NotFound(format!("Bucket not found: {bucket}")))
        }
    }

    fn begin_transfer(&self, key: &str) -> TransferGuard<'_> {
        self.transfer_starts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(key.to_string());
        let now = self.active_transfers.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_transfers.fetch_max(now, Ordering::SeqCst);
        TransferGuard { store: self }
    }
}

/// Decrements the active transfer count when a transfer ends, however it ends
struct TransferGuard<'a> {
    store: &'a MemoryStore,
}

impl Drop for TransferGuard<'_> {
    fn drop(&mut self) {
        self.store.active_transfers.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        Ok(self
            .lock_buckets()
            .keys()
            .map(|name| BucketInfo {
                name: name.clone(),
                created: None,
            })
            .collect())
    }

    async fn list_page(&self, bucket: &str, options: ListOptions) -> Result<ListPage> {
        self.check_rate_limit("list_page")?;
        self.bucket_exists(bucket)?;
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        // Objects (Some) and common prefixes (None) share one ordered page, as in S3.
        let mut entries: BTreeMap<String, Option<ObjectInfo>> = BTreeMap::new();
        {
            let buckets = self.lock_buckets();
            let objects = buckets.get(bucket).map(|b| b.iter()).into_iter().flatten();
            for (key, object) in objects {
                let Some(rest) = key.strip_prefix(options.prefix.as_str()) else {
                    continue;
                };
                match options.delimiter.as_deref().and_then(|d| rest.find(d).map(|i| (d, i))) {
                    Some((d, i)) => {
                        let common = format!("{}{}", options.prefix, &rest[..i + d.len()]);
                        entries.insert(common, None);
                    }
                    None => {
                        entries.insert(
                            key.clone(),
                            Some(ObjectInfo {
                                key: key.clone(),
                                size: object.data.len() as u64,
                                last_modified: Some(object.modified),
                                etag: None,
                            }),
                        );
                    }
                }
            }
        }

        let limit = options
            .max_keys
            .map(|m| (m.max(1) as usize).min(self.page_size))
            .unwrap_or(self.page_size);

        let mut page = ListPage::default();
        let start = options.continuation_token.as_deref();
        let mut remaining = entries
            .into_iter()
            .filter(|(k, _)| start.is_none_or(|token| k.as_str() > token));

        let mut last = None;
        for (sort_key, entry) in remaining.by_ref().take(limit) {
            match entry {
                Some(info) => page.objects.push(info),
                None => page.prefixes.push(sort_key.clone()),
            }
            last = Some(sort_key);
        }

        if remaining.next().is_some() {
            page.truncated = true;
            page.next_token = last;
        }

        Ok(page)
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectInfo> {
        self.check_rate_limit("head_object")?;
        let buckets = self.lock_buckets();
        let object = buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .ok_or_else(|| Error::NotFound(format!("{bucket}/{key}")))?;
        Ok(ObjectInfo {
            key: key.to_string(),
            size: object.data.len() as u64,
            last_modified: Some(object.modified),
            etag: None,
        })
    }

    async fn get_to_file(
        &self,
        bucket: &str,
        key: &str,
        destination: &Path,
        progress: Progress,
    ) -> Result<u64> {
        self.check_rate_limit("get_to_file")?;
        let data = self
            .data(bucket, key)
            .ok_or_else(|| Error::NotFound(format!("{bucket}/{key}")))?;
        let _guard = self.begin_transfer(key);

        let mut file = tokio::fs::File::create(destination).await?;
        let mut written = 0u64;
        for chunk in data.chunks(self.chunk_size) {
            if !self.chunk_delay.is_zero() {
                tokio::time::sleep(self.chunk_delay).await;
            }
            file.write_all(chunk).await?;
            written += chunk.len() as u64;
            if !progress.on_progress(written) {
                file.flush().await?;
                return Err(Error::Cancelled);
            }
        }
        file.flush().await?;
        Ok(written)
    }

    async fn put_from_file(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        progress: Progress,
    ) -> Result<u64> {
        self.check_rate_limit("put_from_file")?;
        self.bucket_exists(bucket)?;
        let data = tokio::fs::read(source).await?;
        let _guard = self.begin_transfer(key);

        let mut sent = 0u64;
        for chunk in data.chunks(self.chunk_size) {
            if !self.chunk_delay.is_zero() {
                tokio::time::sleep(self.chunk_delay).await;
            }
            sent += chunk.len() as u64;
            if !progress.on_progress(sent) {
                return Err(Error::Cancelled);
            }
        }

        self.insert(bucket, key, data);
        Ok(sent)
    }

    async fn put_empty(&self, bucket: &str, key: &str) -> Result<()> {
        self.check_rate_limit("put_empty")?;
        self.bucket_exists(bucket)?;
        self.insert(bucket, key, Vec::new());
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.check_rate_limit("delete_object")?;
        if self.lock_faults().delete_keys.contains(key) {
            return Err(Error::Remote(format!("InternalError deleting {key}")));
        }
        if let Some(objects) = self.lock_buckets().get_mut(bucket) {
            objects.remove(key);
        }
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: Vec<String>) -> Result<BatchDeleteResult> {
        self.check_rate_limit("delete_objects")?;
        let call = {
            let mut sizes = self.batch_sizes.lock().unwrap_or_else(|e| e.into_inner());
            sizes.push(keys.len());
            sizes.len() - 1
        };
        if self.lock_faults().delete_batches.contains(&call) {
            return Err(Error::Remote(format!("InternalError on batch {call}")));
        }

        let failing = self.lock_faults().delete_keys.clone();
        let mut result = BatchDeleteResult::default();
        let mut buckets = self.lock_buckets();
        let objects = buckets.entry(bucket.to_string()).or_default();
        for key in keys {
            if failing.contains(&key) {
                result.errors.push(KeyError {
                    key,
                    message: "InternalError".to_string(),
                });
            } else {
                objects.remove(&key);
                result.deleted.push(key);
            }
        }
        Ok(result)
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<()> {
        self.check_rate_limit("copy_object")?;
        if self.lock_faults().copy_keys.contains(src_key) {
            return Err(Error::Remote(format!("InternalError copying {src_key}")));
        }
        let data = self
            .data(src_bucket, src_key)
            .ok_or_else(|| Error::NotFound(format!("{src_bucket}/{src_key}")))?;
        self.insert(dst_bucket, dst_key, data);
        Ok(())
    }
}
