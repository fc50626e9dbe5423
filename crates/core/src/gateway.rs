//! Object store gateway
//!
//! Stateless façade over an [`ObjectStore`]: retries rate-limited calls with
//! jittered exponential backoff, paginates listings to completion, splits
//! batch deletes at the store's limit and rate-limits progress callbacks.
//! It does no caching and no scheduling.

use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;

use crate::config::RetryConfig;
use crate::error::{BatchFailure, Error, Result};
use crate::path::{normalize_prefix, DELIMITER};
use crate::traits::{
    BucketInfo, ListOptions, ObjectListing, ObjectStore, Progress, ProgressCallback,
};

/// Maximum keys per batch-delete call (S3 limit)
pub const MAX_DELETE_BATCH: usize = 1000;

/// Minimum spacing of progress callbacks forwarded to callers (8 per second)
pub const PROGRESS_MIN_INTERVAL: Duration = Duration::from_millis(125);

/// Upper bound on list pages for one prefix, guarding against a store that
/// keeps handing out tokens
const MAX_LIST_PAGES: usize = 1_000_000;

/// Forwards at most one progress update per interval
struct ThrottledProgress {
    inner: Progress,
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl ProgressCallback for ThrottledProgress {
    fn on_progress(&self, transferred: u64) -> bool {
        let now = Instant::now();
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let due = last.is_none_or(|at| now.duration_since(at) >= self.interval);
        if !due {
            return !self.inner.is_cancelled();
        }
        *last = Some(now);
        drop(last);
        self.inner.on_progress(transferred)
    }

    fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }
}

/// Wrap a progress callback so it is invoked at most once per `interval`
pub fn throttle(inner: Progress, interval: Duration) -> Progress {
    Arc::new(ThrottledProgress {
        inner,
        interval,
        last: Mutex::new(None),
    })
}

/// Gateway over an object store
#[derive(Clone)]
pub struct Gateway {
    store: Arc<dyn ObjectStore>,
    retry: RetryConfig,
    progress_interval: Duration,
}

impl Gateway {
    /// Create a gateway with the default retry policy
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            retry: RetryConfig::default(),
            progress_interval: PROGRESS_MIN_INTERVAL,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Override the progress rate limit; intervals below the default are raised to it
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval.max(PROGRESS_MIN_INTERVAL);
        self
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Run `call`, retrying `RateLimited` failures until the attempt budget is spent.
    ///
    /// An exhausted budget surfaces as `Remote` carrying the last cause.
    async fn retrying<T, F, Fut>(&self, op: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Err(e) if e.is_retryable() => {
                    if attempt >= max_attempts {
                        tracing::warn!(op, attempt, "Retry budget exhausted: {e}");
                        return Err(Error::Remote(format!(
                            "{op} failed after {attempt} attempts: {e}"
                        )));
                    }
                    let ceiling = self.retry.backoff_ceiling(attempt);
                    let delay = {
                        let ms = ceiling.as_millis() as u64;
                        Duration::from_millis(rand::thread_rng().gen_range(0..=ms))
                    };
                    tracing::warn!(op, attempt, ?delay, "Rate limited, backing off: {e}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// List buckets visible to the credentials
    pub async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        self.retrying("list_buckets", || self.store.list_buckets())
            .await
    }

    /// Single-level listing of `prefix`.
    ///
    /// The folder marker for `prefix` itself is not reported as a file.
    pub async fn list_immediate_children(&self, bucket: &str, prefix: &str) -> Result<ObjectListing> {
        let prefix = normalize_prefix(prefix);
        let mut folders = std::collections::BTreeSet::new();
        let mut files = Vec::new();

        self.paginate(bucket, &prefix, Some(DELIMITER.to_string()), |page| {
            folders.extend(page.prefixes);
            files.extend(page.objects.into_iter().filter(|o| o.key != prefix));
        })
        .await?;

        files.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(ObjectListing {
            folders: folders.into_iter().collect(),
            files,
        })
    }

    /// Every key under `prefix`, across all pages, including a marker equal to `prefix`
    pub async fn list_all_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        self.paginate(bucket, prefix, None, |page| {
            keys.extend(page.objects.into_iter().map(|o| o.key));
        })
        .await?;
        Ok(keys)
    }

    async fn paginate<F>(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<String>,
        mut on_page: F,
    ) -> Result<()>
    where
        F: FnMut(crate::traits::ListPage),
    {
        let mut token: Option<String> = None;
        for page_no in 0..MAX_LIST_PAGES {
            let options = ListOptions {
                prefix: prefix.to_string(),
                delimiter: delimiter.clone(),
                continuation_token: token.clone(),
                max_keys: None,
            };
            let page = self
                .retrying("list_objects", || self.store.list_page(bucket, options.clone()))
                .await?;
            let truncated = page.truncated;
            let next = page.next_token.clone();
            on_page(page);

            if !truncated {
                tracing::debug!(bucket, prefix, pages = page_no + 1, "Listing complete");
                return Ok(());
            }
            match next {
                Some(next) if Some(&next) != token.as_ref() => token = Some(next),
                Some(_) => {
                    return Err(Error::Remote(format!(
                        "Store repeated continuation token listing {bucket}/{prefix}"
                    )));
                }
                None => {
                    return Err(Error::Remote(format!(
                        "Truncated listing of {bucket}/{prefix} without continuation token"
                    )));
                }
            }
        }
        Err(Error::Remote(format!(
            "Listing {bucket}/{prefix} exceeded {MAX_LIST_PAGES} pages"
        )))
    }

    /// Size of an object in bytes
    pub async fn object_size(&self, bucket: &str, key: &str) -> Result<u64> {
        let info = self
            .retrying("head_object", || self.store.head_object(bucket, key))
            .await?;
        Ok(info.size)
    }

    /// Download an object to `destination`.
    ///
    /// `on_progress` receives cumulative bytes, rate-limited; returning `false`
    /// stops the transfer with `Cancelled`.
    pub async fn get_stream(
        &self,
        bucket: &str,
        key: &str,
        destination: &Path,
        on_progress: Progress,
    ) -> Result<u64> {
        let progress = throttle(on_progress, self.progress_interval);
        self.retrying("get_object", || {
            self.store
                .get_to_file(bucket, key, destination, progress.clone())
        })
        .await
    }

    /// Upload `source` to an object
    pub async fn put_stream(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        on_progress: Progress,
    ) -> Result<u64> {
        let progress = throttle(on_progress, self.progress_interval);
        self.retrying("put_object", || {
            self.store
                .put_from_file(bucket, key, source, progress.clone())
        })
        .await
    }

    /// Write a zero-byte marker object
    pub async fn put_marker(&self, bucket: &str, key: &str) -> Result<()> {
        self.retrying("put_object", || self.store.put_empty(bucket, key))
            .await
    }

    pub async fn delete_one(&self, bucket: &str, key: &str) -> Result<()> {
        self.retrying("delete_object", || self.store.delete_object(bucket, key))
            .await
    }

    /// Delete `keys` in chunks of [`MAX_DELETE_BATCH`], one batch call per chunk.
    ///
    /// Stops at the first chunk that fails or reports per-key errors and
    /// returns `PartialBatch` naming every key not confirmed deleted.
    pub async fn delete_many(&self, bucket: &str, keys: &[String]) -> Result<usize> {
        let mut deleted: Vec<String> = Vec::with_capacity(keys.len());

        for (index, chunk) in keys.chunks(MAX_DELETE_BATCH).enumerate() {
            let result = self
                .retrying("delete_objects", || {
                    self.store.delete_objects(bucket, chunk.to_vec())
                })
                .await;

            let start = index * MAX_DELETE_BATCH;
            match result {
                Ok(result) if result.errors.is_empty() => {
                    tracing::debug!(bucket, chunk = index, count = chunk.len(), "Batch deleted");
                    deleted.extend(result.deleted);
                }
                Ok(result) => {
                    let reason = result
                        .errors
                        .iter()
                        .map(|e| format!("{}: {}", e.key, e.message))
                        .collect::<Vec<_>>()
                        .join("; ");
                    let mut remaining: Vec<String> =
                        result.errors.into_iter().map(|e| e.key).collect();
                    remaining.extend(keys[start + chunk.len()..].iter().cloned());
                    deleted.extend(result.deleted);
                    return Err(self.batch_failure(bucket, index, deleted, remaining, reason));
                }
                Err(e) => {
                    let remaining = keys[start..].to_vec();
                    return Err(self.batch_failure(bucket, index, deleted, remaining, e.to_string()));
                }
            }
        }

        Ok(deleted.len())
    }

    fn batch_failure(
        &self,
        bucket: &str,
        failed_chunk: usize,
        deleted: Vec<String>,
        remaining: Vec<String>,
        reason: String,
    ) -> Error {
        tracing::warn!(
            bucket,
            failed_chunk,
            deleted = deleted.len(),
            remaining = remaining.len(),
            "Batch delete stopped: {reason}"
        );
        Error::PartialBatch(BatchFailure {
            failed_chunk,
            deleted,
            remaining,
            reason,
        })
    }

    /// Server-side copy of one object
    pub async fn copy_one(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<()> {
        self.retrying("copy_object", || {
            self.store
                .copy_object(src_bucket, src_key, dst_bucket, dst_key)
        })
        .await
    }
}
