//! ObjectStore trait definition
//!
//! This trait is the raw capability over an S3-compatible store: one method
//! per remote call, no retries, no scheduling. The gateway layers retry,
//! pagination and batching on top of it, and the S3 adapter implements it.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Receives cumulative transferred bytes during a get or put.
pub trait ProgressCallback: Send + Sync {
    /// Called with the total number of bytes moved so far.
    ///
    /// Returns `false` to ask the store to stop; the transfer then returns
    /// [`crate::Error::Cancelled`] after unwinding normally.
    fn on_progress(&self, transferred: u64) -> bool;

    /// Cheap cancel check for callers that skip `on_progress` between updates
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Shared progress callback handed to store calls
pub type Progress = Arc<dyn ProgressCallback>;

/// A progress callback that ignores updates and never cancels
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_progress(&self, _transferred: u64) -> bool {
        true
    }
}

/// A progress callback that wraps a closure
pub struct FnProgress<F>(pub F);

impl<F> ProgressCallback for FnProgress<F>
where
    F: Fn(u64) -> bool + Send + Sync,
{
    fn on_progress(&self, transferred: u64) -> bool {
        (self.0)(transferred)
    }
}

/// Create a shared progress callback from a closure
pub fn progress_fn<F>(f: F) -> Progress
where
    F: Fn(u64) -> bool + Send + Sync + 'static,
{
    Arc::new(FnProgress(f))
}

/// Metadata for an object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Object key
    pub key: String,

    /// Size in bytes
    pub size: u64,

    /// Last modified timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<Timestamp>,

    /// ETag (usually MD5 for single-part uploads)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl ObjectInfo {
    /// Create a new ObjectInfo with only key and size
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
            last_modified: None,
            etag: None,
        }
    }

    /// Human-readable size
    pub fn size_human(&self) -> String {
        humansize::format_size(self.size, humansize::BINARY)
    }
}

/// A bucket visible to the credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketInfo {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<Timestamp>,
}

/// Options for a single list call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Prefix to filter by
    pub prefix: String,

    /// Group keys by this delimiter into common prefixes; `None` lists recursively
    pub delimiter: Option<String>,

    /// Continuation token from the previous page
    pub continuation_token: Option<String>,

    /// Maximum number of keys to return per request
    pub max_keys: Option<i32>,
}

/// One page of a list call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Common prefixes (only with a delimiter)
    pub prefixes: Vec<String>,

    /// Objects on this page
    pub objects: Vec<ObjectInfo>,

    /// Whether more pages follow
    pub truncated: bool,

    /// Token for the next page
    pub next_token: Option<String>,
}

/// Single-level view of a prefix
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectListing {
    /// Sub-prefixes one level below the queried prefix, sorted and distinct
    pub folders: Vec<String>,

    /// Objects directly under the queried prefix, sorted by key
    pub files: Vec<ObjectInfo>,
}

impl ObjectListing {
    pub fn is_empty(&self) -> bool {
        self.folders.is_empty() && self.files.is_empty()
    }
}

/// A key the store refused to delete inside a batch call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyError {
    pub key: String,
    pub message: String,
}

/// Result of one batch-delete call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchDeleteResult {
    /// Keys the store confirmed deleted
    pub deleted: Vec<String>,

    /// Keys the store reported errors for
    pub errors: Vec<KeyError>,
}

/// Trait for S3-compatible storage operations
///
/// This trait is implemented by the S3 adapter and the in-memory store, and
/// can be mocked for testing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List buckets
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>>;

    /// Fetch one page of keys
    async fn list_page(&self, bucket: &str, options: ListOptions) -> Result<ListPage>;

    /// Get object metadata; `NotFound` if the key does not exist
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectInfo>;

    /// Stream an object into a local file, returning bytes written
    async fn get_to_file(
        &self,
        bucket: &str,
        key: &str,
        destination: &Path,
        progress: Progress,
    ) -> Result<u64>;

    /// Stream a local file into an object, returning bytes sent
    async fn put_from_file(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        progress: Progress,
    ) -> Result<u64>;

    /// Write a zero-byte object
    async fn put_empty(&self, bucket: &str, key: &str) -> Result<()>;

    /// Delete one object; deleting a missing key succeeds
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    /// Delete up to the store's batch limit of keys in one call
    async fn delete_objects(&self, bucket: &str, keys: Vec<String>) -> Result<BatchDeleteResult>;

    /// Server-side copy
    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_object_info_new() {
        let info = ObjectInfo::new("dir/test.txt", 2048);
        assert_eq!(info.key, "dir/test.txt");
        assert_eq!(info.size, 2048);
        assert!(info.size_human().contains("KiB"));
    }

    #[test]
    fn test_progress_fn_captures_state() {
        let seen = Arc::new(AtomicU64::new(0));
        let seen_clone = seen.clone();
        let progress = progress_fn(move |bytes| {
            seen_clone.store(bytes, Ordering::SeqCst);
            bytes < 100
        });

        assert!(progress.on_progress(10));
        assert!(!progress.on_progress(150));
        assert_eq!(seen.load(Ordering::SeqCst), 150);
        assert!(NoProgress.on_progress(u64::MAX));
    }

    #[test]
    fn test_empty_listing() {
        assert!(ObjectListing::default().is_empty());
        let listing = ObjectListing {
            folders: vec!["a/".into()],
            files: vec![],
        };
        assert!(!listing.is_empty());
    }
}
