//! Folder operations over a flat key space
//!
//! A folder is a prefix ending in `/`, made visible either by keys below it
//! or by a zero-byte marker object whose key equals the prefix. Nothing here
//! is atomic: multi-key operations report partial progress through
//! [`FolderOutcome`] and [`FileRenameOutcome`] instead of collapsing it into
//! success or failure.

use std::sync::Arc;

use serde::Serialize;

use crate::cache::ListingCache;
use crate::error::{BatchFailure, Error, Result};
use crate::gateway::{Gateway, MAX_DELETE_BATCH};
use crate::path::{is_prefix, normalize_prefix};
use crate::traits::ObjectListing;

/// Result of a multi-key folder operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FolderOutcome {
    /// Every key was processed
    Done {
        /// Number of keys processed, marker included
        keys: usize,
    },

    /// Deletion stopped part way; `remaining` lists what is still in place
    PartialDelete(BatchFailure),

    /// A copy failed during rename. No source key was deleted; `orphaned`
    /// lists destination keys already written, which should not be trusted.
    CopyAborted {
        failed_key: String,
        orphaned: Vec<String>,
        reason: String,
    },
}

impl FolderOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, FolderOutcome::Done { .. })
    }
}

/// Result of a single-object rename
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FileRenameOutcome {
    Renamed,

    /// The copy succeeded but the source could not be deleted, so the object
    /// exists at both keys
    DanglingSource { reason: String },
}

/// Folder-level operations composed from gateway primitives
#[derive(Clone)]
pub struct FolderOps {
    gateway: Gateway,
    cache: Arc<ListingCache>,
}

impl FolderOps {
    pub fn new(gateway: Gateway, cache: Arc<ListingCache>) -> Self {
        Self { gateway, cache }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn cache(&self) -> &Arc<ListingCache> {
        &self.cache
    }

    /// Single-level listing, served from the cache when present
    pub async fn list(&self, bucket: &str, prefix: &str) -> Result<ObjectListing> {
        if let Some(listing) = self.cache.get(bucket, prefix) {
            tracing::debug!(bucket, prefix, "Listing served from cache");
            return Ok(listing);
        }
        let listing = self.gateway.list_immediate_children(bucket, prefix).await?;
        self.cache.insert(bucket, prefix, listing.clone());
        Ok(listing)
    }

    /// Single-level listing fetched from the store, replacing any cached copy
    pub async fn refresh(&self, bucket: &str, prefix: &str) -> Result<ObjectListing> {
        self.cache.invalidate(bucket, prefix);
        self.list(bucket, prefix).await
    }

    /// Write the marker object for `prefix`. Idempotent.
    ///
    /// Returns the marker key.
    pub async fn create_folder(&self, bucket: &str, prefix: &str) -> Result<String> {
        let marker = normalize_prefix(prefix);
        if marker.is_empty() {
            return Err(Error::InvalidPath("Folder name cannot be empty".into()));
        }
        self.gateway.put_marker(bucket, &marker).await?;
        self.cache.invalidate_ancestors(bucket, &marker);
        tracing::info!(bucket, prefix = %marker, "Folder created");
        Ok(marker)
    }

    /// Delete every key under `prefix`, then the marker.
    pub async fn delete_folder(&self, bucket: &str, prefix: &str) -> Result<FolderOutcome> {
        let prefix = normalize_prefix(prefix);
        if prefix.is_empty() {
            return Err(Error::InvalidPath(
                "Refusing to delete the bucket root".into(),
            ));
        }

        let keys = self.gateway.list_all_keys(bucket, &prefix).await?;
        let outcome = self.remove_tree(bucket, &prefix, keys).await;

        self.cache.invalidate_subtree(bucket, &prefix);
        self.cache.invalidate_ancestors(bucket, &prefix);

        let outcome = outcome?;
        match &outcome {
            FolderOutcome::Done { keys } => {
                tracing::info!(bucket, prefix, keys, "Folder deleted");
            }
            other => tracing::warn!(bucket, prefix, ?other, "Folder delete incomplete"),
        }
        Ok(outcome)
    }

    /// Move every key under `old_prefix` to `new_prefix`.
    ///
    /// All copies complete before any source key is deleted. A failed copy
    /// aborts with the source untouched.
    pub async fn rename_folder(
        &self,
        bucket: &str,
        old_prefix: &str,
        new_prefix: &str,
    ) -> Result<FolderOutcome> {
        let old_prefix = normalize_prefix(old_prefix);
        let new_prefix = normalize_prefix(new_prefix);
        if old_prefix.is_empty() || new_prefix.is_empty() {
            return Err(Error::InvalidPath(
                "Cannot rename to or from the bucket root".into(),
            ));
        }
        if new_prefix.starts_with(&old_prefix) {
            return Err(Error::InvalidPath(format!(
                "Cannot move '{old_prefix}' into itself ('{new_prefix}')"
            )));
        }

        let keys = self.gateway.list_all_keys(bucket, &old_prefix).await?;
        if keys.is_empty() {
            return Err(Error::NotFound(format!("{bucket}/{old_prefix}")));
        }

        let result = self
            .copy_then_remove(bucket, &old_prefix, &new_prefix, keys)
            .await;

        for prefix in [&old_prefix, &new_prefix] {
            self.cache.invalidate_subtree(bucket, prefix);
            self.cache.invalidate_ancestors(bucket, prefix);
        }

        let outcome = result?;
        match &outcome {
            FolderOutcome::Done { keys } => {
                tracing::info!(bucket, from = %old_prefix, to = %new_prefix, keys, "Folder renamed");
            }
            other => {
                tracing::warn!(bucket, from = %old_prefix, to = %new_prefix, ?other, "Folder rename incomplete");
            }
        }
        Ok(outcome)
    }

    async fn copy_then_remove(
        &self,
        bucket: &str,
        old_prefix: &str,
        new_prefix: &str,
        keys: Vec<String>,
    ) -> Result<FolderOutcome> {
        let mut copied = Vec::with_capacity(keys.len());
        for key in &keys {
            let target = format!("{new_prefix}{}", &key[old_prefix.len()..]);
            if let Err(e) = self.gateway.copy_one(bucket, key, bucket, &target).await {
                return Ok(FolderOutcome::CopyAborted {
                    failed_key: key.clone(),
                    orphaned: copied,
                    reason: e.to_string(),
                });
            }
            copied.push(target);
        }
        tracing::debug!(bucket, copied = copied.len(), "All copies succeeded");

        self.remove_tree(bucket, old_prefix, keys).await
    }

    /// Delete `keys` in batches, then the marker at `prefix` on its own.
    async fn remove_tree(
        &self,
        bucket: &str,
        prefix: &str,
        keys: Vec<String>,
    ) -> Result<FolderOutcome> {
        let (markers, body): (Vec<String>, Vec<String>) =
            keys.into_iter().partition(|k| k == prefix);
        let has_marker = !markers.is_empty();

        let deleted = match self.gateway.delete_many(bucket, &body).await {
            Ok(n) => n,
            Err(Error::PartialBatch(mut failure)) => {
                if has_marker {
                    failure.remaining.push(prefix.to_string());
                }
                return Ok(FolderOutcome::PartialDelete(failure));
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = self.gateway.delete_one(bucket, prefix).await {
            return Ok(FolderOutcome::PartialDelete(BatchFailure {
                failed_chunk: body.len().div_ceil(MAX_DELETE_BATCH),
                deleted: body,
                remaining: vec![prefix.to_string()],
                reason: e.to_string(),
            }));
        }

        Ok(FolderOutcome::Done {
            keys: deleted + usize::from(has_marker),
        })
    }

    /// Delete a single object
    pub async fn delete_file(&self, bucket: &str, key: &str) -> Result<()> {
        if key.is_empty() || is_prefix(key) {
            return Err(Error::InvalidPath(format!("'{key}' is not an object key")));
        }
        self.gateway.delete_one(bucket, key).await?;
        self.cache.invalidate_ancestors(bucket, key);
        Ok(())
    }

    /// Copy `old_key` to `new_key`, then delete `old_key`.
    ///
    /// A failed copy is an error with nothing changed. A failed delete after
    /// a good copy is [`FileRenameOutcome::DanglingSource`].
    pub async fn rename_file(
        &self,
        bucket: &str,
        old_key: &str,
        new_key: &str,
    ) -> Result<FileRenameOutcome> {
        for key in [old_key, new_key] {
            if key.is_empty() || is_prefix(key) {
                return Err(Error::InvalidPath(format!("'{key}' is not an object key")));
            }
        }
        if old_key == new_key {
            return Err(Error::InvalidPath(format!(
                "Source and destination are the same: {old_key}"
            )));
        }

        self.gateway.copy_one(bucket, old_key, bucket, new_key).await?;
        self.cache.invalidate_ancestors(bucket, new_key);

        let outcome = match self.gateway.delete_one(bucket, old_key).await {
            Ok(()) => {
                tracing::info!(bucket, from = old_key, to = new_key, "Object renamed");
                FileRenameOutcome::Renamed
            }
            Err(e) => {
                tracing::warn!(bucket, key = old_key, "Source left behind after copy: {e}");
                FileRenameOutcome::DanglingSource {
                    reason: e.to_string(),
                }
            }
        };
        self.cache.invalidate_ancestors(bucket, old_key);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn ops(store: &Arc<MemoryStore>) -> FolderOps {
        FolderOps::new(Gateway::new(store.clone()), Arc::new(ListingCache::new()))
    }

    fn tree() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.insert("b", "a/", "");
        store.insert("b", "a/x", "x");
        store.insert("b", "a/y/z", "z");
        store.insert("b", "ab", "keep");
        store
    }

    #[tokio::test]
    async fn test_create_folder_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        store.create_bucket("b");
        let ops = ops(&store);

        assert_eq!(ops.create_folder("b", "new").await.unwrap(), "new/");
        assert_eq!(ops.create_folder("b", "new/").await.unwrap(), "new/");
        assert_eq!(store.keys("b"), vec!["new/".to_string()]);
        assert!(ops.create_folder("b", "").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_folder_removes_marker_and_children() {
        let store = tree();
        let ops = ops(&store);

        let outcome = ops.delete_folder("b", "a").await.unwrap();
        assert_eq!(outcome, FolderOutcome::Done { keys: 3 });
        assert_eq!(store.keys("b"), vec!["ab".to_string()]);
        // Children in one batch, marker on its own
        assert_eq!(store.batch_sizes(), vec![2]);
    }

    #[tokio::test]
    async fn test_delete_folder_rejects_root() {
        let store = tree();
        let ops = ops(&store);
        assert!(matches!(
            ops.delete_folder("b", "").await,
            Err(Error::InvalidPath(_))
        ));
        assert_eq!(store.keys("b").len(), 4);
    }

    #[tokio::test]
    async fn test_delete_folder_reports_remaining_keys() {
        let store = Arc::new(MemoryStore::new());
        store.insert("b", "big/", "");
        let children: Vec<String> = (0..1500).map(|i| format!("big/{i:04}")).collect();
        for key in &children {
            store.insert("b", key, "");
        }
        store.fail_delete_batch(1);
        let ops = ops(&store);

        let outcome = ops.delete_folder("b", "big/").await.unwrap();
        let FolderOutcome::PartialDelete(failure) = outcome else {
            panic!("expected partial delete, got {outcome:?}");
        };
        assert_eq!(failure.failed_chunk, 1);
        assert_eq!(failure.deleted, children[..1000].to_vec());
        let mut expected = children[1000..].to_vec();
        expected.push("big/".to_string());
        assert_eq!(failure.remaining, expected);
        assert!(store.contains("b", "big/"));
        assert!(store.contains("b", "big/1200"));
    }

    #[tokio::test]
    async fn test_rename_folder_moves_every_key() {
        let store = tree();
        let ops = ops(&store);

        let outcome = ops.rename_folder("b", "a/", "b/").await.unwrap();
        assert_eq!(outcome, FolderOutcome::Done { keys: 3 });
        assert_eq!(
            store.keys("b"),
            vec!["ab", "b/", "b/x", "b/y/z"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
        );
        assert_eq!(store.data("b", "b/y/z").unwrap(), b"z");
    }

    #[tokio::test]
    async fn test_rename_folder_copy_failure_keeps_source() {
        let store = tree();
        store.fail_copy_of("a/y/z");
        let ops = ops(&store);

        let outcome = ops.rename_folder("b", "a/", "b/").await.unwrap();
        let FolderOutcome::CopyAborted {
            failed_key,
            orphaned,
            ..
        } = outcome
        else {
            panic!("expected aborted copy, got {outcome:?}");
        };
        assert_eq!(failed_key, "a/y/z");
        assert_eq!(orphaned, vec!["b/".to_string(), "b/x".to_string()]);

        for key in ["a/", "a/x", "a/y/z"] {
            assert!(store.contains("b", key), "{key} should survive");
        }
        assert!(store.contains("b", "b/x"));
        assert!(!store.contains("b", "b/y/z"));
        assert!(store.batch_sizes().is_empty());
    }

    #[tokio::test]
    async fn test_rename_folder_rejects_bad_targets() {
        let store = tree();
        let ops = ops(&store);

        assert!(matches!(
            ops.rename_folder("b", "a/", "a/inner/").await,
            Err(Error::InvalidPath(_))
        ));
        assert!(matches!(
            ops.rename_folder("b", "a", "").await,
            Err(Error::InvalidPath(_))
        ));
        assert!(matches!(
            ops.rename_folder("b", "missing/", "elsewhere/").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rename_file_dangling_source() {
        let store = tree();
        store.fail_delete_of("ab");
        let ops = ops(&store);

        let outcome = ops.rename_file("b", "ab", "moved").await.unwrap();
        assert!(matches!(outcome, FileRenameOutcome::DanglingSource { .. }));
        assert!(store.contains("b", "ab"));
        assert_eq!(store.data("b", "moved").unwrap(), b"keep");
    }

    #[tokio::test]
    async fn test_rename_file_copy_failure_is_error() {
        let store = tree();
        let ops = ops(&store);

        assert!(matches!(
            ops.rename_file("b", "nope", "other").await,
            Err(Error::NotFound(_))
        ));
        assert_eq!(
            ops.rename_file("b", "a/x", "a/w").await.unwrap(),
            FileRenameOutcome::Renamed
        );
        assert!(!store.contains("b", "a/x"));
    }

    #[tokio::test]
    async fn test_delete_file_refreshes_parent_listing() {
        let store = tree();
        let ops = ops(&store);

        assert_eq!(ops.list("b", "a/").await.unwrap().files.len(), 1);
        ops.delete_file("b", "a/x").await.unwrap();
        assert!(!store.contains("b", "a/x"));
        assert!(ops.list("b", "a/").await.unwrap().files.is_empty());
        assert!(matches!(
            ops.delete_file("b", "a/").await,
            Err(Error::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_list_uses_cache_until_mutation() {
        let store = tree();
        let ops = ops(&store);

        let first = ops.list("b", "a/").await.unwrap();
        let calls = store.list_calls();
        let second = ops.list("b", "a").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.list_calls(), calls);

        ops.create_folder("b", "a/new").await.unwrap();
        let third = ops.list("b", "a/").await.unwrap();
        assert!(third.folders.contains(&"a/new/".to_string()));
        assert!(store.list_calls() > calls);
    }

    #[tokio::test]
    async fn test_rename_folder_delete_failure_reports_remaining() {
        let store = tree();
        store.fail_delete_batch(0);
        let ops = ops(&store);

        let outcome = ops.rename_folder("b", "a/", "b/").await.unwrap();
        let FolderOutcome::PartialDelete(failure) = outcome else {
            panic!("expected partial delete, got {outcome:?}");
        };
        assert_eq!(failure.failed_chunk, 0);
        assert!(failure.deleted.is_empty());
        assert_eq!(failure.remaining, vec!["a/x", "a/y/z", "a/"]);
        for key in ["a/", "a/x", "a/y/z", "b/", "b/x", "b/y/z"] {
            assert!(store.contains("b", key), "{key} should exist");
        }
    }

    #[tokio::test]
    async fn test_rename_folder_marker_delete_failure() {
        let store = tree();
        store.fail_delete_of("a/");
        let ops = ops(&store);

        let outcome = ops.rename_folder("b", "a/", "b/").await.unwrap();
        let FolderOutcome::PartialDelete(failure) = outcome else {
            panic!("expected partial delete, got {outcome:?}");
        };
        assert_eq!(failure.deleted, vec!["a/x", "a/y/z"]);
        assert_eq!(failure.remaining, vec!["a/"]);
        assert!(store.contains("b", "a/"));
        assert!(!store.contains("b", "a/x"));
        assert!(store.contains("b", "b/y/z"));
    }

    #[tokio::test]
    async fn test_nested_create_refreshes_listings_above() {
        let store = Arc::new(MemoryStore::new());
        store.create_bucket("b");
        let ops = ops(&store);

        assert!(ops.list("b", "").await.unwrap().folders.is_empty());
        ops.create_folder("b", "a/b/c").await.unwrap();

        assert_eq!(ops.list("b", "").await.unwrap().folders, vec!["a/"]);
        assert_eq!(ops.list("b", "a/").await.unwrap().folders, vec!["a/b/"]);
    }

    #[tokio::test]
    async fn test_rename_into_new_branch_refreshes_root() {
        let store = tree();
        let ops = ops(&store);

        assert_eq!(ops.list("b", "").await.unwrap().folders, vec!["a/"]);
        let outcome = ops.rename_folder("b", "a/", "p/q/r/").await.unwrap();
        assert_eq!(outcome, FolderOutcome::Done { keys: 3 });

        assert_eq!(ops.list("b", "").await.unwrap().folders, vec!["p/"]);

        ops.rename_file("b", "ab", "s/t/ab").await.unwrap();
        let root = ops.list("b", "").await.unwrap();
        assert_eq!(root.folders, vec!["p/", "s/"]);
        assert!(root.files.is_empty());
    }
}
