//! Listing cache
//!
//! Caches single-level listings keyed by `(bucket, prefix)`. Every component
//! that mutates the store is handed the cache and must invalidate the
//! prefixes it touched; nothing else reaches into it.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::path::{key_parent, normalize_prefix, parent_prefix};
use crate::traits::ObjectListing;

type CacheKey = (String, String);

/// In-memory cache of [`ObjectListing`]s
#[derive(Debug, Default)]
pub struct ListingCache {
    entries: RwLock<HashMap<CacheKey, ObjectListing>>,
}

impl ListingCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(bucket: &str, prefix: &str) -> CacheKey {
        (bucket.to_string(), normalize_prefix(prefix))
    }

    /// Cached listing for a prefix
    pub fn get(&self, bucket: &str, prefix: &str) -> Option<ObjectListing> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&Self::key(bucket, prefix))
            .cloned()
    }

    pub fn insert(&self, bucket: &str, prefix: &str, listing: ObjectListing) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(Self::key(bucket, prefix), listing);
    }

    /// Drop the listing of exactly this prefix
    pub fn invalidate(&self, bucket: &str, prefix: &str) {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&Self::key(bucket, prefix));
        if removed.is_some() {
            tracing::debug!(bucket, prefix, "Listing cache invalidated");
        }
    }

    /// Drop the listing of this prefix and of every prefix below it
    pub fn invalidate_subtree(&self, bucket: &str, prefix: &str) {
        let prefix = normalize_prefix(prefix);
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|(b, p), _| !(b == bucket && p.starts_with(&prefix)));
        tracing::debug!(
            bucket,
            prefix,
            dropped = before - entries.len(),
            "Listing cache subtree invalidated"
        );
    }

    /// Drop the listing that shows `key` (its parent prefix)
    pub fn invalidate_for_key(&self, bucket: &str, key: &str) {
        self.invalidate(bucket, &key_parent(key));
    }

    /// Drop every listing from the parent of `key` up to the bucket root.
    ///
    /// A new or removed key can add or remove intermediate folders, so every
    /// listing on the way up may have changed.
    pub fn invalidate_ancestors(&self, bucket: &str, key: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let mut prefix = key_parent(key);
        loop {
            entries.remove(&(bucket.to_string(), prefix.clone()));
            if prefix.is_empty() {
                break;
            }
            prefix = parent_prefix(&prefix);
        }
        tracing::debug!(bucket, key, "Listing cache ancestors invalidated");
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
