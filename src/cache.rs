//! Processed-result caching.
//!
//! Re-running the same operation on the same Telegram file is common (users
//! tap a button twice, or re-request a preset). Results are small PNGs, so a
//! short-lived in-memory cache avoids burning vendor credits and CPU on
//! repeats. A cache hit still requires normal admission.

use bytes::Bytes;
use moka::future::Cache;
use std::time::Duration;

use crate::config::{RESULT_CACHE_MAX_ENTRIES, RESULT_CACHE_TTL_SECS};
use crate::session::Operation;

/// Cache of processed images keyed by source file and operation
#[derive(Clone)]
pub struct ResultCache {
    cache: Cache<String, Bytes>,
}

impl ResultCache {
    /// Create a cache with the configured TTL and capacity
    #[must_use]
    pub fn new() -> Self {
        Self::with_params(RESULT_CACHE_TTL_SECS, RESULT_CACHE_MAX_ENTRIES)
    }

    /// Create a cache with explicit TTL and capacity
    #[must_use]
    pub fn with_params(ttl_secs: u64, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();
        Self { cache }
    }

    fn key(file_id: &str, operation: Operation) -> String {
        format!("{file_id}:{}", operation.callback_data())
    }

    /// Look up a previously processed result
    pub async fn get(&self, file_id: &str, operation: Operation) -> Option<Bytes> {
        self.cache.get(&Self::key(file_id, operation)).await
    }

    /// Store a processed result
    pub async fn insert(&self, file_id: &str, operation: Operation, data: Bytes) {
        self.cache.insert(Self::key(file_id, operation), data).await;
    }

    /// Current number of cached results (for `/usage` statistics)
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip() {
        let cache = ResultCache::with_params(60, 10);
        let data = Bytes::from_static(b"png-bytes");

        assert_eq!(cache.get("file-1", Operation::Wallpaper).await, None);
        cache.insert("file-1", Operation::Wallpaper, data.clone()).await;
        assert_eq!(cache.get("file-1", Operation::Wallpaper).await, Some(data));
    }

    #[tokio::test]
    async fn test_keys_include_operation() {
        let cache = ResultCache::with_params(60, 10);
        cache
            .insert("file-1", Operation::RemoveBackground, Bytes::from_static(b"a"))
            .await;

        // Same file, different operation: distinct entry.
        assert_eq!(cache.get("file-1", Operation::AiEdit).await, None);
        // Different file, same operation: distinct entry.
        assert_eq!(cache.get("file-2", Operation::RemoveBackground).await, None);
    }
}
