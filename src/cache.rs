//! Instance-wide TTL cache for hierarchy lookups and metadata catalogs.
//!
//! Values are stored type-erased and recovered by downcast, so a single
//! cache can hold id→name maps, catalogs and plain strings side by side.
//! Writes are last-write-wins and restart the entry's TTL.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

/// Cache entry with expiration.
struct CacheEntry {
    value: Arc<dyn Any + Send + Sync>,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Shared, concurrently accessible TTL cache. Cloning is cheap and clones
/// share storage.
#[derive(Clone, Default)]
pub struct Cache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a live entry of type `T`.
    ///
    /// An entry stored under the same key with a different type is treated
    /// as a miss.
    pub async fn get<T>(&self, key: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if !entry.is_live(Instant::now()) {
            return None;
        }
        entry.value.downcast_ref::<T>().cloned()
    }

    /// Store a value, replacing any previous entry and restarting its TTL.
    pub async fn set<T>(&self, key: impl Into<String>, value: T, ttl: Duration)
    where
        T: Send + Sync + 'static,
    {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.is_live(now));
        entries.insert(
            key.into(),
            CacheEntry {
                value: Arc::new(value),
                expires_at: now + ttl,
            },
        );
    }

    /// Read-through lookup: return the cached value or derive, store and
    /// return a fresh one. Failures are not cached.
    ///
    /// Concurrent misses on the same key may each run `load`; the last
    /// writer wins, which is fine because every value is re-derivable.
    pub async fn get_or_try_insert_with<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        load: F,
    ) -> Result<T, E>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get::<T>(key).await {
            tracing::debug!(key, "cache hit");
            return Ok(value);
        }

        tracing::debug!(key, "cache miss");
        let value = load().await?;
        self.set(key, value.clone(), ttl).await;
        Ok(value)
    }

    /// Number of stored entries, live or not yet purged.
    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = Cache::new();
        cache
            .set("analytics:accounts", "value".to_string(), Duration::from_secs(60))
            .await;

        assert_eq!(
            cache.get::<String>("analytics:accounts").await.as_deref(),
            Some("value")
        );

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get::<String>("analytics:accounts").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_restarts_ttl() {
        let cache = Cache::new();
        cache.set("k", 1u32, Duration::from_secs(10)).await;
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.set("k", 2u32, Duration::from_secs(10)).await;
        tokio::time::advance(Duration::from_secs(8)).await;

        assert_eq!(cache.get::<u32>("k").await, Some(2));
    }

    #[tokio::test]
    async fn test_type_mismatch_is_a_miss() {
        let cache = Cache::new();
        cache.set("k", 7u32, Duration::from_secs(10)).await;
        assert_eq!(cache.get::<String>("k").await, None);
    }

    #[tokio::test]
    async fn test_read_through_loads_once() {
        let cache = Cache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: BTreeMap<String, String> = cache
                .get_or_try_insert_with("analytics:accounts", Duration::from_secs(60), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, std::convert::Infallible>(BTreeMap::from([(
                        "1".to_string(),
                        "Main".to_string(),
                    )]))
                })
                .await
                .unwrap();
            assert_eq!(value.get("1").map(String::as_str), Some("Main"));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_load_is_not_cached() {
        let cache = Cache::new();
        let result: Result<String, &str> = cache
            .get_or_try_insert_with("k", Duration::from_secs(60), || async { Err("boom") })
            .await;
        assert_eq!(result, Err("boom"));
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_are_purged_on_write() {
        let cache = Cache::new();
        cache.set("old", 1u8, Duration::from_secs(1)).await;
        tokio::time::advance(Duration::from_secs(2)).await;
        cache.set("new", 2u8, Duration::from_secs(60)).await;
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_writers_last_write_wins() {
        let cache = Cache::new();
        let mut handles = Vec::new();
        for i in 0..16u32 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.set("shared", i, Duration::from_secs(60)).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let value = cache.get::<u32>("shared").await.unwrap();
        assert!(value < 16);
        assert_eq!(cache.len().await, 1);
    }
}
