//! Time-bounded memoization of fetch results, keyed by source key.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60 * 24);

#[derive(Debug, Clone)]
pub struct FetchCache {
    inner: Cache<String, Arc<dyn Any + Send + Sync>>,
}

impl FetchCache {
    pub fn with_ttl(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn get<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        self.inner
            .get(key)
            .await
            .and_then(|value| value.downcast::<T>().ok())
    }

    /// Returns the cached value or runs `fetch`; failures are not cached.
    pub async fn try_get_or_fetch<T, E, F, Fut>(&self, key: &str, fetch: F) -> Result<Arc<T>, E>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.get::<T>(key).await {
            tracing::debug!(key, "cache hit");
            return Ok(cached);
        }

        let value = Arc::new(fetch().await?);
        self.inner
            .insert(key.to_string(), value.clone() as Arc<dyn Any + Send + Sync>)
            .await;
        Ok(value)
    }
}

impl Default for FetchCache {
    fn default() -> Self {
        Self::with_ttl(64, DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn second_fetch_is_served_from_cache() {
        let cache = FetchCache::default();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .try_get_or_fetch("sql:occupants", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(vec![1, 2, 3])
                })
                .await
                .unwrap();
            assert_eq!(*value, vec![1, 2, 3]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let cache = FetchCache::default();
        let failed = cache
            .try_get_or_fetch::<Vec<i32>, _, _, _>("blob:rev-mgt/x", || async { Err("down".to_string()) })
            .await;
        assert!(failed.is_err());

        let value = cache
            .try_get_or_fetch("blob:rev-mgt/x", || async { Ok::<_, String>(vec![7]) })
            .await
            .unwrap();
        assert_eq!(*value, vec![7]);
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = FetchCache::with_ttl(8, Duration::from_millis(50));
        cache
            .try_get_or_fetch("k", || async { Ok::<_, String>(1u8) })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(cache.get::<u8>("k").await.is_none());
    }
}
