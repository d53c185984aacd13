//! Process-wide snapshot cache with a single-flight refresh.
//!
//! Lifecycle per snapshot: `Empty -> Loading -> Fresh -> Stale -> Fresh'`.
//! Only one loader runs at a time; readers always see either the previous or
//! the new snapshot atomically. An expired snapshot is served immediately
//! while a background task refreshes it, so a slow source never holds
//! requests. Only the very first load blocks callers.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::warn;

use crate::error::Error;

struct Entry<T> {
    value: Arc<T>,
    loaded_at: Instant,
    stale: bool,
}

struct Inner<T> {
    ttl: Duration,
    refresh_timeout: Duration,
    state: Mutex<Option<Entry<T>>>,
    inflight: Arc<tokio::sync::Mutex<()>>,
}

pub struct SnapshotCache<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for SnapshotCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> SnapshotCache<T> {
    pub fn new(ttl: Duration, refresh_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                ttl,
                refresh_timeout,
                state: Mutex::new(None),
                inflight: Arc::new(tokio::sync::Mutex::new(())),
            }),
        }
    }

    /// Mark the current snapshot stale. It stays available for serve-stale
    /// until the next successful refresh replaces it.
    pub fn invalidate(&self) {
        let mut state = self.inner.state.lock().expect("cache state lock poisoned");
        if let Some(entry) = state.as_mut() {
            entry.stale = true;
        }
    }

    /// Return the cached snapshot, loading or refreshing as needed.
    ///
    /// - Fresh snapshot: returned directly.
    /// - Stale snapshot: returned directly; one background refresh is kicked
    ///   off if none is already running.
    /// - No snapshot: the loader runs inline, coalesced across concurrent
    ///   callers, bounded by the refresh timeout. Its error propagates.
    pub async fn get_with<F, Fut>(&self, load: F) -> Result<Arc<T>, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        if let Some(value) = self.lookup(true) {
            return Ok(value);
        }
        if let Some(stale) = self.lookup(false) {
            self.spawn_refresh(load());
            return Ok(stale);
        }

        let _guard = self.inner.inflight.lock().await;
        // Another caller may have completed the first load while we waited.
        if let Some(value) = self.lookup(false) {
            return Ok(value);
        }
        match tokio::time::timeout(self.inner.refresh_timeout, load()).await {
            Ok(Ok(value)) => Ok(self.store(value)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Internal("snapshot load timed out".to_owned())),
        }
    }

    /// Snapshot currently held, fresh or not, without triggering any load.
    pub fn peek(&self) -> Option<Arc<T>> {
        self.lookup(false)
    }

    fn lookup(&self, require_fresh: bool) -> Option<Arc<T>> {
        let state = self.inner.state.lock().expect("cache state lock poisoned");
        state.as_ref().and_then(|entry| {
            let fresh = !entry.stale && entry.loaded_at.elapsed() < self.inner.ttl;
            if !require_fresh || fresh {
                Some(entry.value.clone())
            } else {
                None
            }
        })
    }

    fn store(&self, value: T) -> Arc<T> {
        let value = Arc::new(value);
        let mut state = self.inner.state.lock().expect("cache state lock poisoned");
        *state = Some(Entry {
            value: value.clone(),
            loaded_at: Instant::now(),
            stale: false,
        });
        value
    }

    fn spawn_refresh<Fut>(&self, fut: Fut)
    where
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        let Ok(guard) = self.inner.inflight.clone().try_lock_owned() else {
            return; // a refresh is already running
        };
        let cache = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            match tokio::time::timeout(cache.inner.refresh_timeout, fut).await {
                Ok(Ok(value)) => {
                    cache.store(value);
                }
                Ok(Err(e)) => warn!("snapshot refresh failed, serving stale data: {e}"),
                Err(_) => warn!("snapshot refresh timed out, serving stale data"),
            }
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counted_load(counter: Arc<AtomicUsize>) -> impl Future<Output = Result<u32, Error>> {
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        }
    }

    #[tokio::test]
    async fn first_load_populates_and_later_reads_hit_cache() {
        let cache: SnapshotCache<u32> =
            SnapshotCache::new(Duration::from_secs(60), Duration::from_secs(5));
        let loads = Arc::new(AtomicUsize::new(0));

        let a = cache.get_with(|| counted_load(loads.clone())).await.unwrap();
        let b = cache.get_with(|| counted_load(loads.clone())).await.unwrap();

        assert_eq!(*a, 7);
        assert_eq!(*b, 7);
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_cache_propagates_load_failure() {
        let cache: SnapshotCache<u32> =
            SnapshotCache::new(Duration::from_secs(60), Duration::from_secs(5));
        let result = cache
            .get_with(|| async { Err::<u32, _>(Error::Internal("source down".to_owned())) })
            .await;
        assert!(result.is_err());
        assert!(cache.peek().is_none());
    }

    #[tokio::test]
    async fn stale_snapshot_is_served_while_refresh_fails() {
        let cache: SnapshotCache<u32> =
            SnapshotCache::new(Duration::from_secs(60), Duration::from_secs(5));
        cache.get_with(|| async { Ok(7) }).await.unwrap();
        cache.invalidate();

        // Refresh fails in the background; the stale value still serves.
        let value = cache
            .get_with(|| async { Err::<u32, _>(Error::Internal("source down".to_owned())) })
            .await
            .unwrap();
        assert_eq!(*value, 7);
    }

    #[tokio::test]
    async fn invalidate_triggers_refetch() {
        let cache: SnapshotCache<u32> =
            SnapshotCache::new(Duration::from_secs(60), Duration::from_secs(5));
        let loads = Arc::new(AtomicUsize::new(0));

        cache.get_with(|| counted_load(loads.clone())).await.unwrap();
        cache.invalidate();
        cache.get_with(|| counted_load(loads.clone())).await.unwrap();

        // The second call kicks off a background reload.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }
}
