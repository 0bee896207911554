//! Build-once protocol for expensive cache entries.
//!
//! Guards a cache build (network calls, document assembly) so that at most
//! one execution runs per key at a time: check the store, take the group's
//! build lock, re-check, build, insert. Callers racing an in-flight build
//! queue on the lock and pick up the finished entry instead of rebuilding.
//!
//! Locks are per cache *group*, not per key, to bound the number of live
//! locks. Different keys in one group therefore serialize during concurrent
//! cold builds; that contention is accepted in exchange for a small, fixed
//! lock registry.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use metrics::{counter, histogram};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use super::config::CacheConfig;
use super::keys::CacheGroup;
use super::store::{CacheStore, StoreError};

/// Boxed error produced by a build closure.
pub type BuildError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum SingleFlightError {
    /// The build closure failed. Nothing was cached; the next caller retries.
    #[error("build for `{key}` in group `{group}` failed: {source}")]
    Build {
        group: CacheGroup,
        key: String,
        #[source]
        source: BuildError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Coordinates cache builds across request tasks.
///
/// Owns the per-group lock registry alongside the store it populates, so
/// every component sharing this service shares the same build discipline.
pub struct SingleFlight {
    config: CacheConfig,
    store: Arc<CacheStore>,
    build_locks: DashMap<CacheGroup, Arc<Mutex<()>>>,
}

impl SingleFlight {
    pub fn new(config: CacheConfig, store: Arc<CacheStore>) -> Self {
        Self {
            config,
            store,
            build_locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Return the cached value for `(group, key)`, building and installing it
    /// first if absent or expired.
    ///
    /// Guarantees while the cache is enabled:
    /// - the build closure runs at most once per miss episode; racing callers
    ///   block on the group lock and reuse the installed entry;
    /// - the entry becomes visible atomically, only after the build succeeds;
    /// - a failed build installs nothing and releases the lock, so the next
    ///   caller retries (failures are never negatively cached).
    ///
    /// With the cache disabled every call builds, and nothing is stored.
    pub async fn get_or_build<T, F, Fut>(
        &self,
        group: &CacheGroup,
        key: &str,
        ttl: Option<Duration>,
        build: F,
    ) -> Result<Arc<T>, SingleFlightError>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BuildError>>,
    {
        if !self.config.enabled {
            let value = build().await.map_err(|source| SingleFlightError::Build {
                group: group.clone(),
                key: key.to_string(),
                source,
            })?;
            return Ok(Arc::new(value));
        }

        if !self.store.contains_key(group, key) {
            let lock = self.group_lock(group);
            let _guard = lock.lock().await;

            // Re-check under the lock: a caller queued ahead of us may have
            // completed the build already.
            if !self.store.contains_key(group, key) {
                let started = Instant::now();
                let value = build().await.map_err(|source| {
                    counter!("raffica_cache_build_failure_total").increment(1);
                    SingleFlightError::Build {
                        group: group.clone(),
                        key: key.to_string(),
                        source,
                    }
                })?;
                self.store.add(group, key, value, ttl);

                let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                counter!("raffica_cache_build_total").increment(1);
                histogram!("raffica_cache_build_ms").record(elapsed_ms);
                debug!(group = %group, key, elapsed_ms, "cache entry built");
            }
        }

        Ok(self.store.get::<T>(group, key)?)
    }

    fn group_lock(&self, group: &CacheGroup) -> Arc<Mutex<()>> {
        if let Some(existing) = self.build_locks.get(group) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.build_locks
                .entry(group.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::Barrier;

    use super::*;

    const GROUP: CacheGroup = CacheGroup::from_static("flight-test");

    fn single_flight() -> Arc<SingleFlight> {
        Arc::new(SingleFlight::new(
            CacheConfig::default(),
            Arc::new(CacheStore::new()),
        ))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_build_exactly_once() {
        let flight = single_flight();
        let builds = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flight = Arc::clone(&flight);
            let builds = Arc::clone(&builds);
            let barrier = Arc::clone(&barrier);
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                flight
                    .get_or_build::<u64, _, _>(&GROUP, "answer", None, || async {
                        builds.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok(42u64)
                    })
                    .await
                    .expect("build succeeds")
            }));
        }

        for handle in handles {
            let value = handle.await.expect("task completes");
            assert_eq!(*value, 42);
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_build_caches_nothing_and_next_caller_retries() {
        let flight = single_flight();

        let err = flight
            .get_or_build::<u64, _, _>(&GROUP, "flaky", None, || async {
                Err::<u64, BuildError>("upstream unavailable".into())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SingleFlightError::Build { .. }));
        assert!(!flight.store().contains_key(&GROUP, "flaky"));

        let value = flight
            .get_or_build::<u64, _, _>(&GROUP, "flaky", None, || async { Ok(7u64) })
            .await
            .expect("retry succeeds");
        assert_eq!(*value, 7);
    }

    #[tokio::test]
    async fn cached_value_is_reused_within_ttl() {
        let flight = single_flight();
        let builds = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let builds = Arc::clone(&builds);
            let value = flight
                .get_or_build::<u64, _, _>(&GROUP, "stable", Some(Duration::from_secs(60)), || async move {
                    builds.fetch_add(1, Ordering::SeqCst);
                    Ok(9u64)
                })
                .await
                .expect("build succeeds");
            assert_eq!(*value, 9);
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_entry_is_rebuilt_and_replaced() {
        let flight = single_flight();
        let builds = Arc::new(AtomicUsize::new(0));

        let build = |n: u64| {
            let builds = Arc::clone(&builds);
            move || async move {
                builds.fetch_add(1, Ordering::SeqCst);
                Ok(n)
            }
        };

        let first = flight
            .get_or_build::<u64, _, _>(&GROUP, "fleeting", Some(Duration::from_millis(10)), build(1))
            .await
            .expect("first build");
        assert_eq!(*first, 1);

        tokio::time::sleep(Duration::from_millis(30)).await;

        let second = flight
            .get_or_build::<u64, _, _>(&GROUP, "fleeting", Some(Duration::from_millis(10)), build(2))
            .await
            .expect("rebuild");
        assert_eq!(*second, 2);
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn disabled_cache_builds_every_time_and_stores_nothing() {
        let flight = Arc::new(SingleFlight::new(
            CacheConfig { enabled: false },
            Arc::new(CacheStore::new()),
        ));
        let builds = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let builds = Arc::clone(&builds);
            flight
                .get_or_build::<u64, _, _>(&GROUP, "raw", None, || async move {
                    builds.fetch_add(1, Ordering::SeqCst);
                    Ok(0u64)
                })
                .await
                .expect("build succeeds");
        }

        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert!(!flight.store().contains_key(&GROUP, "raw"));
    }
}
