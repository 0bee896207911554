//! Cache storage.
//!
//! A process-wide map from `(group, key)` to a typed value with an optional
//! time-to-live. Expiry is enforced lazily: an expired entry is dropped by
//! the lookup that observes it, never by a background sweep.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use metrics::counter;
use thiserror::Error;

use super::keys::CacheGroup;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

type SharedValue = Arc<dyn Any + Send + Sync>;

struct Entry {
    value: SharedValue,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Lookup failures. Neither variant is fatal to callers: `NotFound` is the
/// normal cold/expired path and triggers a rebuild upstream.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no live entry for `{key}` in group `{group}`")]
    NotFound { group: CacheGroup, key: String },
    #[error("entry `{key}` in group `{group}` holds a different type")]
    TypeMismatch { group: CacheGroup, key: String },
}

/// Process-wide cache store.
///
/// Values are stored type-erased and recovered by downcast on [`get`]. Writes
/// are last-writer-wins per `(group, key)`; there is no ordering guarantee
/// across groups.
///
/// [`get`]: CacheStore::get
pub struct CacheStore {
    groups: RwLock<HashMap<CacheGroup, HashMap<String, Entry>>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// Whether a live (non-expired) entry exists for `(group, key)`.
    pub fn contains_key(&self, group: &CacheGroup, key: &str) -> bool {
        let now = Instant::now();
        {
            let groups = rw_read(&self.groups, SOURCE, "contains_key");
            match groups.get(group).and_then(|entries| entries.get(key)) {
                Some(entry) if !entry.is_expired(now) => return true,
                Some(_) => {}
                None => return false,
            }
        }
        self.evict_expired(group, key, now);
        false
    }

    /// Fetch the value stored under `(group, key)`.
    ///
    /// An entry past its expiry is removed here and reported as `NotFound`.
    pub fn get<T>(&self, group: &CacheGroup, key: &str) -> Result<Arc<T>, StoreError>
    where
        T: Any + Send + Sync,
    {
        let now = Instant::now();
        let found = {
            let groups = rw_read(&self.groups, SOURCE, "get");
            groups
                .get(group)
                .and_then(|entries| entries.get(key))
                .map(|entry| (entry.is_expired(now), Arc::clone(&entry.value)))
        };

        match found {
            Some((false, value)) => {
                counter!("raffica_cache_hit_total").increment(1);
                value.downcast::<T>().map_err(|_| StoreError::TypeMismatch {
                    group: group.clone(),
                    key: key.to_string(),
                })
            }
            Some((true, _)) => {
                self.evict_expired(group, key, now);
                counter!("raffica_cache_miss_total").increment(1);
                Err(StoreError::NotFound {
                    group: group.clone(),
                    key: key.to_string(),
                })
            }
            None => {
                counter!("raffica_cache_miss_total").increment(1);
                Err(StoreError::NotFound {
                    group: group.clone(),
                    key: key.to_string(),
                })
            }
        }
    }

    /// Install a value under `(group, key)`, replacing any previous entry.
    pub fn add<T>(&self, group: &CacheGroup, key: &str, value: T, ttl: Option<Duration>)
    where
        T: Any + Send + Sync,
    {
        let entry = Entry {
            value: Arc::new(value),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        let mut groups = rw_write(&self.groups, SOURCE, "add");
        groups
            .entry(group.clone())
            .or_default()
            .insert(key.to_string(), entry);
    }

    /// Remove the entry under `(group, key)`, if present.
    pub fn remove(&self, group: &CacheGroup, key: &str) {
        let mut groups = rw_write(&self.groups, SOURCE, "remove");
        if let Some(entries) = groups.get_mut(group) {
            entries.remove(key);
            if entries.is_empty() {
                groups.remove(group);
            }
        }
    }

    fn evict_expired(&self, group: &CacheGroup, key: &str, now: Instant) {
        let mut groups = rw_write(&self.groups, SOURCE, "evict_expired");
        if let Some(entries) = groups.get_mut(group) {
            // Re-check under the write lock: a writer may have replaced the
            // entry since the read-side observation.
            if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
                entries.remove(key);
                counter!("raffica_cache_expired_total").increment(1);
            }
            if entries.is_empty() {
                groups.remove(group);
            }
        }
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}
