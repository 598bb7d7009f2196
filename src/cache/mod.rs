use crate::helpers::signed_duration;
use crate::types::jwk::{JsonWebKeyId, JsonWebKeyThumbprint, Jwk};

use chrono::{DateTime, Utc};

use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;


/// Default maximum age of a cached key.
pub const DEFAULT_STALENESS_WINDOW: Duration = Duration::from_secs(600);

/// In-memory set of decoded keys for one issuer configuration, newest first.
///
/// Stale keys are evicted lazily: every [`add`](Self::add) first drops entries older than the
/// staleness window, then inserts the new key at the head. Lookups scan linearly, which is fine
/// for the handful of keys an issuer publishes.
///
/// The cache also owns the guard serializing remote fetches for this key set, so that concurrent
/// misses against one configuration trigger a single fetch while other configurations proceed
/// independently.
pub struct JwkCache {
    keys: Mutex<Vec<Arc<Jwk>>>,
    fetch_lock: Mutex<()>,
    staleness_window: Duration,
    time_fn: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}
impl JwkCache {
    /// Creates an empty cache with a ten minute staleness window.
    pub fn new() -> Self {
        Self {
            keys: Mutex::new(Vec::new()),
            fetch_lock: Mutex::new(()),
            staleness_window: DEFAULT_STALENESS_WINDOW,
            time_fn: Arc::new(Utc::now),
        }
    }

    /// Specifies a function for returning the current time.
    ///
    /// This function is used for stamping newly decoded keys and for the staleness sweep.
    pub fn set_time_fn<T>(mut self, time_fn: T) -> Self
    where
        T: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.time_fn = Arc::new(time_fn);
        self
    }

    pub fn set_staleness_window(mut self, staleness_window: Duration) -> Self {
        self.staleness_window = staleness_window;
        self
    }

    /// Current time according to this cache's clock.
    pub fn now(&self) -> DateTime<Utc> {
        (*self.time_fn)()
    }

    // Every critical section below is a single `Vec` operation, so the list is consistent even if
    // a previous holder panicked.
    fn lock_keys(&self) -> MutexGuard<'_, Vec<Arc<Jwk>>> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn fetch_guard(&self) -> MutexGuard<'_, ()> {
        self.fetch_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops every stale key, then inserts `jwk` at the head.
    pub fn add(&self, jwk: Jwk) -> Arc<Jwk> {
        self.insert(jwk, false)
    }

    /// Like [`add`](Self::add), but first drops the cached entries identifying the same key, so
    /// that refetching a key set restamps its keys instead of duplicating them.
    pub(crate) fn refresh(&self, jwk: Jwk) -> Arc<Jwk> {
        self.insert(jwk, true)
    }

    fn insert(&self, jwk: Jwk, replace: bool) -> Arc<Jwk> {
        let jwk = Arc::new(jwk);
        let now = self.now();
        let window = signed_duration(self.staleness_window);

        let mut keys = self.lock_keys();
        let before = keys.len();
        keys.retain(|key| now.signed_duration_since(key.created()) <= window);
        if keys.len() != before {
            log::debug!("evicted {} stale JWK(s)", before - keys.len());
        }
        if replace {
            keys.retain(|key| !same_key(key, &jwk));
        }
        keys.insert(0, jwk.clone());
        jwk
    }

    /// Looks up a key by ID.
    ///
    /// Without an ID, the sole cached key is returned if exactly one is cached.
    pub fn key_by_kid(&self, kid: Option<&JsonWebKeyId>) -> Option<Arc<Jwk>> {
        let keys = self.lock_keys();
        match kid {
            None if keys.len() == 1 => keys.first().cloned(),
            None => None,
            Some(kid) => keys.iter().find(|key| key.key_id() == Some(kid)).cloned(),
        }
    }

    /// Looks up a key by certificate thumbprint.
    pub fn key_by_x5t(&self, x5t: Option<&JsonWebKeyThumbprint>) -> Option<Arc<Jwk>> {
        let x5t = x5t?;
        self.lock_keys()
            .iter()
            .find(|key| key.thumbprint() == Some(x5t))
            .cloned()
    }

    /// Removes the first cached key equal to `jwk`, returning whether one was found.
    pub fn remove(&self, jwk: &Jwk) -> bool {
        let mut keys = self.lock_keys();
        match keys.iter().position(|key| **key == *jwk) {
            Some(index) => {
                keys.remove(index);
                true
            }
            None => false,
        }
    }

    /// Removes the key at `index` (0 is the newest).
    pub fn remove_at(&self, index: usize) -> Option<Arc<Jwk>> {
        let mut keys = self.lock_keys();
        if index < keys.len() {
            Some(keys.remove(index))
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.lock_keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_keys().is_empty()
    }

    /// Snapshot of the cached keys, newest first.
    pub fn keys(&self) -> Vec<Arc<Jwk>> {
        self.lock_keys().clone()
    }

    pub fn clear(&self) {
        self.lock_keys().clear();
    }
}
// Keys are identified by ID, then thumbprint, then key material.
fn same_key(cached: &Jwk, fresh: &Jwk) -> bool {
    match (fresh.key_id(), fresh.thumbprint()) {
        (Some(kid), _) => cached.key_id() == Some(kid),
        (None, Some(x5t)) => cached.key_id().is_none() && cached.thumbprint() == Some(x5t),
        (None, None) => {
            cached.key_id().is_none()
                && cached.thumbprint().is_none()
                && cached.public_key() == fresh.public_key()
        }
    }
}

impl Default for JwkCache {
    fn default() -> Self {
        Self::new()
    }
}
impl Debug for JwkCache {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwkCache")
            .field("keys", &self.len())
            .field("staleness_window", &self.staleness_window)
            .finish()
    }
}
