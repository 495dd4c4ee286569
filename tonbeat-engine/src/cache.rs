//! Music source cache
//!
//! Bounded, TTL-based mapping from track identity (scoped by authorization
//! identity) to a resolved audio source handle. The cache exclusively owns
//! handle lifetime: eviction, expiry, overwrite, and clear all release the
//! underlying handle, so no dangling handles survive a mutating call.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tonbeat_common::auth::MusicAuth;
use tonbeat_common::config::CacheConfig;
use tonbeat_common::track::{SourceHandle, Track};
use tracing::{debug, warn};
use uuid::Uuid;

/// Cache key: track identity scoped by the authorizing credential
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build the key for a track under the given authorization
    pub fn for_track(track: &Track, auth: &MusicAuth) -> Result<Self> {
        let key = track
            .key()
            .ok_or_else(|| Error::InvalidTrack("track has no address or index".to_string()))?;
        Ok(Self(format!("{}:{}", auth.auth_id(), key)))
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct CacheEntry {
    handle: SourceHandle,
    inserted_at: Instant,
}

/// Bounded TTL cache of resolved audio sources
///
/// Interior mutability behind a std Mutex: critical sections never await,
/// so invariants (size bound, no dangling handles) hold after every
/// mutating call returns.
pub struct SourceCache {
    max_entries: usize,
    max_age: Duration,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl SourceCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_policy(config.max_entries, config.max_age())
    }

    pub fn with_policy(max_entries: usize, max_age: Duration) -> Self {
        Self {
            max_entries,
            max_age,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Get the handle for a key unless absent or expired
    ///
    /// Lazy expiry: an entry older than `max_age` is released and removed,
    /// and None is returned. A second get for the same key is also None.
    pub fn get(&self, key: &CacheKey) -> Option<SourceHandle> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() > self.max_age => {
                debug!(key = %key.0, "cache entry expired");
                let entry = entries.remove(key).expect("entry present");
                release_handle(&entry.handle, &key.0);
                None
            }
            Some(entry) => Some(entry.handle.clone()),
            None => None,
        }
    }

    /// Insert a handle, overwriting (and releasing) any previous entry
    ///
    /// After insertion, oldest-first eviction restores the size bound;
    /// every evicted handle is released.
    pub fn set(&self, key: CacheKey, handle: SourceHandle) {
        let mut entries = self.lock();

        if let Some(old) = entries.insert(
            key.clone(),
            CacheEntry {
                handle,
                inserted_at: Instant::now(),
            },
        ) {
            release_handle(&old.handle, &key.0);
        }

        while entries.len() > self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone())
                .expect("non-empty map");
            let evicted = entries.remove(&oldest).expect("entry present");
            debug!(key = %oldest.0, "evicting oldest cache entry");
            release_handle(&evicted.handle, &oldest.0);
        }
    }

    /// Whether a live (non-expired) entry exists for the key
    pub fn has(&self, key: &CacheKey) -> bool {
        let entries = self.lock();
        entries
            .get(key)
            .map(|e| e.inserted_at.elapsed() <= self.max_age)
            .unwrap_or(false)
    }

    /// Whether any live entry holds the given handle
    pub fn contains_handle(&self, id: Uuid) -> bool {
        self.lock().values().any(|e| e.handle.id() == id)
    }

    /// Remove and release the entry for a key
    pub fn remove(&self, key: &CacheKey) -> bool {
        let mut entries = self.lock();
        match entries.remove(key) {
            Some(entry) => {
                release_handle(&entry.handle, &key.0);
                true
            }
            None => false,
        }
    }

    /// Release every handle, then empty the cache
    pub fn clear(&self) {
        let mut entries = self.lock();
        for (key, entry) in entries.drain() {
            release_handle(&entry.handle, &key.0);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.lock().expect("source cache lock poisoned")
    }
}

fn release_handle(handle: &SourceHandle, key: &str) {
    if !handle.release() {
        // Lifetime invariant: the cache is the only releaser
        warn!(key, "cache released an already-released handle");
    }
}
