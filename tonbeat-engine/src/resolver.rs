//! Music source resolution
//!
//! Resolves a playable audio source for a track under a given
//! authorization: cache first, then a pre-resolved handle carried by the
//! track, then a bounded remote generation call. Concurrent resolutions
//! for the same cache key are coalesced so at most one remote call is in
//! flight per key; waiters observe the first caller's cached result once
//! it settles.

use crate::backend::BackendClient;
use crate::cache::{CacheKey, SourceCache};
use crate::error::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tonbeat_common::api::GenerateStreamRequest;
use tonbeat_common::auth::MusicAuth;
use tonbeat_common::config::ResolveConfig;
use tonbeat_common::track::{SourceHandle, Track};
use tracing::{debug, warn};

/// Resolves tracks to audio source handles through the cache
pub struct SourceResolver {
    cache: Arc<SourceCache>,
    backend: Arc<BackendClient>,
    config: ResolveConfig,
    in_flight: Mutex<HashMap<CacheKey, Arc<Notify>>>,
}

impl SourceResolver {
    pub fn new(cache: Arc<SourceCache>, backend: Arc<BackendClient>, config: ResolveConfig) -> Self {
        Self {
            cache,
            backend,
            config,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Foreground resolution bound
    pub fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    /// Resolve the track's audio source under the given authorization
    ///
    /// `AuthExpired` is returned to the caller; the one-shot
    /// refresh-and-retry lives at the call site, not here.
    pub async fn resolve(
        &self,
        track: &Track,
        auth: &MusicAuth,
        timeout: Duration,
    ) -> Result<SourceHandle> {
        let key = CacheKey::for_track(track, auth)?;

        loop {
            if let Some(handle) = self.cache.get(&key) {
                debug!(key = %key, "cache hit");
                return Ok(handle);
            }

            // Claim the key, or wait for whoever holds it
            let waiter = {
                let mut in_flight = self.in_flight.lock().expect("in-flight lock poisoned");
                match in_flight.get(&key) {
                    Some(notify) => Some(Arc::clone(notify)),
                    None => {
                        in_flight.insert(key.clone(), Arc::new(Notify::new()));
                        None
                    }
                }
            };

            match waiter {
                Some(notify) => {
                    // Register before re-checking, so a notify_waiters that
                    // fires in between is not lost
                    let notified = notify.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();

                    let still_in_flight = {
                        let in_flight = self.in_flight.lock().expect("in-flight lock poisoned");
                        in_flight
                            .get(&key)
                            .map(|current| Arc::ptr_eq(current, &notify))
                            .unwrap_or(false)
                    };
                    if still_in_flight {
                        // First caller settles the key; the loop re-checks
                        // the cache, and on its failure we try ourselves
                        notified.await;
                    }
                }
                None => break,
            }
        }

        let result = self.resolve_uncached(track, auth, &key, timeout).await;

        let notify = self
            .in_flight
            .lock()
            .expect("in-flight lock poisoned")
            .remove(&key);
        if let Some(notify) = notify {
            notify.notify_waiters();
        }

        result
    }

    /// Best-effort ahead-of-need resolution for the circular-next track
    ///
    /// Failure is logged and never surfaces to playback.
    pub async fn preload(&self, track: &Track, auth: &MusicAuth) {
        match self.resolve(track, auth, self.config.preload_timeout()).await {
            Ok(_) => debug!(track = ?track.address, "preloaded next track"),
            Err(e) => debug!(track = ?track.address, error = %e, "preload failed"),
        }
    }

    async fn resolve_uncached(
        &self,
        track: &Track,
        auth: &MusicAuth,
        key: &CacheKey,
        timeout: Duration,
    ) -> Result<SourceHandle> {
        // Adopt an upstream pre-resolved handle into the cache
        if let Some(handle) = &track.source {
            if !handle.is_released() {
                debug!(key = %key, "adopting pre-resolved source");
                self.cache.set(key.clone(), handle.clone());
                return Ok(handle.clone());
            }
            warn!(key = %key, "pre-resolved source was already released; regenerating");
        }

        let request = GenerateStreamRequest::from_track(track);
        let bytes = self.backend.generate_stream(auth, &request, timeout).await?;

        let duration_hint = track
            .extra
            .get("duration")
            .and_then(|v| v.as_f64())
            .filter(|d| d.is_finite() && *d > 0.0);
        let handle = SourceHandle::with_duration_hint(bytes, duration_hint);

        self.cache.set(key.clone(), handle.clone());
        Ok(handle)
    }
}
