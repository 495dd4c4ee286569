//! Listen threshold tracking
//!
//! Decides, from elapsed playback time and duration, whether a counted
//! listen should be emitted for a track. Pure in-memory state: per-track
//! cooldown plus per-session dedupe. The caller must `mark_as_recorded`
//! before dispatching delivery so a slow send can never produce a second
//! qualifying record.

use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tonbeat_common::config::ListenConfig;
use tonbeat_common::track::Track;
use tracing::debug;

/// Per-session listen qualification state
pub struct ListenTracker {
    config: ListenConfig,
    last_recorded: HashMap<String, Instant>,
    session_recorded: HashSet<String>,
}

impl ListenTracker {
    pub fn new(config: ListenConfig) -> Self {
        Self {
            config,
            last_recorded: HashMap::new(),
            session_recorded: HashSet::new(),
        }
    }

    /// Whether a counted listen should be recorded now
    ///
    /// False for tracks without both `address` and `collection.address`
    /// (they can never produce a listen record), for keys already recorded
    /// this session, and within the per-track cooldown. Otherwise true iff
    /// `current_time >= min(min_listen_time, duration × min_listen_percentage)`.
    pub fn should_record(&self, track: &Track, current_time: f64, duration: f64) -> bool {
        let Some((address, _)) = track.listen_identity() else {
            return false;
        };

        if self.session_recorded.contains(address) {
            return false;
        }

        if let Some(last) = self.last_recorded.get(address) {
            if last.elapsed() < self.config.cooldown() {
                return false;
            }
        }

        if !duration.is_finite() || duration <= 0.0 {
            return false;
        }

        current_time >= self.config.threshold_secs(duration)
    }

    /// Record the qualification markers; call exactly once per qualifying
    /// playback, before the delivery attempt
    pub fn mark_as_recorded(&mut self, track: &Track) {
        if let Some((address, _)) = track.listen_identity() {
            debug!(address, "listen marked as recorded");
            self.last_recorded.insert(address.to_string(), Instant::now());
            self.session_recorded.insert(address.to_string());
        }
    }

    /// Clear both markers so a failed delivery can re-qualify
    pub fn reset_track(&mut self, track: &Track) {
        if let Some((address, _)) = track.listen_identity() {
            self.last_recorded.remove(address);
            self.session_recorded.remove(address);
        }
    }

    /// Wipe all state (unmount)
    pub fn clear(&mut self) {
        self.last_recorded.clear();
        self.session_recorded.clear();
    }
}
