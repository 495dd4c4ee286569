//! Progress clock - position tracking, listen evaluation, auto-advance
//!
//! One tokio task per bound track, keyed by the load generation so a
//! track switch or close orphans the old clock immediately. The audio
//! output's reported position is the single authoritative time source;
//! there is no parallel elapsed-time accumulator.

use super::core::PlaybackController;
use crate::listens::ListenRecord;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tonbeat_common::events::{Direction, PlaybackPhase, PlayerEvent};
use tracing::debug;

impl PlaybackController {
    /// Replace the progress clock with one bound to `generation`
    pub(super) fn start_clock(self: &Arc<Self>, generation: u64) {
        let controller = Arc::clone(self);
        let task = tokio::spawn(async move {
            controller.run_clock(generation).await;
        });
        if let Some(old) = self
            .clock_task
            .lock()
            .expect("clock slot lock poisoned")
            .replace(task)
        {
            old.abort();
        }
    }

    pub(super) fn stop_clock(&self) {
        if let Some(task) = self.clock_task.lock().expect("clock slot lock poisoned").take() {
            task.abort();
        }
    }

    async fn run_clock(self: Arc<Self>, generation: u64) {
        let mut ticker = tokio::time::interval(self.config.player.tick_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if self.load_generation.load(Ordering::SeqCst) != generation {
                debug!("progress clock orphaned by track switch");
                break;
            }
            if self.state.phase().await != PlaybackPhase::Playing {
                // Paused: position is frozen, nothing accumulates
                continue;
            }

            let position = self.output.position();
            let mut duration = self.output.duration();
            if duration <= 0.0 {
                duration = self.state.duration().await;
            }
            self.state.set_progress(position, duration).await;

            self.evaluate_listen(position, duration).await;

            if duration > 0.0 && position >= duration {
                self.try_auto_advance(generation);
            }
        }
    }

    /// One qualifying playback dispatches exactly one listen
    ///
    /// Marks the tracker before the delivery attempt so a slow or retried
    /// send can never produce a duplicate record; a failed delivery
    /// resets the tracker to allow re-qualification (the record itself is
    /// parked in the delivery retry queue).
    async fn evaluate_listen(self: &Arc<Self>, position: f64, duration: f64) {
        if self.listen_dispatched.load(Ordering::SeqCst) {
            return;
        }
        let Some(track) = self.state.current_track().await else {
            return;
        };

        let should = self
            .tracker
            .lock()
            .expect("tracker lock poisoned")
            .should_record(&track, position, duration);
        if !should {
            return;
        }

        // should_record already required the listen identity
        let Ok(record) = ListenRecord::for_track(&track) else {
            return;
        };

        self.tracker
            .lock()
            .expect("tracker lock poisoned")
            .mark_as_recorded(&track);
        self.listen_dispatched.store(true, Ordering::SeqCst);

        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let Some(auth) = controller.sessions.music_auth().await else {
                debug!("listen dropped: no valid authorization");
                controller
                    .tracker
                    .lock()
                    .expect("tracker lock poisoned")
                    .reset_track(&track);
                return;
            };

            let delivered = controller.delivery.record_listen(&record, &auth).await;
            if delivered {
                controller.state.emit(PlayerEvent::ListenRecorded {
                    track_address: record.track_address.clone(),
                    user_listen_count: None,
                });
            } else {
                // Parked for retry by the delivery service; allow the
                // tracker to re-qualify as well
                controller
                    .tracker
                    .lock()
                    .expect("tracker lock poisoned")
                    .reset_track(&track);
            }
        });
    }

    /// Advance once per generation, whichever of the clock tick or the
    /// output's Ended event observes completion first
    pub(super) fn try_auto_advance(self: &Arc<Self>, generation: u64) {
        if self.advanced_generation.swap(generation, Ordering::SeqCst) == generation {
            return;
        }
        debug!("track complete; auto-advancing");
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let _ = controller.advance(Direction::Next).await;
        });
    }
}
