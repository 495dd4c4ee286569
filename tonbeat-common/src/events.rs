//! Player events and the read-only state snapshot
//!
//! The engine communicates with the presentation collaborator through two
//! surfaces: a broadcast stream of [`PlayerEvent`]s and an on-demand
//! [`PlayerSnapshot`]. Events are one-to-many over `tokio::sync::broadcast`;
//! emitting with no subscribers is not an error.

use crate::track::Track;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Playback phase of the controller state machine
///
/// `Idle → Loading → Playing ⇄ Paused`, with `Error` reachable from
/// `Loading`/`Playing` and `Idle` reachable from any phase via close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackPhase {
    Idle,
    Loading,
    Playing,
    Paused,
    Error,
}

impl std::fmt::Display for PlaybackPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackPhase::Idle => write!(f, "idle"),
            PlaybackPhase::Loading => write!(f, "loading"),
            PlaybackPhase::Playing => write!(f, "playing"),
            PlaybackPhase::Paused => write!(f, "paused"),
            PlaybackPhase::Error => write!(f, "error"),
        }
    }
}

/// Advance direction through the circular playlist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Next,
    Prev,
}

/// Read-only state snapshot rendered by the presentation layer
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub current_track: Option<Track>,
    pub phase: PlaybackPhase,
    pub is_playing: bool,
    pub is_loading: bool,
    /// 0..=100
    pub progress_percent: f64,
    /// Seconds into the current track
    pub current_time: f64,
    /// Track duration in seconds (0.0 while unknown)
    pub duration: f64,
    /// 0.0..=1.0
    pub volume: f32,
    pub is_muted: bool,
    pub playlist: Vec<Track>,
    /// -1 iff the playlist is empty
    pub current_index: i64,
}

/// Events broadcast by the playback controller
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlayerEvent {
    PhaseChanged {
        old_phase: PlaybackPhase,
        new_phase: PlaybackPhase,
    },

    TrackChanged {
        track: Option<Track>,
        current_index: i64,
    },

    /// Progress tick; emitted roughly once per second while playing
    Progress {
        current_time: f64,
        duration: f64,
        percent: f64,
    },

    VolumeChanged {
        volume: f32,
        is_muted: bool,
    },

    PlaylistChanged {
        length: usize,
        current_index: i64,
    },

    /// A counted listen crossed the threshold and was dispatched
    ListenRecorded {
        track_address: String,
        user_listen_count: Option<u64>,
    },

    /// Non-fatal playback failure surfaced to the UI
    PlaybackError {
        message: String,
    },
}

/// One-to-many event broadcaster for the engine
///
/// Thin wrapper over `tokio::sync::broadcast`; subscribers only receive
/// events emitted after they subscribe.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit(&self, event: PlayerEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_serialization() {
        assert_eq!(
            serde_json::to_string(&PlaybackPhase::Playing).unwrap(),
            "\"playing\""
        );
        assert_eq!(PlaybackPhase::Loading.to_string(), "loading");
    }

    #[tokio::test]
    async fn test_event_bus_delivers_to_subscriber() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(PlayerEvent::VolumeChanged {
            volume: 0.5,
            is_muted: false,
        });

        match rx.recv().await.unwrap() {
            PlayerEvent::VolumeChanged { volume, is_muted } => {
                assert_eq!(volume, 0.5);
                assert!(!is_muted);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_ok() {
        let bus = EventBus::new(16);
        bus.emit(PlayerEvent::PhaseChanged {
            old_phase: PlaybackPhase::Idle,
            new_phase: PlaybackPhase::Loading,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
