//! Shared player state
//!
//! State shared between the playback controller's tasks and read by the
//! presentation collaborator through snapshots. Uses RwLock for
//! concurrent read access with rare writes; state changes are mirrored
//! onto the event bus.

use tokio::sync::RwLock;
use tonbeat_common::events::{EventBus, PlaybackPhase, PlayerEvent, PlayerSnapshot};
use tonbeat_common::track::Track;

#[derive(Debug)]
struct PlayerStateInner {
    phase: PlaybackPhase,
    current_track: Option<Track>,
    playlist: Vec<Track>,
    current_index: i64,
    current_time: f64,
    duration: f64,
    volume: f32,
    is_muted: bool,
}

/// Shared state accessible by all controller tasks
pub struct SharedPlayerState {
    inner: RwLock<PlayerStateInner>,
    bus: EventBus,
}

impl SharedPlayerState {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(PlayerStateInner {
                phase: PlaybackPhase::Idle,
                current_track: None,
                playlist: Vec::new(),
                current_index: -1,
                current_time: 0.0,
                duration: 0.0,
                volume: 0.75,
                is_muted: false,
            }),
            bus: EventBus::default(),
        }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PlayerEvent> {
        self.bus.subscribe()
    }

    pub fn emit(&self, event: PlayerEvent) {
        self.bus.emit(event);
    }

    pub async fn phase(&self) -> PlaybackPhase {
        self.inner.read().await.phase
    }

    pub async fn set_phase(&self, phase: PlaybackPhase) {
        let old_phase = {
            let mut inner = self.inner.write().await;
            let old = inner.phase;
            inner.phase = phase;
            old
        };
        if old_phase != phase {
            self.bus.emit(PlayerEvent::PhaseChanged {
                old_phase,
                new_phase: phase,
            });
        }
    }

    pub async fn current_track(&self) -> Option<Track> {
        self.inner.read().await.current_track.clone()
    }

    pub async fn current_index(&self) -> i64 {
        self.inner.read().await.current_index
    }

    /// Bind the current track and its playlist position, resetting progress
    pub async fn set_current_track(&self, track: Option<Track>, index: i64) {
        {
            let mut inner = self.inner.write().await;
            inner.current_track = track.clone();
            inner.current_index = index;
            inner.current_time = 0.0;
            inner.duration = 0.0;
        }
        self.bus.emit(PlayerEvent::TrackChanged {
            track,
            current_index: index,
        });
    }

    pub async fn playlist(&self) -> Vec<Track> {
        self.inner.read().await.playlist.clone()
    }

    pub async fn set_playlist(&self, playlist: Vec<Track>, current_index: i64) {
        let length = playlist.len();
        {
            let mut inner = self.inner.write().await;
            inner.playlist = playlist;
            inner.current_index = current_index;
        }
        self.bus.emit(PlayerEvent::PlaylistChanged {
            length,
            current_index,
        });
    }

    pub async fn progress(&self) -> (f64, f64) {
        let inner = self.inner.read().await;
        (inner.current_time, inner.duration)
    }

    pub async fn set_progress(&self, current_time: f64, duration: f64) {
        {
            let mut inner = self.inner.write().await;
            inner.current_time = current_time;
            inner.duration = duration;
        }
        self.bus.emit(PlayerEvent::Progress {
            current_time,
            duration,
            percent: percent_of(current_time, duration),
        });
    }

    pub async fn set_duration(&self, duration: f64) {
        self.inner.write().await.duration = duration;
    }

    pub async fn duration(&self) -> f64 {
        self.inner.read().await.duration
    }

    pub async fn volume(&self) -> (f32, bool) {
        let inner = self.inner.read().await;
        (inner.volume, inner.is_muted)
    }

    pub async fn set_volume(&self, volume: f32) {
        let (volume, is_muted) = {
            let mut inner = self.inner.write().await;
            inner.volume = volume.clamp(0.0, 1.0);
            (inner.volume, inner.is_muted)
        };
        self.bus.emit(PlayerEvent::VolumeChanged { volume, is_muted });
    }

    pub async fn set_muted(&self, is_muted: bool) {
        let volume = {
            let mut inner = self.inner.write().await;
            inner.is_muted = is_muted;
            inner.volume
        };
        self.bus.emit(PlayerEvent::VolumeChanged { volume, is_muted });
    }

    /// Read-only snapshot for the presentation layer
    pub async fn snapshot(&self) -> PlayerSnapshot {
        let inner = self.inner.read().await;
        PlayerSnapshot {
            current_track: inner.current_track.clone(),
            phase: inner.phase,
            is_playing: inner.phase == PlaybackPhase::Playing,
            is_loading: inner.phase == PlaybackPhase::Loading,
            progress_percent: percent_of(inner.current_time, inner.duration),
            current_time: inner.current_time,
            duration: inner.duration,
            volume: inner.volume,
            is_muted: inner.is_muted,
            playlist: inner.playlist.clone(),
            current_index: inner.current_index,
        }
    }
}

impl Default for SharedPlayerState {
    fn default() -> Self {
        Self::new()
    }
}

fn percent_of(current_time: f64, duration: f64) -> f64 {
    if duration > 0.0 {
        (current_time / duration * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    }
}
