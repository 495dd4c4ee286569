//! Core playback controller - lifecycle and commands
//!
//! Drives a single-track playback state machine over the audio output
//! abstraction: resolve (cache → remote generation), bind, play, advance
//! through the circular playlist, and degrade gracefully on failure.

use crate::backend::BackendClient;
use crate::cache::SourceCache;
use crate::error::{Error, Result};
use crate::listens::{ListenDelivery, ListenTracker};
use crate::output::{OutputCommand, OutputEvent, OutputHandle};
use crate::playlist;
use crate::resolver::SourceResolver;
use crate::session::SessionManager;
use crate::state::SharedPlayerState;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tonbeat_common::auth::MusicAuth;
use tonbeat_common::config::EngineConfig;
use tonbeat_common::events::{Direction, PlaybackPhase, PlayerEvent, PlayerSnapshot};
use tonbeat_common::track::{SourceHandle, Track};
use tracing::{debug, info, warn};

/// Credentials for the legacy music API key refresh endpoint
#[derive(Debug, Clone)]
pub struct ApiKeyRefresh {
    pub api_base_url: String,
    pub auth_token: String,
}

/// Top-level playback state machine
///
/// Create with [`PlaybackController::new`], call [`start`](Self::start)
/// once, then drive it with the imperative command set. All shared
/// services are owned here and torn down by [`shutdown`](Self::shutdown).
pub struct PlaybackController {
    pub(super) config: EngineConfig,
    pub(super) state: Arc<SharedPlayerState>,
    pub(super) cache: Arc<SourceCache>,
    pub(super) resolver: Arc<SourceResolver>,
    pub(super) sessions: Arc<SessionManager>,
    pub(super) tracker: Mutex<ListenTracker>,
    pub(super) delivery: Arc<ListenDelivery>,
    pub(super) backend: Arc<BackendClient>,
    pub(super) output: OutputHandle,

    /// Monotonic counter invalidating stale resolutions and clock ticks
    /// after a track switch or close
    pub(super) load_generation: AtomicU64,

    /// Generation that already auto-advanced; guards the clock tick and
    /// the output's Ended event racing each other
    pub(super) advanced_generation: AtomicU64,

    /// Per-playback guard so one qualifying playback dispatches one listen
    pub(super) listen_dispatched: AtomicBool,

    pub(super) clock_task: Mutex<Option<JoinHandle<()>>>,
    event_task: Mutex<Option<JoinHandle<()>>>,
    sweep_task: Mutex<Option<JoinHandle<()>>>,

    refresh: RwLock<Option<ApiKeyRefresh>>,
}

impl PlaybackController {
    pub fn new(
        config: EngineConfig,
        sessions: Arc<SessionManager>,
        output: OutputHandle,
    ) -> Result<Arc<Self>> {
        let backend = Arc::new(BackendClient::new()?);
        let cache = Arc::new(SourceCache::new(&config.cache));
        let resolver = Arc::new(SourceResolver::new(
            Arc::clone(&cache),
            Arc::clone(&backend),
            config.resolve.clone(),
        ));
        let delivery = Arc::new(ListenDelivery::new(
            Arc::clone(&backend),
            config.delivery.clone(),
        ));
        let tracker = Mutex::new(ListenTracker::new(config.listen.clone()));

        Ok(Arc::new(Self {
            state: Arc::new(SharedPlayerState::new()),
            cache,
            resolver,
            sessions,
            tracker,
            delivery,
            backend,
            output,
            load_generation: AtomicU64::new(0),
            advanced_generation: AtomicU64::new(0),
            listen_dispatched: AtomicBool::new(false),
            clock_task: Mutex::new(None),
            event_task: Mutex::new(None),
            sweep_task: Mutex::new(None),
            refresh: RwLock::new(None),
            config,
        }))
    }

    /// Spawn the output event listener and the listen retry sweep
    pub fn start(self: &Arc<Self>) {
        let mut event_task = self.event_task.lock().expect("task slot lock poisoned");
        if event_task.is_none() {
            *event_task = Some(self.spawn_event_task());
        }
        let mut sweep_task = self.sweep_task.lock().expect("task slot lock poisoned");
        if sweep_task.is_none() {
            *sweep_task = Some(self.delivery.spawn_retry_sweep(Arc::clone(&self.sessions)));
        }
    }

    /// Configure the legacy API key refresh path used on `AuthExpired`
    pub async fn set_api_key_refresh(&self, refresh: Option<ApiKeyRefresh>) {
        *self.refresh.write().await = refresh;
    }

    /// Play a track within its playlist
    ///
    /// Rotates the playlist so the track is first (circular order
    /// preserved), resolves the audio source, and binds it to the output.
    pub async fn play_track(self: &Arc<Self>, track: Track, playlist_tracks: Vec<Track>) -> Result<()> {
        if !playlist::validate(&playlist_tracks) {
            return Err(Error::InvalidTrack(
                "playlist is empty or contains unidentifiable tracks".to_string(),
            ));
        }
        if !playlist_tracks.iter().any(|t| t.same_entity(&track)) {
            return Err(Error::InvalidTrack(
                "selected track is not in the playlist".to_string(),
            ));
        }

        let rotated = playlist::rotate(&playlist_tracks, &track);
        self.state.set_playlist(rotated, 0).await;

        match self.start_track_at(0).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, "play_track failed");
                self.state.emit(PlayerEvent::PlaybackError {
                    message: e.to_string(),
                });
                self.state.set_phase(PlaybackPhase::Error).await;
                Err(e)
            }
        }
    }

    /// Playing ⇄ Paused; the progress clock follows the phase
    pub async fn toggle_play(&self) {
        match self.state.phase().await {
            PlaybackPhase::Playing => {
                self.output.send(OutputCommand::Pause);
                self.state.set_phase(PlaybackPhase::Paused).await;
            }
            PlaybackPhase::Paused => {
                self.output.send(OutputCommand::Play);
                self.state.set_phase(PlaybackPhase::Playing).await;
            }
            phase => debug!(%phase, "toggle_play ignored"),
        }
    }

    /// Seek to a percentage of the track, clamped to [0, 100]
    ///
    /// The position is updated optimistically; the next clock tick reads
    /// the output's reported position back.
    pub async fn seek_to(&self, percentage: f64) {
        let pct = if percentage.is_finite() {
            percentage.clamp(0.0, 100.0)
        } else {
            0.0
        };
        let duration = self.state.duration().await;
        let target = duration * pct / 100.0;
        self.output.send(OutputCommand::Seek(target));
        self.state.set_progress(target, duration).await;
    }

    pub async fn next(self: &Arc<Self>) -> Result<()> {
        self.advance(Direction::Next).await
    }

    pub async fn prev(self: &Arc<Self>) -> Result<()> {
        self.advance(Direction::Prev).await
    }

    /// Step through the circular playlist
    ///
    /// On failure the next track in the same direction is tried once
    /// more; if that also fails, playback closes rather than looping over
    /// a broken playlist.
    pub async fn advance(self: &Arc<Self>, direction: Direction) -> Result<()> {
        let playlist_tracks = self.state.playlist().await;
        let n = playlist_tracks.len();
        if n == 0 {
            return Err(Error::InvalidState("advance on empty playlist".to_string()));
        }

        let mut index = self.state.current_index().await;
        for attempt in 0u32..2 {
            index = match direction {
                Direction::Next => playlist::next_index(index, n),
                Direction::Prev => playlist::prev_index(index, n),
            };
            match self.start_track_at(index).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(attempt, index, error = %e, "advance target failed");
                    self.state.emit(PlayerEvent::PlaybackError {
                        message: e.to_string(),
                    });
                }
            }
        }

        info!("no playable track found; closing playback");
        self.close().await;
        Ok(())
    }

    pub async fn set_volume(&self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        self.output.send(OutputCommand::SetVolume(volume));
        self.state.set_volume(volume).await;
    }

    pub async fn toggle_mute(&self) {
        let (_, muted) = self.state.volume().await;
        self.output.send(OutputCommand::SetMuted(!muted));
        self.state.set_muted(!muted).await;
    }

    /// Release the audio output and return to Idle
    ///
    /// The music source cache outlives a playback session and is not
    /// cleared here; a pre-resolved handle the cache never adopted is
    /// released with its track.
    pub async fn close(&self) {
        self.load_generation.fetch_add(1, Ordering::SeqCst);
        self.stop_clock();

        if let Some(track) = self.state.current_track().await {
            if let Some(handle) = &track.source {
                if !handle.is_released() && !self.cache.contains_handle(handle.id()) {
                    debug!("releasing non-cache-backed source of closed track");
                    handle.release();
                }
            }
        }

        self.output.send(OutputCommand::Close);
        let index = self.state.current_index().await;
        self.state.set_current_track(None, index).await;
        self.state.set_phase(PlaybackPhase::Idle).await;
    }

    /// Flush queued listens, clear per-session state, and stop all tasks
    pub async fn shutdown(&self) {
        self.close().await;
        if let Some(auth) = self.sessions.music_auth().await {
            self.delivery.flush_queue(&auth).await;
        }
        self.tracker.lock().expect("tracker lock poisoned").clear();
        self.cache.clear();

        for slot in [&self.event_task, &self.sweep_task] {
            if let Some(task) = slot.lock().expect("task slot lock poisoned").take() {
                task.abort();
            }
        }
    }

    pub async fn snapshot(&self) -> PlayerSnapshot {
        self.state.snapshot().await
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PlayerEvent> {
        self.state.subscribe()
    }

    /// Shared music source cache (outlives individual playbacks)
    pub fn cache(&self) -> &Arc<SourceCache> {
        &self.cache
    }

    /// Listen delivery service, exposed for bulk/backfill delivery
    pub fn delivery(&self) -> &Arc<ListenDelivery> {
        &self.delivery
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Resolve, bind, and play the playlist entry at `index`
    pub(super) async fn start_track_at(self: &Arc<Self>, index: i64) -> Result<()> {
        let playlist_tracks = self.state.playlist().await;
        let track = playlist_tracks
            .get(usize::try_from(index).map_err(|_| {
                Error::InvalidState(format!("index {} out of range", index))
            })?)
            .cloned()
            .ok_or_else(|| Error::InvalidState(format!("index {} out of range", index)))?;

        let generation = self.load_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.listen_dispatched.store(false, Ordering::SeqCst);
        self.state.set_phase(PlaybackPhase::Loading).await;
        self.state.set_current_track(Some(track.clone()), index).await;

        let auth = self.sessions.music_auth().await.ok_or(Error::NoSession)?;
        let handle = self.resolve_with_refresh(&track, auth).await?;

        if self.load_generation.load(Ordering::SeqCst) != generation {
            // A newer track switch won; the handle stays cache-owned
            debug!(track = ?track.address, "stale resolution discarded");
            return Ok(());
        }

        let duration_hint = handle
            .duration_hint()
            .or(Some(self.config.player.default_duration_secs));
        self.output.send(OutputCommand::Load {
            handle,
            duration_hint,
        });
        self.output.send(OutputCommand::Play);

        self.start_clock(generation);
        self.spawn_preload(&playlist_tracks, index);
        Ok(())
    }

    /// Resolution with the one-shot auth-refresh retry
    ///
    /// On `AuthExpired` a fresh authorization is obtained and resolution
    /// re-invoked exactly once; the second failure propagates.
    async fn resolve_with_refresh(&self, track: &Track, auth: MusicAuth) -> Result<SourceHandle> {
        let timeout = self.resolver.timeout();
        match self.resolver.resolve(track, &auth, timeout).await {
            Err(e) if e.is_auth_expired() => {
                warn!("authorization rejected by backend; refreshing once");
                let fresh = self.refresh_auth().await.ok_or(Error::AuthExpired)?;
                self.resolver.resolve(track, &fresh, timeout).await
            }
            other => other,
        }
    }

    /// Obtain a fresh authorization after an `AuthExpired`
    ///
    /// Provisions a new legacy key when the refresh endpoint is
    /// configured; otherwise falls back to whatever the session manager
    /// now holds (an externally refreshed session counts).
    async fn refresh_auth(&self) -> Option<MusicAuth> {
        let refresh = self.refresh.read().await.clone();
        if let Some(refresh) = refresh {
            match self
                .backend
                .generate_music_api_key(
                    &refresh.api_base_url,
                    &refresh.auth_token,
                    self.resolver.timeout(),
                )
                .await
            {
                Ok(response) => {
                    self.sessions
                        .set_api_key_data(
                            response.api_key.clone(),
                            response.music_server_url.clone(),
                            response.expires_at_datetime(),
                        )
                        .await;
                }
                Err(e) => warn!(error = %e, "music API key refresh failed"),
            }
        }
        self.sessions.music_auth().await
    }

    /// Best-effort preload of the circular-next track
    fn spawn_preload(self: &Arc<Self>, playlist_tracks: &[Track], index: i64) {
        if playlist_tracks.len() <= 1 {
            return;
        }
        let next = playlist::next_index(index, playlist_tracks.len());
        let Some(track) = playlist_tracks.get(next as usize).cloned() else {
            return;
        };

        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let Some(auth) = controller.sessions.music_auth().await else {
                debug!("preload skipped: no valid authorization");
                return;
            };
            controller.resolver.preload(&track, &auth).await;
        });
    }

    fn spawn_event_task(self: &Arc<Self>) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let mut rx = controller.output.subscribe();
            loop {
                match rx.recv().await {
                    Ok(OutputEvent::MetadataReady { duration }) => {
                        if duration > 0.0 {
                            controller.state.set_duration(duration).await;
                        }
                    }
                    Ok(OutputEvent::Started) => {
                        if controller.state.phase().await == PlaybackPhase::Loading {
                            controller.state.set_phase(PlaybackPhase::Playing).await;
                        }
                    }
                    Ok(OutputEvent::Ended) => {
                        let generation = controller.load_generation.load(Ordering::SeqCst);
                        controller.try_auto_advance(generation);
                    }
                    Ok(OutputEvent::Failed { message }) => {
                        warn!(message, "audio output failure");
                        controller.state.emit(PlayerEvent::PlaybackError {
                            message: message.clone(),
                        });
                        if matches!(
                            controller.state.phase().await,
                            PlaybackPhase::Loading | PlaybackPhase::Playing
                        ) {
                            controller.state.set_phase(PlaybackPhase::Error).await;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "output event listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
