//! Session lifecycle management
//!
//! Owns the wallet-authorized session credential (and the legacy API key
//! fallback) for one engine instance. The session itself is created by an
//! external wallet-signature flow and handed in; this manager only checks
//! validity, clears expired credentials on observation, and runs the
//! periodic expiry sweep.

use chrono::{DateTime, Utc};
use tonbeat_common::time;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tonbeat_common::auth::{LegacyApiKey, MusicAuth, SessionData};
use tonbeat_common::config::SessionConfig;
use tracing::{debug, info};

/// Process-wide session state for one engine instance
///
/// Lifecycle-scoped service: create at application start, share via `Arc`,
/// drop on shutdown. At most one active session at a time.
pub struct SessionManager {
    config: SessionConfig,
    session: RwLock<Option<SessionData>>,
    api_key: RwLock<Option<LegacyApiKey>>,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            session: RwLock::new(None),
            api_key: RwLock::new(None),
        }
    }

    /// Install the session, overwriting any previous one
    pub async fn set_session_data(
        &self,
        session_id: impl Into<String>,
        backend_music_url: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) {
        let session = SessionData {
            session_id: session_id.into(),
            backend_music_url: backend_music_url.into(),
            expires_at,
        };
        info!(expires_at = %session.expires_at, "session installed");
        *self.session.write().await = Some(session);
    }

    /// Install the legacy API key, overwriting any previous one
    pub async fn set_api_key_data(
        &self,
        key: impl Into<String>,
        server_url: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) {
        let api_key = LegacyApiKey {
            key: key.into(),
            server_url: server_url.into(),
            expires_at,
        };
        info!(expires_at = %api_key.expires_at, "legacy API key installed");
        *self.api_key.write().await = Some(api_key);
    }

    /// True iff a session exists and is unexpired
    ///
    /// Observing an expired session clears it (the expiry sweep runs
    /// through here as well).
    pub async fn check_validity(&self) -> bool {
        let mut guard = self.session.write().await;
        match guard.as_ref() {
            Some(session) if session.is_valid(time::now()) => true,
            Some(_) => {
                debug!("session expired; clearing");
                *guard = None;
                false
            }
            None => false,
        }
    }

    /// Legacy-key counterpart of [`check_validity`](Self::check_validity)
    pub async fn check_api_key_validity(&self) -> bool {
        let mut guard = self.api_key.write().await;
        match guard.as_ref() {
            Some(key) if key.is_valid(time::now()) => true,
            Some(_) => {
                debug!("legacy API key expired; clearing");
                *guard = None;
                false
            }
            None => false,
        }
    }

    /// Explicit invalidation (logout)
    pub async fn clear_session(&self) {
        *self.session.write().await = None;
    }

    pub async fn clear_api_key(&self) {
        *self.api_key.write().await = None;
    }

    /// Current session, if present (validity not re-derived)
    pub async fn session(&self) -> Option<SessionData> {
        self.session.read().await.clone()
    }

    /// Best available authorization: valid session preferred, else valid
    /// legacy key. Expired credentials are cleared on observation.
    pub async fn music_auth(&self) -> Option<MusicAuth> {
        {
            let mut guard = self.session.write().await;
            match guard.as_ref() {
                Some(session) if session.is_valid(time::now()) => {
                    return Some(MusicAuth::Session(session.clone()));
                }
                Some(_) => {
                    debug!("session expired; clearing");
                    *guard = None;
                }
                None => {}
            }
        }

        let mut guard = self.api_key.write().await;
        match guard.as_ref() {
            Some(key) if key.is_valid(time::now()) => Some(MusicAuth::ApiKey(key.clone())),
            Some(_) => {
                debug!("legacy API key expired; clearing");
                *guard = None;
                None
            }
            None => None,
        }
    }

    /// Periodic expiry sweep keeping dependents' views of validity current
    ///
    /// The returned handle aborts the task when dropped by the caller.
    pub fn spawn_expiry_sweep(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let interval = self.config.sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick fires immediately; the mount-time check
            ticker.tick().await;
            loop {
                manager.check_validity().await;
                manager.check_api_key_validity().await;
                ticker.tick().await;
            }
        })
    }

    /// Sweep cadence, exposed for diagnostics
    pub fn sweep_interval(&self) -> Duration {
        self.config.sweep_interval()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn manager() -> SessionManager {
        SessionManager::new(SessionConfig::default())
    }

    #[tokio::test]
    async fn test_expired_session_is_cleared_on_check() {
        let manager = manager();
        manager
            .set_session_data("sess-1", "https://music.example", Utc::now() - ChronoDuration::seconds(1))
            .await;

        assert!(!manager.check_validity().await);
        // Cleared as a side effect
        assert!(manager.session().await.is_none());
    }

    #[tokio::test]
    async fn test_valid_session_has_no_side_effects() {
        let manager = manager();
        manager
            .set_session_data("sess-1", "https://music.example", Utc::now() + ChronoDuration::hours(1))
            .await;

        assert!(manager.check_validity().await);
        assert!(manager.session().await.is_some());
        // Still valid on a second check
        assert!(manager.check_validity().await);
    }

    #[tokio::test]
    async fn test_clear_session() {
        let manager = manager();
        manager
            .set_session_data("sess-1", "https://music.example", Utc::now() + ChronoDuration::hours(1))
            .await;
        manager.clear_session().await;
        assert!(!manager.check_validity().await);
    }

    #[tokio::test]
    async fn test_music_auth_prefers_session() {
        let manager = manager();
        manager
            .set_session_data("sess-1", "https://music.example", Utc::now() + ChronoDuration::hours(1))
            .await;
        manager
            .set_api_key_data("legacy-key", "https://legacy.example", Utc::now() + ChronoDuration::hours(1))
            .await;

        let auth = manager.music_auth().await.unwrap();
        assert!(auth.is_session());
        assert_eq!(auth.auth_id(), "sess-1");
    }

    #[tokio::test]
    async fn test_music_auth_falls_back_to_api_key() {
        let manager = manager();
        manager
            .set_session_data("sess-1", "https://music.example", Utc::now() - ChronoDuration::seconds(1))
            .await;
        manager
            .set_api_key_data("legacy-key", "https://legacy.example", Utc::now() + ChronoDuration::hours(1))
            .await;

        let auth = manager.music_auth().await.unwrap();
        assert!(!auth.is_session());
        assert_eq!(auth.auth_id(), "legacy-key");
        // Expired session was cleared while resolving auth
        assert!(manager.session().await.is_none());
    }

    #[tokio::test]
    async fn test_music_auth_none_when_everything_expired() {
        let manager = manager();
        manager
            .set_api_key_data("legacy-key", "https://legacy.example", Utc::now() - ChronoDuration::seconds(1))
            .await;
        assert!(manager.music_auth().await.is_none());
    }

    #[tokio::test]
    async fn test_expiry_sweep_clears_expired_session() {
        let config = SessionConfig {
            sweep_interval_secs: 1,
        };
        let manager = Arc::new(SessionManager::new(config));
        manager
            .set_session_data("sess-1", "https://music.example", Utc::now() - ChronoDuration::seconds(1))
            .await;

        let sweep = manager.spawn_expiry_sweep();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(manager.session().await.is_none());
        sweep.abort();
    }
}
