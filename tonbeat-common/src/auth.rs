//! Session and legacy API key credentials
//!
//! A session is a time-boxed, wallet-authorized credential obtained by an
//! external signature flow. The legacy API key is the functionally identical
//! backward-compatibility path. Both follow the same validity rule:
//! valid iff `now < expires_at`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wallet-authorized session credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    /// Bearer token for music generation and listen recording
    pub session_id: String,

    /// Base URL of the backend music service for this session
    pub backend_music_url: String,

    pub expires_at: DateTime<Utc>,
}

impl SessionData {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Legacy API key credential (backward-compatibility path)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyApiKey {
    /// Value for the `X-Music-Api-Key` header
    pub key: String,

    pub server_url: String,

    pub expires_at: DateTime<Utc>,
}

impl LegacyApiKey {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Authorization for music generation: session or legacy key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MusicAuth {
    Session(SessionData),
    ApiKey(LegacyApiKey),
}

impl MusicAuth {
    /// Credential identity, used to scope cache keys
    pub fn auth_id(&self) -> &str {
        match self {
            MusicAuth::Session(s) => &s.session_id,
            MusicAuth::ApiKey(k) => &k.key,
        }
    }

    /// Server URL the credential authorizes against
    pub fn server_url(&self) -> &str {
        match self {
            MusicAuth::Session(s) => &s.backend_music_url,
            MusicAuth::ApiKey(k) => &k.server_url,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        match self {
            MusicAuth::Session(s) => s.expires_at,
            MusicAuth::ApiKey(k) => k.expires_at,
        }
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at()
    }

    pub fn is_session(&self) -> bool {
        matches!(self, MusicAuth::Session(_))
    }
}
