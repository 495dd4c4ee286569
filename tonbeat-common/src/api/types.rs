//! Backend API request/response types
//!
//! Field names are camelCase on the wire to match the backend JSON.

use crate::track::Track;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Body of POST `{musicServerUrl}/generate-music-stream`
///
/// Carries the track metadata bag so the generator can derive a prompt; the
/// response body is the binary audio payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateStreamRequest {
    pub metadata: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl GenerateStreamRequest {
    /// Build the generation request from a track's metadata
    pub fn from_track(track: &Track) -> Self {
        let metadata = serde_json::json!({
            "name": track.name,
            "image": track.image,
            "description": track.description,
            "collection": track.collection,
            "attributes": track.extra,
        });
        Self {
            metadata,
            index: track.index,
            address: track.address.clone(),
        }
    }
}

/// Body of POST `/session-listens` (bearer = session id)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionListenRequest {
    pub nft_address: String,

    /// Unix epoch milliseconds of the counted listen
    pub timestamp: i64,
}

/// Response of POST `/session-listens`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionListenResponse {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_listen_count: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Body of POST `/api/listens` (legacy non-session path; response is a bare boolean)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyListenRequest {
    pub nft_address: String,
    pub collection_address: String,
}

/// Response of POST `/dapp/generateMusicApiKey` (bearer = backend auth token)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyResponse {
    pub api_key: String,

    /// Unix epoch milliseconds
    pub expires_at: i64,

    pub music_server_url: String,
}

impl ApiKeyResponse {
    /// Expiry as a chrono timestamp; invalid epoch values clamp to the epoch start
    pub fn expires_at_datetime(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.expires_at)
            .single()
            .unwrap_or_default()
    }
}
