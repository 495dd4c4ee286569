//! Backend HTTP client
//!
//! One reqwest client shared by the resolver and the listen delivery
//! service. Every call is bounded by a caller-supplied timeout and
//! non-success statuses are classified into the engine error taxonomy.

use crate::error::{Error, Result};
use std::time::Duration;
use tonbeat_common::api::{
    ApiKeyResponse, GenerateStreamRequest, LegacyListenRequest, SessionListenRequest,
    SessionListenResponse,
};
use tonbeat_common::auth::{MusicAuth, SessionData};
use tracing::debug;

const USER_AGENT: &str = concat!("tonbeat/", env!("CARGO_PKG_VERSION"));

/// Legacy authorization header for the music server
pub const API_KEY_HEADER: &str = "X-Music-Api-Key";

/// HTTP client for the music backend
pub struct BackendClient {
    http: reqwest::Client,
}

impl BackendClient {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(Self { http })
    }

    /// POST `{serverUrl}/generate-music-stream`; returns the binary audio payload
    pub async fn generate_stream(
        &self,
        auth: &MusicAuth,
        request: &GenerateStreamRequest,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let url = join_url(auth.server_url(), "generate-music-stream");
        debug!(url = %url, address = ?request.address, "requesting music generation");

        let mut builder = self.http.post(&url).json(request);
        builder = match auth {
            MusicAuth::Session(session) => builder.bearer_auth(&session.session_id),
            MusicAuth::ApiKey(key) => builder.header(API_KEY_HEADER, &key.key),
        };

        let response = bounded(builder.send(), timeout).await??;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::from_status(status.as_u16()));
        }

        let bytes = bounded(response.bytes(), timeout).await??;
        Ok(bytes.to_vec())
    }

    /// POST `{backendMusicUrl}/session-listens` (bearer = session id)
    pub async fn record_session_listen(
        &self,
        session: &SessionData,
        request: &SessionListenRequest,
        timeout: Duration,
    ) -> Result<SessionListenResponse> {
        let url = join_url(&session.backend_music_url, "session-listens");

        let response = bounded(
            self.http
                .post(&url)
                .bearer_auth(&session.session_id)
                .json(request)
                .send(),
            timeout,
        )
        .await??;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::from_status(status.as_u16()));
        }

        let parsed = bounded(response.json::<SessionListenResponse>(), timeout).await??;
        Ok(parsed)
    }

    /// POST `{serverUrl}/api/listens` (legacy non-session path; bare boolean body)
    pub async fn record_legacy_listen(
        &self,
        server_url: &str,
        request: &LegacyListenRequest,
        timeout: Duration,
    ) -> Result<bool> {
        let url = join_url(server_url, "api/listens");

        let response = bounded(self.http.post(&url).json(request).send(), timeout).await??;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::from_status(status.as_u16()));
        }

        let acknowledged = bounded(response.json::<bool>(), timeout).await??;
        Ok(acknowledged)
    }

    /// POST `{apiBaseUrl}/dapp/generateMusicApiKey` (bearer = backend auth token)
    pub async fn generate_music_api_key(
        &self,
        api_base_url: &str,
        auth_token: &str,
        timeout: Duration,
    ) -> Result<ApiKeyResponse> {
        let url = join_url(api_base_url, "dapp/generateMusicApiKey");
        debug!(url = %url, "requesting fresh music API key");

        let response = bounded(
            self.http.post(&url).bearer_auth(auth_token).send(),
            timeout,
        )
        .await??;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::from_status(status.as_u16()));
        }

        let parsed = bounded(response.json::<ApiKeyResponse>(), timeout).await??;
        Ok(parsed)
    }
}

/// Apply the per-call bound; elapsed → `Error::Timeout`
async fn bounded<F, T, E>(future: F, timeout: Duration) -> Result<std::result::Result<T, E>>
where
    F: std::future::Future<Output = std::result::Result<T, E>>,
{
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| Error::Timeout)
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}
