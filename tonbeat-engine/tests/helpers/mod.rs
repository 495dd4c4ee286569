//! Shared test fixtures: in-process mock backend and data builders

// Not every test binary uses every helper
#![allow(dead_code)]

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use std::sync::atomic::{AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tonbeat_common::auth::{LegacyApiKey, MusicAuth, SessionData};
use tonbeat_common::track::{Collection, Track};

/// Knobs and counters shared with the mock's handlers
pub struct MockState {
    pub base_url: std::sync::OnceLock<String>,
    /// Status returned by generate-music-stream (200 = success)
    pub generate_status: AtomicU16,
    /// Artificial latency for generate-music-stream
    pub generate_delay_ms: AtomicU64,
    pub generate_calls: AtomicUsize,
    /// Fail this many session-listen calls with 500 before succeeding
    pub listen_fail_remaining: AtomicUsize,
    pub listen_calls: AtomicUsize,
    pub legacy_listen_calls: AtomicUsize,
    pub api_key_calls: AtomicUsize,
}

pub struct MockBackend {
    pub base_url: String,
    pub state: Arc<MockState>,
}

/// Bind a mock backend on an ephemeral port
pub async fn spawn_mock_backend() -> MockBackend {
    // RUST_LOG-controlled output for debugging test runs
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let state = Arc::new(MockState {
        base_url: std::sync::OnceLock::new(),
        generate_status: AtomicU16::new(200),
        generate_delay_ms: AtomicU64::new(0),
        generate_calls: AtomicUsize::new(0),
        listen_fail_remaining: AtomicUsize::new(0),
        listen_calls: AtomicUsize::new(0),
        legacy_listen_calls: AtomicUsize::new(0),
        api_key_calls: AtomicUsize::new(0),
    });

    let app = Router::new()
        .route("/generate-music-stream", post(generate_stream))
        .route("/session-listens", post(session_listen))
        .route("/api/listens", post(legacy_listen))
        .route("/dapp/generateMusicApiKey", post(generate_api_key))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock backend");
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    state.base_url.set(base_url.clone()).unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock backend serve");
    });

    MockBackend { base_url, state }
}

async fn generate_stream(
    State(state): State<Arc<MockState>>,
    Json(_body): Json<serde_json::Value>,
) -> axum::response::Response {
    state.generate_calls.fetch_add(1, Ordering::SeqCst);

    let delay = state.generate_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let status = state.generate_status.load(Ordering::SeqCst);
    if status != 200 {
        return StatusCode::from_u16(status).unwrap().into_response();
    }
    (StatusCode::OK, vec![0u8; 64]).into_response()
}

async fn session_listen(
    State(state): State<Arc<MockState>>,
    Json(_body): Json<serde_json::Value>,
) -> axum::response::Response {
    state.listen_calls.fetch_add(1, Ordering::SeqCst);

    let remaining = state.listen_fail_remaining.load(Ordering::SeqCst);
    if remaining > 0 {
        state.listen_fail_remaining.store(remaining - 1, Ordering::SeqCst);
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    Json(serde_json::json!({
        "success": true,
        "userListenCount": 1,
    }))
    .into_response()
}

async fn legacy_listen(
    State(state): State<Arc<MockState>>,
    Json(_body): Json<serde_json::Value>,
) -> axum::response::Response {
    state.legacy_listen_calls.fetch_add(1, Ordering::SeqCst);
    Json(true).into_response()
}

async fn generate_api_key(State(state): State<Arc<MockState>>) -> axum::response::Response {
    state.api_key_calls.fetch_add(1, Ordering::SeqCst);
    Json(serde_json::json!({
        "apiKey": "fresh-key",
        "expiresAt": (Utc::now() + chrono::Duration::hours(1)).timestamp_millis(),
        "musicServerUrl": state.base_url.get().unwrap(),
    }))
    .into_response()
}

pub fn session_auth(base_url: &str) -> MusicAuth {
    MusicAuth::Session(SessionData {
        session_id: "sess-test".to_string(),
        backend_music_url: base_url.to_string(),
        expires_at: Utc::now() + chrono::Duration::hours(1),
    })
}

pub fn legacy_auth(base_url: &str) -> MusicAuth {
    MusicAuth::ApiKey(LegacyApiKey {
        key: "legacy-test-key".to_string(),
        server_url: base_url.to_string(),
        expires_at: Utc::now() + chrono::Duration::hours(1),
    })
}

/// A track with both listen addresses and an optional duration attribute
pub fn track(address: &str, duration_secs: Option<f64>) -> Track {
    let mut extra = std::collections::BTreeMap::new();
    if let Some(duration) = duration_secs {
        extra.insert("duration".to_string(), serde_json::json!(duration));
    }
    Track {
        address: Some(address.to_string()),
        name: Some(format!("Track {}", address)),
        collection: Some(Collection {
            address: "EQcollection".to_string(),
            name: Some("Test Drops".to_string()),
        }),
        extra,
        ..Default::default()
    }
}

/// Poll until `check` passes or the timeout elapses
pub async fn wait_until<F>(timeout: Duration, mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within {:?}", timeout);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
