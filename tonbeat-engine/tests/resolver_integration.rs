//! Music source resolver integration tests against the mock backend:
//! cache short-circuiting, in-flight coalescing, error classification,
//! and timeout behavior.

mod helpers;

use helpers::{session_auth, spawn_mock_backend, track};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tonbeat_common::config::{CacheConfig, ResolveConfig};
use tonbeat_engine::backend::BackendClient;
use tonbeat_engine::cache::SourceCache;
use tonbeat_engine::error::Error;
use tonbeat_engine::resolver::SourceResolver;

fn resolver() -> Arc<SourceResolver> {
    Arc::new(SourceResolver::new(
        Arc::new(SourceCache::new(&CacheConfig::default())),
        Arc::new(BackendClient::new().unwrap()),
        ResolveConfig::default(),
    ))
}

#[tokio::test]
async fn remote_generation_result_is_cached() {
    let mock = spawn_mock_backend().await;
    let resolver = resolver();
    let auth = session_auth(&mock.base_url);
    let track = track("EQtrack", Some(120.0));

    let first = resolver
        .resolve(&track, &auth, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(first.byte_len(), 64);
    assert_eq!(first.duration_hint(), Some(120.0));
    assert_eq!(mock.state.generate_calls.load(Ordering::SeqCst), 1);

    // Second resolution is a cache hit; no further network call
    let second = resolver
        .resolve(&track, &auth, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(second.id(), first.id());
    assert_eq!(mock.state.generate_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_resolutions_coalesce_to_one_call() {
    let mock = spawn_mock_backend().await;
    mock.state.generate_delay_ms.store(150, Ordering::SeqCst);

    let resolver = resolver();
    let auth = session_auth(&mock.base_url);
    let track = track("EQtrack", None);

    let a = {
        let resolver = Arc::clone(&resolver);
        let auth = auth.clone();
        let track = track.clone();
        tokio::spawn(async move { resolver.resolve(&track, &auth, Duration::from_secs(5)).await })
    };
    let b = {
        let resolver = Arc::clone(&resolver);
        let auth = auth.clone();
        let track = track.clone();
        tokio::spawn(async move { resolver.resolve(&track, &auth, Duration::from_secs(5)).await })
    };

    let first = a.await.unwrap().unwrap();
    let second = b.await.unwrap().unwrap();

    // The second caller observed the first's cached result
    assert_eq!(first.id(), second.id());
    assert_eq!(mock.state.generate_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn distinct_auth_identities_resolve_separately() {
    let mock = spawn_mock_backend().await;
    let resolver = resolver();
    let track = track("EQtrack", None);

    let session = session_auth(&mock.base_url);
    let legacy = helpers::legacy_auth(&mock.base_url);

    resolver
        .resolve(&track, &session, Duration::from_secs(5))
        .await
        .unwrap();
    resolver
        .resolve(&track, &legacy, Duration::from_secs(5))
        .await
        .unwrap();

    // Cache keys are auth-scoped, so both resolutions hit the network
    assert_eq!(mock.state.generate_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn non_success_statuses_are_classified() {
    let mock = spawn_mock_backend().await;
    let resolver = resolver();
    let auth = session_auth(&mock.base_url);

    let cases = [
        (401u16, "EQa"),
        (403u16, "EQb"),
        (429u16, "EQc"),
        (503u16, "EQd"),
        (500u16, "EQe"),
    ];

    for (status, addr) in cases {
        mock.state.generate_status.store(status, Ordering::SeqCst);
        let err = resolver
            .resolve(&track(addr, None), &auth, Duration::from_secs(5))
            .await
            .unwrap_err();
        match status {
            401 => assert!(matches!(err, Error::AuthExpired)),
            403 => assert!(matches!(err, Error::Forbidden)),
            429 => assert!(matches!(err, Error::RateLimited)),
            503 => assert!(matches!(err, Error::ServiceUnavailable)),
            other => assert!(matches!(err, Error::ServerError(s) if s == other)),
        }
    }
}

#[tokio::test]
async fn slow_generation_times_out() {
    let mock = spawn_mock_backend().await;
    mock.state.generate_delay_ms.store(500, Ordering::SeqCst);

    let resolver = resolver();
    let auth = session_auth(&mock.base_url);

    let err = resolver
        .resolve(&track("EQslow", None), &auth, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout));
}

#[tokio::test]
async fn failed_resolution_leaves_no_cache_entry() {
    let mock = spawn_mock_backend().await;
    mock.state.generate_status.store(503, Ordering::SeqCst);

    let resolver = resolver();
    let auth = session_auth(&mock.base_url);
    let track = track("EQtrack", None);

    assert!(resolver
        .resolve(&track, &auth, Duration::from_secs(5))
        .await
        .is_err());

    // Recovery: a later resolution issues a fresh call and succeeds
    mock.state.generate_status.store(200, Ordering::SeqCst);
    let handle = resolver
        .resolve(&track, &auth, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(handle.byte_len(), 64);
    assert_eq!(mock.state.generate_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn preload_failure_is_silent() {
    let mock = spawn_mock_backend().await;
    mock.state.generate_status.store(503, Ordering::SeqCst);

    let resolver = resolver();
    let auth = session_auth(&mock.base_url);

    // Best effort: never panics, never propagates
    resolver.preload(&track("EQnext", None), &auth).await;
    assert_eq!(mock.state.generate_calls.load(Ordering::SeqCst), 1);
}
