//! End-to-end request scenarios over loopback HTTP.

mod common;

use common::*;
use lilygate::access::{AccessCondition, Comparator};
use lilygate::access::condition::DEFAULT_TOKEN_CONTRACT;
use lilygate::orchestrator::ACCESS_DENIED_MESSAGE;
use serde_json::json;
use std::sync::atomic::Ordering;

fn open_condition() -> AccessCondition {
    AccessCondition::erc20_balance(DEFAULT_TOKEN_CONTRACT, "sepolia", Comparator::GreaterOrEqual, 0)
}

#[tokio::test]
async fn test_prompt_round_trip_returns_job_output() {
    let upstream = spawn_upstream(200, json!({"stdout": "moo"})).await;
    let app = spawn_app(settings(&upstream.url, &[]), open_condition()).await;

    let (status, body) = post_prompt(&app.base_url, json!({"inputs": "hello"})).await;

    assert_eq!(status, 200);
    assert_eq!(body, json!({"decryptedString": {"stdout": "moo"}}));
    assert_eq!(upstream.hits.load(Ordering::SeqCst), 1);

    let sent = upstream.bodies.lock().unwrap()[0].clone();
    assert_eq!(sent["pk"], TEST_PK);
    assert_eq!(sent["module"], "cowsay:v0.0.3");
    assert_eq!(sent["inputs"], "-i Message='hello'");
    assert_eq!(sent["opts"], json!({"stream": true}));

    assert_eq!(app.network.handshake_count(), 1);
    assert_eq!(app.network.close_count(), 1);
    assert_eq!(app.chain.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_upstream_failures_exhaust_retries() {
    let upstream = spawn_upstream(502, json!({"error": "bad gateway"})).await;
    let app = spawn_app(settings(&upstream.url, &[]), open_condition()).await;

    let (status, body) = post_prompt(&app.base_url, json!({"inputs": "hello"})).await;

    assert_eq!(status, 500);
    assert_eq!(body, json!({"error": "Failed to fetch data"}));
    assert_eq!(upstream.hits.load(Ordering::SeqCst), 5);
    assert_eq!(app.network.handshake_count(), 0);
}

#[tokio::test]
async fn test_connection_refused_is_failed_fetch() {
    let url = refused_url().await;
    let app = spawn_app(
        settings(&url, &[("FETCH_MAX_ATTEMPTS", "3")]),
        open_condition(),
    )
    .await;

    let (status, body) = post_prompt(&app.base_url, json!({"inputs": "hello"})).await;

    assert_eq!(status, 500);
    assert_eq!(body["error"], "Failed to fetch data");
}

#[tokio::test]
async fn test_unmet_condition_is_forbidden() {
    let upstream = spawn_upstream(200, json!({"stdout": "moo"})).await;
    let app = spawn_app(
        settings(&upstream.url, &[]),
        AccessCondition::default_token_holder(),
    )
    .await;

    let (status, body) = post_prompt(&app.base_url, json!({"inputs": "hello"})).await;

    assert_eq!(status, 403);
    assert_eq!(body, json!({"error": ACCESS_DENIED_MESSAGE}));
    assert!(body.get("decryptedString").is_none());
    assert_eq!(app.network.handshake_count(), 1);
    assert_eq!(app.network.close_count(), 1);
}

#[tokio::test]
async fn test_missing_configuration_fails_before_network() {
    let upstream = spawn_upstream(200, json!({"stdout": "moo"})).await;
    let app = spawn_app(settings(&upstream.url, &[("PK", "")]), open_condition()).await;

    let (status, body) = post_prompt(&app.base_url, json!({"inputs": "hello"})).await;

    assert_eq!(status, 500);
    assert!(body["error"].as_str().unwrap().contains("PK"));
    assert_eq!(upstream.hits.load(Ordering::SeqCst), 0);
    assert_eq!(app.network.handshake_count(), 0);
    assert_eq!(app.chain.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_rpc_key_fails_before_network() {
    let upstream = spawn_upstream(200, json!({"stdout": "moo"})).await;
    let app = spawn_app(
        settings(&upstream.url, &[("ALCHEMY_API_KEY", "")]),
        open_condition(),
    )
    .await;

    let (status, body) = post_prompt(&app.base_url, json!({"inputs": "hello"})).await;

    assert_eq!(status, 500);
    assert!(body["error"].as_str().unwrap().contains("ALCHEMY_API_KEY"));
    assert_eq!(upstream.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_decryption_network_down_is_server_error() {
    let upstream = spawn_upstream(200, json!({"stdout": "moo"})).await;
    let app = spawn_app(settings(&upstream.url, &[]), open_condition()).await;
    app.network.set_reachable(false);

    let (status, body) = post_prompt(&app.base_url, json!({"inputs": "hello"})).await;

    assert_eq!(status, 500);
    assert!(body["error"].as_str().unwrap().contains("unreachable"));
    assert_eq!(app.network.close_count(), 0);
}

#[tokio::test]
async fn test_malformed_body_is_server_error() {
    let upstream = spawn_upstream(200, json!({"stdout": "moo"})).await;
    let app = spawn_app(settings(&upstream.url, &[]), open_condition()).await;

    for body in [json!({"prompt": "hello"}), json!({"inputs": 5})] {
        let (status, body) = post_prompt(&app.base_url, body).await;
        assert_eq!(status, 500);
        assert!(body["error"].is_string());
    }

    let response = reqwest::Client::new()
        .post(format!("{}/api", app.base_url))
        .body(r#"{"inputs":"hello"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 500);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].is_string());

    assert_eq!(upstream.hits.load(Ordering::SeqCst), 0);
    assert_eq!(app.network.handshake_count(), 0);
}

#[tokio::test]
async fn test_non_json_job_output_is_returned_as_string() {
    let upstream = spawn_upstream(200, json!("plain moo")).await;
    let app = spawn_app(settings(&upstream.url, &[]), open_condition()).await;

    let (status, body) = post_prompt(&app.base_url, json!({"inputs": "hello"})).await;

    assert_eq!(status, 200);
    assert_eq!(body, json!({"decryptedString": "plain moo"}));
}

#[tokio::test]
async fn test_concurrent_requests_each_release_their_session() {
    let upstream = spawn_upstream(200, json!({"stdout": "moo"})).await;
    let app = spawn_app(settings(&upstream.url, &[]), open_condition()).await;

    let requests = (0..4).map(|i| {
        let base = app.base_url.clone();
        async move { post_prompt(&base, json!({"inputs": format!("hello {}", i)})).await }
    });
    let results = spawn_all(requests).await;

    assert!(results.iter().all(|(status, _)| *status == 200));
    assert_eq!(app.network.handshake_count(), 4);
    assert_eq!(app.network.close_count(), 4);
    assert_eq!(app.network.open_sessions(), 0);
}

async fn spawn_all<F, T>(futures: impl IntoIterator<Item = F>) -> Vec<T>
where
    F: std::future::Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let handles: Vec<_> = futures.into_iter().map(tokio::spawn).collect();
    let mut out = Vec::new();
    for handle in handles {
        out.push(handle.await.unwrap());
    }
    out
}
