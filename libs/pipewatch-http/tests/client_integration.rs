#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Integration tests for `HttpClient` against a local mock server.

use httpmock::prelude::*;
use pipewatch_http::{HttpClient, HttpClientBuilder, HttpClientConfig, HttpError};
use std::time::Duration;

fn test_client() -> HttpClient {
    HttpClientBuilder::with_config(HttpClientConfig::for_testing())
        .build()
        .unwrap()
}

#[tokio::test]
async fn get_returns_body_and_status() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/api/pipelines");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"success":true,"data":[{"id":"PL-7","pressureBar":61.2}]}"#);
    });

    let resp = test_client()
        .get(&server.url("/api/pipelines"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let value: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(value["data"][0]["id"], "PL-7");
    mock.assert();
}

#[tokio::test]
async fn non_success_status_is_not_an_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/stations");
        then.status(401).body(r#"{"success":false,"message":"token expired"}"#);
    });

    let resp = test_client()
        .get(&server.url("/api/stations"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn sends_headers_and_json_body() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/api/auth/login")
            .header("content-type", "application/json")
            .header("x-request-source", "agent")
            .json_body(serde_json::json!({"username": "operator"}));
        then.status(200).body("{}");
    });

    test_client()
        .post(&server.url("/api/auth/login"))
        .header("x-request-source", "agent")
        .json(&serde_json::json!({"username": "operator"}))
        .send()
        .await
        .unwrap();

    mock.assert();
}

#[tokio::test]
async fn injects_default_user_agent() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/ua")
            .header("user-agent", pipewatch_http::DEFAULT_USER_AGENT);
        then.status(204);
    });

    test_client().get(&server.url("/ua")).send().await.unwrap();
    mock.assert();
}

#[tokio::test]
async fn slow_server_times_out() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/slow");
        then.status(200).delay(Duration::from_millis(500));
    });

    let client = HttpClientBuilder::with_config(HttpClientConfig::for_testing())
        .timeout(Duration::from_millis(50))
        .build()
        .unwrap();

    let err = client.get(&server.url("/slow")).send().await.unwrap_err();
    assert!(matches!(err, HttpError::Timeout(_)), "got {err:?}");
}

#[tokio::test]
async fn body_limit_is_enforced() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/big");
        then.status(200).body("x".repeat(4096));
    });

    let client = HttpClientBuilder::with_config(HttpClientConfig::for_testing())
        .max_body_size(1024)
        .build()
        .unwrap();

    let resp = client.get(&server.url("/big")).send().await.unwrap();
    assert!(matches!(
        resp.bytes().await,
        Err(HttpError::BodyTooLarge { limit: 1024, .. })
    ));
}

#[tokio::test]
async fn tls_only_client_refuses_plain_http() {
    let server = MockServer::start();
    let client = HttpClient::new().unwrap();

    let err = client.get(&server.url("/any")).send().await.unwrap_err();
    assert!(matches!(err, HttpError::SchemeRefused { .. }));
}

#[tokio::test]
async fn connection_refused_is_network_error() {
    let client = test_client();
    let err = client
        .get("http://127.0.0.1:1/unreachable")
        .send()
        .await
        .unwrap_err();
    assert!(err.is_network(), "expected network error, got {err:?}");
}
