//! Integration tests for the HTTP and TLS listeners.

use std::sync::Arc;
use std::time::Duration;

use echo_app::server::HttpServer;
use echo_app::{DrainControl, Server};
use serde_json::Value;

mod common;

fn spawn_http(config: echo_app::Config, use_tls: bool) -> Arc<HttpServer> {
    let (config, metrics) = common::shared(config);
    let server = Arc::new(HttpServer::new(config, metrics, use_tls));
    let signal = DrainControl::new().signal();
    let task_server = server.clone();
    tokio::spawn(async move {
        let _ = task_server.start(signal).await;
    });
    server
}

#[tokio::test]
async fn test_http_echo_basic_fields() {
    let mut config = common::test_config();
    config.http_port = "31081".to_string();
    config.message = "demo-env".to_string();
    config.node = "k8s-node-1".to_string();
    spawn_http(config, false);
    common::wait_for_port("127.0.0.1:31081").await;

    let response = reqwest::get("http://127.0.0.1:31081/").await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "application/json"
    );

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "demo-env");
    assert_eq!(body["node"], "k8s-node-1");
    assert_eq!(body["listener"], "HTTP");
    assert_eq!(body["http_method"], "GET");
    assert_eq!(body["http_endpoint"], "/");
    assert_eq!(body["source_ip"], "127.0.0.1");
    assert!(body["hostname"].as_str().is_some_and(|h| !h.is_empty()));
    assert!(body["timestamp"].as_str().is_some_and(|t| t.contains('T')));
}

#[tokio::test]
async fn test_http_echo_omits_empty_optionals() {
    let mut config = common::test_config();
    config.http_port = "31082".to_string();
    spawn_http(config, false);
    common::wait_for_port("127.0.0.1:31082").await;

    let body: Value = reqwest::get("http://127.0.0.1:31082/anything/else")
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert!(body.get("message").is_none());
    assert!(body.get("node").is_none());
    assert!(body.get("headers").is_none());
    assert_eq!(body["http_endpoint"], "/anything/else");
}

#[tokio::test]
async fn test_http_echo_headers_round_trip() {
    let mut config = common::test_config();
    config.http_port = "31083".to_string();
    config.print_headers = true;
    spawn_http(config, false);
    common::wait_for_port("127.0.0.1:31083").await;

    let client = reqwest::Client::new();
    let mut headers = reqwest::header::HeaderMap::new();
    headers.append("x-trace", "alpha".parse().unwrap());
    headers.append("x-trace", "beta".parse().unwrap());
    headers.insert("x-single", "one".parse().unwrap());

    let body: Value = client
        .get("http://127.0.0.1:31083/")
        .headers(headers)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let echoed = body["headers"].as_object().expect("headers present");
    assert_eq!(echoed["x-trace"], serde_json::json!(["alpha", "beta"]));
    assert_eq!(echoed["x-single"], serde_json::json!(["one"]));
}

#[tokio::test]
async fn test_http_methods_are_echoed() {
    let mut config = common::test_config();
    config.http_port = "31084".to_string();
    spawn_http(config, false);
    common::wait_for_port("127.0.0.1:31084").await;

    let client = reqwest::Client::new();
    let body: Value = client
        .post("http://127.0.0.1:31084/submit")
        .body("ignored")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["http_method"], "POST");
    assert_eq!(body["http_endpoint"], "/submit");
    assert_eq!(body["http_version"], "HTTP/1.1");
}

#[tokio::test]
async fn test_oversized_body_returns_500() {
    let mut config = common::test_config();
    config.http_port = "31086".to_string();
    config.max_request_size = 1024;
    spawn_http(config, false);
    common::wait_for_port("127.0.0.1:31086").await;

    let client = reqwest::Client::new();
    let response = client
        .post("http://127.0.0.1:31086/upload")
        .body(vec![b'x'; 8192])
        .send()
        .await
        .unwrap();
    assert_eq!(
        response.status(),
        reqwest::StatusCode::INTERNAL_SERVER_ERROR
    );
    assert_eq!(response.text().await.unwrap(), "Internal Server Error");

    // A body at the ceiling still echoes.
    let response = client
        .post("http://127.0.0.1:31086/upload")
        .body(vec![b'x'; 1024])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["http_endpoint"], "/upload");
}

#[tokio::test]
async fn test_tls_echo() {
    let mut config = common::test_config();
    config.tls = true;
    config.tls_port = "32081".to_string();
    spawn_http(config, true);
    common::wait_for_port("127.0.0.1:32081").await;

    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .use_rustls_tls()
        .build()
        .unwrap();

    let body: Value = client
        .get("https://127.0.0.1:32081/")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["listener"], "TLS");
    assert_eq!(body["http_endpoint"], "/");
}

#[tokio::test]
async fn test_http_shutdown_refuses_new_connections() {
    let mut config = common::test_config();
    config.http_port = "31085".to_string();
    let server = spawn_http(config, false);
    common::wait_for_port("127.0.0.1:31085").await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    server.shutdown(deadline).await.expect("clean shutdown");

    let result = reqwest::Client::builder()
        .timeout(Duration::from_millis(500))
        .build()
        .unwrap()
        .get("http://127.0.0.1:31085/")
        .send()
        .await;
    assert!(result.is_err());
}
