//! Integration tests for the TCP listener.

use std::sync::Arc;
use std::time::Duration;

use echo_app::server::TcpServer;
use echo_app::{DrainControl, Server};
use serde_json::Value;
use tokio::io::AsyncReadExt;

mod common;

async fn read_echo(addr: &str) -> Value {
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let mut body = Vec::new();
    stream.read_to_end(&mut body).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_tcp_echo_has_no_http_fields() {
    let mut config = common::test_config();
    config.tcp = true;
    config.tcp_port = "33081".to_string();
    config.message = "tcp-hello".to_string();
    let (config, metrics) = common::shared(config);

    let server = Arc::new(TcpServer::new(config, metrics));
    let drain = DrainControl::new();
    let signal = drain.signal();
    let task_server = server.clone();
    tokio::spawn(async move {
        let _ = task_server.start(signal).await;
    });
    common::wait_for_port("127.0.0.1:33081").await;

    let body = read_echo("127.0.0.1:33081").await;
    assert_eq!(body["listener"], "TCP");
    assert_eq!(body["message"], "tcp-hello");
    assert_eq!(body["source_ip"], "127.0.0.1");
    assert!(body.get("http_version").is_none());
    assert!(body.get("http_method").is_none());
    assert!(body.get("http_endpoint").is_none());
    assert!(body.get("headers").is_none());
}

#[tokio::test]
async fn test_tcp_gauge_drains_to_zero_on_shutdown() {
    let mut config = common::test_config();
    config.tcp = true;
    config.tcp_port = "33082".to_string();
    let (config, metrics) = common::shared(config);

    let server = Arc::new(TcpServer::new(config, metrics.clone()));
    let drain = DrainControl::new();
    let signal = drain.signal();
    let task_server = server.clone();
    tokio::spawn(async move {
        let _ = task_server.start(signal).await;
    });
    common::wait_for_port("127.0.0.1:33082").await;

    for _ in 0..5 {
        let _ = read_echo("127.0.0.1:33082").await;
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    server.shutdown(deadline).await.expect("clean shutdown");

    assert_eq!(metrics.active_connections("TCP"), 0);
    assert_eq!(server.active_connections(), 0);
}

#[tokio::test]
async fn test_tcp_shutdown_refuses_new_connections() {
    let mut config = common::test_config();
    config.tcp = true;
    config.tcp_port = "33083".to_string();
    let (config, metrics) = common::shared(config);

    let server = Arc::new(TcpServer::new(config, metrics));
    let drain = DrainControl::new();
    let signal = drain.signal();
    let task_server = server.clone();
    let start_task = tokio::spawn(async move { task_server.start(signal).await });
    common::wait_for_port("127.0.0.1:33083").await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    server.shutdown(deadline).await.expect("clean shutdown");
    let started = start_task.await.unwrap();
    assert!(started.is_ok());

    // The listener socket is gone; connecting must fail.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let result = tokio::time::timeout(
        Duration::from_millis(500),
        tokio::net::TcpStream::connect("127.0.0.1:33083"),
    )
    .await;
    match result {
        Ok(Ok(_)) => panic!("connection accepted after shutdown"),
        _ => {}
    }
}

#[tokio::test]
async fn test_tcp_shutdown_twice_is_consistent() {
    let mut config = common::test_config();
    config.tcp = true;
    config.tcp_port = "33084".to_string();
    let (config, metrics) = common::shared(config);

    let server = Arc::new(TcpServer::new(config, metrics));
    let drain = DrainControl::new();
    let signal = drain.signal();
    let task_server = server.clone();
    tokio::spawn(async move {
        let _ = task_server.start(signal).await;
    });
    common::wait_for_port("127.0.0.1:33084").await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    assert!(server.shutdown(deadline).await.is_ok());
    assert!(server.shutdown(deadline).await.is_ok());
}

#[tokio::test]
async fn test_tcp_drain_signal_stops_accept_loop() {
    let mut config = common::test_config();
    config.tcp = true;
    config.tcp_port = "33085".to_string();
    let (config, metrics) = common::shared(config);

    let server = Arc::new(TcpServer::new(config, metrics));
    let drain = DrainControl::new();
    let signal = drain.signal();
    let task_server = server.clone();
    let start_task = tokio::spawn(async move { task_server.start(signal).await });
    common::wait_for_port("127.0.0.1:33085").await;

    drain.begin();
    let result = tokio::time::timeout(Duration::from_secs(2), start_task)
        .await
        .expect("accept loop observed the drain")
        .unwrap();
    assert!(result.is_ok());
}
