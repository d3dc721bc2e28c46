//! QUIC (HTTP/3) echo listener.
//!
//! # Responsibilities
//! - Serve the echo handler over HTTP/3 on a quinn endpoint
//! - Advertise the `h3` / `h3-29` ALPN tokens from the shared TLS material
//!
//! There is no graceful mode at this layer: shutdown closes the endpoint
//! and waits for it to go idle within the deadline.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::StatusCode;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;

use crate::config::Config;
use crate::echo::{base_response, normalize_endpoint};
use crate::lifecycle::DrainSignal;
use crate::net::tls;
use crate::observability::metrics::{Metrics, ERROR_MARSHAL, ERROR_PANIC, ERROR_WRITE};
use crate::server::{Server, ServerError};

const LISTENER: &str = "QUIC";

#[derive(Clone)]
struct QuicState {
    config: Arc<Config>,
    metrics: Arc<Metrics>,
}

/// QUIC echo listener.
pub struct QuicServer {
    state: QuicState,
    listen_addr: String,
    endpoint: Mutex<Option<quinn::Endpoint>>,
    started: AtomicBool,
    notify_shutdown: Arc<Notify>,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl QuicServer {
    pub fn new(config: Arc<Config>, metrics: Arc<Metrics>) -> Self {
        let listen_addr = format!("0.0.0.0:{}", config.quic_port);
        let (done_tx, done_rx) = watch::channel(false);
        Self {
            state: QuicState { config, metrics },
            listen_addr,
            endpoint: Mutex::new(None),
            started: AtomicBool::new(false),
            notify_shutdown: Arc::new(Notify::new()),
            done_tx,
            done_rx,
        }
    }
}

#[async_trait]
impl Server for QuicServer {
    fn name(&self) -> &'static str {
        LISTENER
    }

    async fn start(&self, shutdown: DrainSignal) -> Result<(), ServerError> {
        self.started.store(true, Ordering::SeqCst);
        let result = self.run(shutdown).await;
        let _ = self.done_tx.send(true);
        result
    }

    async fn shutdown(&self, deadline: Instant) -> Result<(), ServerError> {
        if !self.started.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.notify_shutdown.notify_one();
        if let Some(endpoint) = self.endpoint.lock().expect("quic endpoint lock").take() {
            endpoint.close(0u32.into(), b"shutdown");
        }

        let mut done = self.done_rx.clone();
        match tokio::time::timeout_at(deadline, done.wait_for(|finished| *finished)).await {
            Ok(_) => Ok(()),
            Err(_) => Err(ServerError::ShutdownTimeout),
        }
    }
}

impl QuicServer {
    async fn run(&self, mut shutdown: DrainSignal) -> Result<(), ServerError> {
        let addr: std::net::SocketAddr =
            self.listen_addr
                .parse()
                .map_err(|e: std::net::AddrParseError| ServerError::Bind {
                    addr: self.listen_addr.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
                })?;

        let tls_config = tls::quic_tls_config()?;
        let quic_crypto = quinn::crypto::rustls::QuicServerConfig::try_from(tls_config)
            .map_err(|e| ServerError::Transport(e.to_string()))?;
        let server_config = quinn::ServerConfig::with_crypto(Arc::new(quic_crypto));

        let endpoint = quinn::Endpoint::server(server_config, addr).map_err(|source| {
            ServerError::Bind {
                addr: self.listen_addr.clone(),
                source,
            }
        })?;
        *self.endpoint.lock().expect("quic endpoint lock") = Some(endpoint.clone());

        tracing::info!(address = %self.listen_addr, "QUIC server listening");

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = self.notify_shutdown.notified() => break,
                incoming = endpoint.accept() => {
                    let Some(incoming) = incoming else { break };
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        handle_connection(state, incoming).await;
                    });
                }
            }
        }

        endpoint.close(0u32.into(), b"shutdown");
        endpoint.wait_idle().await;
        Ok(())
    }
}

async fn handle_connection(state: QuicState, incoming: quinn::Incoming) {
    let connection = match incoming.await {
        Ok(connection) => connection,
        Err(e) => {
            tracing::debug!(error = %e, "QUIC handshake failed");
            return;
        }
    };
    let remote_addr = connection.remote_address().to_string();

    let mut h3_conn =
        match h3::server::Connection::new(h3_quinn::Connection::new(connection)).await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::debug!(error = %e, "failed to establish HTTP/3 connection");
                return;
            }
        };

    loop {
        match h3_conn.accept().await {
            Ok(Some((request, stream))) => {
                let state = state.clone();
                let remote_addr = remote_addr.clone();
                tokio::spawn(async move {
                    handle_request(state, request, stream, remote_addr).await;
                });
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "HTTP/3 connection closed");
                break;
            }
        }
    }
}

async fn handle_request(
    state: QuicState,
    request: http::Request<()>,
    mut stream: h3::server::RequestStream<h3_quinn::BidiStream<Bytes>, Bytes>,
    remote_addr: String,
) {
    let start = std::time::Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    tracing::info!(
        listener = LISTENER,
        method = %method,
        path = %path,
        source_ip = %remote_addr,
        "handling request"
    );

    let config = state.config.clone();
    let built = catch_unwind(AssertUnwindSafe(|| {
        let mut response = base_response(&config, LISTENER, &remote_addr).with_http(
            "HTTP/3.0",
            &method,
            &path,
        );
        if config.print_headers {
            let mut headers = std::collections::HashMap::new();
            for name in request.headers().keys() {
                let values = request
                    .headers()
                    .get_all(name)
                    .iter()
                    .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                    .collect();
                headers.insert(name.as_str().to_string(), values);
            }
            response = response.with_headers(headers);
        }
        response
    }));

    let response = match built {
        Ok(response) => response,
        Err(_) => {
            tracing::error!(path = %path, "panic while building QUIC response");
            state.metrics.record_error(LISTENER, ERROR_PANIC);
            let reply = http::Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(())
                .expect("static error response");
            let _ = stream.send_response(reply).await;
            let _ = stream.finish().await;
            return;
        }
    };

    let body = match serde_json::to_vec(&response) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(error = %e, "failed to marshal QUIC response");
            state.metrics.record_error(LISTENER, ERROR_MARSHAL);
            let reply = http::Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(())
                .expect("static error response");
            let _ = stream.send_response(reply).await;
            let _ = stream.finish().await;
            return;
        }
    };

    let reply = http::Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json")
        .body(())
        .expect("static ok response");

    if let Err(e) = stream.send_response(reply).await {
        tracing::error!(error = %e, "failed to write HTTP/3 response head");
        state.metrics.record_error(LISTENER, ERROR_WRITE);
        return;
    }
    if let Err(e) = stream.send_data(Bytes::from(body)).await {
        tracing::error!(error = %e, "failed to write HTTP/3 response body");
        state.metrics.record_error(LISTENER, ERROR_WRITE);
        return;
    }
    let _ = stream.finish().await;

    state.metrics.record_request(
        LISTENER,
        &method,
        normalize_endpoint(&path),
        start.elapsed(),
    );
}
