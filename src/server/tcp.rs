//! Raw TCP echo listener with connection management.
//!
//! # Responsibilities
//! - Accept TCP connections up to a fixed concurrency ceiling
//! - Write one JSON echo document per connection and close it
//! - Track active connections so shutdown can force-close and drain them
//!
//! # Accept/shutdown race
//! The `lifecycle` mutex is the linearization point between accepting a
//! connection and initiating shutdown: the shutting-down check and the
//! handler registration happen under it, and `shutdown` flips the flag
//! under the same lock. Without it a handler could be spawned after
//! shutdown has already observed zero active connections.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::config::Config;
use crate::echo::base_response;
use crate::lifecycle::DrainSignal;
use crate::observability::metrics::{Metrics, ERROR_MARSHAL, ERROR_PANIC, ERROR_WRITE};
use crate::server::{Server, ServerError};

/// Maximum concurrent TCP connections.
const MAX_TCP_CONNECTIONS: i32 = 1000;

/// Per-connection deadline.
const TCP_TIMEOUT: Duration = Duration::from_secs(30);

const LISTENER: &str = "TCP";

struct TcpInner {
    config: Arc<Config>,
    metrics: Arc<Metrics>,
    listen_addr: String,
    /// Active connections keyed by remote address; the notify force-closes
    /// the handler.
    connections: DashMap<String, Arc<Notify>>,
    active_conns: AtomicI32,
    shutting_down: AtomicBool,
    /// Linearization point between accept and shutdown (see module docs).
    lifecycle: Mutex<()>,
    /// Wakes the accept loop on an explicit shutdown call.
    notify_shutdown: Notify,
    /// Signaled every time the active count drops to zero.
    drained: Notify,
}

/// TCP echo listener.
pub struct TcpServer {
    inner: Arc<TcpInner>,
    shutdown_started: AtomicBool,
}

impl TcpServer {
    pub fn new(config: Arc<Config>, metrics: Arc<Metrics>) -> Self {
        let listen_addr = format!("0.0.0.0:{}", config.tcp_port);
        Self {
            inner: Arc::new(TcpInner {
                config,
                metrics,
                listen_addr,
                connections: DashMap::new(),
                active_conns: AtomicI32::new(0),
                shutting_down: AtomicBool::new(false),
                lifecycle: Mutex::new(()),
                notify_shutdown: Notify::new(),
                drained: Notify::new(),
            }),
            shutdown_started: AtomicBool::new(false),
        }
    }

    /// Currently tracked connection count (tests).
    pub fn active_connections(&self) -> i32 {
        self.inner.active_conns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Server for TcpServer {
    fn name(&self) -> &'static str {
        LISTENER
    }

    async fn start(&self, mut shutdown: DrainSignal) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.inner.listen_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.inner.listen_addr.clone(),
                source,
            })?;

        tracing::info!(address = %self.inner.listen_addr, "TCP server listening");

        loop {
            if self.inner.shutting_down.load(Ordering::SeqCst) {
                return Ok(());
            }

            tokio::select! {
                _ = shutdown.wait() => return Ok(()),
                _ = self.inner.notify_shutdown.notified() => return Ok(()),
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            if self.inner.shutting_down.load(Ordering::SeqCst) {
                                return Ok(());
                            }
                            tracing::error!(error = %e, "failed to accept TCP connection");
                            continue;
                        }
                    };

                    // Admission and handler registration are linearized
                    // against shutdown.
                    {
                        let _guard = self.inner.lifecycle.lock().expect("tcp lifecycle lock");
                        if self.inner.shutting_down.load(Ordering::SeqCst) {
                            drop(stream);
                            return Ok(());
                        }
                        if self.inner.active_conns.load(Ordering::SeqCst) >= MAX_TCP_CONNECTIONS {
                            tracing::warn!(
                                limit = MAX_TCP_CONNECTIONS,
                                peer = %peer,
                                "connection limit reached, rejecting connection"
                            );
                            drop(stream);
                            continue;
                        }
                        self.inner.active_conns.fetch_add(1, Ordering::SeqCst);
                    }

                    let inner = self.inner.clone();
                    tokio::spawn(async move {
                        handle_connection(inner, stream, peer.to_string()).await;
                    });
                }
            }
        }
    }

    async fn shutdown(&self, deadline: Instant) -> Result<(), ServerError> {
        if self.shutdown_started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        {
            let _guard = self.inner.lifecycle.lock().expect("tcp lifecycle lock");
            self.inner.shutting_down.store(true, Ordering::SeqCst);
        }
        self.inner.notify_shutdown.notify_one();

        // Force-close everything still tracked.
        for entry in self.inner.connections.iter() {
            entry.value().notify_one();
        }

        loop {
            let mut drained = pin!(self.inner.drained.notified());
            drained.as_mut().enable();

            let active = self.inner.active_conns.load(Ordering::SeqCst);
            if active == 0 {
                tracing::info!("all TCP connections closed");
                return Ok(());
            }

            if tokio::time::timeout_at(deadline, drained).await.is_err() {
                let active = self.inner.active_conns.load(Ordering::SeqCst).max(0) as usize;
                return Err(ServerError::DrainTimeout { active });
            }
        }
    }
}

async fn handle_connection(inner: Arc<TcpInner>, stream: TcpStream, peer: String) {
    let force_close = Arc::new(Notify::new());
    inner.connections.insert(peer.clone(), force_close.clone());
    inner.metrics.connection_opened(LISTENER);

    tokio::select! {
        _ = force_close.notified() => {
            tracing::debug!(peer = %peer, "connection force-closed during shutdown");
        }
        result = tokio::time::timeout(TCP_TIMEOUT, echo_once(&inner, stream, &peer)) => {
            if result.is_err() {
                tracing::warn!(peer = %peer, "TCP connection deadline exceeded");
            }
        }
    }

    inner.connections.remove(&peer);
    inner.metrics.connection_closed(LISTENER);
    inner.active_conns.fetch_sub(1, Ordering::SeqCst);
    inner.drained.notify_waiters();
}

/// Write one echo document, then close. The request body is never read;
/// raw TCP has no request semantics here.
async fn echo_once(inner: &TcpInner, mut stream: TcpStream, peer: &str) {
    let start = std::time::Instant::now();
    tracing::info!(listener = LISTENER, source_ip = %peer, "handling TCP connection");

    let config = inner.config.clone();
    let response = match catch_unwind(AssertUnwindSafe(|| base_response(&config, LISTENER, peer))) {
        Ok(response) => response,
        Err(_) => {
            tracing::error!(peer = %peer, "panic while building TCP response");
            inner.metrics.record_error(LISTENER, ERROR_PANIC);
            return;
        }
    };

    let body = match serde_json::to_vec(&response) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(error = %e, "failed to marshal TCP response");
            inner.metrics.record_error(LISTENER, ERROR_MARSHAL);
            return;
        }
    };

    if let Err(e) = stream.write_all(&body).await {
        tracing::error!(error = %e, "failed to write TCP response");
        inner.metrics.record_error(LISTENER, ERROR_WRITE);
        return;
    }
    if let Err(e) = stream.shutdown().await {
        tracing::debug!(error = %e, "error closing TCP connection");
    }

    inner
        .metrics
        .record_request(LISTENER, "CONNECT", "other", start.elapsed());
}
