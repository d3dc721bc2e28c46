//! Metrics and probe listener.
//!
//! Serves the Prometheus registry plus the liveness and readiness probes
//! used by Kubernetes deployments.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use axum_server::Handle;
use tokio::sync::watch;
use tokio::time::Instant;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::lifecycle::DrainSignal;
use crate::observability::Metrics;
use crate::server::{Server, ServerError};

/// Request timeout; scraping is cheap.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Prometheus metrics and probe listener.
pub struct MetricsServer {
    metrics: Arc<Metrics>,
    listen_addr: String,
    handle: Handle,
    started: AtomicBool,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl MetricsServer {
    pub fn new(config: Arc<Config>, metrics: Arc<Metrics>) -> Self {
        let (done_tx, done_rx) = watch::channel(false);
        Self {
            metrics,
            listen_addr: format!("0.0.0.0:{}", config.metrics_port),
            handle: Handle::new(),
            started: AtomicBool::new(false),
            done_tx,
            done_rx,
        }
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/health", get(|| async { "OK" }))
            .route("/ready", get(|| async { "Ready" }))
            .with_state(self.metrics.clone())
            .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
            .layer(TraceLayer::new_for_http())
    }

    async fn run(&self) -> Result<(), ServerError> {
        let addr: SocketAddr = self
            .listen_addr
            .parse()
            .map_err(|e: std::net::AddrParseError| ServerError::Bind {
                addr: self.listen_addr.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
            })?;

        tracing::info!(address = %self.listen_addr, "metrics server listening");

        axum_server::bind(addr)
            .handle(self.handle.clone())
            .serve(self.router().into_make_service())
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.listen_addr.clone(),
                source,
            })
    }
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics.render(),
    )
}

#[async_trait]
impl Server for MetricsServer {
    fn name(&self) -> &'static str {
        "Metrics"
    }

    async fn start(&self, _shutdown: DrainSignal) -> Result<(), ServerError> {
        self.started.store(true, Ordering::SeqCst);
        let result = self.run().await;
        let _ = self.done_tx.send(true);
        result
    }

    async fn shutdown(&self, deadline: Instant) -> Result<(), ServerError> {
        if !self.started.load(Ordering::SeqCst) {
            return Ok(());
        }

        let grace = deadline.saturating_duration_since(Instant::now());
        self.handle.graceful_shutdown(Some(grace));

        let mut done = self.done_rx.clone();
        match tokio::time::timeout_at(deadline, done.wait_for(|finished| *finished)).await {
            Ok(_) => Ok(()),
            Err(_) => Err(ServerError::ShutdownTimeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_before_start_is_ok() {
        let server = MetricsServer::new(Arc::new(Config::default()), Arc::new(Metrics::new()));
        let deadline = Instant::now() + Duration::from_millis(100);
        assert!(server.shutdown(deadline).await.is_ok());
    }
}
