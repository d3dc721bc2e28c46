//! Listener implementations and their supervisor.
//!
//! Every protocol server implements the [`Server`] trait; the
//! [`manager::Manager`] owns the collection, starts each one in its own
//! task and drives a bounded graceful shutdown.

pub mod grpc;
pub mod http;
pub mod manager;
pub mod metrics;
pub mod quic;
pub mod tcp;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::lifecycle::DrainSignal;
use crate::net::tls::CertError;

pub use grpc::GrpcServer;
pub use http::HttpServer;
pub use manager::{Manager, ManagerError};
pub use metrics::MetricsServer;
pub use quic::QuicServer;
pub use tcp::TcpServer;

/// Errors surfaced by a listener's start or shutdown path.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listen address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Clean stop after a shutdown was requested; not a failure.
    #[error("server closed")]
    Closed,

    #[error(transparent)]
    Tls(#[from] CertError),

    #[error("transport error: {0}")]
    Transport(String),

    /// Connections were still draining when the deadline fired.
    #[error("shutdown timeout exceeded, {active} connections still active")]
    DrainTimeout { active: usize },

    #[error("shutdown timeout exceeded")]
    ShutdownTimeout,
}

/// A single protocol listener.
///
/// `start` runs until the listener stops serving; `shutdown` asks it to
/// drain by `deadline`. Both may be called from different tasks.
#[async_trait]
pub trait Server: Send + Sync {
    /// Listener tag, also used as the metric label.
    fn name(&self) -> &'static str;

    /// Bind and serve until shutdown. The signal resolves when the
    /// process-wide drain begins.
    async fn start(&self, shutdown: DrainSignal) -> Result<(), ServerError>;

    /// Gracefully stop, bounded by `deadline`. Idempotent; succeeds when
    /// the listener was never started.
    async fn shutdown(&self, deadline: Instant) -> Result<(), ServerError>;
}
