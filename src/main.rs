use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use echo_app::config::{validate_config, Cli, Config};
use echo_app::observability::{logging, Metrics};
use echo_app::server::{GrpcServer, HttpServer, Manager, MetricsServer, QuicServer, TcpServer};
use echo_app::{lifecycle, Server};

/// Bound on graceful shutdown after a signal.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    let config = Config::from(Cli::parse());

    logging::init(&config);

    if let Err(errors) = validate_config(&config) {
        for error in &errors {
            tracing::error!(%error, "invalid configuration");
        }
        std::process::exit(1);
    }

    tracing::info!(
        http_port = %config.http_port,
        tls = config.tls,
        tcp = config.tcp,
        grpc = config.grpc,
        quic = config.quic,
        metrics = config.metrics,
        log_level = %config.log_level,
        "configuration loaded"
    );

    let config = Arc::new(config);
    let metrics = Arc::new(Metrics::new());

    let mut manager = Manager::new();

    // The HTTP listener is always on.
    manager.register_server(Arc::new(HttpServer::new(config.clone(), metrics.clone(), false))
        as Arc<dyn Server>);
    if config.tls {
        manager.register_server(Arc::new(HttpServer::new(config.clone(), metrics.clone(), true)));
    }
    if config.tcp {
        manager.register_server(Arc::new(TcpServer::new(config.clone(), metrics.clone())));
    }
    if config.grpc {
        manager.register_server(Arc::new(GrpcServer::new(config.clone(), metrics.clone())));
    }
    if config.quic {
        manager.register_server(Arc::new(QuicServer::new(config.clone(), metrics.clone())));
    }
    if config.metrics {
        manager.register_server(Arc::new(MetricsServer::new(config.clone(), metrics.clone())));
    }

    manager.start();

    lifecycle::signals::shutdown_signal().await;

    tracing::info!(timeout_secs = SHUTDOWN_TIMEOUT.as_secs(), "shutting down");
    if let Err(e) = manager.shutdown(SHUTDOWN_TIMEOUT).await {
        tracing::error!(error = %e, "shutdown failed");
        std::process::exit(1);
    }

    tracing::info!("shutdown complete");
}
