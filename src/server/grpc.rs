//! gRPC echo listener.
//!
//! # Responsibilities
//! - Serve `echo.EchoService/Echo` with server reflection enabled
//! - Surface the fully-qualified method string in the reply
//! - Graceful stop raced against the shutdown deadline

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tonic::transport::Server as TonicServer;
use tonic::{Request, Response, Status};
use tower::{Layer, Service};

use crate::config::Config;
use crate::echo::{base_response, normalize_endpoint};
use crate::lifecycle::DrainSignal;
use crate::observability::metrics::{Metrics, ERROR_PANIC};
use crate::proto::echo as pb;
use crate::server::{Server, ServerError};

const LISTENER: &str = "gRPC";

/// Maximum concurrent HTTP/2 streams per connection.
const MAX_CONCURRENT_STREAMS: u32 = 100;

/// Fully-qualified gRPC method, captured from the request path by
/// [`GrpcMethodLayer`] before tonic routes the call.
#[derive(Debug, Clone)]
pub struct GrpcMethod(pub String);

/// Copies the request URI path into the request extensions, where the
/// handler can read it as the gRPC method string.
#[derive(Debug, Clone, Default)]
pub struct GrpcMethodLayer;

impl<S> Layer<S> for GrpcMethodLayer {
    type Service = GrpcMethodService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GrpcMethodService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct GrpcMethodService<S> {
    inner: S,
}

impl<S, B> Service<http::Request<B>> for GrpcMethodService<S>
where
    S: Service<http::Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: http::Request<B>) -> Self::Future {
        let method = GrpcMethod(request.uri().path().to_string());
        request.extensions_mut().insert(method);
        self.inner.call(request)
    }
}

/// The echo service implementation.
pub struct EchoService {
    config: Arc<Config>,
    metrics: Arc<Metrics>,
}

impl EchoService {
    pub fn new(config: Arc<Config>, metrics: Arc<Metrics>) -> Self {
        Self { config, metrics }
    }
}

#[tonic::async_trait]
impl pb::echo_service_server::EchoService for EchoService {
    async fn echo(
        &self,
        request: Request<pb::EchoRequest>,
    ) -> Result<Response<pb::EchoResponse>, Status> {
        let start = std::time::Instant::now();

        let method = request
            .extensions()
            .get::<GrpcMethod>()
            .map(|m| m.0.clone())
            .unwrap_or_else(|| "unknown".to_string());
        let remote_addr = request
            .remote_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_default();

        tracing::info!(
            listener = LISTENER,
            method = %method,
            source_ip = %remote_addr,
            "handling gRPC request"
        );

        let config = self.config.clone();
        let built = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let base = base_response(&config, LISTENER, &remote_addr);
            pb::EchoResponse {
                timestamp: base.timestamp,
                message: base.message.unwrap_or_default(),
                source_ip: base.source_ip,
                hostname: base.hostname,
                listener: base.listener,
                node: base.node.unwrap_or_default(),
                grpc_method: method.clone(),
                http_version: String::new(),
                http_method: String::new(),
                http_endpoint: String::new(),
            }
        }));

        match built {
            Ok(response) => {
                self.metrics.record_request(
                    LISTENER,
                    &method,
                    normalize_endpoint(&method),
                    start.elapsed(),
                );
                Ok(Response::new(response))
            }
            Err(_) => {
                tracing::error!(method = %method, "panic while building gRPC response");
                self.metrics.record_error(LISTENER, ERROR_PANIC);
                Err(Status::internal("internal error"))
            }
        }
    }
}

/// gRPC echo listener.
pub struct GrpcServer {
    config: Arc<Config>,
    metrics: Arc<Metrics>,
    listen_addr: String,
    started: AtomicBool,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl GrpcServer {
    pub fn new(config: Arc<Config>, metrics: Arc<Metrics>) -> Self {
        let listen_addr = format!("0.0.0.0:{}", config.grpc_port);
        let (done_tx, done_rx) = watch::channel(false);
        Self {
            config,
            metrics,
            listen_addr,
            started: AtomicBool::new(false),
            stop_tx: Mutex::new(None),
            done_tx,
            done_rx,
        }
    }
}

#[async_trait]
impl Server for GrpcServer {
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

        if let Some(stop) = self.stop_tx.lock().expect("grpc stop lock").take() {
            let _ = stop.send(());
        }

        let mut done = self.done_rx.clone();
        match tokio::time::timeout_at(deadline, done.wait_for(|finished| *finished)).await {
            Ok(_) => Ok(()),
            Err(_) => Err(ServerError::ShutdownTimeout),
        }
    }
}

impl GrpcServer {
    async fn run(&self, shutdown: DrainSignal) -> Result<(), ServerError> {
        let addr: std::net::SocketAddr =
            self.listen_addr
                .parse()
                .map_err(|e: std::net::AddrParseError| ServerError::Bind {
                    addr: self.listen_addr.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
                })?;

        let (stop_tx, stop_rx) = oneshot::channel();
        *self.stop_tx.lock().expect("grpc stop lock") = Some(stop_tx);

        let reflection_v1 = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(pb::FILE_DESCRIPTOR_SET)
            .build_v1()
            .map_err(|e| ServerError::Transport(e.to_string()))?;
        let reflection_v1alpha = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(pb::FILE_DESCRIPTOR_SET)
            .build_v1alpha()
            .map_err(|e| ServerError::Transport(e.to_string()))?;

        let service = pb::echo_service_server::EchoServiceServer::new(EchoService::new(
            self.config.clone(),
            self.metrics.clone(),
        ));

        tracing::info!(address = %self.listen_addr, "gRPC server listening");

        TonicServer::builder()
            .max_concurrent_streams(MAX_CONCURRENT_STREAMS)
            .layer(GrpcMethodLayer)
            .add_service(service)
            .add_service(reflection_v1)
            .add_service(reflection_v1alpha)
            .serve_with_shutdown(addr, async move {
                let mut shutdown = shutdown;
                tokio::select! {
                    _ = shutdown.wait() => {}
                    _ = stop_rx => {}
                }
            })
            .await
            .map_err(|e| ServerError::Transport(e.to_string()))
    }
}
