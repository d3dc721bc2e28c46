//! HTTP and TLS echo listeners.
//!
//! # Responsibilities
//! - Serve the echo handler over HTTP/1.1 and HTTP/2 (plain or TLS)
//! - Enforce the concurrent-request ceiling (503 above it)
//! - Cap request bodies at the configured maximum
//! - Recover handler panics into 500 responses
//!
//! The TLS flavor differs only by construction flag; it takes its
//! certificate from [`crate::net::tls`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tokio::sync::watch;
use tokio::time::Instant;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::echo::{base_response, http_version_label, normalize_endpoint};
use crate::lifecycle::DrainSignal;
use crate::net::tls;
use crate::observability::metrics::{Metrics, ERROR_MARSHAL, ERROR_PANIC};
use crate::server::{Server, ServerError};

/// Maximum concurrent in-flight requests (same ceiling as TCP).
const MAX_HTTP_CONNECTIONS: i32 = 1000;

/// Request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Handler state shared across requests.
#[derive(Clone)]
pub struct HttpState {
    config: Arc<Config>,
    metrics: Arc<Metrics>,
    listener: &'static str,
    active_conns: Arc<AtomicI32>,
}

/// HTTP-family echo listener; `use_tls` selects the TLS flavor.
pub struct HttpServer {
    state: HttpState,
    listen_addr: String,
    use_tls: bool,
    handle: Handle,
    started: AtomicBool,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl HttpServer {
    pub fn new(config: Arc<Config>, metrics: Arc<Metrics>, use_tls: bool) -> Self {
        let (port, listener) = if use_tls {
            (config.tls_port.clone(), "TLS")
        } else {
            (config.http_port.clone(), "HTTP")
        };
        let (done_tx, done_rx) = watch::channel(false);

        Self {
            state: HttpState {
                config,
                metrics,
                listener,
                active_conns: Arc::new(AtomicI32::new(0)),
            },
            listen_addr: format!("0.0.0.0:{port}"),
            use_tls,
            handle: Handle::new(),
            started: AtomicBool::new(false),
            done_tx,
            done_rx,
        }
    }

    fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    async fn run(&self) -> Result<(), ServerError> {
        let addr: SocketAddr = self
            .listen_addr
            .parse()
            .map_err(|e: std::net::AddrParseError| ServerError::Bind {
                addr: self.listen_addr.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
            })?;

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();

        tracing::info!(
            listener = self.state.listener,
            address = %self.listen_addr,
            "server listening"
        );

        let served = if self.use_tls {
            let rustls_config = RustlsConfig::from_config(tls::tls_config()?);
            axum_server::bind_rustls(addr, rustls_config)
                .handle(self.handle.clone())
                .serve(app)
                .await
        } else {
            axum_server::bind(addr)
                .handle(self.handle.clone())
                .serve(app)
                .await
        };

        served.map_err(|source| ServerError::Bind {
            addr: self.listen_addr.clone(),
            source,
        })
    }
}

fn build_router(state: HttpState) -> Router {
    let panic_state = state.clone();
    Router::new()
        .route("/", any(echo_handler))
        .route("/{*path}", any(echo_handler))
        .with_state(state.clone())
        .layer(CatchPanicLayer::custom(move |err: Box<dyn std::any::Any + Send + 'static>| {
            let detail = panic_message(&err);
            tracing::error!(listener = panic_state.listener, panic = %detail, "handler panicked");
            panic_state
                .metrics
                .record_error(panic_state.listener, ERROR_PANIC);
            http::Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::from("Internal Server Error"))
                .expect("static panic response")
        }))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn_with_state(state, connection_limit))
}

fn panic_message(err: &Box<dyn std::any::Any + Send + 'static>) -> String {
    if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".to_string()
    }
}

/// Reject requests once the in-flight ceiling is reached.
async fn connection_limit(
    State(state): State<HttpState>,
    request: Request,
    next: Next,
) -> Response {
    if state.active_conns.load(Ordering::SeqCst) >= MAX_HTTP_CONNECTIONS {
        tracing::warn!(
            listener = state.listener,
            limit = MAX_HTTP_CONNECTIONS,
            "connection limit reached, rejecting request"
        );
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "Service Unavailable: Connection limit reached",
        )
            .into_response();
    }

    state.active_conns.fetch_add(1, Ordering::SeqCst);
    state.metrics.connection_opened(state.listener);
    let _guard = InFlightGuard { state: &state };

    next.run(request).await
}

struct InFlightGuard<'a> {
    state: &'a HttpState,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.state.active_conns.fetch_sub(1, Ordering::SeqCst);
        self.state.metrics.connection_closed(self.state.listener);
    }
}

/// The echo handler, registered for every path.
async fn echo_handler(
    State(state): State<HttpState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    let start = std::time::Instant::now();
    let (parts, body) = request.into_parts();
    let method = parts.method.to_string();
    let path = parts.uri.path().to_string();
    let version = http_version_label(parts.version);
    let remote_addr = addr.to_string();
    let user_agent = parts
        .headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    tracing::info!(
        listener = state.listener,
        method = %method,
        path = %path,
        source_ip = %remote_addr,
        user_agent = %user_agent,
        "handling request"
    );

    // The body is never echoed, but it is still drained against the
    // configured ceiling before the reply is built.
    if let Err(e) = to_bytes(body, state.config.max_request_size as usize).await {
        tracing::error!(error = %e, "failed to read request body");
        state.metrics.record_error(state.listener, ERROR_MARSHAL);
        return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
    }

    let mut response =
        base_response(&state.config, state.listener, &remote_addr).with_http(version, &method, &path);
    if state.config.print_headers {
        response = response.with_headers(header_map(&parts.headers));
    }

    match serde_json::to_vec(&response) {
        Ok(body) => {
            state.metrics.record_request(
                state.listener,
                &method,
                normalize_endpoint(&path),
                start.elapsed(),
            );
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/json")],
                body,
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to marshal response");
            state.metrics.record_error(state.listener, ERROR_MARSHAL);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
        }
    }
}

/// Convert a header map into the response representation, preserving the
/// value sequence per name.
fn header_map(headers: &HeaderMap) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for name in headers.keys() {
        let values = headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect();
        map.insert(name.as_str().to_string(), values);
    }
    map
}

#[async_trait]
impl Server for HttpServer {
    fn name(&self) -> &'static str {
        self.state.listener
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

    fn test_state(listener: &'static str) -> HttpState {
        HttpState {
            config: Arc::new(Config::default()),
            metrics: Arc::new(Metrics::new()),
            listener,
            active_conns: Arc::new(AtomicI32::new(0)),
        }
    }

    #[tokio::test]
    async fn test_connection_limit_returns_503() {
        let state = test_state("HTTP");
        state.active_conns.store(MAX_HTTP_CONNECTIONS, Ordering::SeqCst);
        let app = build_router(state).into_make_service_with_connect_info::<SocketAddr>();

        let addr: SocketAddr = "127.0.0.1:29301".parse().unwrap();
        let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let response = reqwest::get(format!("http://{addr}/")).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.text().await.unwrap(),
            "Service Unavailable: Connection limit reached"
        );
    }

    #[tokio::test]
    async fn test_header_map_preserves_value_sequence() {
        let mut headers = HeaderMap::new();
        headers.append("x-trace", "a".parse().unwrap());
        headers.append("x-trace", "b".parse().unwrap());
        headers.insert("accept", "*/*".parse().unwrap());

        let map = header_map(&headers);
        assert_eq!(map["x-trace"], vec!["a", "b"]);
        assert_eq!(map["accept"], vec!["*/*"]);
    }

    #[tokio::test]
    async fn test_shutdown_before_start_is_ok() {
        let server = HttpServer::new(Arc::new(Config::default()), Arc::new(Metrics::new()), false);
        let deadline = Instant::now() + Duration::from_millis(100);
        assert!(server.shutdown(deadline).await.is_ok());
    }
}
