//! Configuration schema definitions.
//!
//! The configuration is an immutable snapshot: it is assembled from
//! command-line flags and `ECHO_APP_*` environment variables once at
//! startup and read-only thereafter.

use clap::Parser;

/// Default maximum request body size (10 MiB).
pub const DEFAULT_MAX_REQUEST_SIZE: u64 = 10 * 1024 * 1024;

/// Runtime logging verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// Command-line flags, each overridable through the environment.
#[derive(Debug, Parser)]
#[command(name = "echo-app", about = "Multi-protocol echo server")]
pub struct Cli {
    /// Custom message echoed in every response
    #[arg(long, env = "ECHO_APP_MESSAGE", default_value = "")]
    pub message: String,

    /// Node name echoed in every response
    #[arg(long, env = "ECHO_APP_NODE", default_value = "")]
    pub node: String,

    /// Include request headers in HTTP-family responses
    #[arg(long = "print-http-request-headers", env = "ECHO_APP_PRINT_HTTP_REQUEST_HEADERS")]
    pub print_headers: bool,

    /// Enable the TLS listener
    #[arg(long, env = "ECHO_APP_TLS")]
    pub tls: bool,

    /// Enable the raw TCP listener
    #[arg(long, env = "ECHO_APP_TCP")]
    pub tcp: bool,

    /// Enable the gRPC listener
    #[arg(long, env = "ECHO_APP_GRPC")]
    pub grpc: bool,

    /// Enable the QUIC (HTTP/3) listener
    #[arg(long, env = "ECHO_APP_QUIC")]
    pub quic: bool,

    /// Enable the metrics listener
    #[arg(
        long,
        env = "ECHO_APP_METRICS",
        default_value_t = true,
        action = clap::ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub metrics: bool,

    /// HTTP server port
    #[arg(long, env = "ECHO_APP_HTTP_PORT", default_value = "8080")]
    pub http_port: String,

    /// TLS server port
    #[arg(long, env = "ECHO_APP_TLS_PORT", default_value = "8443")]
    pub tls_port: String,

    /// TCP server port
    #[arg(long, env = "ECHO_APP_TCP_PORT", default_value = "9090")]
    pub tcp_port: String,

    /// gRPC server port
    #[arg(long, env = "ECHO_APP_GRPC_PORT", default_value = "50051")]
    pub grpc_port: String,

    /// QUIC server port (UDP)
    #[arg(long, env = "ECHO_APP_QUIC_PORT", default_value = "4433")]
    pub quic_port: String,

    /// Metrics server port
    #[arg(long, env = "ECHO_APP_METRICS_PORT", default_value = "3000")]
    pub metrics_port: String,

    /// Log level
    #[arg(long, env = "ECHO_APP_LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Maximum request body size in bytes for HTTP-family listeners
    #[arg(long, env = "ECHO_APP_MAX_REQUEST_SIZE", default_value_t = DEFAULT_MAX_REQUEST_SIZE)]
    pub max_request_size: u64,
}

/// Immutable configuration snapshot shared by every listener.
#[derive(Debug, Clone)]
pub struct Config {
    pub message: String,
    pub node: String,
    pub print_headers: bool,
    pub tls: bool,
    pub tcp: bool,
    pub grpc: bool,
    pub quic: bool,
    pub metrics: bool,
    pub http_port: String,
    pub tls_port: String,
    pub tcp_port: String,
    pub grpc_port: String,
    pub quic_port: String,
    pub metrics_port: String,
    pub log_level: LogLevel,
    pub max_request_size: u64,
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        Self {
            message: cli.message,
            node: cli.node,
            print_headers: cli.print_headers,
            tls: cli.tls,
            tcp: cli.tcp,
            grpc: cli.grpc,
            quic: cli.quic,
            metrics: cli.metrics,
            http_port: cli.http_port,
            tls_port: cli.tls_port,
            tcp_port: cli.tcp_port,
            grpc_port: cli.grpc_port,
            quic_port: cli.quic_port,
            metrics_port: cli.metrics_port,
            log_level: cli.log_level,
            max_request_size: cli.max_request_size,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            message: String::new(),
            node: String::new(),
            print_headers: false,
            tls: false,
            tcp: false,
            grpc: false,
            quic: false,
            metrics: true,
            http_port: "8080".to_string(),
            tls_port: "8443".to_string(),
            tcp_port: "9090".to_string(),
            grpc_port: "50051".to_string(),
            quic_port: "4433".to_string(),
            metrics_port: "3000".to_string(),
            log_level: LogLevel::Info,
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
        }
    }
}
