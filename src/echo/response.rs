//! Common response assembly.
//!
//! # Responsibilities
//! - Build the base echo response (timestamp, hostname, source IP, listener
//!   tag, configured message and node)
//! - Normalize remote addresses and endpoint labels
//! - Cache the process hostname

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::config::Config;

/// The echo reply. Field order matches the wire schema; empty optional
/// fields are omitted from the serialized document.
#[derive(Debug, Clone, Serialize)]
pub struct EchoResponse {
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub source_ip: String,
    pub hostname: String,
    pub listener: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, Vec<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_endpoint: Option<String>,
}

impl EchoResponse {
    /// Attach the HTTP request line fields (HTTP-family and QUIC listeners).
    pub fn with_http(mut self, version: &str, method: &str, endpoint: &str) -> Self {
        self.http_version = Some(version.to_string());
        self.http_method = Some(method.to_string());
        self.http_endpoint = Some(endpoint.to_string());
        self
    }

    /// Attach the request header map (only when `print_headers` is set).
    pub fn with_headers(mut self, headers: HashMap<String, Vec<String>>) -> Self {
        self.headers = Some(headers);
        self
    }
}

/// Build a base response with the fields common to every listener.
pub fn base_response(config: &Config, listener: &str, remote_addr: &str) -> EchoResponse {
    EchoResponse {
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        message: non_empty(&config.message),
        source_ip: extract_ip(remote_addr),
        hostname: hostname().to_string(),
        listener: listener.to_string(),
        node: non_empty(&config.node),
        headers: None,
        http_version: None,
        http_method: None,
        http_endpoint: None,
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Return the cached process hostname, falling back to "unknown".
pub fn hostname() -> &'static str {
    static HOSTNAME: OnceLock<String> = OnceLock::new();
    HOSTNAME.get_or_init(|| match hostname::get() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            tracing::warn!(error = %e, "failed to resolve hostname");
            "unknown".to_string()
        }
    })
}

/// Extract the host portion of a `host:port` remote address.
///
/// Bracketed IPv6 addresses lose their brackets; anything that does not
/// look like `host:port` is returned verbatim.
pub fn extract_ip(remote_addr: &str) -> String {
    if remote_addr.is_empty() {
        return String::new();
    }
    if let Some(rest) = remote_addr.strip_prefix('[') {
        if let Some((host, port)) = rest.split_once(']') {
            if port.starts_with(':') {
                return host.to_string();
            }
        }
        return remote_addr.to_string();
    }
    match remote_addr.rsplit_once(':') {
        Some((host, _)) if !host.contains(':') => host.to_string(),
        _ => remote_addr.to_string(),
    }
}

/// Collapse unknown paths into a single label to bound metric cardinality.
pub fn normalize_endpoint(path: &str) -> &str {
    match path {
        "/" | "/health" | "/ready" | "/metrics" => path,
        _ => "other",
    }
}

/// Render an HTTP version the way it appears in a request line.
pub fn http_version_label(version: http::Version) -> &'static str {
    match version {
        http::Version::HTTP_09 => "HTTP/0.9",
        http::Version::HTTP_10 => "HTTP/1.0",
        http::Version::HTTP_11 => "HTTP/1.1",
        http::Version::HTTP_2 => "HTTP/2.0",
        http::Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}
