//! Configuration validation logic.

use crate::config::schema::Config;

/// Maximum accepted length of the echoed message, in bytes.
pub const MAX_MESSAGE_BYTES: usize = 1024;

/// Error type for configuration validation failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError(pub String);

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Validation error: {}", self.0)
    }
}

impl std::error::Error for ValidationError {}

/// Check that a port string parses into the 1..=65535 range.
pub fn is_valid_port(port: &str) -> bool {
    matches!(port.parse::<u32>(), Ok(p) if p > 0 && p <= 65535)
}

/// Validate a configuration snapshot for semantic correctness.
///
/// Ports are checked only for listeners that will actually run; the HTTP
/// listener is always on.
pub fn validate_config(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.message.len() > MAX_MESSAGE_BYTES {
        errors.push(ValidationError(format!(
            "message exceeds {} bytes ({} given)",
            MAX_MESSAGE_BYTES,
            config.message.len()
        )));
    }

    if !is_valid_port(&config.http_port) {
        errors.push(ValidationError(format!("invalid HTTP port: {}", config.http_port)));
    }
    if config.tls && !is_valid_port(&config.tls_port) {
        errors.push(ValidationError(format!("invalid TLS port: {}", config.tls_port)));
    }
    if config.tcp && !is_valid_port(&config.tcp_port) {
        errors.push(ValidationError(format!("invalid TCP port: {}", config.tcp_port)));
    }
    if config.grpc && !is_valid_port(&config.grpc_port) {
        errors.push(ValidationError(format!("invalid gRPC port: {}", config.grpc_port)));
    }
    if config.quic && !is_valid_port(&config.quic_port) {
        errors.push(ValidationError(format!("invalid QUIC port: {}", config.quic_port)));
    }
    if config.metrics && !is_valid_port(&config.metrics_port) {
        errors.push(ValidationError(format!(
            "invalid metrics port: {}",
            config.metrics_port
        )));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_message_at_limit_accepted() {
        let mut config = Config::default();
        config.message = "x".repeat(1024);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_message_over_limit_rejected() {
        let mut config = Config::default();
        config.message = "x".repeat(1025);
        let errs = validate_config(&config).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert!(errs[0].0.contains("message exceeds"));
    }

    #[test]
    fn test_port_bounds() {
        assert!(is_valid_port("1"));
        assert!(is_valid_port("65535"));
        assert!(!is_valid_port("0"));
        assert!(!is_valid_port("65536"));
        assert!(!is_valid_port("abc"));
        assert!(!is_valid_port(""));
        assert!(!is_valid_port("-1"));
    }

    #[test]
    fn test_disabled_listener_port_not_checked() {
        let mut config = Config::default();
        config.tcp = false;
        config.tcp_port = "not-a-port".to_string();
        assert!(validate_config(&config).is_ok());

        config.tcp = true;
        let errs = validate_config(&config).unwrap_err();
        assert!(errs[0].0.contains("invalid TCP port"));
    }
}
