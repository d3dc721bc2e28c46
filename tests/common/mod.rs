//! Shared utilities for the integration suites.

use std::sync::Arc;
use std::time::Duration;

use echo_app::{Config, Metrics};

/// Build a config with every listener pointed at caller-chosen ports.
/// Ports the test does not use keep their defaults; only enabled
/// listeners bind.
pub fn test_config() -> Config {
    Config::default()
}

#[allow(dead_code)]
pub fn shared(config: Config) -> (Arc<Config>, Arc<Metrics>) {
    (Arc::new(config), Arc::new(Metrics::new()))
}

/// Wait until a TCP port accepts connections (bounded).
#[allow(dead_code)]
pub async fn wait_for_port(addr: &str) {
    for _ in 0..100 {
        if tokio::net::TcpStream::connect(addr).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("server on {addr} did not come up");
}
