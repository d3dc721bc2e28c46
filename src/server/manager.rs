//! Listener supervision.
//!
//! # Responsibilities
//! - Own the registered listeners
//! - Start each listener in its own task
//! - Drive a bounded, error-aggregating graceful shutdown
//!
//! Shutdown ordering: the drain begins first (accept loops wake), then
//! every listener's `shutdown` runs concurrently, then the manager waits
//! for the start tasks themselves, all bounded by one deadline.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

use crate::lifecycle::DrainControl;
use crate::server::{Server, ServerError};

/// Errors surfaced by [`Manager::shutdown`].
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("shutdown timeout exceeded")]
    ShutdownTimeout,

    #[error("shutdown errors: {0:?}")]
    Listeners(Vec<String>),
}

/// Supervisor for all protocol listeners.
pub struct Manager {
    servers: Vec<Arc<dyn Server>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    drain: DrainControl,
}

impl Manager {
    pub fn new() -> Self {
        Self {
            servers: Vec::new(),
            handles: Mutex::new(Vec::new()),
            drain: DrainControl::new(),
        }
    }

    /// Add a listener. Must be called before [`Manager::start`].
    pub fn register_server(&mut self, server: Arc<dyn Server>) {
        self.servers.push(server);
    }

    /// Number of registered listeners.
    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    /// Spawn every listener's start task and return immediately.
    ///
    /// A listener finishing with [`ServerError::Closed`] stopped cleanly;
    /// any other error is logged and the remaining listeners keep running.
    pub fn start(&self) {
        let mut handles = self.handles.lock().expect("manager handle lock");
        for server in &self.servers {
            let server = server.clone();
            let signal = self.drain.signal();
            handles.push(tokio::spawn(async move {
                tracing::info!(listener = server.name(), "starting listener");
                match server.start(signal).await {
                    Ok(()) | Err(ServerError::Closed) => {
                        tracing::info!(listener = server.name(), "listener stopped");
                    }
                    Err(e) => {
                        tracing::error!(listener = server.name(), error = %e, "listener failed");
                    }
                }
            }));
        }
    }

    /// Gracefully stop every listener, bounded by `timeout`.
    ///
    /// Single-shot: later calls return success without doing anything.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), ManagerError> {
        if !self.drain.begin() {
            return Ok(());
        }

        let deadline = Instant::now() + timeout;
        tracing::info!(timeout_secs = timeout.as_secs(), "shutting down all listeners");

        let mut shutdowns = JoinSet::new();
        for server in &self.servers {
            let server = server.clone();
            shutdowns.spawn(async move {
                let result = server.shutdown(deadline).await;
                (server.name(), result)
            });
        }

        let mut errors = Vec::new();
        while let Some(joined) = shutdowns.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((name, Err(e))) => errors.push(format!("{name} shutdown error: {e}")),
                Err(e) => errors.push(format!("shutdown task panicked: {e}")),
            }
        }

        let handles = std::mem::take(&mut *self.handles.lock().expect("manager handle lock"));
        let drain = async {
            for handle in handles {
                let _ = handle.await;
            }
        };

        match tokio::time::timeout_at(deadline, drain).await {
            Err(_) => Err(ManagerError::ShutdownTimeout),
            Ok(()) if errors.is_empty() => {
                tracing::info!("all listeners shut down");
                Ok(())
            }
            Ok(()) => Err(ManagerError::Listeners(errors)),
        }
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::DrainSignal;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingServer {
        starts: AtomicUsize,
        shutdowns: AtomicUsize,
    }

    impl CountingServer {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                starts: AtomicUsize::new(0),
                shutdowns: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl Server for CountingServer {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn start(&self, mut shutdown: DrainSignal) -> Result<(), ServerError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            shutdown.wait().await;
            Err(ServerError::Closed)
        }

        async fn shutdown(&self, _deadline: Instant) -> Result<(), ServerError> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct StuckServer;

    #[async_trait::async_trait]
    impl Server for StuckServer {
        fn name(&self) -> &'static str {
            "stuck"
        }

        async fn start(&self, _shutdown: DrainSignal) -> Result<(), ServerError> {
            std::future::pending::<()>().await;
            Ok(())
        }

        async fn shutdown(&self, _deadline: Instant) -> Result<(), ServerError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_each_listener_shut_down_exactly_once() {
        let servers: Vec<_> = (0..3).map(|_| CountingServer::new()).collect();
        let mut manager = Manager::new();
        for server in &servers {
            manager.register_server(server.clone());
        }

        manager.start();
        manager
            .shutdown(Duration::from_secs(5))
            .await
            .expect("clean shutdown");

        for server in &servers {
            assert_eq!(server.starts.load(Ordering::SeqCst), 1);
            assert_eq!(server.shutdowns.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_shutdown_twice_is_safe() {
        let server = CountingServer::new();
        let mut manager = Manager::new();
        manager.register_server(server.clone());

        manager.start();
        assert!(manager.shutdown(Duration::from_secs(5)).await.is_ok());
        assert!(manager.shutdown(Duration::from_secs(5)).await.is_ok());
        assert_eq!(server.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_without_start() {
        let mut manager = Manager::new();
        manager.register_server(CountingServer::new());
        assert!(manager.shutdown(Duration::from_millis(100)).await.is_ok());
    }

    #[tokio::test]
    async fn test_stuck_start_task_times_out() {
        let mut manager = Manager::new();
        manager.register_server(Arc::new(StuckServer));

        manager.start();
        let result = manager.shutdown(Duration::from_millis(200)).await;
        assert!(matches!(result, Err(ManagerError::ShutdownTimeout)));
    }

    #[tokio::test]
    async fn test_listener_shutdown_errors_are_aggregated() {
        struct FailingShutdown;

        #[async_trait::async_trait]
        impl Server for FailingShutdown {
            fn name(&self) -> &'static str {
                "failing"
            }

            async fn start(&self, mut shutdown: DrainSignal) -> Result<(), ServerError> {
                shutdown.wait().await;
                Ok(())
            }

            async fn shutdown(&self, _deadline: Instant) -> Result<(), ServerError> {
                Err(ServerError::DrainTimeout { active: 7 })
            }
        }

        let mut manager = Manager::new();
        manager.register_server(Arc::new(FailingShutdown));

        manager.start();
        match manager.shutdown(Duration::from_secs(5)).await {
            Err(ManagerError::Listeners(errors)) => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].contains("failing"));
                assert!(errors[0].contains("7 connections still active"));
            }
            other => panic!("expected aggregated listener errors, got {other:?}"),
        }
    }
}
