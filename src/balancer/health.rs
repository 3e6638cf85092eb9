//! Health monitoring for backend servers.
//!
//! The actual probe is an external collaborator behind [`HealthProbe`];
//! this module owns the cadence and the debounce policy that keeps a
//! single flaky probe from flapping a server in and out of rotation.

use super::pool::ServerPool;
use super::server::{Server, ServerStatus};
use crate::config::HealthConfig;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;

/// A health probe for a single server.
pub trait HealthProbe: Send + Sync {
    /// Probe the server; `true` means it should stay in rotation.
    fn probe<'a>(
        &'a self,
        server: &'a Server,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;
}

/// TCP connect probe: a server is healthy when it accepts a connection
/// within the configured timeout.
#[derive(Debug, Clone, Copy)]
pub struct TcpProbe {
    timeout: std::time::Duration,
}

impl TcpProbe {
    /// Create a probe with the given connect timeout.
    #[must_use]
    pub fn new(timeout: std::time::Duration) -> Self {
        Self { timeout }
    }
}

impl HealthProbe for TcpProbe {
    fn probe<'a>(
        &'a self,
        server: &'a Server,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            matches!(
                timeout(self.timeout, TcpStream::connect(server.address())).await,
                Ok(Ok(_))
            )
        })
    }
}

/// Periodic health monitor for a pool.
pub struct HealthMonitor {
    pool: Arc<ServerPool>,
    probe: Arc<dyn HealthProbe>,
    config: HealthConfig,
}

impl HealthMonitor {
    /// Create a monitor over `pool` using `probe`.
    #[must_use]
    pub fn new(pool: Arc<ServerPool>, probe: Arc<dyn HealthProbe>, config: HealthConfig) -> Self {
        Self {
            pool,
            probe,
            config,
        }
    }

    /// Probe every server once and apply the debounce policy.
    /// Maintenance servers are skipped.
    pub async fn check_once(&self) {
        let servers = self.pool.servers();
        let mut healthy = 0usize;
        let total = servers.len();

        for server in &servers {
            if server.status() == ServerStatus::Maintenance {
                continue;
            }

            let success = self.probe.probe(server).await;
            self.pool.record_probe(
                server,
                success,
                self.config.unhealthy_threshold,
                self.config.healthy_threshold,
            );
            if success {
                healthy += 1;
            }
        }

        debug!(healthy, total, "Health check cycle complete");
    }

    /// Run the monitor until a shutdown signal arrives.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) {
        if !self.config.enabled {
            debug!("Health checks disabled");
            return;
        }

        debug!(
            interval_ms = self.config.interval.as_millis() as u64,
            "Starting health monitor"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("Health monitor shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    self.check_once().await;
                }
            }
        }
    }
}
