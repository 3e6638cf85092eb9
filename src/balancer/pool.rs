//! Server pool management.

use super::error::{BalancerError, BalancerResult};
use super::server::{Server, ServerId, ServerStatus};
use super::strategy::{SelectionContext, Strategy};
use crate::metrics::MetricsPayload;
use crate::observer::HealthObserver;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Pool-level counters. Monotonic; reset only via an explicit call.
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Requests routed through the pool.
    pub total_requests: AtomicU64,
    /// Selection decisions made (successful selections).
    pub load_balancing_decisions: AtomicU64,
    /// Selections that found no selectable server.
    pub failed_selections: AtomicU64,
}

impl PoolStats {
    fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.load_balancing_decisions.store(0, Ordering::Relaxed);
        self.failed_selections.store(0, Ordering::Relaxed);
    }
}

/// An ordered pool of backend servers.
///
/// Registration order is preserved: strategies that break ties by
/// first-seen order rely on it, and the IP-hash strategy indexes into it.
pub struct ServerPool {
    servers: RwLock<Vec<Arc<Server>>>,
    by_address: RwLock<HashMap<SocketAddr, ServerId>>,
    next_id: AtomicU64,
    max_servers: usize,
    stats: PoolStats,
    observer: RwLock<Option<Arc<dyn HealthObserver>>>,
    shutdown: AtomicBool,
}

impl std::fmt::Debug for ServerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerPool")
            .field("servers", &self.server_count())
            .field("max_servers", &self.max_servers)
            .field("stats", &self.stats)
            .finish()
    }
}

impl ServerPool {
    /// Create an empty pool capped at `max_servers`.
    #[must_use]
    pub fn new(max_servers: usize) -> Self {
        Self {
            servers: RwLock::new(Vec::new()),
            by_address: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            max_servers,
            stats: PoolStats::default(),
            observer: RwLock::new(None),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Register the health observer for this pool.
    pub fn set_health_observer(&self, observer: Arc<dyn HealthObserver>) {
        *self.observer.write().expect("observer lock poisoned") = Some(observer);
    }

    /// Add a server.
    ///
    /// # Errors
    ///
    /// Returns [`BalancerError::PoolFull`] at capacity and
    /// [`BalancerError::Duplicate`] when the address is already registered.
    pub fn add_server(
        &self,
        address: SocketAddr,
        weight: u32,
        max_connections: Option<u32>,
    ) -> BalancerResult<ServerId> {
        let mut servers = self.servers.write().expect("servers lock poisoned");
        let mut by_address = self.by_address.write().expect("address lock poisoned");

        if servers.len() >= self.max_servers {
            return Err(BalancerError::PoolFull(self.max_servers));
        }
        if by_address.contains_key(&address) {
            return Err(BalancerError::Duplicate(address));
        }

        let id = ServerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        servers.push(Arc::new(Server::new(id, address, weight, max_connections)));
        by_address.insert(address, id);

        debug!(server = %address, %id, "Added server");
        Ok(id)
    }

    /// Remove a server.
    ///
    /// # Errors
    ///
    /// Returns [`BalancerError::NotFound`] for an unknown id.
    pub fn remove_server(&self, id: ServerId) -> BalancerResult<()> {
        let mut servers = self.servers.write().expect("servers lock poisoned");
        let mut by_address = self.by_address.write().expect("address lock poisoned");

        let Some(index) = servers.iter().position(|s| s.id() == id) else {
            return Err(BalancerError::NotFound(id));
        };

        let server = servers.remove(index);
        by_address.remove(&server.address());

        debug!(server = %server.address(), %id, "Removed server");
        Ok(())
    }

    /// Look up a server by id.
    #[must_use]
    pub fn server(&self, id: ServerId) -> Option<Arc<Server>> {
        self.servers
            .read()
            .expect("servers lock poisoned")
            .iter()
            .find(|s| s.id() == id)
            .cloned()
    }

    /// Ordered snapshot of all servers.
    #[must_use]
    pub fn servers(&self) -> Vec<Arc<Server>> {
        self.servers.read().expect("servers lock poisoned").clone()
    }

    /// Number of registered servers.
    #[must_use]
    pub fn server_count(&self) -> usize {
        self.servers.read().expect("servers lock poisoned").len()
    }

    /// Number of servers currently able to accept a connection.
    #[must_use]
    pub fn selectable_count(&self) -> usize {
        self.servers
            .read()
            .expect("servers lock poisoned")
            .iter()
            .filter(|s| s.can_accept())
            .count()
    }

    /// Select a server with the given strategy, applying selection side
    /// effects (connection slot, request counters) on success.
    ///
    /// # Errors
    ///
    /// Returns [`BalancerError::Shutdown`] after [`Self::shutdown`], and
    /// [`BalancerError::NoHealthyServer`] when the strategy exhausts the
    /// snapshot.
    pub fn select_with(
        &self,
        strategy: &dyn Strategy,
        context: &SelectionContext,
    ) -> BalancerResult<Arc<Server>> {
        if self.is_shut_down() {
            return Err(BalancerError::Shutdown);
        }

        let servers = self.servers();
        match strategy.select(&servers, context) {
            Ok(server) => {
                server.record_selected();
                self.stats.total_requests.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .load_balancing_decisions
                    .fetch_add(1, Ordering::Relaxed);
                Ok(Arc::clone(server))
            }
            Err(e) => {
                self.stats.failed_selections.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Report a completed, successful request.
    ///
    /// # Errors
    ///
    /// Returns [`BalancerError::NotFound`] for an unknown id.
    pub fn report_success(&self, id: ServerId, response_time_ms: u64) -> BalancerResult<()> {
        let server = self.server(id).ok_or(BalancerError::NotFound(id))?;
        server.record_success(response_time_ms);
        Ok(())
    }

    /// Report a failed request. Crossing the failure limit forces the
    /// server Unhealthy and notifies the health observer.
    ///
    /// # Errors
    ///
    /// Returns [`BalancerError::NotFound`] for an unknown id.
    pub fn report_failure(&self, id: ServerId) -> BalancerResult<()> {
        let server = self.server(id).ok_or(BalancerError::NotFound(id))?;
        if server.record_failure() {
            warn!(server = %server.address(), "Server exceeded failure limit, marking unhealthy");
            self.notify_health_change(server.address(), false);
        }
        Ok(())
    }

    /// Set a server's status directly (operator action, e.g. Maintenance).
    /// Notifies the observer when selectability flips.
    ///
    /// # Errors
    ///
    /// Returns [`BalancerError::NotFound`] for an unknown id.
    pub fn set_status(&self, id: ServerId, status: ServerStatus) -> BalancerResult<()> {
        let server = self.server(id).ok_or(BalancerError::NotFound(id))?;
        let previous = server.set_status(status);

        if previous.is_selectable() != status.is_selectable() {
            self.notify_health_change(server.address(), status.is_selectable());
        }
        Ok(())
    }

    /// Feed one probe result through the server's debounce policy and
    /// notify the observer on a flip.
    pub(crate) fn record_probe(
        &self,
        server: &Server,
        success: bool,
        unhealthy_threshold: u32,
        healthy_threshold: u32,
    ) {
        if let Some(healthy) = server.record_probe(success, unhealthy_threshold, healthy_threshold)
        {
            if healthy {
                debug!(server = %server.address(), "Server recovered");
            } else {
                warn!(server = %server.address(), "Server marked unhealthy by probes");
            }
            self.notify_health_change(server.address(), healthy);
        }
    }

    fn notify_health_change(&self, address: SocketAddr, healthy: bool) {
        let observer = self
            .observer
            .read()
            .expect("observer lock poisoned")
            .clone();
        if let Some(observer) = observer {
            observer.on_health_change(address, healthy);
        }
    }

    /// Pool counters.
    #[must_use]
    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Reset the pool counters.
    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Stop accepting selections.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Whether [`Self::shutdown`] has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Metrics snapshot for the external sink.
    #[must_use]
    pub fn metrics(&self) -> MetricsPayload {
        let mut payload = MetricsPayload::new();

        payload.counter(
            "total_requests",
            self.stats.total_requests.load(Ordering::Relaxed),
        );
        payload.counter(
            "load_balancing_decisions",
            self.stats.load_balancing_decisions.load(Ordering::Relaxed),
        );
        payload.counter(
            "failed_selections",
            self.stats.failed_selections.load(Ordering::Relaxed),
        );
        payload.gauge("server_count", self.server_count() as f64);
        payload.gauge("selectable_servers", self.selectable_count() as f64);

        payload
    }
}
