//! Backend server descriptor.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::RwLock;

/// Lowest weight a server can carry.
pub const WEIGHT_MIN: u32 = 1;

/// Highest weight a server can carry.
pub const WEIGHT_MAX: u32 = 100;

/// Consecutive request failures after which a server is forced Unhealthy.
pub const FAILURE_LIMIT: u32 = 10;

/// Identifier of a server within its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerId(pub u64);

impl std::fmt::Display for ServerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "srv-{}", self.0)
    }
}

/// Health status of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    /// Accepting traffic.
    Healthy,
    /// Out of rotation due to failures.
    Unhealthy,
    /// Taken out of rotation by the operator; health probes are skipped.
    Maintenance,
}

impl ServerStatus {
    /// Whether this status allows new connections.
    #[must_use]
    pub fn is_selectable(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// A single backend server.
///
/// Hot counters are atomics so the request path never takes a lock for
/// bookkeeping; status sits behind an `RwLock` since it changes rarely.
#[derive(Debug)]
pub struct Server {
    id: ServerId,
    address: SocketAddr,
    weight: AtomicU32,
    max_connections: Option<u32>,
    status: RwLock<ServerStatus>,
    current_connections: AtomicU32,
    failure_count: AtomicU32,
    response_time_ms: AtomicU64,
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    consecutive_probe_failures: AtomicU32,
    consecutive_probe_successes: AtomicU32,
}

impl Server {
    /// Create a new healthy server. Weight is clamped to `[WEIGHT_MIN, WEIGHT_MAX]`.
    #[must_use]
    pub fn new(
        id: ServerId,
        address: SocketAddr,
        weight: u32,
        max_connections: Option<u32>,
    ) -> Self {
        Self {
            id,
            address,
            weight: AtomicU32::new(weight.clamp(WEIGHT_MIN, WEIGHT_MAX)),
            max_connections,
            status: RwLock::new(ServerStatus::Healthy),
            current_connections: AtomicU32::new(0),
            failure_count: AtomicU32::new(0),
            response_time_ms: AtomicU64::new(0),
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            consecutive_probe_failures: AtomicU32::new(0),
            consecutive_probe_successes: AtomicU32::new(0),
        }
    }

    /// Server id.
    #[must_use]
    pub fn id(&self) -> ServerId {
        self.id
    }

    /// Server address.
    #[must_use]
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Current weight.
    #[must_use]
    pub fn weight(&self) -> u32 {
        self.weight.load(Ordering::Relaxed)
    }

    /// Set the weight, clamped to `[WEIGHT_MIN, WEIGHT_MAX]`.
    pub fn set_weight(&self, weight: u32) {
        self.weight
            .store(weight.clamp(WEIGHT_MIN, WEIGHT_MAX), Ordering::Relaxed);
    }

    /// Connection cap, if any.
    #[must_use]
    pub fn max_connections(&self) -> Option<u32> {
        self.max_connections
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ServerStatus {
        *self.status.read().expect("status lock poisoned")
    }

    /// Set the status. Returns the previous status.
    pub fn set_status(&self, status: ServerStatus) -> ServerStatus {
        let mut guard = self.status.write().expect("status lock poisoned");
        std::mem::replace(&mut *guard, status)
    }

    /// Active connection count.
    #[must_use]
    pub fn current_connections(&self) -> u32 {
        self.current_connections.load(Ordering::Relaxed)
    }

    /// Request failures recorded since the last recovery.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Relaxed)
    }

    /// Averaged response time in milliseconds.
    #[must_use]
    pub fn response_time_ms(&self) -> u64 {
        self.response_time_ms.load(Ordering::Relaxed)
    }

    /// Requests routed to this server.
    #[must_use]
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Requests reported successful.
    #[must_use]
    pub fn successful_requests(&self) -> u64 {
        self.successful_requests.load(Ordering::Relaxed)
    }

    /// Whether this server can take a new connection right now.
    #[must_use]
    pub fn can_accept(&self) -> bool {
        if !self.status().is_selectable() {
            return false;
        }

        if let Some(max) = self.max_connections {
            if self.current_connections() >= max {
                return false;
            }
        }

        true
    }

    /// Bookkeeping for a selection: one more active connection, one more
    /// routed request.
    pub(crate) fn record_selected(&self) {
        self.current_connections.fetch_add(1, Ordering::Relaxed);
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful request: releases the connection slot and folds
    /// the observed response time into the running average.
    pub(crate) fn record_success(&self, response_time_ms: u64) {
        self.successful_requests.fetch_add(1, Ordering::Relaxed);
        self.release_connection();

        // (old + new) / 2; a zero average means no sample yet.
        let _ = self
            .response_time_ms
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |old| {
                Some(if old == 0 {
                    response_time_ms
                } else {
                    (old + response_time_ms) / 2
                })
            });
    }

    /// Record a failed request. Returns `true` when the failure count passed
    /// [`FAILURE_LIMIT`] and the server was forced Unhealthy.
    pub(crate) fn record_failure(&self) -> bool {
        self.release_connection();
        let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;

        if failures > FAILURE_LIMIT && self.status() == ServerStatus::Healthy {
            self.set_status(ServerStatus::Unhealthy);
            return true;
        }

        false
    }

    /// Decrement the active connection count, floored at zero.
    fn release_connection(&self) {
        let _ = self
            .current_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                Some(c.saturating_sub(1))
            });
    }

    /// Feed one probe result into the debounce policy.
    ///
    /// Returns `Some(healthy)` when the result crossed a threshold and the
    /// status flipped; `None` otherwise. Maintenance servers never flip.
    pub(crate) fn record_probe(
        &self,
        success: bool,
        unhealthy_threshold: u32,
        healthy_threshold: u32,
    ) -> Option<bool> {
        if self.status() == ServerStatus::Maintenance {
            return None;
        }

        if success {
            self.consecutive_probe_failures.store(0, Ordering::Relaxed);
            let successes = self
                .consecutive_probe_successes
                .fetch_add(1, Ordering::Relaxed)
                + 1;

            if successes >= healthy_threshold && self.status() == ServerStatus::Unhealthy {
                self.set_status(ServerStatus::Healthy);
                self.failure_count.store(0, Ordering::Relaxed);
                return Some(true);
            }
        } else {
            self.consecutive_probe_successes.store(0, Ordering::Relaxed);
            let failures = self
                .consecutive_probe_failures
                .fetch_add(1, Ordering::Relaxed)
                + 1;

            if failures >= unhealthy_threshold && self.status() == ServerStatus::Healthy {
                self.set_status(ServerStatus::Unhealthy);
                return Some(false);
            }
        }

        None
    }
}
