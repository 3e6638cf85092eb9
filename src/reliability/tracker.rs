//! Connection tracking, error handling, and the reconnect policy.

use super::connection::{Connection, ConnectionId, ConnectionState};
use super::error::{ErrorKind, TrackerError, TrackerResult};
use super::stats::{ErrorTable, TrackerStats};
use crate::clock::Clock;
use crate::config::UplinkConfig;
use crate::metrics::MetricsPayload;
use crate::observer::{ConnectionSnapshot, ErrorObserver};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tracks the lifecycle of every logical backend connection.
pub struct ConnectionTracker {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    next_id: AtomicU64,
    max_connections: usize,
    max_reconnect_attempts: u32,
    reconnect_delay: Duration,
    connection_timeout: Duration,
    clock: Arc<dyn Clock>,
    stats: TrackerStats,
    errors: Mutex<ErrorTable>,
    observer: RwLock<Option<Arc<dyn ErrorObserver>>>,
    shutdown: AtomicBool,
}

impl std::fmt::Debug for ConnectionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionTracker")
            .field("connections", &self.connection_count())
            .field("max_connections", &self.max_connections)
            .field("stats", &self.stats)
            .finish()
    }
}

impl ConnectionTracker {
    /// Create a tracker from configuration with the given clock.
    #[must_use]
    pub fn new(config: &UplinkConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            max_connections: config.max_connections,
            max_reconnect_attempts: config.reconnect.max_attempts,
            reconnect_delay: config.reconnect.delay,
            connection_timeout: config.connection_timeout,
            clock,
            stats: TrackerStats::default(),
            errors: Mutex::new(ErrorTable::new(config.error_stats_capacity)),
            observer: RwLock::new(None),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Register the error observer for this tracker.
    pub fn set_error_observer(&self, observer: Arc<dyn ErrorObserver>) {
        *self.observer.write().expect("observer lock poisoned") = Some(observer);
    }

    /// Start tracking a new connection.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Shutdown`] after [`Self::shutdown`] and
    /// [`TrackerError::PoolFull`] at capacity.
    pub fn track(
        &self,
        protocol: impl Into<String>,
        remote: SocketAddr,
    ) -> TrackerResult<ConnectionId> {
        if self.is_shut_down() {
            return Err(TrackerError::Shutdown);
        }

        let mut connections = self.connections.write().expect("connections lock poisoned");
        if connections.len() >= self.max_connections {
            return Err(TrackerError::PoolFull(self.max_connections));
        }

        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let connection = Arc::new(Connection::new(id, protocol, remote, self.clock.now()));
        connections.insert(id, connection);
        self.stats.total_connections.fetch_add(1, Ordering::Relaxed);

        debug!(%id, %remote, "Tracking connection");
        Ok(id)
    }

    /// Look up a tracked connection.
    #[must_use]
    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections
            .read()
            .expect("connections lock poisoned")
            .get(&id)
            .cloned()
    }

    /// Number of currently tracked connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections
            .read()
            .expect("connections lock poisoned")
            .len()
    }

    /// Request a state transition.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::NotFound`] for unknown (or closed) ids and
    /// [`TrackerError::InvalidTransition`] for illegal edges; in particular
    /// Error → Connecting is refused here and reserved for the reconnect
    /// policy.
    pub fn update_state(&self, id: ConnectionId, state: ConnectionState) -> TrackerResult<()> {
        let connection = self.connection(id).ok_or(TrackerError::NotFound(id))?;
        let current = connection.state();

        if !current.can_transition_to(state) {
            return Err(TrackerError::InvalidTransition {
                from: current,
                to: state,
            });
        }

        self.apply_state(&connection, state);
        Ok(())
    }

    fn apply_state(&self, connection: &Connection, state: ConnectionState) {
        connection.set_state(state);
        connection.touch(self.clock.now());

        match state {
            ConnectionState::Established => {
                if connection.try_record_outcome() {
                    self.stats
                        .successful_connections
                        .fetch_add(1, Ordering::Relaxed);
                }
            }
            ConnectionState::Error => {
                if connection.try_record_outcome() {
                    self.stats.failed_connections.fetch_add(1, Ordering::Relaxed);
                }
            }
            _ => {}
        }
    }

    /// Record traffic on a connection.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::NotFound`] for an unknown id.
    pub fn record_activity(&self, id: ConnectionId, sent: u64, received: u64) -> TrackerResult<()> {
        let connection = self.connection(id).ok_or(TrackerError::NotFound(id))?;

        connection.add_bytes(sent, received);
        connection.touch(self.clock.now());
        self.stats.bytes_sent.fetch_add(sent, Ordering::Relaxed);
        self.stats.bytes_received.fetch_add(received, Ordering::Relaxed);
        Ok(())
    }

    /// Record a classified failure on a connection.
    ///
    /// Forces the connection into Error, notifies the error observer, and
    /// then evaluates the reconnect policy: a retryable error with attempts
    /// left schedules a delayed move back to Connecting on the ambient
    /// tokio runtime. The observer always fires before the retry decision.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::NotFound`] for an unknown id.
    pub fn handle_error(&self, id: ConnectionId, kind: ErrorKind) -> TrackerResult<()> {
        let connection = self.connection(id).ok_or(TrackerError::NotFound(id))?;

        connection.record_error(kind);
        self.errors
            .lock()
            .expect("error table lock poisoned")
            .record(kind, id, self.clock.now());
        self.apply_state(&connection, ConnectionState::Error);

        debug!(%id, %kind, "Connection error");

        let observer = self
            .observer
            .read()
            .expect("observer lock poisoned")
            .clone();
        if let Some(observer) = &observer {
            observer.on_error(&connection.snapshot(&*self.clock), kind);
        }

        if kind.is_retryable()
            && connection.try_take_reconnect_slot(self.max_reconnect_attempts)
        {
            self.schedule_reconnect(connection, observer);
        }

        Ok(())
    }

    /// Delayed Error → Connecting transition. The task re-checks the state
    /// after the delay so a connection closed in the meantime stays closed.
    ///
    /// Without an ambient tokio runtime the reconnect is skipped and the
    /// connection stays in Error.
    fn schedule_reconnect(
        &self,
        connection: Arc<Connection>,
        observer: Option<Arc<dyn ErrorObserver>>,
    ) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(
                id = %connection.id(),
                remote = %connection.remote(),
                "No async runtime, leaving connection in Error"
            );
            return;
        };

        let delay = self.reconnect_delay;
        let clock = Arc::clone(&self.clock);

        handle.spawn(async move {
            tokio::time::sleep(delay).await;

            if connection.state() != ConnectionState::Error {
                return;
            }

            connection.set_state(ConnectionState::Connecting);
            connection.touch(clock.now());
            info!(
                id = %connection.id(),
                attempt = connection.reconnect_attempts(),
                "Reconnecting"
            );

            if let Some(observer) = observer {
                observer.on_reconnect(&connection.snapshot(&*clock));
            }
        });
    }

    /// Whether the reconnect policy would retry this connection: attempts
    /// left and the last error retryable.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::NotFound`] for an unknown id.
    pub fn should_reconnect(&self, id: ConnectionId) -> TrackerResult<bool> {
        let connection = self.connection(id).ok_or(TrackerError::NotFound(id))?;

        Ok(connection.reconnect_attempts() < self.max_reconnect_attempts
            && connection.last_error().map_or(true, |kind| kind.is_retryable()))
    }

    /// Fail every connection whose idle time exceeds the configured
    /// timeout. Returns how many connections timed out.
    pub fn check_timeouts(&self) -> usize {
        let now = self.clock.now();
        let stale: Vec<ConnectionId> = {
            let connections = self.connections.read().expect("connections lock poisoned");
            connections
                .values()
                .filter(|c| now.saturating_duration_since(c.last_activity()) > self.connection_timeout)
                .map(|c| c.id())
                .collect()
        };

        for id in &stale {
            self.stats.timeout_count.fetch_add(1, Ordering::Relaxed);
            let _ = self.handle_error(*id, ErrorKind::Timeout);
        }

        stale.len()
    }

    /// Stop tracking a connection. Closed is terminal: every later
    /// operation on the id fails with `NotFound`.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::NotFound`] for an unknown id.
    pub fn close(&self, id: ConnectionId) -> TrackerResult<()> {
        let connection = self
            .connections
            .write()
            .expect("connections lock poisoned")
            .remove(&id)
            .ok_or(TrackerError::NotFound(id))?;

        // A pending reconnect task may still hold the Arc; marking Closed
        // makes it bail instead of resurrecting the connection.
        connection.set_state(ConnectionState::Closed);
        debug!(%id, "Closed connection");
        Ok(())
    }

    /// Snapshot a tracked connection.
    #[must_use]
    pub fn snapshot(&self, id: ConnectionId) -> Option<ConnectionSnapshot> {
        self.connection(id).map(|c| c.snapshot(&*self.clock))
    }

    /// Tracker counters.
    #[must_use]
    pub fn stats(&self) -> &TrackerStats {
        &self.stats
    }

    /// Reset the tracker counters.
    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Stop accepting new connections.
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
        self.stats.fill(&mut payload);
        self.errors
            .lock()
            .expect("error table lock poisoned")
            .fill(&mut payload);
        payload.gauge("active_connections", self.connection_count() as f64);
        payload
    }
}
