//! Observer traits the embedding proxy implements.
//!
//! The C-style approach of raw callback function pointers is replaced with
//! trait objects registered per pool/tracker instance, so two instances in
//! one process never share callback state.

use crate::reliability::{ConnectionId, ConnectionState, ErrorKind};
use std::net::SocketAddr;
use std::time::Duration;

/// Immutable view of a tracked connection, passed to observers and exposed
/// by [`crate::reliability::ConnectionTracker::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    /// Connection id.
    pub id: ConnectionId,
    /// Protocol label supplied at tracking time.
    pub protocol: String,
    /// Remote backend address.
    pub remote: SocketAddr,
    /// Current state.
    pub state: ConnectionState,
    /// Time since the connection was tracked.
    pub age: Duration,
    /// Time since the last recorded activity.
    pub idle: Duration,
    /// Bytes sent on this connection.
    pub bytes_sent: u64,
    /// Bytes received on this connection.
    pub bytes_received: u64,
    /// Errors recorded on this connection.
    pub error_count: u32,
    /// Most recent error kind, if any.
    pub last_error: Option<ErrorKind>,
    /// Reconnect attempts made so far.
    pub reconnect_attempts: u32,
    /// Whether the connection negotiated encryption.
    pub encrypted: bool,
    /// Whether the connection authenticated.
    pub authenticated: bool,
}

/// Receives connection error and reconnect events.
///
/// `on_error` fires for every classified error before any retry decision is
/// made, so observability is never skipped. `on_reconnect` fires when the
/// reconnect policy moves a connection back to `Connecting`.
pub trait ErrorObserver: Send + Sync {
    /// A connection recorded an error.
    fn on_error(&self, connection: &ConnectionSnapshot, kind: ErrorKind);

    /// A connection is being retried.
    fn on_reconnect(&self, connection: &ConnectionSnapshot);
}

/// Receives server health transitions.
pub trait HealthObserver: Send + Sync {
    /// A server changed health; `healthy` is the new state.
    fn on_health_change(&self, server: SocketAddr, healthy: bool);
}

/// No-op observer for embedders that do not care about events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl ErrorObserver for NullObserver {
    fn on_error(&self, _connection: &ConnectionSnapshot, _kind: ErrorKind) {}

    fn on_reconnect(&self, _connection: &ConnectionSnapshot) {}
}

impl HealthObserver for NullObserver {
    fn on_health_change(&self, _server: SocketAddr, _healthy: bool) {}
}
