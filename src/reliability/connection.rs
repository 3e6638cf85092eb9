//! Per-connection state machine.

use super::error::ErrorKind;
use crate::clock::Clock;
use crate::observer::ConnectionSnapshot;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Instant;

/// Identifier of a tracked connection. Unique and monotonic per tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle state of a connection.
///
/// ```text
/// Unknown ──▶ Connecting ──▶ Handshake ──▶ Established ⇄ Degraded
///                 ▲                            │            │
///                 │ (reconnect policy)         ▼            │
///                 └──────────────────────── Error ◀────────┘
///                                              │
///                                              ▼
///                                           Closed (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not yet started.
    Unknown,
    /// TCP connect in flight.
    Connecting,
    /// Protocol handshake in flight.
    Handshake,
    /// Fully established and passing traffic.
    Established,
    /// Established but misbehaving (slow, partial failures).
    Degraded,
    /// Failed; may re-enter Connecting via the reconnect policy only.
    Error,
    /// Closed; no further transitions.
    Closed,
}

impl ConnectionState {
    /// Whether a direct request to move to `next` is legal.
    ///
    /// Error → Connecting is deliberately absent: only the reconnect
    /// policy may take that edge.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        if self == next {
            return true;
        }

        match self {
            Self::Unknown => matches!(next, Self::Connecting | Self::Error | Self::Closed),
            Self::Connecting => matches!(next, Self::Handshake | Self::Error | Self::Closed),
            Self::Handshake => matches!(next, Self::Established | Self::Error | Self::Closed),
            Self::Established => matches!(next, Self::Degraded | Self::Error | Self::Closed),
            Self::Degraded => matches!(next, Self::Established | Self::Error | Self::Closed),
            Self::Error => matches!(next, Self::Closed),
            Self::Closed => false,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unknown => "Unknown",
            Self::Connecting => "Connecting",
            Self::Handshake => "Handshake",
            Self::Established => "Established",
            Self::Degraded => "Degraded",
            Self::Error => "Error",
            Self::Closed => "Closed",
        };
        f.write_str(name)
    }
}

/// A tracked connection.
///
/// Byte and error counters are atomics; state and timestamps sit behind
/// `RwLock`s since they change orders of magnitude less often.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    protocol: String,
    remote: SocketAddr,
    state: RwLock<ConnectionState>,
    connect_time: Instant,
    last_activity: RwLock<Instant>,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    error_count: AtomicU32,
    last_error: RwLock<Option<ErrorKind>>,
    reconnect_attempts: AtomicU32,
    encrypted: AtomicBool,
    authenticated: AtomicBool,
    /// Whether this connection has already been counted as one pool-level
    /// success or failure. Each connection contributes at most one outcome.
    outcome_recorded: AtomicBool,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        protocol: impl Into<String>,
        remote: SocketAddr,
        now: Instant,
    ) -> Self {
        Self {
            id,
            protocol: protocol.into(),
            remote,
            state: RwLock::new(ConnectionState::Unknown),
            connect_time: now,
            last_activity: RwLock::new(now),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            error_count: AtomicU32::new(0),
            last_error: RwLock::new(None),
            reconnect_attempts: AtomicU32::new(0),
            encrypted: AtomicBool::new(false),
            authenticated: AtomicBool::new(false),
            outcome_recorded: AtomicBool::new(false),
        }
    }

    /// Connection id.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote backend address.
    #[must_use]
    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read().expect("state lock poisoned")
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        *self.state.write().expect("state lock poisoned") = state;
    }

    /// Most recent error, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<ErrorKind> {
        *self.last_error.read().expect("error lock poisoned")
    }

    pub(crate) fn record_error(&self, kind: ErrorKind) {
        *self.last_error.write().expect("error lock poisoned") = Some(kind);
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Reconnect attempts made so far.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Reserve a reconnect attempt slot, never exceeding `max`.
    /// Returns `false` when the budget is spent.
    pub(crate) fn try_take_reconnect_slot(&self, max: u32) -> bool {
        self.reconnect_attempts
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |attempts| {
                (attempts < max).then_some(attempts + 1)
            })
            .is_ok()
    }

    pub(crate) fn touch(&self, now: Instant) {
        *self.last_activity.write().expect("activity lock poisoned") = now;
    }

    pub(crate) fn last_activity(&self) -> Instant {
        *self.last_activity.read().expect("activity lock poisoned")
    }

    pub(crate) fn add_bytes(&self, sent: u64, received: u64) {
        self.bytes_sent.fetch_add(sent, Ordering::Relaxed);
        self.bytes_received.fetch_add(received, Ordering::Relaxed);
    }

    /// Mark the connection as encrypted.
    pub fn set_encrypted(&self, encrypted: bool) {
        self.encrypted.store(encrypted, Ordering::Relaxed);
    }

    /// Mark the connection as authenticated.
    pub fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::Relaxed);
    }

    /// Claim the single pool-level outcome slot for this connection.
    /// Returns `true` exactly once.
    pub(crate) fn try_record_outcome(&self) -> bool {
        self.outcome_recorded
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }

    /// Immutable snapshot for observers and metrics.
    #[must_use]
    pub fn snapshot(&self, clock: &dyn Clock) -> ConnectionSnapshot {
        let now = clock.now();
        ConnectionSnapshot {
            id: self.id,
            protocol: self.protocol.clone(),
            remote: self.remote,
            state: self.state(),
            age: now.saturating_duration_since(self.connect_time),
            idle: now.saturating_duration_since(self.last_activity()),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            last_error: self.last_error(),
            reconnect_attempts: self.reconnect_attempts(),
            encrypted: self.encrypted.load(Ordering::Relaxed),
            authenticated: self.authenticated.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn conn(clock: &ManualClock) -> Connection {
        Connection::new(
            ConnectionId(1),
            "mtproto",
            "10.0.0.1:443".parse().unwrap(),
            clock.now(),
        )
    }

    #[test]
    fn test_happy_path_transitions() {
        use ConnectionState::*;
        assert!(Unknown.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Handshake));
        assert!(Handshake.can_transition_to(Established));
        assert!(Established.can_transition_to(Degraded));
        assert!(Degraded.can_transition_to(Established));
        assert!(Established.can_transition_to(Error));
        assert!(Error.can_transition_to(Closed));
    }

    #[test]
    fn test_illegal_transitions() {
        use ConnectionState::*;
        assert!(!Unknown.can_transition_to(Established));
        assert!(!Connecting.can_transition_to(Established));
        assert!(!Established.can_transition_to(Connecting));
        // Error -> Connecting is reserved for the reconnect policy.
        assert!(!Error.can_transition_to(Connecting));
    }

    #[test]
    fn test_closed_is_terminal() {
        use ConnectionState::*;
        for next in [Unknown, Connecting, Handshake, Established, Degraded, Error] {
            assert!(!Closed.can_transition_to(next));
        }
    }

    #[test]
    fn test_reconnect_slot_bounded() {
        let clock = ManualClock::new();
        let c = conn(&clock);

        assert!(c.try_take_reconnect_slot(2));
        assert!(c.try_take_reconnect_slot(2));
        assert!(!c.try_take_reconnect_slot(2));
        assert_eq!(c.reconnect_attempts(), 2);
    }

    #[test]
    fn test_outcome_recorded_once() {
        let clock = ManualClock::new();
        let c = conn(&clock);

        assert!(c.try_record_outcome());
        assert!(!c.try_record_outcome());
    }

    #[test]
    fn test_snapshot_tracks_idle_time() {
        let clock = ManualClock::new();
        let c = conn(&clock);

        clock.advance(Duration::from_secs(5));
        let snap = c.snapshot(&clock);
        assert_eq!(snap.age, Duration::from_secs(5));
        assert_eq!(snap.idle, Duration::from_secs(5));

        c.touch(clock.now());
        clock.advance(Duration::from_secs(2));
        let snap = c.snapshot(&clock);
        assert_eq!(snap.age, Duration::from_secs(7));
        assert_eq!(snap.idle, Duration::from_secs(2));
    }

    #[test]
    fn test_byte_counters() {
        let clock = ManualClock::new();
        let c = conn(&clock);

        c.add_bytes(100, 250);
        c.add_bytes(50, 0);

        let snap = c.snapshot(&clock);
        assert_eq!(snap.bytes_sent, 150);
        assert_eq!(snap.bytes_received, 250);
    }
}
