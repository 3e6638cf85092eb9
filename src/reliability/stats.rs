//! Tracker-level counters and the per-kind error table.

use super::connection::ConnectionId;
use super::error::ErrorKind;
use crate::metrics::MetricsPayload;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::warn;

/// Tracker-level counters. Monotonic; reset only via an explicit call.
#[derive(Debug, Default)]
pub struct TrackerStats {
    /// Connections ever tracked.
    pub total_connections: AtomicU64,
    /// Connections that reached Established (at most one per connection).
    pub successful_connections: AtomicU64,
    /// Connections that failed before establishing (at most one per connection).
    pub failed_connections: AtomicU64,
    /// Timeouts detected by the sweep.
    pub timeout_count: AtomicU64,
    /// Bytes sent across all tracked connections.
    pub bytes_sent: AtomicU64,
    /// Bytes received across all tracked connections.
    pub bytes_received: AtomicU64,
}

impl TrackerStats {
    pub(crate) fn reset(&self) {
        self.total_connections.store(0, Ordering::Relaxed);
        self.successful_connections.store(0, Ordering::Relaxed);
        self.failed_connections.store(0, Ordering::Relaxed);
        self.timeout_count.store(0, Ordering::Relaxed);
        self.bytes_sent.store(0, Ordering::Relaxed);
        self.bytes_received.store(0, Ordering::Relaxed);
    }

    pub(crate) fn fill(&self, payload: &mut MetricsPayload) {
        payload.counter(
            "total_connections",
            self.total_connections.load(Ordering::Relaxed),
        );
        payload.counter(
            "successful_connections",
            self.successful_connections.load(Ordering::Relaxed),
        );
        payload.counter(
            "failed_connections",
            self.failed_connections.load(Ordering::Relaxed),
        );
        payload.counter("timeout_count", self.timeout_count.load(Ordering::Relaxed));
        payload.counter("bytes_sent", self.bytes_sent.load(Ordering::Relaxed));
        payload.counter(
            "bytes_received",
            self.bytes_received.load(Ordering::Relaxed),
        );
    }
}

/// Aggregate for one error kind.
#[derive(Debug, Clone)]
pub struct ErrorStat {
    /// Occurrences of this kind.
    pub count: u64,
    /// When this kind was first seen.
    pub first_seen: Instant,
    /// When this kind was last seen.
    pub last_seen: Instant,
    affected: HashSet<ConnectionId>,
}

impl ErrorStat {
    /// Distinct connections that hit this kind.
    #[must_use]
    pub fn affected_connections(&self) -> usize {
        self.affected.len()
    }
}

/// Bounded per-kind error table.
///
/// Once `capacity` distinct kinds are tracked, further new kinds are
/// dropped; each drop is logged and counted so overflow is visible rather
/// than silent.
#[derive(Debug)]
pub struct ErrorTable {
    entries: HashMap<ErrorKind, ErrorStat>,
    capacity: usize,
    dropped_kinds: HashSet<ErrorKind>,
    dropped_events: u64,
}

impl ErrorTable {
    /// Create a table tracking at most `capacity` distinct kinds.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
            dropped_kinds: HashSet::new(),
            dropped_events: 0,
        }
    }

    /// Record one occurrence of `kind` on `connection`.
    pub fn record(&mut self, kind: ErrorKind, connection: ConnectionId, now: Instant) {
        if let Some(stat) = self.entries.get_mut(&kind) {
            stat.count += 1;
            stat.last_seen = now;
            stat.affected.insert(connection);
            return;
        }

        if self.entries.len() >= self.capacity {
            self.dropped_events += 1;
            if self.dropped_kinds.insert(kind) {
                warn!(kind = %kind, capacity = self.capacity, "Error table full, dropping new kind");
            }
            return;
        }

        self.entries.insert(
            kind,
            ErrorStat {
                count: 1,
                first_seen: now,
                last_seen: now,
                affected: HashSet::from([connection]),
            },
        );
    }

    /// Look up the aggregate for a kind.
    #[must_use]
    pub fn get(&self, kind: ErrorKind) -> Option<&ErrorStat> {
        self.entries.get(&kind)
    }

    /// Occurrences that hit a full table.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events
    }

    /// Distinct kinds tracked.
    #[must_use]
    pub fn kind_count(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn fill(&self, payload: &mut MetricsPayload) {
        for (kind, stat) in &self.entries {
            payload.counter(format!("errors_{}", kind.label()), stat.count);
        }
        payload.counter("error_kinds_dropped", self.dropped_events);
    }
}
