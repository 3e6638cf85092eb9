//! # Connection reliability
//!
//! Per-connection lifecycle tracking, an error taxonomy with per-kind
//! aggregation, and a bounded reconnect policy.
//!
//! Every logical backend connection moves through a fixed state machine
//! (see [`ConnectionState`]); the [`ConnectionTracker`] enforces the legal
//! transitions, classifies failures, and decides when a failed connection
//! is worth retrying.

pub mod connection;
pub mod error;
pub mod stats;
pub mod tracker;

pub use connection::{Connection, ConnectionId, ConnectionState};
pub use error::{ErrorKind, TrackerError, TrackerResult};
pub use stats::{ErrorStat, ErrorTable, TrackerStats};
pub use tracker::ConnectionTracker;
