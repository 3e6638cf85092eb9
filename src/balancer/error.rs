//! Balancer error types.

use super::server::ServerId;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors that can occur in the balancer.
#[derive(Debug, Error)]
pub enum BalancerError {
    /// Selection exhausted a full cycle without finding a selectable server.
    #[error("no healthy server available")]
    NoHealthyServer,

    /// Unknown server id.
    #[error("server {0} not found")]
    NotFound(ServerId),

    /// A server with this address is already registered.
    #[error("server {0} already registered")]
    Duplicate(SocketAddr),

    /// The pool is at its configured capacity.
    #[error("server pool full (max {0})")]
    PoolFull(usize),

    /// The pool has been shut down.
    #[error("pool is shut down")]
    Shutdown,

    /// Background tasks are already running.
    #[error("already running")]
    AlreadyRunning,

    /// Background tasks are not running.
    #[error("not running")]
    NotRunning,
}

/// Result type for balancer operations.
pub type BalancerResult<T> = Result<T, BalancerError>;
