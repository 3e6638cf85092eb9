//! Connection tracking error types and the failure taxonomy.

use super::connection::{ConnectionId, ConnectionState};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a connection failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// No activity within the configured timeout.
    Timeout,
    /// Malformed protocol header.
    InvalidHeader,
    /// Authentication rejected by the backend.
    AuthFailed,
    /// Cryptographic failure.
    CryptoError,
    /// Incompatible protocol version.
    VersionMismatch,
    /// Read or write exceeded a buffer limit.
    BufferOverflow,
    /// Transport-level failure.
    NetworkError,
    /// A resource limit was hit.
    ResourceLimit,
}

impl ErrorKind {
    /// Whether the reconnect policy may retry after this failure.
    ///
    /// Authentication and version failures are permanent for a given
    /// backend; retrying them would only repeat the rejection.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::AuthFailed | Self::VersionMismatch)
    }

    /// Stable lowercase label for logs and metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::InvalidHeader => "invalid-header",
            Self::AuthFailed => "auth-failed",
            Self::CryptoError => "crypto-error",
            Self::VersionMismatch => "version-mismatch",
            Self::BufferOverflow => "buffer-overflow",
            Self::NetworkError => "network-error",
            Self::ResourceLimit => "resource-limit",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Errors that can occur in the connection tracker.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Unknown or already-closed connection id.
    #[error("connection {0} not found")]
    NotFound(ConnectionId),

    /// The tracker is at its configured capacity.
    #[error("connection limit reached (max {0})")]
    PoolFull(usize),

    /// The tracker has been shut down.
    #[error("tracker is shut down")]
    Shutdown,

    /// The requested state change is not a legal transition.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        /// State the connection is in.
        from: ConnectionState,
        /// State that was requested.
        to: ConnectionState,
    },
}

/// Result type for tracker operations.
pub type TrackerResult<T> = Result<T, TrackerError>;
