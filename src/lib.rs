//! # Uplink
//!
//! Backend selection, health tracking, and connection reliability for
//! forward proxies.
//!
//! ## Features
//!
//! - **Multiple Strategies**: Round-robin, least-connections, weighted
//!   round-robin, IP hash, and least-response-time
//! - **Health Checks**: Pluggable probes with debounced state transitions
//! - **Adaptive Weights**: Periodic re-weighting from rolling success rates
//! - **Connection Tracking**: Per-connection state machine with error
//!   classification and bounded, delayed reconnection
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │           Uplink             │
//! │                              │
//! │  ┌──────────┐  ┌──────────┐  │      ┌──────────┐
//! │  │ Strategy │─│  Server  │──┼────▶│ Backend1 │
//! │  └──────────┘  │   Pool   │  │      └──────────┘
//! │  ┌──────────┐  └─────┬────┘  │      ┌──────────┐
//! │  │  Health  │────────┤       │────▶│ Backend2 │
//! │  │ Monitor  │        │       │      └──────────┘
//! │  └──────────┘  ┌─────┴────┐  │
//! │  ┌──────────┐  │  Weight  │  │
//! │  │Connection│  │ Adjuster │  │
//! │  │ Tracker  │  └──────────┘  │
//! │  └──────────┘                │
//! └──────────────────────────────┘
//! ```
//!
//! The embedding proxy asks [`Uplink`] (or a [`balancer::ServerPool`]
//! directly) for a backend, registers the resulting connection with the
//! [`reliability::ConnectionTracker`], and reports success or failure back
//! as traffic flows. The health monitor and weight adjuster run as
//! independent periodic tasks and feed the pool state consumed by the next
//! selection.

pub mod balancer;
pub mod clock;
pub mod config;
pub mod metrics;
pub mod observer;
pub mod reliability;
pub mod service;

pub use balancer::{BalancerError, Server, ServerId, ServerPool, ServerStatus, Strategy};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AlgorithmKind, ConfigError, UplinkConfig};
pub use metrics::{MetricsPayload, MetricsSink};
pub use observer::{ConnectionSnapshot, ErrorObserver, HealthObserver};
pub use reliability::{ConnectionId, ConnectionState, ConnectionTracker, ErrorKind, TrackerError};
pub use service::Uplink;
