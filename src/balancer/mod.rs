//! # Backend selection
//!
//! Server pool, selection strategies, health monitoring, and adaptive
//! weighting.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │    ServerPool    │
//! │                  │
//! │  ┌────────────┐  │      ┌──────────┐
//! │  │  Strategy  │──┼────▶│ Server1  │
//! │  └────────────┘  │      └──────────┘
//! │  ┌────────────┐  │      ┌──────────┐
//! │  │   Health   │──┼────▶│ Server2  │
//! │  │  Monitor   │  │      └──────────┘
//! │  └────────────┘  │      ┌──────────┐
//! │  ┌────────────┐  │────▶│ Server3  │
//! │  │   Weight   │  │      └──────────┘
//! │  │  Adjuster  │  │
//! │  └────────────┘  │
//! └──────────────────┘
//! ```

pub mod error;
pub mod health;
pub mod pool;
pub mod server;
pub mod strategy;
pub mod weight;

pub use error::{BalancerError, BalancerResult};
pub use health::{HealthMonitor, HealthProbe, TcpProbe};
pub use pool::{PoolStats, ServerPool};
pub use server::{Server, ServerId, ServerStatus};
pub use strategy::{
    IpHash, LeastConnections, LeastResponseTime, RoundRobin, SelectionContext, Strategy,
    WeightedRoundRobin,
};
pub use weight::WeightAdjuster;
