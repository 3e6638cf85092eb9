//! Adaptive weight adjustment from rolling success rates.

use super::pool::ServerPool;
use super::server::ServerStatus;
use crate::config::WeightAdjustConfig;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Success rate above which a server's weight is raised.
const RAISE_THRESHOLD: f64 = 0.95;

/// Success rate below which a server's weight is lowered.
const LOWER_THRESHOLD: f64 = 0.80;

/// Periodic weight adjuster for a pool.
pub struct WeightAdjuster {
    pool: Arc<ServerPool>,
    config: WeightAdjustConfig,
}

impl WeightAdjuster {
    /// Create an adjuster over `pool`.
    #[must_use]
    pub fn new(pool: Arc<ServerPool>, config: WeightAdjustConfig) -> Self {
        Self { pool, config }
    }

    /// Run one adjustment pass.
    ///
    /// Healthy servers with at least one routed request move one weight
    /// step toward their observed success rate: above 95% the weight goes
    /// up (capped at 100), below 80% it goes down (floored at 1).
    pub fn adjust_once(&self) {
        for server in self.pool.servers() {
            if server.status() != ServerStatus::Healthy {
                continue;
            }

            let total = server.total_requests();
            if total == 0 {
                continue;
            }

            let rate = server.successful_requests() as f64 / total as f64;
            let weight = server.weight();

            if rate > RAISE_THRESHOLD {
                server.set_weight(weight + 1);
            } else if rate < LOWER_THRESHOLD {
                server.set_weight(weight.saturating_sub(1));
            }

            if server.weight() != weight {
                debug!(
                    server = %server.address(),
                    success_rate = rate,
                    old_weight = weight,
                    new_weight = server.weight(),
                    "Adjusted server weight"
                );
            }
        }
    }

    /// Run the adjuster until a shutdown signal arrives.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) {
        if !self.config.enabled {
            debug!("Weight adjustment disabled");
            return;
        }

        debug!(
            interval_ms = self.config.interval.as_millis() as u64,
            "Starting weight adjuster"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("Weight adjuster shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    self.adjust_once();
                }
            }
        }
    }
}
