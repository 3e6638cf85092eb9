//! The `Uplink` facade: a pool, a tracker, and their background tasks
//! under one lifecycle.

use crate::balancer::strategy::{for_algorithm, SelectionContext};
use crate::balancer::{
    BalancerError, BalancerResult, HealthMonitor, HealthProbe, Server, ServerId, ServerPool,
    ServerStatus, Strategy, TcpProbe, WeightAdjuster,
};
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, UplinkConfig};
use crate::metrics::MetricsPayload;
use crate::observer::{ConnectionSnapshot, ErrorObserver, HealthObserver};
use crate::reliability::{
    ConnectionId, ConnectionState, ConnectionTracker, ErrorKind, TrackerResult,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Shutdown handles for the running background tasks.
struct BackgroundTasks {
    signals: Vec<mpsc::Sender<()>>,
    handles: Vec<JoinHandle<()>>,
}

/// Backend selection and connection reliability behind a single handle.
///
/// Owns a [`ServerPool`], a [`ConnectionTracker`], and the configured
/// selection strategy. [`Uplink::start`] spawns the health monitor, the
/// weight adjuster, and the idle-connection sweep; [`Uplink::shutdown`]
/// stops them and closes both the pool and the tracker to new work.
pub struct Uplink {
    config: UplinkConfig,
    pool: Arc<ServerPool>,
    tracker: Arc<ConnectionTracker>,
    strategy: Box<dyn Strategy>,
    probe: Arc<dyn HealthProbe>,
    tasks: Mutex<Option<BackgroundTasks>>,
}

impl Uplink {
    /// Create an instance from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration is invalid.
    pub fn new(config: UplinkConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create an instance with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration is invalid.
    pub fn with_clock(config: UplinkConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;

        let pool = Arc::new(ServerPool::new(config.max_servers));
        let tracker = Arc::new(ConnectionTracker::new(&config, clock));
        let strategy = for_algorithm(config.algorithm);
        let probe: Arc<dyn HealthProbe> = Arc::new(TcpProbe::new(config.health.probe_timeout));

        info!(
            algorithm = strategy.name(),
            max_servers = config.max_servers,
            max_connections = config.max_connections,
            "Uplink initialized"
        );

        Ok(Self {
            config,
            pool,
            tracker,
            strategy,
            probe,
            tasks: Mutex::new(None),
        })
    }

    /// Replace the health probe. Only affects monitors started afterwards.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Register the health observer.
    pub fn set_health_observer(&self, observer: Arc<dyn HealthObserver>) {
        self.pool.set_health_observer(observer);
    }

    /// Register the error observer.
    pub fn set_error_observer(&self, observer: Arc<dyn ErrorObserver>) {
        self.tracker.set_error_observer(observer);
    }

    /// The underlying server pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<ServerPool> {
        &self.pool
    }

    /// The underlying connection tracker.
    #[must_use]
    pub fn tracker(&self) -> &Arc<ConnectionTracker> {
        &self.tracker
    }

    /// Spawn the health monitor, weight adjuster, and idle sweep.
    ///
    /// # Errors
    ///
    /// Returns [`BalancerError::AlreadyRunning`] when the tasks are
    /// already up.
    pub fn start(&self) -> BalancerResult<()> {
        let mut tasks = self.tasks.lock().expect("tasks lock poisoned");
        if tasks.is_some() {
            return Err(BalancerError::AlreadyRunning);
        }

        let mut signals = Vec::new();
        let mut handles = Vec::new();

        let (tx, rx) = mpsc::channel(1);
        let monitor = HealthMonitor::new(
            Arc::clone(&self.pool),
            Arc::clone(&self.probe),
            self.config.health.clone(),
        );
        signals.push(tx);
        handles.push(tokio::spawn(monitor.run(rx)));

        let (tx, rx) = mpsc::channel(1);
        let adjuster = WeightAdjuster::new(Arc::clone(&self.pool), self.config.weight_adjust.clone());
        signals.push(tx);
        handles.push(tokio::spawn(adjuster.run(rx)));

        let (tx, rx) = mpsc::channel(1);
        signals.push(tx);
        handles.push(tokio::spawn(sweep_timeouts(
            Arc::clone(&self.tracker),
            self.config.connection_timeout,
            rx,
        )));

        info!("Uplink background tasks started");
        *tasks = Some(BackgroundTasks { signals, handles });
        Ok(())
    }

    /// Whether the background tasks are running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.tasks.lock().expect("tasks lock poisoned").is_some()
    }

    /// Stop the background tasks and close the pool and tracker to new
    /// work. In-flight reports on existing connections still land.
    ///
    /// # Errors
    ///
    /// Returns [`BalancerError::NotRunning`] when [`Self::start`] has not
    /// been called.
    pub async fn shutdown(&self) -> BalancerResult<()> {
        let tasks = self
            .tasks
            .lock()
            .expect("tasks lock poisoned")
            .take()
            .ok_or(BalancerError::NotRunning)?;

        self.pool.shutdown();
        self.tracker.shutdown();

        for signal in &tasks.signals {
            let _ = signal.send(()).await;
        }
        for handle in tasks.handles {
            let _ = handle.await;
        }

        info!("Uplink shut down");
        Ok(())
    }

    /// Select a backend with the configured strategy.
    ///
    /// # Errors
    ///
    /// Returns [`BalancerError::NoHealthyServer`] when every server is out
    /// of rotation and [`BalancerError::Shutdown`] after shutdown.
    pub fn select(&self, context: &SelectionContext) -> BalancerResult<Arc<Server>> {
        self.pool.select_with(&*self.strategy, context)
    }

    /// Register a backend server.
    ///
    /// # Errors
    ///
    /// See [`ServerPool::add_server`].
    pub fn add_server(
        &self,
        address: SocketAddr,
        weight: u32,
        max_connections: Option<u32>,
    ) -> BalancerResult<ServerId> {
        self.pool.add_server(address, weight, max_connections)
    }

    /// Remove a backend server.
    ///
    /// # Errors
    ///
    /// Returns [`BalancerError::NotFound`] for an unknown id.
    pub fn remove_server(&self, id: ServerId) -> BalancerResult<()> {
        self.pool.remove_server(id)
    }

    /// Set a server's administrative status.
    ///
    /// # Errors
    ///
    /// Returns [`BalancerError::NotFound`] for an unknown id.
    pub fn set_server_status(&self, id: ServerId, status: ServerStatus) -> BalancerResult<()> {
        self.pool.set_status(id, status)
    }

    /// Report a completed, successful request on a server.
    ///
    /// # Errors
    ///
    /// Returns [`BalancerError::NotFound`] for an unknown id.
    pub fn report_success(&self, id: ServerId, response_time_ms: u64) -> BalancerResult<()> {
        self.pool.report_success(id, response_time_ms)
    }

    /// Report a failed request on a server.
    ///
    /// # Errors
    ///
    /// Returns [`BalancerError::NotFound`] for an unknown id.
    pub fn report_failure(&self, id: ServerId) -> BalancerResult<()> {
        self.pool.report_failure(id)
    }

    /// Start tracking a connection to a backend.
    ///
    /// # Errors
    ///
    /// See [`ConnectionTracker::track`].
    pub fn track(
        &self,
        protocol: impl Into<String>,
        remote: SocketAddr,
    ) -> TrackerResult<ConnectionId> {
        self.tracker.track(protocol, remote)
    }

    /// Request a connection state transition.
    ///
    /// # Errors
    ///
    /// See [`ConnectionTracker::update_state`].
    pub fn update_state(&self, id: ConnectionId, state: ConnectionState) -> TrackerResult<()> {
        self.tracker.update_state(id, state)
    }

    /// Record traffic on a connection.
    ///
    /// # Errors
    ///
    /// See [`ConnectionTracker::record_activity`].
    pub fn record_activity(&self, id: ConnectionId, sent: u64, received: u64) -> TrackerResult<()> {
        self.tracker.record_activity(id, sent, received)
    }

    /// Record a classified failure on a connection.
    ///
    /// # Errors
    ///
    /// See [`ConnectionTracker::handle_error`].
    pub fn handle_error(&self, id: ConnectionId, kind: ErrorKind) -> TrackerResult<()> {
        self.tracker.handle_error(id, kind)
    }

    /// Stop tracking a connection.
    ///
    /// # Errors
    ///
    /// See [`ConnectionTracker::close`].
    pub fn close(&self, id: ConnectionId) -> TrackerResult<()> {
        self.tracker.close(id)
    }

    /// Snapshot a tracked connection.
    #[must_use]
    pub fn snapshot(&self, id: ConnectionId) -> Option<ConnectionSnapshot> {
        self.tracker.snapshot(id)
    }

    /// Combined metrics snapshot: pool metrics under `pool_`, tracker
    /// metrics under `tracker_`.
    #[must_use]
    pub fn metrics(&self) -> MetricsPayload {
        let mut payload = MetricsPayload::new();
        payload.merge("pool", self.pool.metrics());
        payload.merge("tracker", self.tracker.metrics());
        payload
    }
}

/// Periodically fail connections idle past the timeout. Runs at half the
/// timeout so a stale connection is caught within 1.5x of its deadline.
async fn sweep_timeouts(
    tracker: Arc<ConnectionTracker>,
    timeout: Duration,
    mut shutdown: mpsc::Receiver<()>,
) {
    let interval = (timeout / 2).max(Duration::from_millis(100));

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!("Timeout sweep shutting down");
                break;
            }
            _ = tokio::time::sleep(interval) => {
                let timed_out = tracker.check_timeouts();
                if timed_out > 0 {
                    debug!(timed_out, "Idle connections failed");
                }
            }
        }
    }
}
