//! End-to-end tests driving selection, health, weighting, and connection
//! tracking through the public API.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uplink::balancer::strategy::for_algorithm;
use uplink::balancer::{
    BalancerError, BalancerResult, HealthMonitor, HealthProbe, SelectionContext, Server,
    ServerPool, Strategy, WeightAdjuster,
};
use uplink::config::HealthConfig;
use uplink::{
    AlgorithmKind, ConnectionSnapshot, ConnectionState, ErrorKind, ErrorObserver, ManualClock,
    Uplink, UplinkConfig,
};

fn addr(octet: u8) -> SocketAddr {
    format!("10.0.0.{octet}:8080").parse().unwrap()
}

/// Test strategy that always picks the server at a fixed address.
struct PinTo(SocketAddr);

impl Strategy for PinTo {
    fn select<'a>(
        &self,
        servers: &'a [Arc<Server>],
        _context: &SelectionContext,
    ) -> BalancerResult<&'a Arc<Server>> {
        servers
            .iter()
            .find(|s| s.address() == self.0)
            .ok_or(BalancerError::NoHealthyServer)
    }

    fn name(&self) -> &'static str {
        "pin"
    }
}

/// Probe that can take one specific server down and back up.
struct TargetProbe {
    target: SocketAddr,
    down: AtomicBool,
}

impl HealthProbe for TargetProbe {
    fn probe<'a>(&'a self, server: &'a Server) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            !(server.address() == self.target && self.down.load(Ordering::Relaxed))
        })
    }
}

#[derive(Default)]
struct ReconnectCounter {
    errors: AtomicUsize,
    reconnects: AtomicUsize,
}

impl ErrorObserver for ReconnectCounter {
    fn on_error(&self, _connection: &ConnectionSnapshot, _kind: ErrorKind) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn on_reconnect(&self, _connection: &ConnectionSnapshot) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }
}

#[tokio::test]
async fn round_robin_cycles_through_equal_servers() {
    let uplink = Uplink::new(UplinkConfig::default()).unwrap();
    let ids = [
        uplink.add_server(addr(1), 1, None).unwrap(),
        uplink.add_server(addr(2), 1, None).unwrap(),
        uplink.add_server(addr(3), 1, None).unwrap(),
    ];

    // Client IPs vary; round-robin must ignore them.
    let picked: Vec<_> = (0..6u8)
        .map(|i| {
            let context = SelectionContext::new().with_client_ip(format!("192.168.0.{i}").parse().unwrap());
            uplink.select(&context).unwrap().id()
        })
        .collect();

    assert_eq!(picked, [ids[0], ids[1], ids[2], ids[0], ids[1], ids[2]]);
}

#[tokio::test]
async fn least_connections_never_picks_capped_server() {
    let pool = ServerPool::new(8);
    pool.add_server(addr(1), 1, Some(5)).unwrap();
    let b = pool.add_server(addr(2), 1, Some(10)).unwrap();
    let c = pool.add_server(addr(3), 1, Some(10)).unwrap();

    // Server A at 5/5, B and C at 2/10.
    let context = SelectionContext::new();
    for _ in 0..5 {
        pool.select_with(&PinTo(addr(1)), &context).unwrap();
    }
    for target in [addr(2), addr(3)] {
        for _ in 0..2 {
            pool.select_with(&PinTo(target), &context).unwrap();
        }
    }

    let strategy = for_algorithm(AlgorithmKind::LeastConnections);
    for _ in 0..10 {
        let picked = pool.select_with(&*strategy, &context).unwrap();
        assert!(picked.id() == b || picked.id() == c, "capped server selected");
    }
}

#[tokio::test(start_paused = true)]
async fn auth_failure_is_permanent() {
    let uplink = Uplink::new(UplinkConfig::default()).unwrap();
    let counter = Arc::new(ReconnectCounter::default());
    uplink.set_error_observer(counter.clone());

    let id = uplink.track("mtproto", addr(1)).unwrap();
    uplink.handle_error(id, ErrorKind::AuthFailed).unwrap();

    // Well past any reconnect delay.
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(uplink.snapshot(id).unwrap().state, ConnectionState::Error);
    assert_eq!(counter.errors.load(Ordering::Relaxed), 1);
    assert_eq!(counter.reconnects.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn unhealthy_server_excluded_from_every_algorithm() {
    let pool = Arc::new(ServerPool::new(8));
    pool.add_server(addr(1), 1, None).unwrap();
    let down_id = pool.add_server(addr(2), 1, None).unwrap();
    pool.add_server(addr(3), 1, None).unwrap();

    let probe = Arc::new(TargetProbe {
        target: addr(2),
        down: AtomicBool::new(true),
    });
    let config = HealthConfig {
        unhealthy_threshold: 2,
        healthy_threshold: 2,
        ..HealthConfig::default()
    };
    let monitor = HealthMonitor::new(pool.clone(), probe.clone(), config);

    monitor.check_once().await;
    monitor.check_once().await;
    assert!(!pool.server(down_id).unwrap().can_accept());

    let algorithms = [
        AlgorithmKind::RoundRobin,
        AlgorithmKind::LeastConnections,
        AlgorithmKind::WeightedRoundRobin,
        AlgorithmKind::IpHash,
        AlgorithmKind::LeastResponseTime,
    ];
    for kind in algorithms {
        let strategy = for_algorithm(kind);
        for i in 0..12u8 {
            let context =
                SelectionContext::new().with_client_ip(format!("10.1.1.{i}").parse().unwrap());
            let picked = pool.select_with(&*strategy, &context).unwrap();
            assert_ne!(picked.id(), down_id, "{} picked unhealthy server", strategy.name());
        }
    }

    // Recovery is debounced over two healthy probes.
    probe.down.store(false, Ordering::Relaxed);
    monitor.check_once().await;
    monitor.check_once().await;
    assert!(pool.server(down_id).unwrap().can_accept());

    let strategy = for_algorithm(AlgorithmKind::RoundRobin);
    let context = SelectionContext::new();
    let picked: Vec<_> = (0..3)
        .map(|_| pool.select_with(&*strategy, &context).unwrap().id())
        .collect();
    assert!(picked.contains(&down_id));
}

#[tokio::test]
async fn weight_adjuster_raises_weight_on_high_success_rate() {
    let uplink = Uplink::new(UplinkConfig::default()).unwrap();
    let id = uplink.add_server(addr(1), 50, None).unwrap();

    // 490 of 500 requests succeed: 98%.
    let context = SelectionContext::new();
    for i in 0..500u32 {
        let server = uplink.select(&context).unwrap();
        if i % 50 == 0 {
            uplink.report_failure(server.id()).unwrap();
        } else {
            uplink.report_success(server.id(), 12).unwrap();
        }
    }

    let adjuster = WeightAdjuster::new(uplink.pool().clone(), UplinkConfig::default().weight_adjust);
    adjuster.adjust_once();
    assert_eq!(uplink.pool().server(id).unwrap().weight(), 51);
}

#[tokio::test]
async fn closed_connection_rejects_everything() {
    let uplink = Uplink::new(UplinkConfig::default()).unwrap();
    let id = uplink.track("mtproto", addr(1)).unwrap();
    uplink.update_state(id, ConnectionState::Connecting).unwrap();
    uplink.close(id).unwrap();

    assert!(uplink.snapshot(id).is_none());
    assert!(uplink.update_state(id, ConnectionState::Handshake).is_err());
    assert!(uplink.record_activity(id, 1, 1).is_err());
    assert!(uplink.handle_error(id, ErrorKind::Timeout).is_err());
    assert!(uplink.close(id).is_err());
}

#[tokio::test]
async fn outcome_counters_bounded_by_total() {
    let uplink = Uplink::new(UplinkConfig::default()).unwrap();

    for i in 0..20u64 {
        let id = uplink.track("mtproto", addr(1)).unwrap();
        uplink.update_state(id, ConnectionState::Connecting).unwrap();
        match i % 3 {
            0 => {
                uplink.update_state(id, ConnectionState::Handshake).unwrap();
                uplink
                    .update_state(id, ConnectionState::Established)
                    .unwrap();
            }
            1 => uplink.handle_error(id, ErrorKind::NetworkError).unwrap(),
            _ => {}
        }
        uplink.close(id).unwrap();
    }

    let stats = uplink.tracker().stats();
    let total = stats.total_connections.load(Ordering::Relaxed);
    let ok = stats.successful_connections.load(Ordering::Relaxed);
    let failed = stats.failed_connections.load(Ordering::Relaxed);
    assert_eq!(total, 20);
    assert!(ok + failed <= total);
}

#[tokio::test]
async fn ip_hash_is_deterministic_per_client() {
    let uplink = Uplink::new(UplinkConfig {
        algorithm: AlgorithmKind::IpHash,
        ..UplinkConfig::default()
    })
    .unwrap();
    for octet in 1..=4 {
        uplink.add_server(addr(octet), 1, None).unwrap();
    }

    let context = SelectionContext::new().with_client_ip("203.0.113.9".parse().unwrap());
    let first = uplink.select(&context).unwrap().id();
    for _ in 0..10 {
        assert_eq!(uplink.select(&context).unwrap().id(), first);
    }
}

#[tokio::test(start_paused = true)]
async fn idle_connections_time_out_and_reconnect() {
    let mut config = UplinkConfig::default();
    config.connection_timeout = Duration::from_secs(2);
    config.health.enabled = false;
    config.weight_adjust.enabled = false;

    let clock = Arc::new(ManualClock::new());
    let uplink = Uplink::with_clock(config, clock.clone()).unwrap();
    let counter = Arc::new(ReconnectCounter::default());
    uplink.set_error_observer(counter.clone());
    uplink.start().unwrap();

    let id = uplink.track("mtproto", addr(1)).unwrap();
    uplink.update_state(id, ConnectionState::Connecting).unwrap();

    // 3s idle on the injected clock; paused tokio time auto-advances
    // through the sweep interval and the reconnect delay.
    clock.advance(Duration::from_secs(3));
    tokio::time::sleep(Duration::from_secs(5)).await;

    let stats = uplink.tracker().stats();
    assert_eq!(stats.timeout_count.load(Ordering::Relaxed), 1);
    assert_eq!(counter.errors.load(Ordering::Relaxed), 1);
    assert_eq!(counter.reconnects.load(Ordering::Relaxed), 1);
    assert_eq!(
        uplink.snapshot(id).unwrap().state,
        ConnectionState::Connecting
    );
    assert_eq!(uplink.snapshot(id).unwrap().last_error, Some(ErrorKind::Timeout));

    uplink.shutdown().await.unwrap();
}
