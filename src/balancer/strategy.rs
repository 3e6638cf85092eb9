//! Selection strategies.
//!
//! Each strategy is a pure decision over an ordered pool snapshot; any state
//! it needs (cursors, weight counters) lives in the strategy instance, so
//! two pools in one process never interfere. Every algorithm terminates
//! after at most one full cycle over the snapshot.

use super::error::{BalancerError, BalancerResult};
use super::server::Server;
use crate::config::AlgorithmKind;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

/// Context for a selection decision.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectionContext {
    /// Client IP, used by the IP-hash strategy.
    pub client_ip: Option<IpAddr>,
}

impl SelectionContext {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the client IP.
    #[must_use]
    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }
}

/// A selection strategy.
pub trait Strategy: Send + Sync {
    /// Pick a server from the ordered snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`BalancerError::NoHealthyServer`] when no server in the
    /// snapshot is selectable.
    fn select<'a>(
        &self,
        servers: &'a [Arc<Server>],
        context: &SelectionContext,
    ) -> BalancerResult<&'a Arc<Server>>;

    /// Strategy name.
    fn name(&self) -> &'static str;
}

/// Build the strategy instance for a configured algorithm.
#[must_use]
pub fn for_algorithm(kind: AlgorithmKind) -> Box<dyn Strategy> {
    match kind {
        AlgorithmKind::RoundRobin => Box::new(RoundRobin::new()),
        AlgorithmKind::LeastConnections => Box::new(LeastConnections::new()),
        AlgorithmKind::WeightedRoundRobin => Box::new(WeightedRoundRobin::new()),
        AlgorithmKind::IpHash => Box::new(IpHash::new()),
        AlgorithmKind::LeastResponseTime => Box::new(LeastResponseTime::new()),
    }
}

/// Round-robin over the pool order, skipping unselectable servers.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: Mutex<usize>,
}

impl RoundRobin {
    /// Create a new round-robin strategy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for RoundRobin {
    fn select<'a>(
        &self,
        servers: &'a [Arc<Server>],
        _context: &SelectionContext,
    ) -> BalancerResult<&'a Arc<Server>> {
        if servers.is_empty() {
            return Err(BalancerError::NoHealthyServer);
        }

        let mut cursor = self.cursor.lock().expect("cursor lock poisoned");
        let len = servers.len();

        for attempt in 0..len {
            let idx = (*cursor + attempt) % len;
            if servers[idx].can_accept() {
                *cursor = (idx + 1) % len;
                return Ok(&servers[idx]);
            }
        }

        Err(BalancerError::NoHealthyServer)
    }

    fn name(&self) -> &'static str {
        "round-robin"
    }
}

/// Fewest active connections; ties go to the earliest-registered server.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    /// Create a new least-connections strategy.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Strategy for LeastConnections {
    fn select<'a>(
        &self,
        servers: &'a [Arc<Server>],
        _context: &SelectionContext,
    ) -> BalancerResult<&'a Arc<Server>> {
        let mut best: Option<&'a Arc<Server>> = None;
        let mut min_connections = u32::MAX;

        for server in servers {
            if server.can_accept() {
                let connections = server.current_connections();
                if connections < min_connections {
                    min_connections = connections;
                    best = Some(server);
                }
            }
        }

        best.ok_or(BalancerError::NoHealthyServer)
    }

    fn name(&self) -> &'static str {
        "least-connections"
    }
}

#[derive(Debug, Default)]
struct WrrState {
    cursor: usize,
    current_weight: u32,
}

/// Weighted round-robin.
///
/// A server is eligible while its weight exceeds the instance's weight
/// counter; each selection advances the cursor and raises the counter, and a
/// full cycle without an eligible server resets the counter and retries
/// once. Higher-weight servers therefore stay eligible through more of each
/// counter cycle.
#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    state: Mutex<WrrState>,
}

impl WeightedRoundRobin {
    /// Create a new weighted round-robin strategy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for WeightedRoundRobin {
    fn select<'a>(
        &self,
        servers: &'a [Arc<Server>],
        _context: &SelectionContext,
    ) -> BalancerResult<&'a Arc<Server>> {
        if servers.is_empty() {
            return Err(BalancerError::NoHealthyServer);
        }

        let mut state = self.state.lock().expect("wrr lock poisoned");
        let len = servers.len();

        for _pass in 0..2 {
            for attempt in 0..len {
                let idx = (state.cursor + attempt) % len;
                let server = &servers[idx];

                if server.can_accept() && server.weight() > state.current_weight {
                    state.cursor = (idx + 1) % len;
                    state.current_weight += 1;
                    return Ok(server);
                }
            }

            if state.current_weight == 0 {
                // Nothing selectable at all; a reset would not change that.
                break;
            }
            state.current_weight = 0;
        }

        Err(BalancerError::NoHealthyServer)
    }

    fn name(&self) -> &'static str {
        "weighted-round-robin"
    }
}

/// Deterministic client-IP affinity.
///
/// Hashes the client IP onto a starting index and probes linearly for the
/// first selectable server, so a fixed selectable set always yields the
/// same server for the same client.
#[derive(Debug, Default)]
pub struct IpHash;

impl IpHash {
    /// Create a new IP-hash strategy.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn hash_ip(ip: IpAddr) -> u64 {
        let mut hasher = DefaultHasher::new();
        ip.hash(&mut hasher);
        hasher.finish()
    }
}

impl Strategy for IpHash {
    fn select<'a>(
        &self,
        servers: &'a [Arc<Server>],
        context: &SelectionContext,
    ) -> BalancerResult<&'a Arc<Server>> {
        if servers.is_empty() {
            return Err(BalancerError::NoHealthyServer);
        }

        let len = servers.len();
        let start = match context.client_ip {
            Some(ip) => (Self::hash_ip(ip) as usize) % len,
            // No client key: behave like a plain linear probe.
            None => 0,
        };

        for attempt in 0..len {
            let idx = (start + attempt) % len;
            if servers[idx].can_accept() {
                return Ok(&servers[idx]);
            }
        }

        Err(BalancerError::NoHealthyServer)
    }

    fn name(&self) -> &'static str {
        "ip-hash"
    }
}

/// Lowest response-time score, weight-discounted for active load.
#[derive(Debug, Default)]
pub struct LeastResponseTime;

impl LeastResponseTime {
    /// Create a new least-response-time strategy.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn score(server: &Server) -> u64 {
        let connections = u64::from(server.current_connections());
        let weight = u64::from(server.weight().max(1));
        server.response_time_ms() + connections * 10 / weight
    }
}

impl Strategy for LeastResponseTime {
    fn select<'a>(
        &self,
        servers: &'a [Arc<Server>],
        _context: &SelectionContext,
    ) -> BalancerResult<&'a Arc<Server>> {
        let mut best: Option<&'a Arc<Server>> = None;
        let mut min_score = u64::MAX;

        for server in servers {
            if server.can_accept() {
                let score = Self::score(server);
                if score < min_score {
                    min_score = score;
                    best = Some(server);
                }
            }
        }

        best.ok_or(BalancerError::NoHealthyServer)
    }

    fn name(&self) -> &'static str {
        "least-response-time"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::server::{ServerId, ServerStatus};

    fn make_servers(count: usize) -> Vec<Arc<Server>> {
        (0..count)
            .map(|i| {
                Arc::new(Server::new(
                    ServerId(i as u64),
                    format!("10.0.0.{}:8080", i + 1).parse().unwrap(),
                    1,
                    None,
                ))
            })
            .collect()
    }

    #[test]
    fn test_round_robin_visits_each_once() {
        let strategy = RoundRobin::new();
        let servers = make_servers(3);
        let ctx = SelectionContext::new();

        let mut order = Vec::new();
        for _ in 0..6 {
            let server = strategy.select(&servers, &ctx).unwrap();
            order.push(server.id().0);
        }

        assert_eq!(order, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_round_robin_skips_unhealthy() {
        let strategy = RoundRobin::new();
        let servers = make_servers(3);
        servers[1].set_status(ServerStatus::Unhealthy);
        let ctx = SelectionContext::new();

        let mut order = Vec::new();
        for _ in 0..4 {
            order.push(strategy.select(&servers, &ctx).unwrap().id().0);
        }
        assert_eq!(order, vec![0, 2, 0, 2]);
    }

    #[test]
    fn test_round_robin_terminates_when_exhausted() {
        let strategy = RoundRobin::new();
        let servers = make_servers(2);
        servers[0].set_status(ServerStatus::Unhealthy);
        servers[1].set_status(ServerStatus::Maintenance);

        let result = strategy.select(&servers, &SelectionContext::new());
        assert!(matches!(result, Err(BalancerError::NoHealthyServer)));
    }

    #[test]
    fn test_round_robin_empty_snapshot() {
        let strategy = RoundRobin::new();
        let result = strategy.select(&[], &SelectionContext::new());
        assert!(matches!(result, Err(BalancerError::NoHealthyServer)));
    }

    #[test]
    fn test_least_connections_picks_minimum() {
        let strategy = LeastConnections::new();
        let servers = make_servers(3);
        servers[0].record_selected();
        servers[0].record_selected();
        servers[1].record_selected();

        let selected = strategy.select(&servers, &SelectionContext::new()).unwrap();
        assert_eq!(selected.id(), ServerId(2));
    }

    #[test]
    fn test_least_connections_ties_first_seen() {
        let strategy = LeastConnections::new();
        let servers = make_servers(3);

        let selected = strategy.select(&servers, &SelectionContext::new()).unwrap();
        assert_eq!(selected.id(), ServerId(0));
    }

    #[test]
    fn test_least_connections_never_picks_full() {
        let strategy = LeastConnections::new();
        let full = Arc::new(Server::new(
            ServerId(0),
            "10.0.0.1:8080".parse().unwrap(),
            1,
            Some(5),
        ));
        let other = Arc::new(Server::new(
            ServerId(1),
            "10.0.0.2:8080".parse().unwrap(),
            1,
            Some(10),
        ));
        for _ in 0..5 {
            full.record_selected();
        }
        other.record_selected();
        other.record_selected();

        let servers = vec![full, other];
        for _ in 0..10 {
            let selected = strategy.select(&servers, &SelectionContext::new()).unwrap();
            assert_eq!(selected.id(), ServerId(1));
        }
    }

    #[test]
    fn test_weighted_round_robin_favors_weight() {
        let strategy = WeightedRoundRobin::new();
        let servers = make_servers(2);
        servers[0].set_weight(3);
        servers[1].set_weight(1);
        let ctx = SelectionContext::new();

        let mut counts = [0u32; 2];
        for _ in 0..40 {
            let server = strategy.select(&servers, &ctx).unwrap();
            counts[server.id().0 as usize] += 1;
        }

        assert!(counts[0] > counts[1] * 2, "counts: {counts:?}");
        assert!(counts[1] > 0, "low-weight server starved: {counts:?}");
    }

    #[test]
    fn test_weighted_round_robin_resets_after_empty_cycle() {
        let strategy = WeightedRoundRobin::new();
        let servers = make_servers(2);
        let ctx = SelectionContext::new();

        // Equal weights of one: every second call needs a counter reset,
        // and selection must still alternate without spinning.
        let mut order = Vec::new();
        for _ in 0..4 {
            order.push(strategy.select(&servers, &ctx).unwrap().id().0);
        }
        assert_eq!(order, vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_weighted_round_robin_all_unhealthy() {
        let strategy = WeightedRoundRobin::new();
        let servers = make_servers(2);
        servers[0].set_status(ServerStatus::Unhealthy);
        servers[1].set_status(ServerStatus::Unhealthy);

        let result = strategy.select(&servers, &SelectionContext::new());
        assert!(matches!(result, Err(BalancerError::NoHealthyServer)));
    }

    #[test]
    fn test_ip_hash_deterministic() {
        let strategy = IpHash::new();
        let servers = make_servers(5);
        let ctx = SelectionContext::new().with_client_ip("192.168.1.100".parse().unwrap());

        let first = strategy.select(&servers, &ctx).unwrap().id();
        for _ in 0..10 {
            assert_eq!(strategy.select(&servers, &ctx).unwrap().id(), first);
        }
    }

    #[test]
    fn test_ip_hash_probes_past_unhealthy() {
        let strategy = IpHash::new();
        let servers = make_servers(3);
        let ctx = SelectionContext::new().with_client_ip("10.1.2.3".parse().unwrap());

        let first = strategy.select(&servers, &ctx).unwrap().id();

        // Knock out the hashed server; the probe must land on another one,
        // still deterministically.
        servers[first.0 as usize].set_status(ServerStatus::Unhealthy);
        let second = strategy.select(&servers, &ctx).unwrap().id();
        assert_ne!(second, first);
        assert_eq!(strategy.select(&servers, &ctx).unwrap().id(), second);
    }

    #[test]
    fn test_ip_hash_without_client_ip() {
        let strategy = IpHash::new();
        let servers = make_servers(3);

        let selected = strategy.select(&servers, &SelectionContext::new()).unwrap();
        assert_eq!(selected.id(), ServerId(0));
    }

    #[test]
    fn test_least_response_time_scoring() {
        let strategy = LeastResponseTime::new();
        let servers = make_servers(2);

        // Server 0: 100ms average; server 1: 30ms with some load.
        servers[0].record_selected();
        servers[0].record_success(100);
        servers[1].record_selected();
        servers[1].record_success(30);
        servers[1].record_selected();
        servers[1].record_selected();

        // score(0) = 100, score(1) = 30 + 2 * 10 / 1 = 50.
        let selected = strategy.select(&servers, &SelectionContext::new()).unwrap();
        assert_eq!(selected.id(), ServerId(1));
    }

    #[test]
    fn test_least_response_time_weight_discount() {
        let strategy = LeastResponseTime::new();
        let servers = make_servers(2);
        servers[0].set_weight(10);

        for server in &servers {
            server.record_selected();
            server.record_success(20);
        }
        // Same response time; load both with 5 connections.
        for _ in 0..5 {
            servers[0].record_selected();
            servers[1].record_selected();
        }

        // score(0) = 20 + 50/10 = 25, score(1) = 20 + 50/1 = 70.
        let selected = strategy.select(&servers, &SelectionContext::new()).unwrap();
        assert_eq!(selected.id(), ServerId(0));
    }

    #[test]
    fn test_for_algorithm_names() {
        assert_eq!(for_algorithm(AlgorithmKind::RoundRobin).name(), "round-robin");
        assert_eq!(
            for_algorithm(AlgorithmKind::LeastConnections).name(),
            "least-connections"
        );
        assert_eq!(
            for_algorithm(AlgorithmKind::WeightedRoundRobin).name(),
            "weighted-round-robin"
        );
        assert_eq!(for_algorithm(AlgorithmKind::IpHash).name(), "ip-hash");
        assert_eq!(
            for_algorithm(AlgorithmKind::LeastResponseTime).name(),
            "least-response-time"
        );
    }
}
