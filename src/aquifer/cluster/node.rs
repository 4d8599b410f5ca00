//! One topology node: endpoint + role + lazily created pool + the health
//! and circuit-breaker state observed by the probe loop.

use std::sync::atomic::Ordering::Relaxed;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::info;

use crate::aquifer::config::{HealthSettings, NodeRole, NodeSettings, PoolSettings};
use crate::aquifer::pool::ConnectionPool;

/// Per-node circuit breaker state. Closed admits traffic, Open blocks it,
/// HalfOpen admits probes so one success can close the breaker again.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum CbState {
    Closed = 0,
    HalfOpen = 1,
    Open = 2,
}

impl CbState {
    fn from_u8(v: u8) -> CbState {
        match v {
            0 => CbState::Closed,
            1 => CbState::HalfOpen,
            _ => CbState::Open,
        }
    }
}

/// Last observed statistics, written by the health loop (single writer)
/// and read by route selection on any thread.
#[derive(Debug, Default)]
pub struct NodeStats {
    pub healthy: AtomicBool,
    pub rtt_micros: AtomicU64,
    pub replay_lag_ms: AtomicU64,
    pub lsn_lag: AtomicU64,
}

pub struct Node {
    settings: NodeSettings,
    max_conns: u32,
    pool: Mutex<Option<Arc<ConnectionPool>>>,
    cb_state: AtomicU8,
    /// deadline for the current breaker state, in cluster-clock millis
    cb_until_ms: AtomicU64,
    pub stats: NodeStats,
}

impl Node {
    pub fn new(settings: NodeSettings, max_conns: u32) -> Node {
        Node {
            settings,
            max_conns,
            pool: Mutex::new(None),
            cb_state: AtomicU8::new(CbState::Closed as u8),
            cb_until_ms: AtomicU64::new(0),
            stats: NodeStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn role(&self) -> NodeRole {
        self.settings.role
    }

    pub fn weight(&self) -> u32 {
        self.settings.weight
    }

    pub fn settings(&self) -> &NodeSettings {
        &self.settings
    }

    /// Usable for routing at all (role-wise).
    pub fn usable(&self) -> bool {
        self.settings.role.is_routable()
    }

    pub fn healthy(&self) -> bool {
        self.stats.healthy.load(Relaxed)
    }

    pub fn rtt_micros(&self) -> u64 {
        self.stats.rtt_micros.load(Relaxed)
    }

    pub fn replay_lag_ms(&self) -> u64 {
        self.stats.replay_lag_ms.load(Relaxed)
    }

    pub fn lsn_lag(&self) -> u64 {
        self.stats.lsn_lag.load(Relaxed)
    }

    /// The node's pool, if it has been materialised.
    pub fn pool(&self) -> Option<Arc<ConnectionPool>> {
        self.pool.lock().ok().and_then(|p| p.clone())
    }

    /// The node's pool, materialising it on first use.
    pub fn pool_or_init(
        &self,
        base: &PoolSettings,
        connect_timeout: Option<Duration>,
    ) -> Option<Arc<ConnectionPool>> {
        let mut guard = self.pool.lock().ok()?;
        if guard.is_none() {
            let mut settings = base.clone();
            settings.max_pool = self.max_conns;
            info!(node = self.name(), max_pool = self.max_conns, "creating node pool");
            *guard = Some(ConnectionPool::new(
                self.settings.endpoint.clone(),
                settings,
                connect_timeout,
            ));
        }
        guard.clone()
    }

    // ===== circuit breaker =====

    pub fn cb_state(&self) -> CbState {
        CbState::from_u8(self.cb_state.load(Relaxed))
    }

    pub fn cb_until_ms(&self) -> u64 {
        self.cb_until_ms.load(Relaxed)
    }

    fn set_cb(&self, state: CbState, until_ms: u64) {
        self.cb_state.store(state as u8, Relaxed);
        self.cb_until_ms.store(until_ms, Relaxed);
    }

    /// A probe succeeded. HalfOpen closes once its deadline passed; Open
    /// relaxes to HalfOpen once its quiet period is over.
    pub fn cb_on_ok(&self, now_ms: u64) {
        match self.cb_state() {
            CbState::Closed => {}
            CbState::HalfOpen => {
                if now_ms >= self.cb_until_ms() {
                    self.set_cb(CbState::Closed, 0);
                }
            }
            CbState::Open => {
                if now_ms >= self.cb_until_ms() {
                    self.set_cb(CbState::HalfOpen, now_ms);
                }
            }
        }
    }

    /// A probe failed. Closed trips Open for the quiet period; HalfOpen
    /// re-opens with backoff; Open extends its deadline up to the ceiling.
    pub fn cb_on_fail(&self, now_ms: u64, health: &HealthSettings) {
        match self.cb_state() {
            CbState::Closed => self.set_cb(CbState::Open, now_ms + health.cb_quiet_ms),
            CbState::HalfOpen => self.set_cb(CbState::Open, now_ms + health.cb_backoff_ms),
            CbState::Open => self.set_cb(CbState::Open, now_ms + health.cb_max_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aquifer::config::{Endpoint, KeepaliveSettings, SslMode};

    fn node(role: NodeRole) -> Node {
        let settings = NodeSettings {
            name: "n1".to_string(),
            role,
            weight: 100,
            max_conns: None,
            endpoint: Endpoint {
                host: "127.0.0.1".to_string(),
                port: 5432,
                user: "app".to_string(),
                dbname: "app".to_string(),
                password: String::new(),
                sslmode: SslMode::Disable,
                sslrootcert: String::new(),
                sslcert: String::new(),
                sslkey: String::new(),
                sslcrl: String::new(),
                server_hostname: String::new(),
                keepalive: KeepaliveSettings::default(),
            },
        };
        Node::new(settings, 8)
    }

    fn health() -> HealthSettings {
        let mut h = HealthSettings::default();
        h.cb_quiet_ms = 100;
        h.cb_backoff_ms = 200;
        h.cb_max_ms = 400;
        h
    }

    #[test]
    fn test_cb_transitions() {
        let n = node(NodeRole::AsyncReplica);
        let h = health();
        assert_eq!(n.cb_state(), CbState::Closed);

        // Closed -> Open on first failure
        n.cb_on_fail(1000, &h);
        assert_eq!(n.cb_state(), CbState::Open);
        assert_eq!(n.cb_until_ms(), 1100);

        // stays Open before the quiet period even on success
        n.cb_on_ok(1050);
        assert_eq!(n.cb_state(), CbState::Open);

        // Open -> HalfOpen after cb_quiet_ms
        n.cb_on_ok(1100);
        assert_eq!(n.cb_state(), CbState::HalfOpen);

        // HalfOpen -> Closed on one ok past the deadline
        n.cb_on_ok(1101);
        assert_eq!(n.cb_state(), CbState::Closed);
    }

    #[test]
    fn test_cb_halfopen_failure_backoff() {
        let n = node(NodeRole::AsyncReplica);
        let h = health();
        n.cb_on_fail(0, &h);
        n.cb_on_ok(100); // -> HalfOpen
        n.cb_on_fail(150, &h); // -> Open with backoff
        assert_eq!(n.cb_state(), CbState::Open);
        assert_eq!(n.cb_until_ms(), 350);

        // further failures extend by the ceiling
        n.cb_on_fail(200, &h);
        assert_eq!(n.cb_state(), CbState::Open);
        assert_eq!(n.cb_until_ms(), 600);
    }

    #[test]
    fn test_pool_materialised_once() {
        let n = node(NodeRole::Primary);
        assert!(n.pool().is_none());
        let base = PoolSettings::default();
        let p1 = n.pool_or_init(&base, None).unwrap();
        let p2 = n.pool_or_init(&base, None).unwrap();
        assert!(Arc::ptr_eq(&p1, &p2));
        assert_eq!(p1.max_pool(), 8);
    }
}
