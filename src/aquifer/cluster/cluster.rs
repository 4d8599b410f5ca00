//! Topology-aware route selection.
//!
//! Writes, DDL, strong reads and read-my-writes go to the primary (with
//! failover); other reads go to the best replica that satisfies the hint's
//! staleness bounds, ordered by observed RTT with weight as tie-breaker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::aquifer::cluster::node::{CbState, Node};
use crate::aquifer::common::{Error, Result};
use crate::aquifer::config::{
    ClusterSettings, Consistency, NodeRole, QueryKind, StalenessSettings,
};
use crate::aquifer::pg::params::ToParams;
use crate::aquifer::pg::result::QueryResult;
use crate::aquifer::pool::{ConnectionPool, Transaction, TxConfig};

/// Everything route selection needs to know about one request.
#[derive(Debug, Clone, Copy)]
pub struct RouteHint {
    pub kind: QueryKind,
    pub consistency: Consistency,
    pub staleness: StalenessSettings,
    /// route to the primary so the caller sees its own recent writes
    pub read_my_writes: bool,
}

impl RouteHint {
    pub fn read() -> RouteHint {
        RouteHint {
            kind: QueryKind::Read,
            consistency: Consistency::Strong,
            staleness: StalenessSettings::default(),
            read_my_writes: false,
        }
    }

    pub fn write() -> RouteHint {
        RouteHint {
            kind: QueryKind::Write,
            ..RouteHint::read()
        }
    }

    pub fn ddl() -> RouteHint {
        RouteHint {
            kind: QueryKind::Ddl,
            ..RouteHint::read()
        }
    }

    pub fn long_read() -> RouteHint {
        RouteHint {
            kind: QueryKind::LongRead,
            consistency: Consistency::Eventual,
            ..RouteHint::read()
        }
    }

    pub fn with_consistency(mut self, consistency: Consistency) -> RouteHint {
        self.consistency = consistency;
        self
    }

    pub fn with_staleness(mut self, max_ms: u64, max_lsn: u64) -> RouteHint {
        self.consistency = Consistency::BoundedStaleness;
        self.staleness = StalenessSettings {
            max_staleness_ms: max_ms,
            max_lsn_lag: max_lsn,
        };
        self
    }
}

pub struct Cluster {
    settings: ClusterSettings,
    nodes: Vec<Arc<Node>>,
    /// epoch for the circuit breaker's millisecond clock
    started: Instant,
}

impl Cluster {
    pub fn new(mut settings: ClusterSettings) -> Result<Arc<Cluster>> {
        settings.load()?;
        let nodes = settings
            .nodes
            .iter()
            .map(|n| Arc::new(Node::new(n.clone(), settings.max_conns_for(n))))
            .collect();
        Ok(Arc::new(Cluster {
            settings,
            nodes,
            started: Instant::now(),
        }))
    }

    pub fn settings(&self) -> &ClusterSettings {
        &self.settings
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn node(&self, name: &str) -> Option<&Arc<Node>> {
        self.nodes.iter().find(|n| n.name() == name)
    }

    /// Milliseconds since the cluster was created; the circuit breaker
    /// clock.
    pub fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn connect_timeout(&self) -> Option<Duration> {
        match self.settings.timeouts.connect_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    fn node_pool(&self, node: &Arc<Node>) -> Option<Arc<ConnectionPool>> {
        node.pool_or_init(&self.settings.pool, self.connect_timeout())
    }

    /// Picks the pool for a request.
    pub fn route(&self, hint: &RouteHint) -> Result<Arc<ConnectionPool>> {
        let primary_bound = matches!(hint.kind, QueryKind::Write | QueryKind::Ddl)
            || hint.consistency == Consistency::Strong
            || hint.read_my_writes;
        let selected = if primary_bound {
            self.pick_primary()
        } else {
            self.pick_best_replica(hint)
        };
        match selected {
            Some(node) => self
                .node_pool(&node)
                .ok_or_else(|| Error::new(format!("node {} has no pool", node.name()))),
            None => Err(Error::new("no usable node for this request")),
        }
    }

    /// Primary-bound selection with failover: the configured order (else
    /// Primary -> SyncReplica -> AsyncReplica), filtered to usable, not
    /// circuit-broken, healthy nodes. Degrades to any usable primary
    /// ignoring health, then to any replica.
    pub(crate) fn pick_primary(&self) -> Option<Arc<Node>> {
        let candidates = self.failover_order();
        for node in &candidates {
            if node.usable() && node.cb_state() != CbState::Open && node.healthy() {
                return Some(Arc::clone(node));
            }
        }
        // desperate: a primary regardless of what the probes say
        if let Some(node) = self
            .nodes
            .iter()
            .find(|n| n.role() == NodeRole::Primary && n.usable())
        {
            warn!(node = node.name(), "falling back to unhealthy primary");
            return Some(Arc::clone(node));
        }
        self.nodes
            .iter()
            .find(|n| n.role().is_replica() && n.usable())
            .cloned()
    }

    fn failover_order(&self) -> Vec<Arc<Node>> {
        if !self.settings.primary_failover.is_empty() {
            return self
                .settings
                .primary_failover
                .iter()
                .filter_map(|name| self.node(name).cloned())
                .collect();
        }
        let mut order = Vec::with_capacity(self.nodes.len());
        for role in [
            NodeRole::Primary,
            NodeRole::SyncReplica,
            NodeRole::AsyncReplica,
        ] {
            order.extend(self.nodes.iter().filter(|n| n.role() == role).cloned());
        }
        order
    }

    /// Replica selection for relaxed-consistency reads: healthy, breaker
    /// not open, within the hint's staleness bounds; lowest RTT wins, then
    /// the heavier weight. Falls back to the primary, then anything usable.
    pub(crate) fn pick_best_replica(&self, hint: &RouteHint) -> Option<Arc<Node>> {
        let mut candidates: Vec<&Arc<Node>> = self
            .nodes
            .iter()
            .filter(|n| n.role().is_replica() && n.usable())
            .filter(|n| n.cb_state() != CbState::Open && n.healthy())
            .filter(|n| {
                if hint.consistency != Consistency::BoundedStaleness {
                    return true;
                }
                if n.replay_lag_ms() > hint.staleness.max_staleness_ms {
                    return false;
                }
                hint.staleness.max_lsn_lag == 0 || n.lsn_lag() <= hint.staleness.max_lsn_lag
            })
            .collect();
        candidates.sort_by(|a, b| {
            a.rtt_micros()
                .cmp(&b.rtt_micros())
                .then_with(|| b.weight().cmp(&a.weight()))
        });
        if let Some(node) = candidates.first() {
            return Some(Arc::clone(node));
        }
        if let Some(node) = self.pick_primary() {
            return Some(node);
        }
        self.nodes.iter().find(|n| n.usable()).cloned()
    }

    /// Selection for transactions. Serializable work always pins the
    /// primary; read-only deferrable transactions prefer the least-lagged
    /// sync replica (they take a consistent snapshot anyway).
    pub fn route_for_tx(&self, cfg: &TxConfig) -> Result<Arc<ConnectionPool>> {
        use crate::aquifer::pool::IsolationLevel;

        if cfg.read_only && cfg.deferrable {
            let best = self
                .nodes
                .iter()
                .filter(|n| n.role() == NodeRole::SyncReplica && n.usable())
                .filter(|n| n.cb_state() != CbState::Open && n.healthy())
                .min_by_key(|n| n.replay_lag_ms());
            if let Some(node) = best {
                let node = Arc::clone(node);
                return self
                    .node_pool(&node)
                    .ok_or_else(|| Error::new(format!("node {} has no pool", node.name())));
            }
            return self.route(&RouteHint::read().with_consistency(self.settings.default_consistency));
        }
        // serializable work always sees the primary's state
        if cfg.isolation == IsolationLevel::Serializable {
            return self.route(&RouteHint::read().with_consistency(Consistency::Strong));
        }
        if cfg.read_only {
            return self.route(&RouteHint::read().with_consistency(self.settings.default_consistency));
        }
        self.route(&RouteHint::write())
    }

    /// Applies the read-my-writes window: a read issued within
    /// `read_my_writes_ttl_ms` of the caller's last write sticks to the
    /// primary so the write is visible.
    pub fn hint_after_write(&self, mut hint: RouteHint, since_write: Duration) -> RouteHint {
        if (since_write.as_millis() as u64) < self.settings.read_my_writes_ttl_ms {
            hint.read_my_writes = true;
        }
        hint
    }

    /// The named node's pool, only while it is routable: usable role,
    /// breaker not open, healthy.
    pub fn pin(&self, name: &str) -> Option<Arc<ConnectionPool>> {
        let node = self.node(name)?;
        if !node.usable() || node.cb_state() == CbState::Open || !node.healthy() {
            return None;
        }
        self.node_pool(node)
    }

    /// Routes and runs one parameterised query.
    pub async fn query(
        &self,
        hint: &RouteHint,
        sql: &str,
        params: &impl ToParams,
    ) -> QueryResult {
        let pool = match self.route(hint) {
            Ok(p) => p,
            Err(e) => {
                return QueryResult::new_error(
                    crate::aquifer::pg::result::ErrorKind::ConnectionClosed,
                    e.to_string(),
                )
            }
        };
        pool.query(sql, params).await
    }

    /// Routes and begins a transaction.
    pub async fn begin(&self, cfg: TxConfig) -> std::result::Result<Transaction, QueryResult> {
        let pool = match self.route_for_tx(&cfg) {
            Ok(p) => p,
            Err(e) => {
                return Err(QueryResult::new_error(
                    crate::aquifer::pg::result::ErrorKind::ConnectionClosed,
                    e.to_string(),
                ))
            }
        };
        Transaction::begin(pool, cfg).await
    }
}
