//! The health probe loop: one coroutine per cluster, probing every node
//! each interval. Probes acquire and release sessions like any client, so
//! they also exercise the pool's recycle path.

use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::aquifer::cluster::cluster::Cluster;
use crate::aquifer::cluster::node::Node;
use crate::aquifer::config::NodeRole;
use crate::aquifer::pg::result::is_fatal_connection_error;

impl Cluster {
    /// Probes every node forever, every `health.interval_ms`. Spawn this on
    /// the runtime once per cluster; the node table has a single writer by
    /// construction.
    pub async fn run_health_loop(self: Arc<Self>) {
        let period = Duration::from_millis(self.settings().health.interval_ms.max(10));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.probe_all().await;
        }
    }

    /// One probing sweep over all nodes.
    pub async fn probe_all(&self) {
        for node in self.nodes() {
            let node = Arc::clone(node);
            self.probe_node(&node).await;
        }
    }

    async fn probe_node(&self, node: &Arc<Node>) {
        let health = &self.settings().health;
        let now = self.now_ms();

        let pool = match node.pool_or_init(
            &self.settings().pool,
            match self.settings().timeouts.connect_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
        ) {
            Some(p) => p,
            None => {
                node.stats.healthy.store(false, Relaxed);
                node.cb_on_fail(now, health);
                return;
            }
        };

        let mut pooled = match pool.acquire().await {
            Ok(p) => p,
            Err(e) => {
                warn!(node = node.name(), %e, "health probe could not connect");
                node.stats.healthy.store(false, Relaxed);
                node.cb_on_fail(now, health);
                return;
            }
        };

        // liveness
        let qr = pooled.session().exec_simple_query("SELECT 1").await;
        if !qr.ok {
            warn!(node = node.name(), error = qr.error.as_str(), "health probe failed");
            pooled.surrender(is_fatal_connection_error(&qr));
            node.stats.healthy.store(false, Relaxed);
            node.cb_on_fail(now, health);
            return;
        }

        // round-trip time
        let started = Instant::now();
        let qr = pooled.session().exec_simple_query(&health.rtt_probe_sql).await;
        if !qr.ok {
            pooled.surrender(is_fatal_connection_error(&qr));
            node.stats.healthy.store(false, Relaxed);
            node.cb_on_fail(now, health);
            return;
        }
        let rtt = started.elapsed().as_micros() as u64;
        node.stats.rtt_micros.store(rtt, Relaxed);

        // replication lag
        let qr = pooled.session().exec_simple_query(&health.lag_probe_sql).await;
        let (lag_ms, lsn_lag) = if qr.ok {
            let first = qr.rows.first();
            let cell = |i: usize| -> u64 {
                first
                    .and_then(|row| row.get(i))
                    .and_then(|c| c.as_deref())
                    .and_then(|s| s.parse::<i64>().ok())
                    .map(|v| v.max(0) as u64)
                    .unwrap_or(0)
            };
            (cell(0), cell(1))
        } else {
            pooled.surrender(is_fatal_connection_error(&qr));
            node.stats.healthy.store(false, Relaxed);
            node.cb_on_fail(now, health);
            return;
        };
        node.stats.replay_lag_ms.store(lag_ms, Relaxed);
        node.stats.lsn_lag.store(lsn_lag, Relaxed);
        pooled.surrender(false);

        // a primary reporting replay lag is replaying WAL, i.e. not actually
        // the primary we think it is
        let lagging = lag_ms > health.lag_threshold_ms
            || (node.role() == NodeRole::Primary && lag_ms > 0);
        node.stats.healthy.store(!lagging, Relaxed);
        node.cb_on_ok(now);
        debug!(
            node = node.name(),
            healthy = !lagging,
            rtt_micros = rtt,
            lag_ms,
            lsn_lag,
            "health probe"
        );
    }
}
