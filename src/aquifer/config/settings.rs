use std::fs::File;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::aquifer::common::{Error, Result};
use crate::aquifer::config::enums::{Consistency, NodeRole, SslMode};

/// One PostgreSQL endpoint: where to connect and how.
#[derive(Deserialize, Debug, Clone)]
pub struct Endpoint {
    /// host to connect to, defaults to localhost
    #[serde(default = "default_host")]
    pub host: String,
    /// port to connect to, defaults to 5432
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    /// database to connect to; defaults to the user name
    #[serde(default)]
    pub dbname: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub sslmode: SslMode,
    /// CA bundle for verify-ca/verify-full; empty uses the webpki roots
    #[serde(default)]
    pub sslrootcert: String,
    /// client certificate + key (PEM), both or neither
    #[serde(default)]
    pub sslcert: String,
    #[serde(default)]
    pub sslkey: String,
    #[serde(default)]
    pub sslcrl: String,
    /// hostname to verify the server certificate against when connecting
    /// by IP address
    #[serde(default)]
    pub server_hostname: String,
    #[serde(default)]
    pub keepalive: KeepaliveSettings,
}

fn default_host() -> String {
    "localhost".to_string()
}
const fn default_port() -> u16 {
    5432
}

impl Endpoint {
    pub(crate) fn load(&mut self) -> Result<()> {
        if self.user.is_empty() {
            return Err(Error::new("endpoint user cannot be empty"));
        }
        if self.dbname.is_empty() {
            self.dbname = self.user.clone();
        }
        if self.sslcert.is_empty() != self.sslkey.is_empty() {
            return Err(Error::new("sslcert and sslkey must be set together"));
        }
        Ok(())
    }
}

/// TCP keepalive tuning. When disabled no keepalive options are set and
/// the OS defaults stay in effect.
#[derive(Deserialize, Debug, Clone)]
pub struct KeepaliveSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// seconds of idle before the first probe
    #[serde(default = "default_keepalive_idle")]
    pub idle_seconds: u32,
    /// seconds between probes
    #[serde(default = "default_keepalive_interval")]
    pub interval_seconds: u32,
    /// probes before the connection is dropped
    #[serde(default = "default_keepalive_count")]
    pub count: u32,
}

const fn default_true() -> bool {
    true
}
const fn default_keepalive_idle() -> u32 {
    60
}
const fn default_keepalive_interval() -> u32 {
    10
}
const fn default_keepalive_count() -> u32 {
    5
}

impl Default for KeepaliveSettings {
    fn default() -> Self {
        KeepaliveSettings {
            enabled: true,
            idle_seconds: default_keepalive_idle(),
            interval_seconds: default_keepalive_interval(),
            count: default_keepalive_count(),
        }
    }
}

/// Per-pool tuning.
#[derive(Deserialize, Debug, Clone)]
pub struct PoolSettings {
    /// hard cap on live sessions per pool
    #[serde(default = "default_max_pool")]
    pub max_pool: u32,
    /// connect attempts before acquire gives up
    #[serde(default = "default_connect_retries")]
    pub retries_on_connection_failed: u32,
    /// user-space receive buffer size per session
    #[serde(default = "default_recv_buffer_size")]
    pub recv_buffer_size: u32,
}

const fn default_max_pool() -> u32 {
    16
}
const fn default_connect_retries() -> u32 {
    3
}
const fn default_recv_buffer_size() -> u32 {
    32 * 1024
}

impl Default for PoolSettings {
    fn default() -> Self {
        PoolSettings {
            max_pool: default_max_pool(),
            retries_on_connection_failed: default_connect_retries(),
            recv_buffer_size: default_recv_buffer_size(),
        }
    }
}

/// One node of the routed topology.
#[derive(Deserialize, Debug, Clone)]
pub struct NodeSettings {
    pub name: String,
    pub role: NodeRole,
    /// tie-breaker between equally attractive replicas, higher wins
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// overrides the cluster-level pool cap for this node
    #[serde(default)]
    pub max_conns: Option<u32>,
    #[serde(flatten)]
    pub endpoint: Endpoint,
}

const fn default_weight() -> u32 {
    100
}

/// Health probing and circuit breaker tuning.
#[derive(Deserialize, Debug, Clone)]
pub struct HealthSettings {
    #[serde(default = "default_health_interval_ms")]
    pub interval_ms: u64,
    /// replicas lagging more than this are unhealthy
    #[serde(default = "default_lag_threshold_ms")]
    pub lag_threshold_ms: u64,
    #[serde(default = "default_rtt_probe_sql")]
    pub rtt_probe_sql: String,
    #[serde(default = "default_lag_probe_sql")]
    pub lag_probe_sql: String,
    /// Open -> HalfOpen after this quiet period
    #[serde(default = "default_cb_quiet_ms")]
    pub cb_quiet_ms: u64,
    /// HalfOpen -> Open backoff
    #[serde(default = "default_cb_backoff_ms")]
    pub cb_backoff_ms: u64,
    /// ceiling used to extend an already Open breaker
    #[serde(default = "default_cb_max_ms")]
    pub cb_max_ms: u64,
}

const fn default_health_interval_ms() -> u64 {
    1000
}
const fn default_lag_threshold_ms() -> u64 {
    15_000
}
fn default_rtt_probe_sql() -> String {
    "SELECT 1".to_string()
}
fn default_lag_probe_sql() -> String {
    // lag in milliseconds and bytes of unreplayed WAL; both zero on a primary
    "SELECT COALESCE((EXTRACT(EPOCH FROM (now() - pg_last_xact_replay_timestamp())) * 1000)::bigint, 0), \
     COALESCE(pg_wal_lsn_diff(pg_last_wal_receive_lsn(), pg_last_wal_replay_lsn())::bigint, 0)"
        .to_string()
}
const fn default_cb_quiet_ms() -> u64 {
    5_000
}
const fn default_cb_backoff_ms() -> u64 {
    10_000
}
const fn default_cb_max_ms() -> u64 {
    60_000
}

impl Default for HealthSettings {
    fn default() -> Self {
        HealthSettings {
            interval_ms: default_health_interval_ms(),
            lag_threshold_ms: default_lag_threshold_ms(),
            rtt_probe_sql: default_rtt_probe_sql(),
            lag_probe_sql: default_lag_probe_sql(),
            cb_quiet_ms: default_cb_quiet_ms(),
            cb_backoff_ms: default_cb_backoff_ms(),
            cb_max_ms: default_cb_max_ms(),
        }
    }
}

/// Default staleness bounds applied when a hint doesn't carry its own.
#[derive(Deserialize, Debug, Clone, Copy)]
pub struct StalenessSettings {
    #[serde(default = "default_max_staleness_ms")]
    pub max_staleness_ms: u64,
    /// 0 disables the LSN bound
    #[serde(default)]
    pub max_lsn_lag: u64,
}

const fn default_max_staleness_ms() -> u64 {
    5_000
}

impl Default for StalenessSettings {
    fn default() -> Self {
        StalenessSettings {
            max_staleness_ms: default_max_staleness_ms(),
            max_lsn_lag: 0,
        }
    }
}

/// Connection-level timeouts.
#[derive(Deserialize, Debug, Clone, Copy)]
pub struct TimeoutSettings {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_ms: u64,
    #[serde(default = "default_io_timeout_ms")]
    pub read_ms: u64,
    #[serde(default = "default_io_timeout_ms")]
    pub write_ms: u64,
}

const fn default_connect_timeout_ms() -> u64 {
    5_000
}
const fn default_io_timeout_ms() -> u64 {
    30_000
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        TimeoutSettings {
            connect_ms: default_connect_timeout_ms(),
            read_ms: default_io_timeout_ms(),
            write_ms: default_io_timeout_ms(),
        }
    }
}

/// Root of the routed-cluster configuration.
#[derive(Deserialize, Debug, Clone)]
pub struct ClusterSettings {
    pub nodes: Vec<NodeSettings>,
    /// explicit failover order for primary-bound work; empty derives
    /// Primary -> SyncReplica -> AsyncReplica
    #[serde(default)]
    pub primary_failover: Vec<String>,
    #[serde(default)]
    pub default_consistency: Consistency,
    #[serde(default)]
    pub staleness: StalenessSettings,
    /// how long after a write reads stick to the primary
    #[serde(default = "default_read_my_writes_ttl_ms")]
    pub read_my_writes_ttl_ms: u64,
    #[serde(default = "default_default_max_conns")]
    pub default_max_conns: u32,
    #[serde(default = "default_analytics_max_conns")]
    pub analytics_max_conns: u32,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub health: HealthSettings,
    #[serde(default)]
    pub pool: PoolSettings,
}

const fn default_read_my_writes_ttl_ms() -> u64 {
    3_000
}
const fn default_default_max_conns() -> u32 {
    16
}
const fn default_analytics_max_conns() -> u32 {
    4
}

impl ClusterSettings {
    pub fn load(&mut self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::new("cluster has no nodes"));
        }
        for node in &mut self.nodes {
            if node.name.is_empty() {
                return Err(Error::new("node name cannot be empty"));
            }
            node.endpoint.load()?;
        }
        for name in &self.primary_failover {
            if !self.nodes.iter().any(|n| &n.name == name) {
                return Err(Error::new(format!(
                    "primary_failover names unknown node {:?}",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Pool cap for a node: node override, else the role-based default.
    pub fn max_conns_for(&self, node: &NodeSettings) -> u32 {
        node.max_conns.unwrap_or(match node.role {
            NodeRole::Analytics => self.analytics_max_conns,
            _ => self.default_max_conns,
        })
    }
}

/// Load the cluster configuration from a YAML file.
pub fn load_config(path: impl AsRef<Path>) -> Result<ClusterSettings> {
    let path = path.as_ref();
    info!(config_path = %path.to_string_lossy(), "loading config file");
    let file = File::open(path)?;
    let mut settings: ClusterSettings = serde_yaml::from_reader(file)?;
    settings.load()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r#"
nodes:
  - name: pg1
    role: primary
    host: db1.example.com
    user: app
  - name: pg2
    role: sync_replica
    host: db2.example.com
    user: app
    max_conns: 8
  - name: olap
    role: analytics
    host: db3.example.com
    user: app
primary_failover: [pg1, pg2]
"#
    }

    #[test]
    fn test_parse_minimal() {
        let mut settings: ClusterSettings = serde_yaml::from_str(minimal_yaml()).unwrap();
        settings.load().unwrap();
        assert_eq!(settings.nodes.len(), 3);
        assert_eq!(settings.nodes[0].role, NodeRole::Primary);
        assert_eq!(settings.nodes[0].endpoint.port, 5432);
        // dbname defaults to the user
        assert_eq!(settings.nodes[0].endpoint.dbname, "app");
        assert_eq!(settings.nodes[1].max_conns, Some(8));
        assert_eq!(settings.max_conns_for(&settings.nodes[0].clone()), 16);
        assert_eq!(settings.max_conns_for(&settings.nodes[1].clone()), 8);
        // analytics default cap
        assert_eq!(settings.max_conns_for(&settings.nodes[2].clone()), 4);
        assert_eq!(settings.health.interval_ms, 1000);
    }

    #[test]
    fn test_unknown_failover_name_rejected() {
        let yaml = r#"
nodes:
  - name: pg1
    role: primary
    user: app
primary_failover: [nope]
"#;
        let mut settings: ClusterSettings = serde_yaml::from_str(yaml).unwrap();
        assert!(settings.load().is_err());
    }
}
