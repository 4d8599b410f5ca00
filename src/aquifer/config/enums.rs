use serde::Deserialize;
use strum::{Display, EnumString};

/// TLS preference for backend connections, libpq `sslmode` vocabulary.
#[derive(Deserialize, Display, EnumString, Copy, Clone, Eq, PartialEq, Debug)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab_case")]
pub enum SslMode {
    Disable,
    Allow,
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    /// True if the client should send an SSLRequest at all.
    pub fn wants_tls(&self) -> bool {
        !matches!(self, SslMode::Disable)
    }

    /// True if a plaintext fallback is an error.
    pub fn requires_tls(&self) -> bool {
        matches!(self, SslMode::Require | SslMode::VerifyCa | SslMode::VerifyFull)
    }
}

impl Default for SslMode {
    fn default() -> Self {
        SslMode::Prefer
    }
}

/// Role a node plays in the topology. Archive and Maintenance nodes are
/// never routable.
#[derive(Deserialize, Display, EnumString, Copy, Clone, Eq, PartialEq, Debug)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Primary,
    SyncReplica,
    AsyncReplica,
    Analytics,
    Archive,
    Maintenance,
}

impl NodeRole {
    pub fn is_replica(&self) -> bool {
        matches!(
            self,
            NodeRole::SyncReplica | NodeRole::AsyncReplica | NodeRole::Analytics
        )
    }

    /// Usable for query routing at all.
    pub fn is_routable(&self) -> bool {
        !matches!(self, NodeRole::Archive | NodeRole::Maintenance)
    }
}

/// Read-consistency requirement attached to a routing hint.
#[derive(Deserialize, Display, Copy, Clone, Eq, PartialEq, Debug)]
#[serde(rename_all = "snake_case")]
pub enum Consistency {
    Strong,
    BoundedStaleness,
    Eventual,
}

impl Default for Consistency {
    fn default() -> Self {
        Consistency::Strong
    }
}

/// Kind of statement being routed.
#[derive(Display, Copy, Clone, Eq, PartialEq, Debug)]
pub enum QueryKind {
    Read,
    Write,
    Ddl,
    LongRead,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_sslmode_strings() {
        assert_eq!(SslMode::from_str("verify-full").unwrap(), SslMode::VerifyFull);
        assert_eq!(SslMode::from_str("disable").unwrap(), SslMode::Disable);
        assert_eq!(SslMode::VerifyCa.to_string(), "verify-ca");
        assert!(SslMode::from_str("bogus").is_err());
    }

    #[test]
    fn test_role_predicates() {
        assert!(NodeRole::SyncReplica.is_replica());
        assert!(NodeRole::Analytics.is_replica());
        assert!(!NodeRole::Primary.is_replica());
        assert!(!NodeRole::Archive.is_routable());
        assert!(!NodeRole::Maintenance.is_routable());
        assert!(NodeRole::Primary.is_routable());
    }
}
