mod enums;
mod settings;

pub use self::enums::{Consistency, NodeRole, QueryKind, SslMode};
pub use self::settings::{
    load_config, ClusterSettings, Endpoint, HealthSettings, KeepaliveSettings, NodeSettings,
    PoolSettings, StalenessSettings, TimeoutSettings,
};
