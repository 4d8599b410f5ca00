pub mod aquifer;
#[cfg(test)]
mod tests;

pub use crate::aquifer::*;

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

pub use crate::aquifer::cluster::{Cluster, RouteHint};
pub use crate::aquifer::config::{
    load_config, ClusterSettings, Consistency, Endpoint, NodeRole, QueryKind, SslMode,
};
pub use crate::aquifer::pg::{
    Column, Conninfo, CopyResult, CursorChunk, ErrorKind, FromCell, FromRow, Listener,
    Notification, QueryResult, Session, SqlStateClass,
};
pub use crate::aquifer::pool::{
    ConnectionPool, IsolationLevel, PooledSession, Savepoint, Transaction, TxConfig,
};

/// Installs a stdout tracing subscriber. Applications embedding the
/// library will usually install their own instead.
pub fn init_tracing(max_level: Level) {
    let subscriber = FmtSubscriber::builder()
        // all spans/events with a level higher than TRACE (e.g, debug, info, warn, etc.)
        // will be written to stdout.
        .with_max_level(max_level)
        // completes the builder.
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");
}
