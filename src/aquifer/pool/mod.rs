mod isolation;
pub(crate) mod pool;
mod transaction;

pub use self::isolation::{IsolationLevel, TxConfig};
pub use self::pool::{ConnectionPool, PooledSession, PoolStats};
pub use self::transaction::{Savepoint, Transaction};
