//! Scoped transactions over pool-borrowed sessions.
//!
//! A `Transaction` binds one session to a BEGIN/COMMIT/ROLLBACK lifetime.
//! Read-only non-deferrable transactions may run in autocommit emulation:
//! no BEGIN is sent, every statement autocommits, and commit/rollback just
//! release the session. Savepoints borrow the parent transaction, so they
//! can never outlive it.

use std::sync::Arc;

use tracing::debug;

use crate::aquifer::pg::params::ToParams;
use crate::aquifer::pg::result::{is_fatal_connection_error, ErrorKind, QueryResult};
use crate::aquifer::pg::session::Session;
use crate::aquifer::pool::isolation::TxConfig;
use crate::aquifer::pool::pool::ConnectionPool;

pub struct Transaction {
    pool: Arc<ConnectionPool>,
    session: Option<Box<Session>>,
    config: TxConfig,
    active: bool,
    committed: bool,
    rolled_back: bool,
    /// read-only autocommit emulation is in effect (no BEGIN was sent)
    autocommit: bool,
}

impl Transaction {
    /// Acquires a session and opens the transaction. A connect failure
    /// surfaces as ConnectionClosed; a failed BEGIN wrecks the session.
    pub async fn begin(
        pool: Arc<ConnectionPool>,
        config: TxConfig,
    ) -> std::result::Result<Transaction, QueryResult> {
        let pooled = match pool.acquire().await {
            Ok(p) => p,
            Err(e) => return Err(ConnectionPool::acquire_error(e)),
        };
        let mut session = pooled.detach();

        let autocommit = config.read_only && !config.deferrable && config.allow_readonly_autocommit;
        if !autocommit {
            let qr = session.exec_simple_query(&config.begin_sql()).await;
            if !qr.ok {
                if is_fatal_connection_error(&qr) {
                    pool.mark_dead(session);
                } else {
                    pool.release_async(session);
                }
                return Err(qr);
            }
        }

        Ok(Transaction {
            pool,
            session: Some(session),
            config,
            active: true,
            committed: false,
            rolled_back: false,
            autocommit,
        })
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn is_rolled_back(&self) -> bool {
        self.rolled_back
    }

    pub fn config(&self) -> &TxConfig {
        &self.config
    }

    /// Runs a parameterised statement inside the transaction.
    pub async fn query(&mut self, sql: &str, params: &impl ToParams) -> QueryResult {
        match self.statement_guard() {
            Ok(()) => {}
            Err(qr) => return qr,
        }
        let qr = self
            .session
            .as_mut()
            .expect("guard ensured session")
            .exec_param_query(sql, params)
            .await;
        self.observe(&qr);
        qr
    }

    /// Runs a simple statement inside the transaction.
    pub async fn exec(&mut self, sql: &str) -> QueryResult {
        match self.statement_guard() {
            Ok(()) => {}
            Err(qr) => return qr,
        }
        let qr = self
            .session
            .as_mut()
            .expect("guard ensured session")
            .exec_simple_query(sql)
            .await;
        self.observe(&qr);
        qr
    }

    /// Commits and surrenders the session. In autocommit emulation this is
    /// a pure release.
    pub async fn commit(&mut self) -> QueryResult {
        self.terminate("COMMIT", true).await
    }

    /// Rolls back and surrenders the session.
    pub async fn rollback(&mut self) -> QueryResult {
        self.terminate("ROLLBACK", false).await
    }

    /// Aborts (synonym of rollback on the wire) and surrenders the session.
    pub async fn abort(&mut self) -> QueryResult {
        self.terminate("ABORT", false).await
    }

    /// Rolls back if still active, otherwise just releases the session.
    pub async fn finish(&mut self) -> QueryResult {
        if self.active {
            self.rollback().await
        } else {
            self.release_if_held();
            QueryResult::new_ok()
        }
    }

    /// Opens a savepoint sub-transaction. Not available in autocommit
    /// emulation, where there is no enclosing transaction to nest into.
    pub async fn savepoint(&mut self) -> std::result::Result<Savepoint<'_>, QueryResult> {
        if !self.active {
            return Err(QueryResult::new_error(
                ErrorKind::InvalidFuture,
                "transaction is not active",
            ));
        }
        if self.autocommit {
            return Err(QueryResult::new_error(
                ErrorKind::InvalidFuture,
                "savepoints are not available in read-only autocommit mode",
            ));
        }
        let name = self.pool.next_savepoint_name();
        let qr = self.exec(&format!("SAVEPOINT {}", name)).await;
        if !qr.ok {
            return Err(qr);
        }
        Ok(Savepoint {
            tx: self,
            name,
            active: true,
            committed: false,
            rolled_back: false,
        })
    }

    fn statement_guard(&mut self) -> std::result::Result<(), QueryResult> {
        if !self.active {
            return Err(QueryResult::new_error(
                ErrorKind::InvalidFuture,
                "transaction is not active",
            ));
        }
        let connected = self
            .session
            .as_ref()
            .map(|s| s.connected())
            .unwrap_or(false);
        if !connected {
            // the connection died between statements: the transaction is gone
            self.fail_fatal();
            return Err(QueryResult::new_error(
                ErrorKind::ConnectionClosed,
                "connection lost during transaction",
            ));
        }
        Ok(())
    }

    /// Reacts to a statement result: fatal connection errors terminate the
    /// transaction and reap the session.
    fn observe(&mut self, qr: &QueryResult) {
        if is_fatal_connection_error(qr) {
            self.fail_fatal();
        }
    }

    pub(crate) fn fail_fatal(&mut self) {
        self.active = false;
        self.rolled_back = true;
        if let Some(session) = self.session.take() {
            self.pool.mark_dead(session);
        }
    }

    async fn terminate(&mut self, sql: &str, committing: bool) -> QueryResult {
        if !self.active {
            return QueryResult::new_error(ErrorKind::InvalidFuture, "transaction is not active");
        }
        self.active = false;

        if self.autocommit {
            // nothing was begun: terminating is just a release
            if committing {
                self.committed = true;
            } else {
                self.rolled_back = true;
            }
            self.release_if_held();
            return QueryResult::new_ok();
        }

        let mut session = match self.session.take() {
            Some(s) => s,
            None => {
                return QueryResult::new_error(ErrorKind::ConnectionClosed, "session already gone")
            }
        };
        if !session.connected() {
            self.rolled_back = true;
            self.pool.mark_dead(session);
            return QueryResult::new_error(
                ErrorKind::ConnectionClosed,
                "connection lost during transaction",
            );
        }

        let qr = session.exec_simple_query(sql).await;
        if qr.ok {
            if committing {
                self.committed = true;
            } else {
                self.rolled_back = true;
            }
            self.pool.release_async(session);
        } else {
            self.rolled_back = true;
            if is_fatal_connection_error(&qr) {
                self.pool.mark_dead(session);
            } else {
                self.pool.release_async(session);
            }
        }
        qr
    }

    fn release_if_held(&mut self) {
        if let Some(session) = self.session.take() {
            if session.is_idle() {
                self.pool.release(session);
            } else {
                self.pool.mark_dead(session);
            }
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        // Never leak the borrow. An active transaction can't be rolled back
        // here (no awaiting in drop), so its session is mid-transaction and
        // gets reaped by the is_idle gate in release_if_held.
        if self.session.is_some() {
            if self.active {
                debug!("transaction dropped while active, surrendering session");
                self.active = false;
                self.rolled_back = true;
            }
            self.release_if_held();
        }
    }
}

/// A named savepoint inside a transaction. Commit releases it, rollback
/// returns the transaction to the savepoint. Fatal connection errors
/// propagate to the parent.
pub struct Savepoint<'a> {
    tx: &'a mut Transaction,
    name: String,
    active: bool,
    committed: bool,
    rolled_back: bool,
}

impl<'a> Savepoint<'a> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn is_rolled_back(&self) -> bool {
        self.rolled_back
    }

    /// Runs a statement within the savepoint scope (on the parent session).
    pub async fn query(&mut self, sql: &str, params: &impl ToParams) -> QueryResult {
        if !self.active {
            return QueryResult::new_error(ErrorKind::InvalidFuture, "savepoint is not active");
        }
        self.tx.query(sql, params).await
    }

    /// Releases the savepoint, keeping its effects.
    pub async fn commit(&mut self) -> QueryResult {
        self.end(true).await
    }

    /// Rolls back to the savepoint, discarding its effects.
    pub async fn rollback(&mut self) -> QueryResult {
        self.end(false).await
    }

    async fn end(&mut self, committing: bool) -> QueryResult {
        if !self.active {
            return QueryResult::new_error(ErrorKind::InvalidFuture, "savepoint is not active");
        }
        self.active = false;
        let sql = if committing {
            format!("RELEASE SAVEPOINT {}", self.name)
        } else {
            format!("ROLLBACK TO SAVEPOINT {}", self.name)
        };
        let qr = self.tx.exec(&sql).await;
        if qr.ok {
            if committing {
                self.committed = true;
            } else {
                self.rolled_back = true;
            }
        } else {
            self.rolled_back = true;
            // tx.exec already reaped the session on fatal errors
        }
        qr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aquifer::config::{Endpoint, KeepaliveSettings, PoolSettings, SslMode};
    use crate::aquifer::pool::isolation::IsolationLevel;

    fn test_pool() -> Arc<ConnectionPool> {
        let endpoint = Endpoint {
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
        };
        ConnectionPool::new(endpoint, PoolSettings::default(), None)
    }

    fn finished_transaction() -> Transaction {
        Transaction {
            pool: test_pool(),
            session: None,
            config: TxConfig::default(),
            active: false,
            committed: true,
            rolled_back: false,
            autocommit: false,
        }
    }

    #[tokio::test]
    async fn test_query_after_commit_is_invalid() {
        let mut tx = finished_transaction();
        let qr = tx.exec("SELECT 1").await;
        assert!(!qr.ok);
        assert_eq!(qr.code, ErrorKind::InvalidFuture);
    }

    #[tokio::test]
    async fn test_double_commit_is_invalid() {
        let mut tx = finished_transaction();
        let qr = tx.commit().await;
        assert_eq!(qr.code, ErrorKind::InvalidFuture);
    }

    #[tokio::test]
    async fn test_terminality_flags_exclusive() {
        let tx = finished_transaction();
        assert!(tx.is_committed());
        assert!(!tx.is_rolled_back());
        assert!(!tx.is_active());
    }

    #[test]
    fn test_autocommit_eligibility() {
        let cfg = TxConfig::read_only();
        assert!(cfg.read_only && !cfg.deferrable && cfg.allow_readonly_autocommit);
        let cfg = TxConfig {
            isolation: IsolationLevel::Serializable,
            read_only: true,
            deferrable: true,
            allow_readonly_autocommit: true,
        };
        // deferrable transactions need a real BEGIN
        assert!(cfg.deferrable);
    }
}
