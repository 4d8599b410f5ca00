//! Bounded connection pool for one endpoint.
//!
//! The idle queue is a mutex-guarded deque shared by all reactor threads
//! (a plain container is plenty until it proves to be a bottleneck; it can
//! be swapped for a sharded queue behind the same API). `live_count` grows
//! through a CAS so the cap is never overshot, and decrements are relaxed
//! because a stale read only delays a retry by one loop iteration.

use std::collections::VecDeque;
use std::sync::atomic::Ordering::{AcqRel, Relaxed};
use std::sync::atomic::{AtomicU32, AtomicU64};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::aquifer::common::{Error, Result};
use crate::aquifer::config::{Endpoint, PoolSettings};
use crate::aquifer::pg::conninfo::Conninfo;
use crate::aquifer::pg::params::ToParams;
use crate::aquifer::pg::result::{is_fatal_connection_error, ErrorKind, QueryResult};
use crate::aquifer::pg::session::Session;

/// How long an empty-handed acquire sleeps before retrying. Waiters are
/// also woken early whenever a session or a slot frees up.
const ACQUIRE_RETRY_SLEEP: Duration = Duration::from_micros(100);

/// Health counters exposed for observability.
#[derive(Debug, Default)]
pub struct PoolStats {
    /// sessions handed out
    pub checked: AtomicU64,
    /// sessions handed out that were recycled alive from the idle queue
    pub alive: AtomicU64,
    /// fresh connects performed
    pub reconnected: AtomicU64,
}

pub struct ConnectionPool {
    endpoint: Endpoint,
    conninfo: Conninfo,
    settings: PoolSettings,
    connect_timeout: Option<Duration>,
    idle: Mutex<VecDeque<Box<Session>>>,
    live_count: AtomicU32,
    /// woken when a session is released or a slot frees up
    waiters: Notify,
    /// feeds `sp_<n>` savepoint names; pool-scoped, not process-global
    savepoint_seq: AtomicU64,
    pub stats: PoolStats,
}

impl ConnectionPool {
    pub fn new(
        endpoint: Endpoint,
        settings: PoolSettings,
        connect_timeout: Option<Duration>,
    ) -> Arc<ConnectionPool> {
        let conninfo = endpoint.to_conninfo(connect_timeout);
        Arc::new(ConnectionPool {
            endpoint,
            conninfo,
            settings,
            connect_timeout,
            idle: Mutex::new(VecDeque::new()),
            live_count: AtomicU32::new(0),
            waiters: Notify::new(),
            savepoint_seq: AtomicU64::new(0),
            stats: PoolStats::default(),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn max_pool(&self) -> u32 {
        self.settings.max_pool
    }

    pub fn live_count(&self) -> u32 {
        self.live_count.load(Relaxed)
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Process-unique within this pool; used by transactions for
    /// savepoint sub-transaction names.
    pub fn next_savepoint_name(&self) -> String {
        format!("sp_{}", self.savepoint_seq.fetch_add(1, Relaxed) + 1)
    }

    /// Borrows a session: recycle an idle one, lazily connect a new one
    /// while under the cap, or wait for a release. Connect attempts are
    /// bounded by `retries_on_connection_failed`.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledSession> {
        let mut connect_failures = 0u32;
        loop {
            let recycled = {
                let mut idle = self.idle.lock().map_err(Error::from)?;
                idle.pop_front()
            };
            if let Some(session) = recycled {
                if session.connected() {
                    self.stats.checked.fetch_add(1, Relaxed);
                    self.stats.alive.fetch_add(1, Relaxed);
                    return Ok(PooledSession::new(Arc::clone(self), session));
                }
                // died while idle
                self.live_count.fetch_sub(1, Relaxed);
                self.waiters.notify_one();
                continue;
            }

            let live = self.live_count.load(Relaxed);
            if live < self.settings.max_pool
                && self
                    .live_count
                    .compare_exchange(live, live + 1, AcqRel, Relaxed)
                    .is_ok()
            {
                let mut session = Box::new(Session::new(self.settings.recv_buffer_size as usize));
                match session.connect(&self.conninfo, self.connect_timeout).await {
                    Ok(()) => {
                        self.stats.checked.fetch_add(1, Relaxed);
                        self.stats.reconnected.fetch_add(1, Relaxed);
                        return Ok(PooledSession::new(Arc::clone(self), session));
                    }
                    Err(e) => {
                        self.live_count.fetch_sub(1, Relaxed);
                        self.waiters.notify_one();
                        connect_failures += 1;
                        warn!(%e, host = self.endpoint.host.as_str(), "pool connect failed");
                        if connect_failures >= self.settings.retries_on_connection_failed.max(1) {
                            return Err(Error::new(format!(
                                "connection failed after {} attempts: {}",
                                connect_failures, e
                            )));
                        }
                        continue;
                    }
                }
            }

            // pool is at capacity with nothing idle: cooperative wait
            tokio::select! {
                _ = self.waiters.notified() => {}
                _ = tokio::time::sleep(ACQUIRE_RETRY_SLEEP) => {}
            }
        }
    }

    /// Returns a session to the pool (sync fast path). Dead sessions are
    /// dropped; a session that isn't cleanly idle is reaped rather than
    /// recycled.
    pub fn release(&self, session: Box<Session>) {
        if !session.connected() || !session.is_idle() {
            self.reap(session);
            return;
        }
        self.push_idle(session);
    }

    /// Safe release: pumps any buffered input and discards orphan results
    /// first, then recycles only a provably idle session.
    pub fn release_async(&self, mut session: Box<Session>) {
        if !session.connected() {
            self.reap(session);
            return;
        }
        if let Err(e) = session.discard_pending() {
            debug!(%e, "reaping session that failed the recycle drain");
            self.reap(session);
            return;
        }
        if !session.is_idle() {
            self.reap(session);
            return;
        }
        self.push_idle(session);
    }

    /// Drops a session the caller knows is wrecked, freeing its slot.
    pub fn mark_dead(&self, mut session: Box<Session>) {
        session.close();
        self.live_count.fetch_sub(1, Relaxed);
        self.waiters.notify_one();
    }

    fn reap(&self, session: Box<Session>) {
        self.mark_dead(session);
    }

    fn push_idle(&self, session: Box<Session>) {
        {
            let mut idle = match self.idle.lock() {
                Ok(q) => q,
                Err(_) => {
                    // poisoned lock: drop the session, keep the count honest
                    self.live_count.fetch_sub(1, Relaxed);
                    return;
                }
            };
            if idle.len() as u32 >= self.settings.max_pool {
                drop(idle);
                self.reap(session);
                return;
            }
            idle.push_back(session);
        }
        self.waiters.notify_one();
    }

    pub(crate) fn acquire_error(e: crate::aquifer::common::Error) -> QueryResult {
        let text = e.to_string();
        let kind = if text.contains("authentication failed") {
            ErrorKind::AuthFailed
        } else {
            ErrorKind::ConnectionClosed
        };
        QueryResult::new_error(kind, text)
    }

    /// Acquire, run one parameterised query, and give the session back:
    /// reaped on a fatal connection error, recycled otherwise.
    pub async fn query(self: &Arc<Self>, sql: &str, params: &impl ToParams) -> QueryResult {
        let mut pooled = match self.acquire().await {
            Ok(p) => p,
            Err(e) => return Self::acquire_error(e),
        };
        let qr = pooled.session().exec_param_query(sql, params).await;
        pooled.surrender(is_fatal_connection_error(&qr));
        qr
    }

    /// Acquire, run one simple query, and give the session back.
    pub async fn execute(self: &Arc<Self>, sql: &str) -> QueryResult {
        let mut pooled = match self.acquire().await {
            Ok(p) => p,
            Err(e) => return Self::acquire_error(e),
        };
        let qr = pooled.session().exec_simple_query(sql).await;
        pooled.surrender(is_fatal_connection_error(&qr));
        qr
    }
}

/// An exclusively borrowed session. Dropping the guard returns the session
/// to the pool; a session that isn't idle at that point (an operation was
/// cancelled mid-flight) is reaped pessimistically.
pub struct PooledSession {
    pool: Arc<ConnectionPool>,
    session: Option<Box<Session>>,
}

impl std::fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSession").finish_non_exhaustive()
    }
}

impl PooledSession {
    fn new(pool: Arc<ConnectionPool>, session: Box<Session>) -> Self {
        PooledSession {
            pool,
            session: Some(session),
        }
    }

    pub fn session(&mut self) -> &mut Session {
        self.session.as_mut().expect("session already surrendered")
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Takes the session out of the guard; the caller now owns the borrow
    /// and must release or reap through the pool.
    pub fn detach(mut self) -> Box<Session> {
        self.session.take().expect("session already surrendered")
    }

    /// Gives the session back, reaping when `fatal` says the connection is
    /// wrecked.
    pub fn surrender(&mut self, fatal: bool) {
        if let Some(session) = self.session.take() {
            if fatal {
                self.pool.mark_dead(session);
            } else {
                self.pool.release_async(session);
            }
        }
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.release(session);
        }
    }
}
