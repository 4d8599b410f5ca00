use std::sync::Arc;
use std::time::Duration;

use crate::aquifer::config::PoolSettings;
use crate::aquifer::pg::is_fatal_connection_error;
use crate::aquifer::pool::ConnectionPool;
use crate::tests::stub_server::StubServer;

fn pool_for(server: &StubServer, max_pool: u32) -> Arc<ConnectionPool> {
    ConnectionPool::new(
        server.endpoint(),
        PoolSettings {
            max_pool,
            retries_on_connection_failed: 2,
            recv_buffer_size: 8 * 1024,
        },
        Some(Duration::from_secs(5)),
    )
}

#[tokio::test]
async fn test_acquire_connects_lazily_and_recycles() {
    let server = StubServer::start().await;
    let pool = pool_for(&server, 4);
    assert_eq!(pool.live_count(), 0);

    let mut p1 = pool.acquire().await.unwrap();
    assert_eq!(pool.live_count(), 1);
    let qr = p1.session().exec_simple_query("SELECT 1").await;
    assert!(qr.ok, "{}", qr.error);
    p1.surrender(false);
    assert_eq!(pool.live_count(), 1);
    assert_eq!(pool.idle_count(), 1);

    // the second acquire recycles instead of connecting anew
    let _p2 = pool.acquire().await.unwrap();
    assert_eq!(pool.live_count(), 1);
    assert_eq!(pool.idle_count(), 0);
}

#[tokio::test]
async fn test_capacity_invariants_under_concurrency() {
    let server = StubServer::start().await;
    let pool = pool_for(&server, 3);

    let mut tasks = Vec::new();
    for _ in 0..12 {
        let pool = Arc::clone(&pool);
        tasks.push(tokio::spawn(async move {
            for _ in 0..5 {
                let qr = pool.execute("SELECT 1").await;
                assert!(qr.ok, "{}", qr.error);
                assert!(pool.live_count() <= 3, "live_count exceeded max_pool");
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert!(pool.live_count() <= 3);
    assert!(pool.idle_count() as u32 <= pool.live_count());
}

#[tokio::test]
async fn test_fatal_error_reaps_exactly_one_slot() {
    let server = StubServer::start().await;
    let pool = pool_for(&server, 4);

    let mut p = pool.acquire().await.unwrap();
    assert_eq!(pool.live_count(), 1);
    let qr = p.session().exec_simple_query("KILL").await;
    assert!(is_fatal_connection_error(&qr));
    p.surrender(true);
    assert_eq!(pool.live_count(), 0);
    assert_eq!(pool.idle_count(), 0);

    // the pool recovers by connecting a fresh session
    let qr = pool.execute("SELECT 1").await;
    assert!(qr.ok, "{}", qr.error);
}

#[tokio::test]
async fn test_query_composes_acquire_exec_release() {
    let server = StubServer::start().await;
    let pool = pool_for(&server, 2);

    let qr = pool.query("SELECT $1", &("hi",)).await;
    assert!(qr.ok, "{}", qr.error);
    assert_eq!(qr.rows, vec![vec![Some("hi".to_string())]]);
    // session went back to the idle queue
    assert_eq!(pool.idle_count(), 1);

    let qr = pool.execute("KILL").await;
    assert!(!qr.ok);
    // fatal results reap instead of recycling
    assert_eq!(pool.live_count(), 0);
    assert_eq!(pool.idle_count(), 0);
}

#[tokio::test]
async fn test_waiters_wake_on_release() {
    let server = StubServer::start().await;
    let pool = pool_for(&server, 1);

    let p1 = pool.acquire().await.unwrap();
    let waiter = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            let mut p = pool.acquire().await.unwrap();
            p.session().exec_simple_query("SELECT 1").await
        })
    };
    // give the waiter time to start waiting, then free the only slot
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(p1);
    let qr = waiter.await.unwrap();
    assert!(qr.ok, "{}", qr.error);
    assert_eq!(pool.live_count(), 1);
}

#[tokio::test]
async fn test_dropped_guard_mid_operation_reaps() {
    let server = StubServer::start().await;
    let pool = pool_for(&server, 2);

    let mut p = pool.acquire().await.unwrap();
    // cancel an operation mid-flight: the stub never answers pg_sleep, so
    // the timeout drops the future while the session is InFlight
    let cancelled = tokio::time::timeout(
        Duration::from_millis(20),
        p.session().exec_simple_query("SELECT pg_sleep(10)"),
    )
    .await;
    assert!(cancelled.is_err());
    drop(p);
    assert_eq!(pool.live_count(), 0, "cancelled session must be reaped");
}
