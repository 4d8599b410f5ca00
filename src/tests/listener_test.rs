use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::aquifer::pg::{Listener, Session, DEFAULT_RECV_BUFFER_SIZE};
use crate::tests::stub_server::StubServer;

#[tokio::test]
async fn test_notify_fans_out_to_every_handler() {
    let server = StubServer::start().await;
    let mut listener = Listener::connect(&server.conninfo(), None, DEFAULT_RECV_BUFFER_SIZE)
        .await
        .expect("listener connect");

    let count = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    for _ in 0..2 {
        let count = Arc::clone(&count);
        let tx = tx.clone();
        listener
            .add_handler("ch1", move |n| {
                // each handler gets its own cloned notification
                assert_eq!(n.channel, "ch1");
                assert_eq!(n.payload, "x");
                assert_eq!(n.pid, 4242);
                count.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(());
            })
            .await
            .expect("add handler");
    }
    drop(tx);

    // drive the wake loop in the background
    let loop_task = tokio::spawn(async move { listener.run().await });

    // one NOTIFY from another session
    let mut notifier = Session::new(DEFAULT_RECV_BUFFER_SIZE);
    notifier.connect(&server.conninfo(), None).await.unwrap();
    let qr = notifier.exec_simple_query("NOTIFY ch1, 'x'").await;
    assert!(qr.ok, "{}", qr.error);

    // exactly two handler invocations for the single notification
    tokio::time::timeout(Duration::from_secs(2), async {
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
    })
    .await
    .expect("both handlers must fire");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(count.load(Ordering::SeqCst), 2);

    loop_task.abort();
}

#[tokio::test]
async fn test_listen_issued_once_per_channel() {
    let server = StubServer::start().await;
    let mut listener = Listener::connect(&server.conninfo(), None, DEFAULT_RECV_BUFFER_SIZE)
        .await
        .unwrap();

    // three handlers across two channels: LISTEN runs once per channel,
    // and re-adding a channel doesn't disturb the session
    listener.add_handler("a", |_| {}).await.unwrap();
    listener.add_handler("a", |_| {}).await.unwrap();
    listener.add_handler("b", |_| {}).await.unwrap();
}
