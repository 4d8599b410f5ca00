use crate::aquifer::pg::{ErrorKind, Session, DEFAULT_RECV_BUFFER_SIZE};
use crate::tests::stub_server::StubServer;

async fn connected_session(server: &StubServer) -> Session {
    let mut session = Session::new(DEFAULT_RECV_BUFFER_SIZE);
    session
        .connect(&server.conninfo(), None)
        .await
        .expect("connect to stub");
    session
}

#[tokio::test]
async fn test_copy_in_roundtrip() {
    let server = StubServer::start().await;
    let mut session = connected_session(&server).await;

    let result = session
        .copy_in_start("COPY users (id, name) FROM STDIN")
        .await;
    assert!(result.ok, "{}", result.error);

    for chunk in [&b"1\taaa\n"[..], b"2\tbbb\n", b"3\tccc\n"] {
        let result = session.copy_in_send_chunk(chunk).await;
        assert!(result.ok, "{}", result.error);
    }

    let result = session.copy_in_finish().await;
    assert!(result.ok, "{}", result.error);
    assert_eq!(result.rows_affected, 3);
    assert!(session.is_idle());
}

#[tokio::test]
async fn test_copy_in_requires_start() {
    let server = StubServer::start().await;
    let mut session = connected_session(&server).await;

    let result = session.copy_in_send_chunk(b"x").await;
    assert!(!result.ok);
    assert_eq!(result.code, ErrorKind::InvalidFuture);
    let result = session.copy_in_finish().await;
    assert_eq!(result.code, ErrorKind::InvalidFuture);
}

#[tokio::test]
async fn test_copy_in_blocks_other_queries() {
    let server = StubServer::start().await;
    let mut session = connected_session(&server).await;

    let result = session.copy_in_start("COPY t FROM STDIN").await;
    assert!(result.ok);
    let qr = session.exec_simple_query("SELECT 1").await;
    assert!(!qr.ok);
    assert!(qr.error.contains("another command is already in progress"));
    // the COPY itself still completes
    let result = session.copy_in_finish().await;
    assert!(result.ok, "{}", result.error);
}

#[tokio::test]
async fn test_copy_out_stream_until_eof() {
    let server = StubServer::start().await;
    let mut session = connected_session(&server).await;

    let result = session.copy_out_start("COPY users TO STDOUT").await;
    assert!(result.ok, "{}", result.error);

    let chunk = session.copy_out_read_chunk().await;
    assert!(chunk.ok, "{}", chunk.error);
    assert!(!chunk.done);
    assert_eq!(&chunk.data[..], b"1\taaa\n");

    let chunk = session.copy_out_read_chunk().await;
    assert_eq!(&chunk.data[..], b"2\tbbb\n");

    let chunk = session.copy_out_read_chunk().await;
    assert!(chunk.ok);
    assert!(chunk.done);
    assert!(chunk.data.is_empty());
    assert!(session.is_idle());
}

#[tokio::test]
async fn test_copy_start_on_non_copy_statement() {
    let server = StubServer::start().await;
    let mut session = connected_session(&server).await;

    let result = session.copy_in_start("SELECT 1").await;
    assert!(!result.ok);
    assert_eq!(result.code, ErrorKind::ServerError);
    // the session is drained and reusable
    let qr = session.exec_simple_query("SELECT 1").await;
    assert!(qr.ok, "{}", qr.error);
}
