use crate::aquifer::pg::{ErrorKind, Session, SqlStateClass, DEFAULT_RECV_BUFFER_SIZE};
use crate::impl_from_row;
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
async fn test_connect_and_simple_query() {
    let server = StubServer::start().await;
    let mut session = connected_session(&server).await;
    assert!(session.connected());
    assert!(session.is_idle());
    assert_eq!(session.backend_pid(), 4242);

    let qr = session.exec_simple_query("SELECT 1").await;
    assert!(qr.ok, "{}", qr.error);
    assert!(qr.rows_valid);
    assert_eq!(qr.columns.len(), 1);
    assert_eq!(qr.columns[0].name, "?column?");
    assert_eq!(qr.rows, vec![vec![Some("1".to_string())]]);
    assert_eq!(qr.rows_affected, 1);
    assert!(session.is_idle());
}

#[tokio::test]
async fn test_connect_timeout_reports_elapsed() {
    // a listener that never answers the startup packet: the TCP connect
    // succeeds but the handshake stalls until the deadline
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ci = crate::aquifer::pg::Conninfo::parse(&format!(
        "host=127.0.0.1 port={} user=app connect_timeout=1",
        listener.local_addr().unwrap().port()
    ))
    .unwrap();
    let mut session = Session::new(DEFAULT_RECV_BUFFER_SIZE);
    let err = session.connect(&ci, None).await.unwrap_err().to_string();
    assert!(err.contains("connect timeout after"), "{}", err);
    assert!(!session.connected());
}

#[tokio::test]
async fn test_param_query_update_returning() {
    let server = StubServer::start().await;
    let mut session = connected_session(&server).await;

    let qr = session
        .exec_param_query(
            "UPDATE users SET name=$1 WHERE id=$2 RETURNING name;",
            &("John", 1i32),
        )
        .await;
    assert!(qr.ok, "{}", qr.error);
    assert_eq!(qr.rows_affected, 1);
    assert_eq!(qr.columns.len(), 1);
    assert_eq!(qr.columns[0].name, "name");
    assert_eq!(qr.rows, vec![vec![Some("John".to_string())]]);
}

#[tokio::test]
async fn test_array_param_roundtrip() {
    let server = StubServer::start().await;
    let mut session = connected_session(&server).await;

    // the stub echoes the bound parameter back as a text cell
    let qr = session
        .exec_param_query("SELECT $1", &(vec![1i32, 2, 3],))
        .await;
    assert!(qr.ok, "{}", qr.error);
    assert_eq!(qr.rows, vec![vec![Some("{1,2,3}".to_string())]]);

    use crate::aquifer::pg::FromCell;
    let decoded = Vec::<i32>::from_cell(qr.rows[0][0].as_deref()).unwrap();
    assert_eq!(decoded, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_unique_violation_classified() {
    let server = StubServer::start().await;
    let mut session = connected_session(&server).await;

    let qr = session
        .exec_simple_query("INSERT INTO users VALUES ('dup')")
        .await;
    assert!(!qr.ok);
    assert!(!qr.rows_valid);
    assert_eq!(qr.code, ErrorKind::ServerError);
    assert_eq!(qr.detail.sqlstate, "23505");
    assert_eq!(qr.category(), SqlStateClass::UniqueViolation);
    assert!(qr.detail.detail.contains("already exists"));
    // the session survives a server error
    assert!(session.is_idle());
    let qr = session.exec_simple_query("SELECT 1").await;
    assert!(qr.ok);
}

#[tokio::test]
async fn test_multi_statement_rows_accumulate() {
    let server = StubServer::start().await;
    let mut session = connected_session(&server).await;

    let qr = session.exec_simple_query("SELECT 'a'; SELECT 'a'").await;
    assert!(qr.ok, "{}", qr.error);
    assert_eq!(qr.rows.len(), 2);
    assert_eq!(qr.rows_affected, 2); // both SELECT 1 tags summed
    assert_eq!(qr.columns.len(), 1); // columns come from the first result
}

#[tokio::test]
async fn test_connection_drop_is_fatal() {
    let server = StubServer::start().await;
    let mut session = connected_session(&server).await;

    let qr = session.exec_simple_query("KILL").await;
    assert!(!qr.ok);
    assert!(
        matches!(qr.code, ErrorKind::ConnectionClosed | ErrorKind::SocketReadFailed),
        "{:?}",
        qr.code
    );
    assert!(!session.connected());

    // every later operation short-circuits
    let qr = session.exec_simple_query("SELECT 1").await;
    assert!(!qr.ok);
    assert_eq!(qr.code, ErrorKind::ConnectionClosed);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let server = StubServer::start().await;
    let mut session = connected_session(&server).await;
    session.close();
    assert!(!session.connected());
    session.close();
    assert!(!session.connected());
}

#[derive(Debug, PartialEq)]
struct EchoRow {
    echo: String,
}
impl_from_row!(EchoRow { echo });

#[tokio::test]
async fn test_query_as_named_mapping() {
    let server = StubServer::start().await;
    let mut session = connected_session(&server).await;

    let rows: Vec<EchoRow> = session
        .exec_param_query_as("SELECT $1", &("hello",))
        .await
        .unwrap();
    assert_eq!(
        rows,
        vec![EchoRow {
            echo: "hello".to_string()
        }]
    );

    // tuples map positionally
    let rows: Vec<(String,)> = session
        .exec_param_query_as("SELECT $1", &("pos",))
        .await
        .unwrap();
    assert_eq!(rows[0].0, "pos");
}

#[tokio::test]
async fn test_cursor_chunks_until_dry() {
    let server = StubServer::start().await;
    let mut session = connected_session(&server).await;

    let name = session.declare_cursor("SELECT x FROM t").await.unwrap();
    assert_eq!(name, "aq_cur_1");

    let chunk = session.fetch_cursor_chunk(&name, 2).await;
    assert!(chunk.ok, "{}", chunk.error);
    assert!(!chunk.done);
    assert_eq!(chunk.rows.len(), 2);

    let chunk = session.fetch_cursor_chunk(&name, 2).await;
    assert!(!chunk.done);
    assert_eq!(chunk.rows.len(), 1);

    let chunk = session.fetch_cursor_chunk(&name, 2).await;
    assert!(chunk.ok);
    assert!(chunk.done);
    assert!(chunk.rows.is_empty());

    let qr = session.close_cursor(&name).await;
    assert!(qr.ok, "{}", qr.error);
    assert!(session.is_idle());
}
