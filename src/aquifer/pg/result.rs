use strum::Display;

use crate::aquifer::pg::protocol::{Column, ServerErrorDetail};

/// Closed set of failure kinds surfaced by the driver. Public operations
/// return result values carrying one of these, never panics or unwinds.
#[derive(Display, Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    Ok,
    /// operation used out of sequence (e.g. query on a finished transaction)
    InvalidFuture,
    ConnectionClosed,
    SocketReadFailed,
    ProtocolCorrupt,
    ParserTruncatedField,
    ParserTruncatedRow,
    ParserTruncatedHeader,
    ServerError,
    AuthFailed,
    AwaitCanceled,
    Unknown,
}

impl Default for ErrorKind {
    fn default() -> Self {
        ErrorKind::Ok
    }
}

/// Result of a simple or parameterised query.
///
/// Rows are ordered sequences of nullable text cells. Invariants:
/// if rows_valid, every row has the same arity as columns;
/// if !ok then rows_valid is false.
#[derive(Debug, Default, Clone)]
pub struct QueryResult {
    pub ok: bool,
    pub code: ErrorKind,
    pub error: String,
    pub detail: ServerErrorDetail,
    pub rows_affected: u64,
    pub rows_valid: bool,
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl QueryResult {
    pub fn new_ok() -> Self {
        QueryResult {
            ok: true,
            rows_valid: true,
            ..Default::default()
        }
    }

    pub fn new_error(code: ErrorKind, error: impl Into<String>) -> Self {
        QueryResult {
            ok: false,
            code,
            error: error.into(),
            ..Default::default()
        }
    }

    /// Populates this result from a server ErrorResponse.
    pub fn fill_server_error(&mut self, detail: ServerErrorDetail) {
        self.ok = false;
        self.code = ErrorKind::ServerError;
        self.rows_valid = false;
        self.error = detail.message.clone();
        self.detail = detail;
    }

    pub fn fail(&mut self, code: ErrorKind, error: impl Into<String>) {
        self.ok = false;
        self.code = code;
        self.rows_valid = false;
        self.error = error.into();
    }

    pub fn category(&self) -> crate::aquifer::pg::protocol::SqlStateClass {
        self.detail.category()
    }
}

/// Result of a COPY operation.
#[derive(Debug, Default, Clone)]
pub struct CopyResult {
    pub ok: bool,
    pub code: ErrorKind,
    pub error: String,
    pub detail: ServerErrorDetail,
    pub rows_affected: u64,
}

impl CopyResult {
    pub fn new_ok() -> Self {
        CopyResult {
            ok: true,
            ..Default::default()
        }
    }

    pub fn new_error(code: ErrorKind, error: impl Into<String>) -> Self {
        CopyResult {
            ok: false,
            code,
            error: error.into(),
            ..Default::default()
        }
    }

    pub fn fill_server_error(&mut self, detail: ServerErrorDetail) {
        self.ok = false;
        self.code = ErrorKind::ServerError;
        self.error = detail.message.clone();
        self.detail = detail;
    }
}

/// One FETCH worth of rows from a server-side cursor.
#[derive(Debug, Default, Clone)]
pub struct CursorChunk {
    pub rows: Vec<Vec<Option<String>>>,
    pub columns: Vec<Column>,
    /// true once a fetch returned zero rows
    pub done: bool,
    pub ok: bool,
    pub code: ErrorKind,
    pub error: String,
    pub detail: ServerErrorDetail,
}

/// Extracts the affected-row count from a command tag ("UPDATE 7" -> 7).
/// For all command tags that have a row count, it's the last
/// space-separated part. Absent or unparseable counts give 0.
pub fn rows_affected_from_tag(tag: &str) -> u64 {
    match tag.rfind(' ') {
        Some(i) => tag[i + 1..].parse::<u64>().unwrap_or(0),
        None => 0,
    }
}

const FATAL_ERROR_NEEDLES: &[&str] = &[
    "another command is already in progress",
    "could not receive data from server",
    "server closed the connection unexpectedly",
];

/// True if a query result indicates the connection itself is wrecked and
/// the session must be reaped rather than recycled. Matches the error kind,
/// SQLSTATE class 08, and libpq-compatible message substrings.
pub fn is_fatal_connection_error(qr: &QueryResult) -> bool {
    if qr.ok {
        return false;
    }
    if matches!(
        qr.code,
        ErrorKind::SocketReadFailed | ErrorKind::ConnectionClosed | ErrorKind::AwaitCanceled
    ) {
        return true;
    }
    if qr.detail.sqlstate.starts_with("08") {
        return true;
    }
    FATAL_ERROR_NEEDLES.iter().any(|s| qr.error.contains(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_affected_from_tag() {
        assert_eq!(rows_affected_from_tag("UPDATE 7"), 7);
        assert_eq!(rows_affected_from_tag("INSERT 0 1"), 1);
        assert_eq!(rows_affected_from_tag("SELECT 42"), 42);
        assert_eq!(rows_affected_from_tag("BEGIN"), 0);
        assert_eq!(rows_affected_from_tag("CREATE TABLE"), 0);
        assert_eq!(rows_affected_from_tag(""), 0);
    }

    #[test]
    fn test_fatal_predicate_kinds() {
        let mut qr = QueryResult::new_error(ErrorKind::SocketReadFailed, "read failed");
        assert!(is_fatal_connection_error(&qr));
        qr.code = ErrorKind::ConnectionClosed;
        assert!(is_fatal_connection_error(&qr));
        qr.code = ErrorKind::ServerError;
        assert!(!is_fatal_connection_error(&qr));
    }

    #[test]
    fn test_fatal_predicate_needles_and_sqlstate() {
        let qr = QueryResult::new_error(
            ErrorKind::Unknown,
            "server closed the connection unexpectedly",
        );
        assert!(is_fatal_connection_error(&qr));

        let mut qr = QueryResult::new_error(ErrorKind::ServerError, "terminating connection");
        qr.detail.sqlstate = "08006".to_string();
        assert!(is_fatal_connection_error(&qr));

        let qr = QueryResult::new_error(ErrorKind::ServerError, "syntax error");
        assert!(!is_fatal_connection_error(&qr));
    }

    #[test]
    fn test_ok_result_is_never_fatal() {
        let qr = QueryResult::new_ok();
        assert!(!is_fatal_connection_error(&qr));
    }
}
