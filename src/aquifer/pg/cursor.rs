//! Server-side cursors: DECLARE / FETCH FORWARD / CLOSE.
//!
//! A cursor lives inside a transaction, so declare opens one and close
//! commits it. Fetches are chunked; materialising the full result set is
//! the caller's business.

use crate::aquifer::pg::result::{CursorChunk, QueryResult};
use crate::aquifer::pg::session::Session;

impl Session {
    /// Declares a NO SCROLL cursor for the query, opening the enclosing
    /// transaction. Returns the name to fetch from, or the failed result.
    pub async fn declare_cursor(&mut self, sql: &str) -> std::result::Result<String, QueryResult> {
        let name = self.next_cursor_name();
        let qr = self
            .exec_simple_query(&format!(
                "BEGIN; DECLARE {} NO SCROLL CURSOR FOR {};",
                name, sql
            ))
            .await;
        if qr.ok {
            Ok(name)
        } else {
            Err(qr)
        }
    }

    /// Fetches up to n rows. The chunk's `done` flag is set once a fetch
    /// comes back empty.
    pub async fn fetch_cursor_chunk(&mut self, name: &str, n: u32) -> CursorChunk {
        let qr = self
            .exec_simple_query(&format!("FETCH FORWARD {} FROM {};", n, name))
            .await;
        let mut chunk = CursorChunk {
            done: qr.ok && qr.rows.is_empty(),
            ok: qr.ok,
            code: qr.code,
            error: qr.error,
            detail: qr.detail,
            rows: qr.rows,
            columns: qr.columns,
        };
        if !chunk.ok {
            chunk.done = true;
        }
        chunk
    }

    /// Closes the cursor and commits the enclosing transaction, discarding
    /// any result rows.
    pub async fn close_cursor(&mut self, name: &str) -> QueryResult {
        let mut qr = self
            .exec_simple_query(&format!("CLOSE {}; COMMIT;", name))
            .await;
        qr.rows.clear();
        qr.columns.clear();
        qr
    }
}
