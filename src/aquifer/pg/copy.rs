//! COPY IN / COPY OUT streaming.
//!
//! Chunks are opaque byte buffers; framing (text/csv/binary) is between the
//! caller and the server. A COPY in progress owns the session: other
//! operations fail with "another command is already in progress" until the
//! COPY finishes or fails.

use bytes::Bytes;
use tracing::warn;

use crate::aquifer::pg::protocol::{MessageBuilder, ServerErrorDetail, Tag};
use crate::aquifer::pg::result::{rows_affected_from_tag, CopyResult, ErrorKind};
use crate::aquifer::pg::session::{classify_error, Session};

/// One chunk read from a COPY OUT stream. `done` marks end-of-stream, in
/// which case `data` is empty.
#[derive(Debug, Default, Clone)]
pub struct CopyOutChunk {
    pub ok: bool,
    pub code: ErrorKind,
    pub error: String,
    pub detail: ServerErrorDetail,
    pub data: Bytes,
    pub done: bool,
}

impl CopyOutChunk {
    fn data(data: Bytes) -> Self {
        CopyOutChunk {
            ok: true,
            data,
            ..Default::default()
        }
    }

    fn eof() -> Self {
        CopyOutChunk {
            ok: true,
            done: true,
            ..Default::default()
        }
    }

    fn error(code: ErrorKind, error: impl Into<String>) -> Self {
        CopyOutChunk {
            ok: false,
            code,
            error: error.into(),
            done: true,
            ..Default::default()
        }
    }
}

impl Session {
    /// Starts a `COPY ... FROM STDIN`. The result is ok once the server has
    /// acknowledged copy-in mode; a query that doesn't start a COPY is a
    /// server error.
    pub async fn copy_in_start(&mut self, sql: &str) -> CopyResult {
        match self.copy_start(sql, Tag::COPY_IN_RESPONSE).await {
            Ok(result) => {
                if result.ok {
                    self.set_copy_in(true);
                }
                result
            }
            Err(result) => result,
        }
    }

    /// Submits one chunk of COPY data and flushes it.
    pub async fn copy_in_send_chunk(&mut self, data: &[u8]) -> CopyResult {
        if !self.in_copy_in() {
            return CopyResult::new_error(ErrorKind::InvalidFuture, "no COPY IN in progress");
        }
        let mut mb = MessageBuilder::new(Tag::COPY_DATA);
        mb.write_bytes(data);
        self.queue_send(mb.finish());
        if let Err(e) = self.flush().await {
            self.set_copy_in(false);
            return self.copy_fail_io(e);
        }
        CopyResult::new_ok()
    }

    /// Ends the COPY IN stream and drains the final command status.
    /// Propagates the server-reported row count.
    pub async fn copy_in_finish(&mut self) -> CopyResult {
        if !self.in_copy_in() {
            return CopyResult::new_error(ErrorKind::InvalidFuture, "no COPY IN in progress");
        }
        self.set_copy_in(false);
        // COPY runs under the simple-query protocol: after CopyDone the
        // server emits CommandComplete and ReadyForQuery on its own
        let mb = MessageBuilder::new(Tag::COPY_DONE);
        self.queue_send(mb.finish());
        if let Err(e) = self.flush().await {
            return self.copy_fail_io(e);
        }
        self.copy_drain_final().await
    }

    /// Starts a `COPY ... TO STDOUT`.
    pub async fn copy_out_start(&mut self, sql: &str) -> CopyResult {
        match self.copy_start(sql, Tag::COPY_OUT_RESPONSE).await {
            Ok(result) => {
                if result.ok {
                    self.set_copy_out(true);
                }
                result
            }
            Err(result) => result,
        }
    }

    /// Reads the next COPY OUT chunk, suspending until data arrives.
    /// End of stream is a `done` chunk after the server's COMMAND_OK;
    /// server errors surface as error chunks.
    pub async fn copy_out_read_chunk(&mut self) -> CopyOutChunk {
        if !self.in_copy_out() {
            return CopyOutChunk::error(ErrorKind::InvalidFuture, "no COPY OUT in progress");
        }
        loop {
            let msg = match self.read_message().await {
                Ok(m) => m,
                Err(e) => {
                    self.set_copy_out(false);
                    let code = classify_error(&e, false);
                    self.wreck();
                    return CopyOutChunk::error(code, e.to_string());
                }
            };
            match msg.tag() {
                Tag::COPY_DATA => {
                    let body_start = msg.body_start() as usize;
                    let data = msg.into_bytes().slice(body_start..);
                    return CopyOutChunk::data(data);
                }
                Tag::COPY_DONE => {} // final command status follows
                Tag::COMMAND_COMPLETE => {}
                Tag::NOTICE_RESPONSE => {
                    let detail = ServerErrorDetail::from_message(&msg);
                    warn!(%detail, "notice during COPY OUT");
                }
                Tag::ERROR_RESPONSE => {
                    self.set_copy_out(false);
                    let detail = ServerErrorDetail::from_message(&msg);
                    let mut chunk = CopyOutChunk::error(ErrorKind::ServerError, detail.message.clone());
                    chunk.detail = detail;
                    self.drain_to_ready().await;
                    return chunk;
                }
                Tag::READY_FOR_QUERY => {
                    self.set_copy_out(false);
                    self.observe_ready(&msg);
                    return CopyOutChunk::eof();
                }
                other => {
                    self.set_copy_out(false);
                    self.wreck();
                    return CopyOutChunk::error(
                        ErrorKind::ProtocolCorrupt,
                        format!("unexpected {} during COPY OUT", other),
                    );
                }
            }
        }
    }

    async fn copy_start(
        &mut self,
        sql: &str,
        expect: Tag,
    ) -> std::result::Result<CopyResult, CopyResult> {
        let mut probe = crate::aquifer::pg::result::QueryResult::new_ok();
        if !self.precheck(&mut probe) {
            return Err(CopyResult::new_error(probe.code, probe.error));
        }
        self.begin_inflight();

        let mut mb = MessageBuilder::new(Tag::QUERY);
        mb.write_str(sql);
        self.queue_send(mb.finish());
        if let Err(e) = self.flush().await {
            return Err(self.copy_fail_io(e));
        }

        loop {
            let msg = match self.read_message().await {
                Ok(m) => m,
                Err(e) => return Err(self.copy_fail_io(e)),
            };
            match msg.tag() {
                t if t == expect => return Ok(CopyResult::new_ok()),
                Tag::ERROR_RESPONSE => {
                    let mut result = CopyResult::new_ok();
                    result.fill_server_error(ServerErrorDetail::from_message(&msg));
                    self.drain_to_ready().await;
                    return Err(result);
                }
                Tag::NOTICE_RESPONSE => {
                    let detail = ServerErrorDetail::from_message(&msg);
                    warn!(%detail, "notice while starting COPY");
                }
                Tag::PARAMETER_STATUS => {}
                Tag::READY_FOR_QUERY => {
                    self.observe_ready(&msg);
                    return Err(CopyResult::new_error(
                        ErrorKind::ServerError,
                        "query completed without entering COPY mode",
                    ));
                }
                _ => {
                    // a result set or other response: this wasn't a COPY
                    // statement, drain it and report the misuse
                    self.drain_to_ready().await;
                    return Err(CopyResult::new_error(
                        ErrorKind::ServerError,
                        "query did not start a COPY",
                    ));
                }
            }
        }
    }

    /// Drains the final CommandComplete / error after CopyDone.
    async fn copy_drain_final(&mut self) -> CopyResult {
        let mut result = CopyResult::new_ok();
        loop {
            let msg = match self.read_message().await {
                Ok(m) => m,
                Err(e) => return self.copy_fail_io(e),
            };
            match msg.tag() {
                Tag::COMMAND_COMPLETE => {
                    let mut r = msg.reader();
                    if let Ok(tag) = r.read_str() {
                        result.rows_affected = rows_affected_from_tag(tag);
                    }
                }
                Tag::ERROR_RESPONSE => {
                    result.fill_server_error(ServerErrorDetail::from_message(&msg));
                }
                Tag::NOTICE_RESPONSE => {
                    let detail = ServerErrorDetail::from_message(&msg);
                    warn!(%detail, "notice while finishing COPY");
                }
                Tag::PARAMETER_STATUS => {}
                Tag::READY_FOR_QUERY => {
                    self.observe_ready(&msg);
                    return result;
                }
                other => {
                    self.wreck();
                    return CopyResult::new_error(
                        ErrorKind::ProtocolCorrupt,
                        format!("unexpected {} while finishing COPY", other),
                    );
                }
            }
        }
    }

    fn copy_fail_io(&mut self, e: crate::aquifer::common::Error) -> CopyResult {
        let code = classify_error(&e, true);
        self.wreck();
        CopyResult::new_error(code, e.to_string())
    }

    /// Best-effort drain to ReadyForQuery after a failed COPY exchange.
    async fn drain_to_ready(&mut self) {
        loop {
            match self.read_message().await {
                Ok(msg) => {
                    if msg.tag() == Tag::READY_FOR_QUERY {
                        self.observe_ready(&msg);
                        return;
                    }
                }
                Err(_) => {
                    self.wreck();
                    return;
                }
            }
        }
    }
}
