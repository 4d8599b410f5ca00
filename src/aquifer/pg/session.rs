//! One PostgreSQL session over a non-blocking socket.
//!
//! Every operation drives the same three-phase loop: queue frontend
//! messages, flush them (suspending on writable), then drain backend
//! messages (suspending on readable) until ReadyForQuery. Each suspension
//! point is a single observable await; helpers never hide extra ones.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes};
use tracing::{debug, warn};

use crate::aquifer::common::{Error, ErrorKind as LibErrorKind, Result};
use crate::aquifer::pg::conninfo::Conninfo;
use crate::aquifer::pg::params::{collect_params, Param, ToParams};
use crate::aquifer::pg::protocol::{
    hash_md5_password, parse_row_description, AuthRequest, Message, MessageBuilder, MessageParser,
    ServerErrorDetail, Tag, PROTOCOL_VERSION, SSL_ALLOWED, SSL_NOT_ALLOWED, SSL_REQUEST,
};
use crate::aquifer::pg::result::{rows_affected_from_tag, ErrorKind, QueryResult};
use crate::aquifer::pg::row::FromRow;
use crate::aquifer::pg::transport::{apply_keepalive, build_tls_config, Transport};

pub const DEFAULT_RECV_BUFFER_SIZE: usize = 32 * 1024;

const READ_CHUNK: usize = 8 * 1024;

/// Driver connection state. Any I/O failure lands in Dead and later
/// operations short-circuit with ConnectionClosed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Idle,
    InFlight,
    Dead,
}

/// An asynchronous NOTIFY payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel: String,
    pub payload: String,
    pub pid: i32,
}

pub struct Session {
    transport: Option<Transport>,
    parser: MessageParser,
    send_backlog: VecDeque<Bytes>,
    state: SessionState,
    /// transaction status byte from the last ReadyForQuery: b'I', b'T', b'E'
    tx_status: u8,
    backend_pid: i32,
    backend_secret: i32,
    copy_in_active: bool,
    copy_out_active: bool,
    cursor_seq: u64,
    /// notifications drained while doing other work, consumed by listeners
    pub(crate) notifications: VecDeque<Notification>,
}

impl Session {
    pub fn new(recv_buffer_size: usize) -> Self {
        Session {
            transport: None,
            parser: MessageParser::new(recv_buffer_size),
            send_backlog: VecDeque::new(),
            state: SessionState::Disconnected,
            tx_status: 0,
            backend_pid: 0,
            backend_secret: 0,
            copy_in_active: false,
            copy_out_active: false,
            cursor_seq: 0,
            notifications: VecDeque::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn connected(&self) -> bool {
        matches!(self.state, SessionState::Idle | SessionState::InFlight)
    }

    pub fn backend_pid(&self) -> i32 {
        self.backend_pid
    }

    /// The BackendKeyData pair, for out-of-band cancel requests issued by
    /// an external supervisor.
    pub fn backend_key(&self) -> (i32, i32) {
        (self.backend_pid, self.backend_secret)
    }

    /// True if the connection was upgraded to TLS.
    pub fn is_tls(&self) -> bool {
        self.transport.as_ref().map(|t| t.is_tls()).unwrap_or(false)
    }

    /// True when the session is safe to hand to another borrower: connected,
    /// no operation in flight, and the backend reports an idle transaction
    /// status.
    pub fn is_idle(&self) -> bool {
        self.state == SessionState::Idle
            && !self.copy_in_active
            && !self.copy_out_active
            && self.tx_status == b'I'
    }

    /// Generates a cursor name unique within this session.
    pub fn next_cursor_name(&mut self) -> String {
        self.cursor_seq += 1;
        format!("aq_cur_{}", self.cursor_seq)
    }

    /// Shuts down the socket and forgets the protocol state. Idempotent.
    /// A quiescent session says goodbye with Terminate, best effort.
    pub fn close(&mut self) {
        let quiescent = self.state == SessionState::Idle;
        if let Some(t) = &mut self.transport {
            if quiescent {
                let buf = MessageBuilder::new(Tag::TERMINATE).finish();
                let _ = t.try_write(buf.chunk());
            }
            t.close();
        }
        self.transport = None;
        self.parser.clear();
        self.send_backlog.clear();
        self.state = SessionState::Disconnected;
        self.tx_status = 0;
        self.copy_in_active = false;
        self.copy_out_active = false;
    }

    /// Wrecks the session after a fatal I/O or protocol failure. Future
    /// operations short-circuit with ConnectionClosed.
    pub(crate) fn wreck(&mut self) {
        if let Some(t) = &mut self.transport {
            t.close();
        }
        self.transport = None;
        self.state = SessionState::Dead;
    }

    pub(crate) fn in_copy_in(&self) -> bool {
        self.copy_in_active
    }

    pub(crate) fn in_copy_out(&self) -> bool {
        self.copy_out_active
    }

    pub(crate) fn set_copy_in(&mut self, v: bool) {
        self.copy_in_active = v;
    }

    pub(crate) fn set_copy_out(&mut self, v: bool) {
        self.copy_out_active = v;
    }

    pub(crate) fn begin_inflight(&mut self) {
        self.state = SessionState::InFlight;
    }

    /// Records the transaction status byte of a ReadyForQuery and returns
    /// the session to Idle.
    pub(crate) fn observe_ready(&mut self, msg: &Message) {
        let mut r = msg.reader();
        self.tx_status = r.read_byte();
        if self.state == SessionState::InFlight {
            self.state = SessionState::Idle;
        }
    }

    // ===== connect =====

    /// Connects and authenticates. The timeout argument wins over the
    /// conninfo's connect_timeout; with neither the attempt is unbounded.
    pub async fn connect(&mut self, ci: &Conninfo, timeout: Option<Duration>) -> Result<()> {
        if self.connected() {
            return Err(Error::new("session is already connected"));
        }
        let effective = timeout.or_else(|| ci.connect_timeout());
        self.state = SessionState::Connecting;
        let result = match effective {
            Some(t) => {
                let started = Instant::now();
                match tokio::time::timeout(t, self.connect_inner(ci)).await {
                    Ok(r) => r,
                    Err(_) => Err(Error::new(format!(
                        "connect timeout after {} ms",
                        started.elapsed().as_millis()
                    ))),
                }
            }
            None => self.connect_inner(ci).await,
        };
        match result {
            Ok(()) => {
                self.state = SessionState::Idle;
                Ok(())
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    async fn connect_inner(&mut self, ci: &Conninfo) -> Result<()> {
        // hostaddr skips name resolution; host is then only for TLS checks
        let dial_host = ci.hostaddr().unwrap_or_else(|| ci.host());
        let stream = tokio::net::TcpStream::connect((dial_host, ci.port())).await?;
        stream.set_nodelay(true)?;
        if ci.get("keepalives") == Some("1") {
            apply_keepalive(&stream, &keepalive_from_conninfo(ci))?;
        }
        self.transport = Some(Transport::new(stream));

        let sslmode = ci.sslmode();
        if sslmode.wants_tls() {
            self.negotiate_tls(ci).await?;
        }

        // startup packet
        let mut mb = MessageBuilder::new_untagged();
        mb.write_i32(PROTOCOL_VERSION);
        mb.write_str("user");
        mb.write_str(ci.user());
        mb.write_str("database");
        mb.write_str(ci.dbname());
        mb.write_str("client_encoding");
        mb.write_str("UTF8");
        if let Some(app) = ci.get("application_name") {
            mb.write_str("application_name");
            mb.write_str(app);
        }
        mb.write_byte(0);
        self.send_backlog.push_back(mb.finish());
        self.flush().await?;

        // authentication exchange until ReadyForQuery
        loop {
            let msg = self.read_message().await?;
            match msg.tag() {
                Tag::AUTHENTICATION => match AuthRequest::parse(&msg)? {
                    AuthRequest::Ok => {}
                    AuthRequest::CleartextPassword => {
                        self.send_password(ci.password()).await?;
                    }
                    AuthRequest::Md5Password { salt } => {
                        let hashed = hash_md5_password(ci.user(), ci.password(), &salt);
                        self.send_password(&hashed).await?;
                    }
                    AuthRequest::Unsupported(code) => {
                        return Err(crate::aquifer::pg::protocol::unsupported_auth_error(code));
                    }
                },
                Tag::BACKEND_KEY_DATA => {
                    let mut r = msg.reader();
                    self.backend_pid = r.read_i32();
                    self.backend_secret = r.read_i32();
                }
                Tag::PARAMETER_STATUS => {}
                Tag::NOTICE_RESPONSE => {
                    let detail = ServerErrorDetail::from_message(&msg);
                    warn!(%detail, "notice during connection establishment");
                }
                Tag::ERROR_RESPONSE => {
                    let detail = ServerErrorDetail::from_message(&msg);
                    // class 28 = invalid authorization specification
                    if detail.sqlstate.starts_with("28") {
                        return Err(Error::new(format!("authentication failed: {}", detail)));
                    }
                    return Err(Error::new(detail.to_string()));
                }
                Tag::NEGOTIATE_PROTOCOL_VERSION => {
                    return Err(Error::protocol_error(
                        "server does not support protocol 3.0",
                    ));
                }
                Tag::READY_FOR_QUERY => {
                    let mut r = msg.reader();
                    self.tx_status = r.read_byte();
                    debug!(pid = self.backend_pid, "session connected");
                    return Ok(());
                }
                other => {
                    return Err(Error::protocol_error(format!(
                        "unexpected {} during connection establishment",
                        other
                    )));
                }
            }
        }
    }

    async fn negotiate_tls(&mut self, ci: &Conninfo) -> Result<()> {
        let mut mb = MessageBuilder::new_untagged();
        mb.write_i32(SSL_REQUEST);
        self.send_backlog.push_back(mb.finish());
        self.flush().await?;

        let answer = self.read_raw_byte().await?;
        match answer {
            SSL_ALLOWED => {
                let config = build_tls_config(ci)?;
                let t = self.transport.as_mut().ok_or_else(Error::closed)?;
                t.upgrade(config, ci.host()).await
            }
            SSL_NOT_ALLOWED => {
                if ci.sslmode().requires_tls() {
                    Err(Error::new(format!(
                        "server refused TLS but sslmode={} requires it",
                        ci.sslmode()
                    )))
                } else {
                    Ok(())
                }
            }
            other => Err(Error::protocol_error(format!(
                "unexpected SSLRequest response byte 0x{:02x}",
                other
            ))),
        }
    }

    async fn send_password(&mut self, password: &str) -> Result<()> {
        let mut mb = MessageBuilder::new(Tag::PASSWORD_MESSAGE);
        mb.write_str(password);
        self.send_backlog.push_back(mb.finish());
        self.flush().await
    }

    /// Reads one raw (unframed) byte, used only for the SSLRequest answer.
    async fn read_raw_byte(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        loop {
            let t = self.transport.as_mut().ok_or_else(Error::closed)?;
            let n = t.try_read(&mut byte)?;
            if n == 1 {
                return Ok(byte[0]);
            }
            t.readable().await?;
        }
    }

    // ===== send / flush / read =====

    pub(crate) fn queue_send(&mut self, buf: Bytes) {
        self.send_backlog.push_back(buf);
    }

    /// Writes the send backlog to the socket, suspending on writable until
    /// everything (including buffered TLS ciphertext) is flushed.
    pub(crate) async fn flush(&mut self) -> Result<()> {
        while let Some(front) = self.send_backlog.front_mut() {
            let t = match &mut self.transport {
                Some(t) => t,
                None => return Err(Error::closed()),
            };
            let n = t.try_write(front.chunk())?;
            if n == 0 {
                t.writable().await?;
            } else if n < front.remaining() {
                front.advance(n);
            } else {
                self.send_backlog.pop_front();
            }
        }
        loop {
            let t = match &mut self.transport {
                Some(t) => t,
                None => return Err(Error::closed()),
            };
            if t.try_flush()? {
                return Ok(());
            }
            t.writable().await?;
        }
    }

    /// Reads the next complete backend message, suspending on readable.
    pub(crate) async fn read_message(&mut self) -> Result<Message> {
        loop {
            if let Some(result) = self.parser.next() {
                return result;
            }
            let mut chunk = [0u8; READ_CHUNK];
            let t = match &mut self.transport {
                Some(t) => t,
                None => return Err(Error::closed()),
            };
            let n = t.try_read(&mut chunk)?;
            if n == 0 {
                t.readable().await?;
                continue;
            }
            self.parser.bytes_mut().extend_from_slice(&chunk[..n]);
        }
    }

    /// Reads whatever is available without blocking and buffers it in the
    /// parser. Returns the number of bytes consumed.
    pub(crate) fn pump_input(&mut self) -> Result<usize> {
        let mut total = 0;
        loop {
            let mut chunk = [0u8; READ_CHUNK];
            let t = match &mut self.transport {
                Some(t) => t,
                None => return Err(Error::closed()),
            };
            let n = t.try_read(&mut chunk)?;
            if n == 0 {
                return Ok(total);
            }
            self.parser.bytes_mut().extend_from_slice(&chunk[..n]);
            total += n;
        }
    }

    /// Suspends until the socket is readable. Listener multiplexers use
    /// this as their wake gate before pumping input.
    pub async fn wait_readable_for_listener(&self) -> Result<()> {
        match &self.transport {
            Some(t) => t.readable().await,
            None => Err(Error::closed()),
        }
    }

    // ===== queries =====

    /// Sends a textual query and drains the combined result. Rows from all
    /// statements of a multi-statement query are accumulated.
    pub async fn exec_simple_query(&mut self, sql: &str) -> QueryResult {
        let mut qr = QueryResult::new_ok();
        if !self.precheck(&mut qr) {
            return qr;
        }
        self.state = SessionState::InFlight;

        let mut mb = MessageBuilder::new(Tag::QUERY);
        mb.write_str(sql);
        self.send_backlog.push_back(mb.finish());
        if let Err(e) = self.flush().await {
            self.fail_io(&mut qr, e, true);
            return qr;
        }

        self.drain_result(&mut qr).await;
        qr
    }

    /// Sends a parameterised query over the extended protocol and drains
    /// the result. Parameter slots are encoded per the static argument
    /// types, so the `$n` count matches the tuple arity.
    pub async fn exec_param_query(&mut self, sql: &str, params: &impl ToParams) -> QueryResult {
        let slots = collect_params(params);
        self.exec_with_slots(sql, &slots).await
    }

    pub(crate) async fn exec_with_slots(&mut self, sql: &str, slots: &[Param]) -> QueryResult {
        let mut qr = QueryResult::new_ok();
        if !self.precheck(&mut qr) {
            return qr;
        }
        self.state = SessionState::InFlight;

        let mut mb = MessageBuilder::new(Tag::PARSE);
        mb.write_str(""); // unnamed statement
        mb.write_str(sql);
        mb.write_i16(slots.len() as i16);
        for slot in slots {
            mb.write_i32(slot.oid as i32);
        }

        mb.add_new(Tag::BIND);
        mb.write_str(""); // unnamed portal
        mb.write_str(""); // unnamed statement
        mb.write_i16(slots.len() as i16);
        for slot in slots {
            mb.write_i16(slot.format);
        }
        mb.write_i16(slots.len() as i16);
        for slot in slots {
            match &slot.value {
                None => mb.write_i32(-1),
                Some(v) => {
                    mb.write_i32(v.len() as i32);
                    mb.write_bytes(v);
                }
            }
        }
        mb.write_i16(1);
        mb.write_i16(0); // all result columns in text format

        mb.add_new(Tag::DESCRIBE);
        mb.write_byte(b'P');
        mb.write_str("");

        mb.add_new(Tag::EXECUTE);
        mb.write_str("");
        mb.write_i32(0); // no row limit

        mb.add_new(Tag::SYNC);
        self.send_backlog.push_back(mb.finish());
        if let Err(e) = self.flush().await {
            self.fail_io(&mut qr, e, true);
            return qr;
        }

        self.drain_result(&mut qr).await;
        qr
    }

    /// Runs a simple query and maps the rows into records, named mapping
    /// first with positional fallback.
    pub async fn exec_simple_query_as<T: FromRow>(&mut self, sql: &str) -> Result<Vec<T>> {
        let qr = self.exec_simple_query(sql).await;
        map_result(&qr)
    }

    /// Runs a parameterised query and maps the rows into records.
    pub async fn exec_param_query_as<T: FromRow>(
        &mut self,
        sql: &str,
        params: &impl ToParams,
    ) -> Result<Vec<T>> {
        let qr = self.exec_param_query(sql, params).await;
        map_result(&qr)
    }

    /// Common guard: short-circuit operations on a session that isn't in a
    /// usable state.
    pub(crate) fn precheck(&mut self, qr: &mut QueryResult) -> bool {
        if !self.connected() {
            qr.fail(ErrorKind::ConnectionClosed, "connection is closed");
            return false;
        }
        if self.state == SessionState::InFlight || self.copy_in_active || self.copy_out_active {
            qr.fail(
                ErrorKind::InvalidFuture,
                "another command is already in progress",
            );
            return false;
        }
        true
    }

    /// Maps an I/O-level error onto a query result and wrecks the session.
    fn fail_io(&mut self, qr: &mut QueryResult, e: Error, sending: bool) {
        let kind = classify_error(&e, sending);
        qr.fail(kind, e.to_string());
        self.wreck();
    }

    /// Drains backend messages into qr until ReadyForQuery.
    pub(crate) async fn drain_result(&mut self, qr: &mut QueryResult) {
        loop {
            let msg = match self.read_message().await {
                Ok(m) => m,
                Err(e) => {
                    self.fail_io(qr, e, false);
                    return;
                }
            };
            match msg.tag() {
                Tag::ROW_DESCRIPTION => {
                    match parse_row_description(&msg) {
                        Ok(cols) => {
                            // first tuples result wins; later statements of a
                            // multi-statement query just append rows
                            if qr.columns.is_empty() {
                                qr.columns = cols;
                            }
                        }
                        Err(_) => {
                            qr.fail(
                                ErrorKind::ParserTruncatedHeader,
                                "truncated RowDescription message",
                            );
                        }
                    }
                }
                Tag::DATA_ROW => match parse_data_row(&msg) {
                    Ok(row) => {
                        if qr.ok {
                            qr.rows.push(row);
                        }
                    }
                    Err((kind, text)) => {
                        qr.fail(kind, text);
                    }
                },
                Tag::COMMAND_COMPLETE => {
                    let mut r = msg.reader();
                    if let Ok(tag) = r.read_str() {
                        qr.rows_affected += rows_affected_from_tag(tag);
                    }
                }
                Tag::EMPTY_QUERY_RESPONSE => {}
                Tag::ERROR_RESPONSE => {
                    qr.fill_server_error(ServerErrorDetail::from_message(&msg));
                }
                Tag::NOTICE_RESPONSE => {
                    let detail = ServerErrorDetail::from_message(&msg);
                    warn!(%detail, "notice while draining result");
                }
                Tag::PARAMETER_STATUS => {}
                Tag::NOTIFICATION_RESPONSE => {
                    if let Some(n) = parse_notification(&msg) {
                        self.notifications.push_back(n);
                    }
                }
                Tag::PARSE_COMPLETE
                | Tag::BIND_COMPLETE
                | Tag::CLOSE_COMPLETE
                | Tag::NO_DATA
                | Tag::PARAMETER_DESCRIPTION
                | Tag::PORTAL_SUSPENDED => {}
                Tag::COPY_IN_RESPONSE => {
                    // query unexpectedly started COPY IN; refuse it so the
                    // protocol returns to a query cycle
                    let mut mb = MessageBuilder::new(Tag::COPY_FAIL);
                    mb.write_str("COPY not supported by this operation");
                    self.send_backlog.push_back(mb.finish());
                    if let Err(e) = self.flush().await {
                        self.fail_io(qr, e, true);
                        return;
                    }
                }
                Tag::COPY_OUT_RESPONSE | Tag::COPY_DATA | Tag::COPY_DONE | Tag::COPY_BOTH_RESPONSE => {
                    // drained and discarded; the terminal status arrives below
                }
                Tag::READY_FOR_QUERY => {
                    let mut r = msg.reader();
                    self.tx_status = r.read_byte();
                    if self.state == SessionState::InFlight {
                        self.state = SessionState::Idle;
                    }
                    return;
                }
                other => {
                    qr.fail(
                        ErrorKind::ProtocolCorrupt,
                        format!("unexpected {} while draining result", other),
                    );
                    self.wreck();
                    return;
                }
            }
        }
    }

    /// Pumps input and discards any orphan results, bringing the session
    /// back to a drained state if the backend already finished. Used by the
    /// pool before recycling.
    pub fn discard_pending(&mut self) -> Result<()> {
        self.pump_input()?;
        while let Some(result) = self.parser.next() {
            let msg = result?;
            match msg.tag() {
                Tag::READY_FOR_QUERY => {
                    let mut r = msg.reader();
                    self.tx_status = r.read_byte();
                    if self.state == SessionState::InFlight {
                        self.state = SessionState::Idle;
                    }
                }
                Tag::NOTIFICATION_RESPONSE => {
                    if let Some(n) = parse_notification(&msg) {
                        self.notifications.push_back(n);
                    }
                }
                _ => {
                    debug!(tag = %msg.tag(), "discarding orphan message before recycle");
                }
            }
        }
        Ok(())
    }
}

fn keepalive_from_conninfo(ci: &Conninfo) -> crate::aquifer::config::KeepaliveSettings {
    let mut ka = crate::aquifer::config::KeepaliveSettings::default();
    ka.enabled = true;
    if let Some(v) = ci.get("keepalives_idle").and_then(|v| v.parse().ok()) {
        ka.idle_seconds = v;
    }
    if let Some(v) = ci.get("keepalives_interval").and_then(|v| v.parse().ok()) {
        ka.interval_seconds = v;
    }
    if let Some(v) = ci.get("keepalives_count").and_then(|v| v.parse().ok()) {
        ka.count = v;
    }
    ka
}

/// Maps a transport error to the driver error kind. Closed sockets are
/// ConnectionClosed; other I/O problems are read/write failures.
pub(crate) fn classify_error(e: &Error, _sending: bool) -> ErrorKind {
    match e.kind() {
        LibErrorKind::ClosedError => ErrorKind::ConnectionClosed,
        LibErrorKind::IOError(_) => ErrorKind::SocketReadFailed,
        LibErrorKind::ProtocolError(_) => ErrorKind::ProtocolCorrupt,
        LibErrorKind::UTF8Error(_) => ErrorKind::ProtocolCorrupt,
        LibErrorKind::Timeout => ErrorKind::AwaitCanceled,
        _ => ErrorKind::Unknown,
    }
}

/// Parses a DataRow message into nullable text cells.
pub(crate) fn parse_data_row(
    msg: &Message,
) -> std::result::Result<Vec<Option<String>>, (ErrorKind, String)> {
    let mut r = msg.reader();
    let num_fields = r.read_i16();
    if r.has_error() {
        return Err((
            ErrorKind::ParserTruncatedRow,
            "truncated DataRow message".to_string(),
        ));
    }
    let mut row = Vec::with_capacity(num_fields.max(0) as usize);
    for i in 0..num_fields {
        let len = r.read_i32();
        if r.has_error() {
            return Err((
                ErrorKind::ParserTruncatedRow,
                format!("DataRow truncated at field {}", i),
            ));
        }
        if len < 0 {
            row.push(None); // SQL NULL
        } else {
            match r.read_bytes(len as u32) {
                Ok(bytes) => row.push(Some(String::from_utf8_lossy(bytes).into_owned())),
                Err(_) => {
                    return Err((
                        ErrorKind::ParserTruncatedField,
                        format!("DataRow field {} extends past the message end", i),
                    ));
                }
            }
        }
    }
    Ok(row)
}

/// Parses a NotificationResponse: pid, channel, payload.
pub(crate) fn parse_notification(msg: &Message) -> Option<Notification> {
    let mut r = msg.reader();
    let pid = r.read_i32();
    let channel = r.read_str().ok()?.to_string();
    let payload = r.read_str().ok()?.to_string();
    Some(Notification {
        channel,
        payload,
        pid,
    })
}

/// Converts a query result into mapped records, surfacing failures as
/// library errors.
pub fn map_result<T: FromRow>(qr: &QueryResult) -> Result<Vec<T>> {
    if !qr.ok {
        return Err(Error::new(format!("query failed ({}): {}", qr.code, qr.error)));
    }
    let mut out = Vec::with_capacity(qr.rows.len());
    for row in &qr.rows {
        out.push(T::from_row(row, &qr.columns)?);
    }
    Ok(out)
}
