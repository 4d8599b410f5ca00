use std::fmt::{Debug, Display, Formatter};

pub const SSL_ALLOWED: u8 = b'S';
pub const SSL_NOT_ALLOWED: u8 = b'N';
pub const SSL_REQUEST: i32 = 80877103;
pub const PROTOCOL_VERSION: i32 = 196608;

/// Tag defines the Postgres protocol message type tag bytes.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Tag(u8);

impl Tag {
    // Startup, CancelRequest, SSLRequest have no tag byte
    pub const UNTAGGED: Tag = Tag(0);
    // Frontend
    pub const BIND: Tag = Tag(b'B');
    pub const CLOSE: Tag = Tag(b'C'); // close prepared statement or portal
    pub const COPY_FAIL: Tag = Tag(b'f');
    pub const DESCRIBE: Tag = Tag(b'D');
    pub const EXECUTE: Tag = Tag(b'E');
    pub const FLUSH: Tag = Tag(b'H');
    pub const PARSE: Tag = Tag(b'P');
    pub const PASSWORD_MESSAGE: Tag = Tag(b'p');
    pub const QUERY: Tag = Tag(b'Q');
    pub const SYNC: Tag = Tag(b'S');
    pub const TERMINATE: Tag = Tag(b'X');
    // Frontend + Backend
    pub const COPY_DATA: Tag = Tag(b'd');
    pub const COPY_DONE: Tag = Tag(b'c');
    // Backend
    pub const AUTHENTICATION: Tag = Tag(b'R');
    pub const BACKEND_KEY_DATA: Tag = Tag(b'K');
    pub const BIND_COMPLETE: Tag = Tag(b'2');
    pub const CLOSE_COMPLETE: Tag = Tag(b'3');
    pub const COMMAND_COMPLETE: Tag = Tag(b'C');
    pub const COPY_IN_RESPONSE: Tag = Tag(b'G');
    pub const COPY_OUT_RESPONSE: Tag = Tag(b'H');
    pub const COPY_BOTH_RESPONSE: Tag = Tag(b'W');
    pub const DATA_ROW: Tag = Tag(b'D');
    pub const EMPTY_QUERY_RESPONSE: Tag = Tag(b'I');
    pub const NEGOTIATE_PROTOCOL_VERSION: Tag = Tag(b'v');
    pub const NO_DATA: Tag = Tag(b'n');
    pub const PARAMETER_DESCRIPTION: Tag = Tag(b't');
    pub const PARSE_COMPLETE: Tag = Tag(b'1');
    pub const PORTAL_SUSPENDED: Tag = Tag(b's');
    pub const READY_FOR_QUERY: Tag = Tag(b'Z');
    pub const ROW_DESCRIPTION: Tag = Tag(b'T');
    // Backend async messages (can also be synchronous, depending on context)
    pub const ERROR_RESPONSE: Tag = Tag(b'E');
    pub const PARAMETER_STATUS: Tag = Tag(b'S');
    pub const NOTICE_RESPONSE: Tag = Tag(b'N');
    pub const NOTIFICATION_RESPONSE: Tag = Tag(b'A');

    pub const fn new(b: u8) -> Self {
        Tag(b)
    }

    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// Backend message name for diagnostics. Tags are context-dependent
    /// (the same byte means different things frontend vs backend); the
    /// driver only ever logs messages it received, so backend names win.
    pub fn backend_name(&self) -> &'static str {
        match self.0 {
            0 => "Untagged",
            b'R' => "Authentication",
            b'K' => "BackendKeyData",
            b'2' => "BindComplete",
            b'3' => "CloseComplete",
            b'C' => "CommandComplete",
            b'G' => "CopyInResponse",
            b'H' => "CopyOutResponse",
            b'W' => "CopyBothResponse",
            b'd' => "CopyData",
            b'c' => "CopyDone",
            b'D' => "DataRow",
            b'I' => "EmptyQueryResponse",
            b'E' => "ErrorResponse",
            b'v' => "NegotiateProtocolVersion",
            b'n' => "NoData",
            b'N' => "NoticeResponse",
            b'A' => "NotificationResponse",
            b't' => "ParameterDescription",
            b'S' => "ParameterStatus",
            b'1' => "ParseComplete",
            b's' => "PortalSuspended",
            b'Z' => "ReadyForQuery",
            b'T' => "RowDescription",
            _ => "Unknown",
        }
    }

    /// Returns true for tag bytes the backend can legitimately send.
    pub fn is_known_backend(&self) -> bool {
        self.backend_name() != "Unknown"
    }

    /// Returns true for any tag byte defined by the protocol, in either
    /// direction. Framing is shared between the directions, so the parser
    /// accepts the union and leaves direction checks to its caller.
    pub fn is_known(&self) -> bool {
        self.is_known_backend() || matches!(self.0, b'B' | b'f' | b'F' | b'P' | b'p' | b'Q' | b'X')
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = self.backend_name();
        if name == "Unknown" {
            write!(f, "Unknown message tag '{}'", self.0 as char)
        } else {
            f.write_str(name)
        }
    }
}

impl Debug for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}
