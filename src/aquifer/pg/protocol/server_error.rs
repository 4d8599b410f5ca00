use std::fmt;
use std::fmt::{Display, Formatter};

use crate::aquifer::pg::protocol::sqlstate::SqlStateClass;
use crate::aquifer::pg::protocol::Message;

// ErrorResponse / NoticeResponse field tags we extract.
// Remaining tags (position, schema, table, ...) are skipped.
const FIELD_SEVERITY: u8 = b'S';
const FIELD_CODE: u8 = b'C';
const FIELD_MESSAGE: u8 = b'M';
const FIELD_DETAIL: u8 = b'D';
const FIELD_HINT: u8 = b'H';

/// Structured detail of a server ErrorResponse or NoticeResponse.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ServerErrorDetail {
    pub severity: String,
    pub sqlstate: String,
    pub message: String,
    pub detail: String,
    pub hint: String,
}

impl ServerErrorDetail {
    /// Parses the tagged, NUL-terminated field list of an ErrorResponse
    /// payload. Unknown tags are skipped; a 0 tag terminates the list.
    pub fn parse_fields(payload: &[u8]) -> ServerErrorDetail {
        let mut out = ServerErrorDetail::default();
        let mut rest = payload;
        loop {
            let (tag, after_tag) = match rest.split_first() {
                Some((&t, r)) if t != 0 => (t, r),
                _ => break,
            };
            let end = match memchr::memchr(0, after_tag) {
                Some(i) => i,
                None => break, // truncated field, keep what we have
            };
            let value = String::from_utf8_lossy(&after_tag[..end]).into_owned();
            match tag {
                FIELD_SEVERITY => out.severity = value,
                FIELD_CODE => out.sqlstate = value,
                FIELD_MESSAGE => out.message = value,
                FIELD_DETAIL => out.detail = value,
                FIELD_HINT => out.hint = value,
                _ => {}
            }
            rest = &after_tag[end + 1..];
        }
        out
    }

    /// Parses an ErrorResponse or NoticeResponse message.
    pub fn from_message(msg: &Message) -> ServerErrorDetail {
        Self::parse_fields(&msg.as_slice()[msg.body_start() as usize..])
    }

    pub fn category(&self) -> SqlStateClass {
        SqlStateClass::classify(&self.sqlstate)
    }
}

impl Display for ServerErrorDetail {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.severity, self.message, self.sqlstate)?;
        if !self.detail.is_empty() {
            write!(f, " detail: {}", self.detail)?;
        }
        if !self.hint.is_empty() {
            write!(f, " hint: {}", self.hint)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(fields: &[(u8, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        for (tag, value) in fields {
            buf.push(*tag);
            buf.extend_from_slice(value.as_bytes());
            buf.push(0);
        }
        buf.push(0);
        buf
    }

    #[test]
    fn test_parse_fields() {
        let buf = payload(&[
            (b'S', "ERROR"),
            (b'V', "ERROR"), // unknown to us, skipped
            (b'C', "23505"),
            (b'M', "duplicate key value violates unique constraint \"users_pkey\""),
            (b'D', "Key (id)=(1) already exists."),
            (b'F', "nbtinsert.c"),
        ]);
        let detail = ServerErrorDetail::parse_fields(&buf);
        assert_eq!(detail.severity, "ERROR");
        assert_eq!(detail.sqlstate, "23505");
        assert!(detail.message.starts_with("duplicate key"));
        assert_eq!(detail.detail, "Key (id)=(1) already exists.");
        assert_eq!(detail.hint, "");
        assert_eq!(detail.category(), SqlStateClass::UniqueViolation);
    }

    #[test]
    fn test_parse_stops_at_terminator() {
        let mut buf = payload(&[(b'C', "40P01")]);
        buf.extend_from_slice(&[b'M', b'x', 0]); // after the terminator, ignored
        let detail = ServerErrorDetail::parse_fields(&buf);
        assert_eq!(detail.sqlstate, "40P01");
        assert_eq!(detail.message, "");
    }

    #[test]
    fn test_parse_truncated_field() {
        let buf = vec![b'C', b'4', b'0']; // no NUL
        let detail = ServerErrorDetail::parse_fields(&buf);
        assert_eq!(detail.sqlstate, "");
    }
}
