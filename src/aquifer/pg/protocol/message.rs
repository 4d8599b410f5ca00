use bytes::{Buf, Bytes};

use crate::aquifer::pg::protocol::message_parser::Header;
use crate::aquifer::pg::protocol::{MessageReader, Tag};

/// A single complete protocol message, framed as
/// {type: 1 byte, length: 4 bytes big-endian including itself, payload}.
#[derive(Clone, Default)]
pub struct Message {
    data: Bytes,
}

impl Message {
    pub fn new(buf: Bytes) -> Self {
        Message { data: buf }
    }

    /// Returns the message Tag. Panics if self.is_empty().
    pub fn tag(&self) -> Tag {
        Tag::new(*self.data.get(0).expect("empty Message"))
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Length of the Message including tag byte and length frame.
    pub fn len(&self) -> u32 {
        self.data.len() as u32
    }

    /// Returns the message Header. Panics if self.is_empty().
    pub fn header(&self) -> Header {
        Header::parse(self.data.chunk())
            .expect("invalid Message")
            .expect("empty Message")
    }

    pub fn as_slice(&self) -> &[u8] {
        self.data.chunk()
    }

    /// Offset of the first payload byte (skips tag and length frame).
    pub fn body_start(&self) -> u32 {
        5
    }

    pub fn reader(&self) -> MessageReader {
        MessageReader::new(self)
    }

    /// Consumes the Message and returns the underlying buffer.
    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            f.write_str("Message{empty}")
        } else {
            write!(f, "Message{{{}, len={}}}", self.tag(), self.len())
        }
    }
}
