use std::convert::TryInto;
use std::num::NonZeroU32;

use bytes::{Buf, BytesMut};

use crate::aquifer::common::{Error, Result};
use crate::aquifer::pg::protocol::{Message, Tag};

pub const MIN_MESSAGE_LEN: u32 = 5;

pub struct Header {
    pub tag: Tag,
    pub length: NonZeroU32,
}

impl Header {
    pub fn parse(bytes: &[u8]) -> Result<Option<Self>> {
        if (bytes.len() as u32) < MIN_MESSAGE_LEN {
            return Ok(None);
        }
        let tag = Tag::new(bytes[0]);
        if !tag.is_known() {
            return Err(Error::protocol_error(format!(
                "unknown message tag '{}'",
                bytes[0] as char
            )));
        }
        let len = u32::from_be_bytes((&bytes[1..5]).try_into().unwrap());
        Ok(Some(Header {
            tag,
            length: NonZeroU32::new(len)
                .ok_or_else(|| Error::protocol_error("length of message frame cannot be 0"))?,
        }))
    }

    /// Total frame length including the tag byte.
    pub fn len(&self) -> u32 {
        self.length.get() + 1
    }
}

/// Accumulates socket reads and splits off complete protocol messages.
pub struct MessageParser {
    data: BytesMut,
}

impl MessageParser {
    pub fn new(recv_buffer_size: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(recv_buffer_size),
        }
    }

    /// Returns the next complete message, None if more bytes are needed,
    /// or an error if the buffered bytes cannot be a valid frame.
    pub fn next(&mut self) -> Option<Result<Message>> {
        match Header::parse(self.data.chunk()) {
            Err(e) => Some(Err(e)),
            Ok(None) => None,
            Ok(Some(hdr)) => {
                let msg_len = hdr.len();
                if msg_len <= self.data.len() as u32 {
                    // We have the full message, split it off and return it
                    let msg = Message::new(self.data.split_to(msg_len as usize).freeze());
                    Some(Ok(msg))
                } else {
                    // We don't have the message, make sure buffer is large enough for it
                    self.data.reserve(msg_len as usize - self.data.len());
                    None
                }
            }
        }
    }

    /// True if a partial frame is sitting in the buffer.
    pub fn has_partial(&self) -> bool {
        !self.data.is_empty()
    }

    pub fn bytes_mut(&mut self) -> &mut BytesMut {
        &mut self.data
    }

    /// Drops any buffered bytes. Used when a session is being reset after
    /// a protocol error, where the remaining bytes cannot be trusted.
    pub fn clear(&mut self) {
        self.data.clear();
    }
}
