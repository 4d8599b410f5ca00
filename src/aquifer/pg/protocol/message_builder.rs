use bytes::{BufMut, Bytes, BytesMut};

use crate::aquifer::pg::protocol::Tag;

/// Builds one or more framed protocol messages into a single buffer.
/// The length frame of the current message is back-patched on add_new/finish.
pub struct MessageBuilder {
    data: BytesMut,
    start: usize, // start position of current message being built
}

impl MessageBuilder {
    pub fn new(tag: Tag) -> Self {
        let mut builder = MessageBuilder {
            data: BytesMut::with_capacity(256), // typically we build short messages
            start: 0,
        };
        builder.start_message(tag);
        builder
    }

    /// Start building an untagged message (startup packet, SSLRequest).
    pub fn new_untagged() -> Self {
        let mut builder = MessageBuilder {
            data: BytesMut::with_capacity(256),
            start: 0,
        };
        builder.data.put_i32(0);
        builder
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Completes the current message and starts a new one with the given tag.
    pub fn add_new(&mut self, tag: Tag) {
        self.complete_message();
        self.start = self.data.len();
        self.start_message(tag);
    }

    /// Completes the current message and returns the whole buffer.
    pub fn finish(mut self) -> Bytes {
        self.complete_message();
        self.data.freeze()
    }

    fn start_message(&mut self, tag: Tag) {
        if tag != Tag::UNTAGGED {
            self.data.put_u8(tag.as_u8());
        }
        self.data.put_i32(0); // length placeholder
    }

    fn complete_message(&mut self) {
        let end = self.data.len();
        // untagged messages have the length frame first
        let len_at = if self.data[self.start] == 0 || end - self.start < 5 {
            self.start
        } else {
            self.start + 1
        };
        let frame_len = (end - len_at) as i32;
        self.data[len_at..len_at + 4].copy_from_slice(&frame_len.to_be_bytes());
    }

    pub fn write_byte(&mut self, b: u8) {
        self.data.put_u8(b);
    }

    /// Writes a NUL-terminated string.
    pub fn write_str(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
        self.write_byte(0);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn write_i16(&mut self, i: i16) {
        self.data.put_i16(i);
    }

    pub fn write_i32(&mut self, i: i32) {
        self.data.put_i32(i);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_frame() {
        let mut mb = MessageBuilder::new(Tag::QUERY);
        mb.write_str("SELECT 1");
        let buf = mb.finish();
        assert_eq!(buf[0], b'Q');
        // length excludes the tag byte, includes itself and the NUL
        assert_eq!(&buf[1..5], &13i32.to_be_bytes());
        assert_eq!(&buf[5..13], b"SELECT 1");
        assert_eq!(buf[13], 0);
    }

    #[test]
    fn test_untagged_frame() {
        let mut mb = MessageBuilder::new_untagged();
        mb.write_i32(196608);
        let buf = mb.finish();
        assert_eq!(&buf[0..4], &8i32.to_be_bytes());
    }

    #[test]
    fn test_multiple_messages() {
        let mut mb = MessageBuilder::new(Tag::COPY_DONE);
        mb.add_new(Tag::SYNC);
        let buf = mb.finish();
        assert_eq!(buf.len(), 10);
        assert_eq!(buf[0], b'c');
        assert_eq!(buf[5], b'S');
    }
}
