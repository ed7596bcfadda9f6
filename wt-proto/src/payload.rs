//! Fixed header carried at the front of relayed test payloads.
//!
//! Four big-endian `u32` fields: `stream_id | sequence | timestamp | eof`.
//! The `stream_id` here is the application's own numbering and is unrelated
//! to the QUIC stream id the bytes travel on.

use crate::codec::Cursor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadHeader {
    pub stream_id: u32,
    pub sequence: u32,
    pub timestamp: u32,
    pub eof: u32,
}

impl PayloadHeader {
    pub const LEN: usize = 16;

    /// Parse the header from the front of `payload`. Returns `None` when
    /// fewer than [`PayloadHeader::LEN`] bytes are present.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let mut c = Cursor::new(payload);
        Some(Self {
            stream_id: c.read_u32().ok()?,
            sequence: c.read_u32().ok()?,
            timestamp: c.read_u32().ok()?,
            eof: c.read_u32().ok()?,
        })
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        for field in [self.stream_id, self.sequence, self.timestamp, self.eof] {
            buf.extend_from_slice(&field.to_be_bytes());
        }
    }

    pub fn is_eof(&self) -> bool {
        self.eof != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_big_endian_fields_and_ignores_body() {
        let mut buf = Vec::new();
        PayloadHeader {
            stream_id: 1,
            sequence: 0x0102_0304,
            timestamp: 99,
            eof: 1,
        }
        .encode(&mut buf);
        assert_eq!(&buf[..8], &[0, 0, 0, 1, 1, 2, 3, 4]);
        buf.extend_from_slice(b"opaque body");

        let h = PayloadHeader::parse(&buf).unwrap();
        assert_eq!(h.stream_id, 1);
        assert_eq!(h.sequence, 0x0102_0304);
        assert_eq!(h.timestamp, 99);
        assert!(h.is_eof());
    }

    #[test]
    fn short_payload_has_no_header() {
        assert_eq!(PayloadHeader::parse(&[0u8; 15]), None);
        assert!(PayloadHeader::parse(&[0u8; 16]).is_some());
    }
}
