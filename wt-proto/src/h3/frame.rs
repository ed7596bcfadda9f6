use crate::codec::Cursor;
use crate::error::{Error, Result};
use crate::frame::{H3_FRAME_DATA, H3_FRAME_HEADERS, H3_FRAME_SETTINGS};
use crate::varint;

use super::Settings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H3Frame {
    pub frame_type: u64,
    pub payload: Vec<u8>,
}

impl H3Frame {
    pub fn new(frame_type: u64, payload: Vec<u8>) -> Self {
        Self {
            frame_type,
            payload,
        }
    }

    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<usize> {
        let start = buf.len();
        encode_frame_header(self.frame_type, self.payload.len(), buf)?;
        buf.extend_from_slice(&self.payload);
        Ok(buf.len() - start)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.payload.len() + 4);
        self.encode(&mut buf)?;
        Ok(buf)
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut cursor = Cursor::new(buf);
        let frame_type = cursor.read_varint()?;
        let len = cursor.read_varint()?;
        let len = usize::try_from(len)
            .map_err(|_| Error::H3Frame(format!("frame length {len} too large")))?;
        let payload = cursor.read_bytes(len)?.to_vec();
        Ok((Self::new(frame_type, payload), cursor.position()))
    }
}

/// Write just `type | length`, for callers that send the payload separately.
pub fn encode_frame_header(frame_type: u64, len: usize, buf: &mut Vec<u8>) -> Result<()> {
    varint::write(frame_type, buf)?;
    varint::write(len as u64, buf)?;
    Ok(())
}

pub fn data_frame(payload: &[u8]) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(payload.len() + 9);
    encode_frame_header(H3_FRAME_DATA, payload.len(), &mut buf)?;
    buf.extend_from_slice(payload);
    Ok(buf)
}

pub fn headers_frame(block: Vec<u8>) -> Result<Vec<u8>> {
    H3Frame::new(H3_FRAME_HEADERS, block).to_bytes()
}

pub fn encode_settings(settings: &Settings) -> Result<Vec<u8>> {
    let mut payload = Vec::new();
    for (&id, &value) in settings {
        varint::write(id, &mut payload)?;
        varint::write(value, &mut payload)?;
    }
    H3Frame::new(H3_FRAME_SETTINGS, payload).to_bytes()
}

/// Parse a SETTINGS payload. A repeated identifier is an error.
pub fn decode_settings(payload: &[u8]) -> Result<Settings> {
    let mut settings = Settings::new();
    let mut cursor = Cursor::new(payload);
    while cursor.remaining() > 0 {
        let id = cursor.read_varint()?;
        let value = cursor.read_varint()?;
        if settings.insert(id, value).is_some() {
            return Err(Error::H3Frame(format!("duplicate setting {id:#x}")));
        }
    }
    Ok(settings)
}

/// Incremental frame parser for one stream.
#[derive(Debug, Default)]
pub struct FrameParser {
    buf: Vec<u8>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn next_frame(&mut self) -> Result<Option<H3Frame>> {
        match H3Frame::decode(&self.buf) {
            Ok((frame, consumed)) => {
                self.buf.drain(..consumed);
                Ok(Some(frame))
            }
            Err(Error::BufferTooShort) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_round_trip() {
        let settings = Settings::from([(0x01, 0), (0x33, 1), (0xffd277, 1)]);
        let encoded = encode_settings(&settings).unwrap();
        let (frame, consumed) = H3Frame::decode(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(frame.frame_type, H3_FRAME_SETTINGS);
        assert_eq!(decode_settings(&frame.payload).unwrap(), settings);
    }

    #[test]
    fn duplicate_setting_rejected() {
        assert!(matches!(
            decode_settings(&[0x33, 0x01, 0x33, 0x00]),
            Err(Error::H3Frame(_))
        ));
    }

    #[test]
    fn data_frame_layout() {
        assert_eq!(data_frame(b"abc").unwrap(), vec![0x00, 0x03, b'a', b'b', b'c']);
    }

    #[test]
    fn parser_yields_frames_as_they_complete() {
        let mut buf = data_frame(&[10, 20, 30]).unwrap();
        H3Frame::new(0x21, vec![]).encode(&mut buf).unwrap();

        let mut parser = FrameParser::new();
        let mut frames = Vec::new();
        for b in &buf {
            parser.push(std::slice::from_ref(b));
            while let Some(f) = parser.next_frame().unwrap() {
                frames.push(f);
            }
        }
        assert_eq!(
            frames,
            vec![
                H3Frame::new(H3_FRAME_DATA, vec![10, 20, 30]),
                H3Frame::new(0x21, vec![])
            ]
        );
        assert!(parser.is_empty());
    }
}
