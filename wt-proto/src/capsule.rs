//! HTTP capsules (`type | length | payload`) carried on the session stream.

use crate::codec::Cursor;
use crate::error::{Error, Result};
use crate::frame;
use crate::varint;

/// A decoded capsule. The payload is kept opaque until classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capsule {
    pub capsule_type: u64,
    pub payload: Vec<u8>,
}

/// Code and reason carried by CLOSE_WEBTRANSPORT_SESSION.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u32,
    pub reason: String,
}

impl CloseInfo {
    pub fn new(code: u32, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// What a capsule means to the session control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCapsule {
    RegisterDatagramNoContext { format_type: u64 },
    CloseWebTransportSession(CloseInfo),
    /// Per-context datagram capsules; never valid on a WebTransport session.
    Unimplemented(u64),
    /// Anything else. Skipped.
    Unknown(u64),
}

impl Capsule {
    pub fn new(capsule_type: u64, payload: Vec<u8>) -> Self {
        Self {
            capsule_type,
            payload,
        }
    }

    pub fn close_session(info: &CloseInfo) -> Self {
        let mut payload = Vec::with_capacity(4 + info.reason.len());
        payload.extend_from_slice(&info.code.to_be_bytes());
        payload.extend_from_slice(info.reason.as_bytes());
        Self::new(frame::CAPSULE_CLOSE_WEBTRANSPORT_SESSION, payload)
    }

    pub fn register_datagram_no_context(format_type: u64) -> Result<Self> {
        Ok(Self::new(
            frame::CAPSULE_REGISTER_DATAGRAM_NO_CONTEXT,
            varint::to_vec(format_type)?,
        ))
    }

    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<usize> {
        let start = buf.len();
        varint::write(self.capsule_type, buf)?;
        varint::write(self.payload.len() as u64, buf)?;
        buf.extend_from_slice(&self.payload);
        Ok(buf.len() - start)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Decode one capsule from the front of `buf`, returning it and the bytes
    /// consumed. [`Error::BufferTooShort`] means more input is needed.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut cursor = Cursor::new(buf);
        let capsule_type = cursor.read_varint()?;
        let len = cursor.read_varint()?;
        let len = usize::try_from(len)
            .map_err(|_| Error::Capsule(format!("capsule length {len} too large")))?;
        let payload = cursor.read_bytes(len)?.to_vec();
        Ok((Self::new(capsule_type, payload), cursor.position()))
    }

    /// Interpret the capsule for the session control plane.
    pub fn classify(&self) -> Result<ControlCapsule> {
        match self.capsule_type {
            frame::CAPSULE_REGISTER_DATAGRAM_NO_CONTEXT => {
                let format_type = Cursor::new(&self.payload).read_varint().map_err(|_| {
                    Error::Capsule("REGISTER_DATAGRAM_NO_CONTEXT without a format type".into())
                })?;
                Ok(ControlCapsule::RegisterDatagramNoContext { format_type })
            }
            frame::CAPSULE_CLOSE_WEBTRANSPORT_SESSION => {
                let mut cursor = Cursor::new(&self.payload);
                let code = cursor.read_u32().map_err(|_| {
                    Error::Capsule("CLOSE_WEBTRANSPORT_SESSION payload too short".into())
                })?;
                let reason = std::str::from_utf8(cursor.remaining_bytes())
                    .map_err(|_| {
                        Error::Capsule("CLOSE_WEBTRANSPORT_SESSION reason is not UTF-8".into())
                    })?
                    .to_owned();
                Ok(ControlCapsule::CloseWebTransportSession(CloseInfo {
                    code,
                    reason,
                }))
            }
            frame::CAPSULE_DATAGRAM
            | frame::CAPSULE_REGISTER_DATAGRAM_CONTEXT
            | frame::CAPSULE_CLOSE_DATAGRAM_CONTEXT => {
                Ok(ControlCapsule::Unimplemented(self.capsule_type))
            }
            other => Ok(ControlCapsule::Unknown(other)),
        }
    }
}

/// Incremental decoder bound to one session stream.
///
/// Bytes are appended in arrival order; complete capsules are pulled with
/// [`CapsuleDecoder::next_capsule`]. Once [`CapsuleDecoder::finish`] has been
/// called, leftover bytes that do not form a whole capsule are an error.
/// A capsule declaring more than `max_len` payload bytes is rejected as soon
/// as its header is buffered.
#[derive(Debug)]
pub struct CapsuleDecoder {
    buf: Vec<u8>,
    finished: bool,
    max_len: usize,
}

/// Largest capsule payload [`CapsuleDecoder::new`] accepts.
pub const DEFAULT_MAX_CAPSULE_LEN: usize = 65536;

impl Default for CapsuleDecoder {
    fn default() -> Self {
        Self::with_max_len(DEFAULT_MAX_CAPSULE_LEN)
    }
}

impl CapsuleDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            finished: false,
            max_len,
        }
    }

    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        if self.finished {
            if data.is_empty() {
                return Ok(());
            }
            return Err(Error::DecoderFinalized);
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Mark the end of the stream. Only the first call has any effect.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Err(Error::DecoderFinalized);
        }
        self.finished = true;
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Buffered bytes not yet returned as a capsule.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn next_capsule(&mut self) -> Result<Option<Capsule>> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        if let Some(len) = declared_len(&self.buf) {
            if len > self.max_len as u64 {
                return Err(Error::Capsule(format!(
                    "capsule length {len} exceeds {}",
                    self.max_len
                )));
            }
        }
        match Capsule::decode(&self.buf) {
            Ok((capsule, consumed)) => {
                self.buf.drain(..consumed);
                Ok(Some(capsule))
            }
            Err(Error::BufferTooShort) if self.finished => {
                Err(Error::TruncatedCapsule(self.buf.len()))
            }
            Err(Error::BufferTooShort) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn declared_len(buf: &[u8]) -> Option<u64> {
    let mut cursor = Cursor::new(buf);
    cursor.read_varint().ok()?;
    cursor.read_varint().ok()
}
