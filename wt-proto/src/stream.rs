//! QUIC stream id classification and the WebTransport stream preamble.

use crate::error::{Error, Result};
use crate::frame;
use crate::varint::{self, VarintDecoder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Unidirectional,
    Bidirectional,
}

impl StreamKind {
    pub fn of(stream_id: u64) -> Self {
        if is_unidirectional(stream_id) {
            Self::Unidirectional
        } else {
            Self::Bidirectional
        }
    }

    fn signal(self) -> u64 {
        match self {
            Self::Unidirectional => frame::WT_UNI_STREAM_TYPE,
            Self::Bidirectional => frame::WT_BIDI_SIGNAL,
        }
    }
}

/// Bit 0x2 of a QUIC stream id marks a unidirectional stream.
pub fn is_unidirectional(stream_id: u64) -> bool {
    stream_id & 0x02 != 0
}

pub fn is_bidi(stream_id: u64) -> bool {
    !is_unidirectional(stream_id)
}

pub fn is_client_initiated(stream_id: u64) -> bool {
    stream_id & 0x01 == 0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PreambleState {
    Signal,
    SessionId,
    Done,
}

/// Incremental parser for the `signal | session_id` prefix on an incoming
/// WebTransport stream.
#[derive(Debug, Clone)]
pub struct StreamPreamble {
    kind: StreamKind,
    state: PreambleState,
    decoder: VarintDecoder,
    session_id: Option<u64>,
}

impl StreamPreamble {
    pub fn new(kind: StreamKind) -> Self {
        Self {
            kind,
            state: PreambleState::Signal,
            decoder: VarintDecoder::new(),
            session_id: None,
        }
    }

    /// Start after the signal, for streams whose type byte the caller has
    /// already consumed while classifying.
    pub fn after_signal(kind: StreamKind) -> Self {
        Self {
            state: PreambleState::SessionId,
            ..Self::new(kind)
        }
    }

    pub fn session_id(&self) -> Option<u64> {
        self.session_id
    }

    pub fn is_complete(&self) -> bool {
        self.state == PreambleState::Done
    }

    /// Consume preamble bytes from `data`, returning how many were used. The
    /// rest of `data` is application payload.
    pub fn feed(&mut self, data: &[u8]) -> Result<usize> {
        let mut consumed = 0;
        for &byte in data {
            match self.state {
                PreambleState::Done => break,
                PreambleState::Signal => {
                    consumed += 1;
                    if let Some(signal) = self.decoder.feed(byte) {
                        let expected = self.kind.signal();
                        if signal != expected {
                            return Err(Error::UnexpectedStreamSignal {
                                found: signal,
                                expected,
                            });
                        }
                        self.decoder = VarintDecoder::new();
                        self.state = PreambleState::SessionId;
                    }
                }
                PreambleState::SessionId => {
                    consumed += 1;
                    if let Some(sid) = self.decoder.feed(byte) {
                        self.session_id = Some(sid);
                        self.state = PreambleState::Done;
                    }
                }
            }
        }
        Ok(consumed)
    }
}

/// Preamble written at the start of an outgoing WebTransport stream.
pub fn encode_stream_header(session_id: u64, kind: StreamKind) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(16);
    varint::write(kind.signal(), &mut buf)?;
    varint::write(session_id, &mut buf)?;
    Ok(buf)
}
