//! Wire-level decode and encode errors.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("buffer too short")]
    BufferTooShort,

    #[error("varint exceeds maximum value (2^62 - 1)")]
    VarintOverflow,

    // -- capsules --------------------------------------------------------------
    #[error("capsule error: {0}")]
    Capsule(String),

    #[error("session stream ended inside a capsule ({0} bytes left over)")]
    TruncatedCapsule(usize),

    #[error("capsule decoder already finalized")]
    DecoderFinalized,

    // -- HTTP/3 / QPACK ----------------------------------------------------------
    #[error("H3 frame error: {0}")]
    H3Frame(String),

    #[error("QPACK error: {0}")]
    Qpack(String),

    #[error("unexpected stream signal: {found:#x}, expected {expected:#x}")]
    UnexpectedStreamSignal { found: u64, expected: u64 },
}
