//! Engine errors and their mapping onto HTTP/3 error codes.

use thiserror::Error;
use wt_proto::frame;

use crate::transport::TransportError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The request on `stream_id` is answered with an HTTP error status.
    /// The connection stays up.
    #[error("request on stream {stream_id} rejected with status {status}")]
    Request { stream_id: u64, status: u16 },

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error(transparent)]
    Wire(#[from] wt_proto::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl Error {
    /// Fatal errors terminate the QUIC connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ProtocolViolation(_) | Self::Wire(_))
    }

    pub fn h3_code(&self) -> u64 {
        match self {
            Self::Request { .. } => frame::H3_NO_ERROR,
            Self::ProtocolViolation(_) | Self::Wire(_) => frame::H3_GENERAL_PROTOCOL_ERROR,
            Self::Transport(_) => frame::H3_INTERNAL_ERROR,
        }
    }
}
