//! What the engine asks of the QUIC/HTTP/3 layer underneath it.

use thiserror::Error;

pub type TransportResult<T> = std::result::Result<T, TransportError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("unknown stream {0}")]
    UnknownStream(u64),

    #[error("stream {0} is not writable")]
    NotWritable(u64),

    #[error("no stream credit available")]
    StreamLimit,

    #[error("connection closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

/// Outbound half of one connection.
///
/// Methods take `&self`; implementations queue work on the connection's
/// own I/O machinery.
pub trait Transport {
    fn send_headers(
        &self,
        stream_id: u64,
        headers: &[(String, String)],
        end_stream: bool,
    ) -> TransportResult<()>;

    /// Send `data` in an HTTP DATA frame on a request stream.
    fn send_data(&self, stream_id: u64, data: &[u8], end_stream: bool) -> TransportResult<()>;

    /// Write raw bytes on a QUIC stream.
    fn send_stream_data(&self, stream_id: u64, data: &[u8], end_stream: bool)
        -> TransportResult<()>;

    /// Open a stream bound to `session_id` and write its preamble.
    fn create_webtransport_stream(
        &self,
        session_id: u64,
        unidirectional: bool,
    ) -> TransportResult<u64>;

    fn send_datagram(&self, flow_id: u64, data: &[u8]) -> TransportResult<()>;

    /// STOP_SENDING.
    fn stop_stream(&self, stream_id: u64, code: u64) -> TransportResult<()>;

    /// RESET_STREAM.
    fn reset_stream(&self, stream_id: u64, code: u64) -> TransportResult<()>;

    fn close(&self, error_code: u64, reason: &str);
}
