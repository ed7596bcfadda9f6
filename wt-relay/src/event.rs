//! Events a transport adapter feeds into the engine.

use wt_proto::Settings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuicEvent {
    /// The handshake completed. HTTP/3 state is created here, so H3 events
    /// delivered before it are ignored.
    ProtocolNegotiated { alpn: Option<String> },
    StreamReset { stream_id: u64, error_code: u64 },
    ConnectionTerminated { error_code: u64, reason: String },
    H3(H3Event),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum H3Event {
    SettingsReceived(Settings),
    HeadersReceived {
        stream_id: u64,
        headers: Vec<(String, String)>,
        stream_ended: bool,
    },
    /// HTTP DATA frame payload on a request stream.
    DataReceived {
        stream_id: u64,
        data: Vec<u8>,
        stream_ended: bool,
    },
    WebTransportStreamDataReceived {
        stream_id: u64,
        session_id: u64,
        data: Vec<u8>,
        stream_ended: bool,
    },
    DatagramReceived { flow_id: u64, data: Vec<u8> },
}

impl From<H3Event> for QuicEvent {
    fn from(event: H3Event) -> Self {
        Self::H3(event)
    }
}
