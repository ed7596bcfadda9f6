//! Wire codepoints used by the session engine and the HTTP/3 adapter.
//!
//! Collected in one place so the engine never carries magic numbers.
//! Capsule and settings values follow the drafts Chrome's WebTransport
//! implementation speaks (webtrans-http3-02, masque-h3-datagram-04/05).

// ---------------------------------------------------------------------------
// HTTP/3 SETTINGS parameters
// ---------------------------------------------------------------------------

/// QPACK max dynamic table capacity.
pub const SETTINGS_QPACK_MAX_TABLE_CAPACITY: u64 = 0x01;

/// QPACK max blocked streams.
pub const SETTINGS_QPACK_BLOCKED_STREAMS: u64 = 0x07;

/// Enable extended CONNECT (RFC 9220).
pub const SETTINGS_ENABLE_CONNECT_PROTOCOL: u64 = 0x08;

/// HTTP Datagrams, stable revision (RFC 9297).
pub const SETTINGS_H3_DATAGRAM: u64 = 0x33;

/// HTTP Datagrams, draft-04 revision. Peers that send this with value 1
/// register datagram formats with capsules on the session stream.
pub const SETTINGS_H3_DATAGRAM_DRAFT04: u64 = 0xffd277;

/// WebTransport enablement (webtrans-http3-02).
pub const SETTINGS_ENABLE_WEBTRANSPORT: u64 = 0x2b603742;

/// Maximum concurrent WebTransport sessions.
pub const SETTINGS_WT_MAX_SESSIONS: u64 = 0x14e9cd29;

// ---------------------------------------------------------------------------
// HTTP/3 frame types
// ---------------------------------------------------------------------------

pub const H3_FRAME_DATA: u64 = 0x00;
pub const H3_FRAME_HEADERS: u64 = 0x01;
pub const H3_FRAME_SETTINGS: u64 = 0x04;
pub const H3_FRAME_GOAWAY: u64 = 0x07;

// ---------------------------------------------------------------------------
// Stream types and signals
// ---------------------------------------------------------------------------

pub const H3_STREAM_TYPE_CONTROL: u64 = 0x00;
pub const H3_STREAM_TYPE_PUSH: u64 = 0x01;
pub const H3_STREAM_TYPE_QPACK_ENCODER: u64 = 0x02;
pub const H3_STREAM_TYPE_QPACK_DECODER: u64 = 0x03;

/// Unidirectional WebTransport stream type.
pub const WT_UNI_STREAM_TYPE: u64 = 0x54;

/// Signal opening a bidirectional WebTransport stream.
pub const WT_BIDI_SIGNAL: u64 = 0x41;

// ---------------------------------------------------------------------------
// Capsule types
// ---------------------------------------------------------------------------

pub const CAPSULE_DATAGRAM: u64 = 0xff37a0;
pub const CAPSULE_REGISTER_DATAGRAM_CONTEXT: u64 = 0xff37a1;
pub const CAPSULE_REGISTER_DATAGRAM_NO_CONTEXT: u64 = 0xff37a2;
pub const CAPSULE_CLOSE_DATAGRAM_CONTEXT: u64 = 0xff37a3;
pub const CAPSULE_CLOSE_WEBTRANSPORT_SESSION: u64 = 0x2843;

/// Datagram format type a REGISTER_DATAGRAM_NO_CONTEXT capsule must carry.
pub const WEBTRANSPORT_DATAGRAM_FORMAT_TYPE: u64 = 0xff7c00;

// ---------------------------------------------------------------------------
// HTTP/3 error codes
// ---------------------------------------------------------------------------

pub const H3_NO_ERROR: u64 = 0x0100;
pub const H3_GENERAL_PROTOCOL_ERROR: u64 = 0x0101;
pub const H3_INTERNAL_ERROR: u64 = 0x0102;
pub const H3_STREAM_CREATION_ERROR: u64 = 0x0103;
pub const H3_FRAME_UNEXPECTED: u64 = 0x0105;
pub const H3_FRAME_ERROR: u64 = 0x0106;
pub const H3_MESSAGE_ERROR: u64 = 0x010e;
