//! The slice of HTTP/3 the server adapter needs: frames, SETTINGS and a
//! static-table QPACK codec.

pub mod frame;
pub mod qpack;

use std::collections::BTreeMap;

use crate::frame::{
    SETTINGS_ENABLE_CONNECT_PROTOCOL, SETTINGS_ENABLE_WEBTRANSPORT, SETTINGS_H3_DATAGRAM,
    SETTINGS_QPACK_BLOCKED_STREAMS, SETTINGS_QPACK_MAX_TABLE_CAPACITY, SETTINGS_WT_MAX_SESSIONS,
};

/// HTTP/3 SETTINGS as an identifier to value map.
pub type Settings = BTreeMap<u64, u64>;

/// Settings a WebTransport server sends before any negotiation-specific
/// additions.
pub fn server_settings() -> Settings {
    Settings::from([
        (SETTINGS_QPACK_MAX_TABLE_CAPACITY, 0),
        (SETTINGS_QPACK_BLOCKED_STREAMS, 0),
        (SETTINGS_ENABLE_CONNECT_PROTOCOL, 1),
        (SETTINGS_H3_DATAGRAM, 1),
        (SETTINGS_ENABLE_WEBTRANSPORT, 1),
        (SETTINGS_WT_MAX_SESSIONS, 1),
    ])
}

/// Look up a header by name; the last occurrence wins.
pub fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .rev()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}
