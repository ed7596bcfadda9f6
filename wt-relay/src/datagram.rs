//! HTTP Datagram capability negotiation.
//!
//! Peers speaking draft-04 HTTP Datagrams advertise `0xffd277 = 1` and must
//! register the WebTransport datagram format with a capsule before any
//! datagram is accepted. Peers that never advertise it cannot send that
//! capsule, so their datagrams are allowed from the start.

use tracing::debug;
use wt_proto::frame::{SETTINGS_H3_DATAGRAM, SETTINGS_H3_DATAGRAM_DRAFT04};
use wt_proto::Settings;

#[derive(Debug, Default, Clone)]
pub struct DatagramNegotiator {
    draft04: bool,
    peer_settings: Option<Settings>,
}

impl DatagramNegotiator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the peer's SETTINGS. The draft identifier with value 1 implies
    /// the stable HTTP Datagram setting, which is inserted into `settings`.
    pub fn validate_peer_settings(&mut self, settings: &mut Settings) {
        if settings.get(&SETTINGS_H3_DATAGRAM_DRAFT04) == Some(&1) {
            settings.insert(SETTINGS_H3_DATAGRAM, 1);
            self.draft04 = true;
        }
        debug!(
            draft04 = self.draft04,
            h3_datagram = settings.get(&SETTINGS_H3_DATAGRAM).copied().unwrap_or(0),
            "peer settings validated"
        );
        self.peer_settings = Some(settings.clone());
    }

    /// Local SETTINGS always advertise the draft identifier.
    pub fn local_settings(mut base: Settings) -> Settings {
        base.insert(SETTINGS_H3_DATAGRAM_DRAFT04, 1);
        base
    }

    /// Whether the peer registers datagram formats with capsules.
    pub fn supports_registration(&self) -> bool {
        self.draft04
    }

    pub fn peer_settings(&self) -> Option<&Settings> {
        self.peer_settings.as_ref()
    }

    /// Flow id for datagrams of the session on `session_stream_id`.
    pub fn flow_id(&self, session_stream_id: u64) -> u64 {
        if self.draft04 {
            session_stream_id / 4
        } else {
            session_stream_id
        }
    }
}

/// Where a session's outgoing datagrams go, fixed at the time a callback runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramRoute {
    pub allowed: bool,
    pub flow_id: u64,
}
