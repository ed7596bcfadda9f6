use std::any::Any;
use std::collections::HashMap;

use wt_proto::CloseInfo;

use crate::stash::StashHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initial,
    Handshaking,
    Established,
    Closing,
    Closed,
}

/// Arbitrary per-session data handlers attach between callbacks.
pub type Attachments = HashMap<String, Box<dyn Any>>;

/// One WebTransport session. Its id is the CONNECT stream id.
pub struct Session {
    id: u64,
    request_headers: Vec<(String, String)>,
    pub(crate) state: SessionState,
    pub(crate) attachments: Attachments,
    pub(crate) stash: Option<StashHandle>,
    /// Set by [`crate::SessionHandle::close`], acted on once the callback returns.
    pub(crate) close_request: Option<Option<CloseInfo>>,
}

impl Session {
    pub(crate) fn new(id: u64, request_headers: Vec<(String, String)>) -> Self {
        Self {
            id,
            request_headers,
            state: SessionState::Initial,
            attachments: Attachments::new(),
            stash: None,
            close_request: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn request_headers(&self) -> &[(String, String)] {
        &self.request_headers
    }

    pub fn attachments(&self) -> &Attachments {
        &self.attachments
    }

    pub fn is_established(&self) -> bool {
        self.state == SessionState::Established
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("attachments", &self.attachments.len())
            .finish_non_exhaustive()
    }
}
