#[derive(Debug, Clone)]
pub struct Config {
    /// Value of the `server` header on every response.
    pub server_name: String,
    /// Extra header sent on successful CONNECT responses.
    pub draft_header: (String, String),
    /// Appended to the stored request headers before `connect_received`.
    pub request_marker: (String, String),
    /// Application-level stream ids (first header field of a payload) that
    /// are relayed to other sessions.
    pub relay_stream_ids: Vec<u32>,
    /// Keep a session in the relay registry after it closes.
    pub retain_closed_sessions: bool,
    /// Logical stash path shared by every handler.
    pub stash_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_name: "webtransport-h3-server".into(),
            draft_header: ("sec-webtransport-http3-draft".into(), "draft02".into()),
            request_marker: ("swag".into(), "brap".into()),
            relay_stream_ids: vec![1, 2],
            retain_closed_sessions: true,
            stash_path: "/webtransport/handlers".into(),
        }
    }
}

impl Config {
    pub fn is_relay_stream(&self, app_stream_id: u32) -> bool {
        self.relay_stream_ids.contains(&app_stream_id)
    }

    /// Headers every CONNECT response starts with.
    pub fn response_headers(&self) -> Vec<(String, String)> {
        vec![
            ("server".to_owned(), self.server_name.clone()),
            self.draft_header.clone(),
        ]
    }

    pub fn error_response(&self, status: u16) -> Vec<(String, String)> {
        vec![
            ("server".to_owned(), self.server_name.clone()),
            (":status".to_owned(), status.to_string()),
        ]
    }
}
