//! Handlers shipped with the server, selected by the file name a request
//! path points at under the document root.

use std::collections::HashMap;

use wt_proto::h3;
use wt_relay::handler::request_url;
use wt_relay::{HandlerRegistry, HandlerResult, SessionHandle, SessionHandler};

/// Registry keyed by handler file stem.
pub fn builtin() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry
        .register("custom-response", || CustomResponse)
        .register("echo", Echo::default);
    registry
}

/// Copies each query parameter of the CONNECT path into the response
/// headers, so `?:status=404` rejects the session with a 404.
#[derive(Debug, Default)]
pub struct CustomResponse;

impl SessionHandler for CustomResponse {
    fn connect_received(
        &mut self,
        request_headers: &[(String, String)],
        response_headers: &mut Vec<(String, String)>,
    ) -> HandlerResult {
        let Some(path) = h3::header(request_headers, ":path") else {
            return Ok(());
        };
        response_headers.extend(query_pairs(path));
        Ok(())
    }
}

/// Sends back whatever arrives. Bidirectional data is echoed on the same
/// stream as it comes; a unidirectional stream is echoed on a new one once
/// it ends.
#[derive(Debug, Default)]
pub struct Echo {
    pending: HashMap<u64, Vec<u8>>,
}

impl SessionHandler for Echo {
    fn stream_data_received(
        &mut self,
        session: &mut SessionHandle<'_>,
        stream_id: u64,
        data: &[u8],
        stream_ended: bool,
    ) -> HandlerResult {
        if !session.stream_is_unidirectional(stream_id) {
            session.send_stream_data(stream_id, data, stream_ended)?;
            return Ok(());
        }
        self.pending
            .entry(stream_id)
            .or_default()
            .extend_from_slice(data);
        if stream_ended {
            let payload = self.pending.remove(&stream_id).unwrap_or_default();
            let reply = session.create_unidirectional_stream()?;
            session.send_stream_data(reply, &payload, true)?;
        }
        Ok(())
    }

    fn datagram_received(&mut self, session: &mut SessionHandle<'_>, data: &[u8]) -> HandlerResult {
        session.send_datagram(data)?;
        Ok(())
    }
}

/// First value per name, in order of appearance. Parameters without a
/// value are skipped.
fn query_pairs(path: &str) -> Vec<(String, String)> {
    let Some(url) = request_url(path) else {
        return Vec::new();
    };
    let mut pairs: Vec<(String, String)> = Vec::new();
    for (name, value) in url.query_pairs() {
        if value.is_empty() || pairs.iter().any(|(n, _)| *n == name) {
            continue;
        }
        pairs.push((name.into_owned(), value.into_owned()));
    }
    pairs
}
