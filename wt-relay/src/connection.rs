//! Per-connection session lifecycle: the CONNECT handshake, capsules on the
//! session stream, datagram gating and the close routine.

use std::sync::Arc;

use tracing::{debug, info, warn};
use wt_proto::frame::WEBTRANSPORT_DATAGRAM_FORMAT_TYPE;
use wt_proto::{h3, Capsule, CapsuleDecoder, CloseInfo, ControlCapsule};

use crate::config::Config;
use crate::datagram::{DatagramNegotiator, DatagramRoute};
use crate::error::{Error, Result};
use crate::event::{H3Event, QuicEvent};
use crate::handler::{self, HandlerResolver, HandlerResult, SessionHandle, SessionHandler};
use crate::registry::{ConnectionId, SessionEntry, SessionRegistry};
use crate::session::{Session, SessionState};
use crate::stash::Stash;
use crate::transport::Transport;

/// Engine-wide state borrowed for the duration of one event.
pub(crate) struct Context<'a> {
    pub config: &'a Config,
    pub resolver: &'a dyn HandlerResolver,
    pub stash: &'a Arc<dyn Stash>,
    pub registry: &'a mut SessionRegistry,
}

/// Application data accepted by a connection, to be relayed and then handed
/// to its handler.
#[derive(Debug)]
pub(crate) enum Inbound {
    Stream {
        stream_id: u64,
        data: Vec<u8>,
        stream_ended: bool,
    },
    Datagram {
        data: Vec<u8>,
    },
}

pub struct Connection<T> {
    id: ConnectionId,
    transport: T,
    /// Created at protocol negotiation.
    h3: Option<DatagramNegotiator>,
    session_stream_id: Option<u64>,
    capsules: CapsuleDecoder,
    allow_datagrams: bool,
    datagrams_registered: bool,
    /// From the peer's CLOSE_WEBTRANSPORT_SESSION.
    close_info: Option<CloseInfo>,
    session_closed: bool,
    session: Option<Session>,
    handler: Option<Box<dyn SessionHandler>>,
}

impl<T: Transport> Connection<T> {
    pub fn new(id: ConnectionId, transport: T) -> Self {
        Self {
            id,
            transport,
            h3: None,
            session_stream_id: None,
            capsules: CapsuleDecoder::new(),
            allow_datagrams: false,
            datagrams_registered: false,
            close_info: None,
            session_closed: false,
            session: None,
            handler: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn session_stream_id(&self) -> Option<u64> {
        self.session_stream_id
    }

    pub fn allow_datagrams(&self) -> bool {
        self.allow_datagrams
    }

    pub fn close_info(&self) -> Option<&CloseInfo> {
        self.close_info.as_ref()
    }

    pub fn negotiator(&self) -> Option<&DatagramNegotiator> {
        self.h3.as_ref()
    }

    /// Whether the close routine has run.
    pub fn is_session_closed(&self) -> bool {
        self.session_closed
    }

    pub(crate) fn handle_event(
        &mut self,
        event: QuicEvent,
        ctx: &mut Context<'_>,
    ) -> Result<Option<Inbound>> {
        match event {
            QuicEvent::ProtocolNegotiated { alpn } => {
                if self.h3.is_some() {
                    debug!(connection = %self.id, "protocol negotiated twice; ignoring");
                    return Ok(None);
                }
                let negotiator = DatagramNegotiator::new();
                self.allow_datagrams = !negotiator.supports_registration();
                self.h3 = Some(negotiator);
                debug!(connection = %self.id, alpn = alpn.as_deref().unwrap_or(""), "protocol negotiated");
                Ok(None)
            }
            QuicEvent::H3(event) => self.handle_h3_event(event, ctx),
            QuicEvent::StreamReset {
                stream_id,
                error_code,
            } => {
                debug!(connection = %self.id, stream_id, error_code, "stream reset");
                self.with_handler("stream_reset", ctx, |h, s| {
                    h.stream_reset(s, stream_id, error_code)
                });
                Ok(None)
            }
            QuicEvent::ConnectionTerminated { error_code, reason } => {
                info!(connection = %self.id, error_code, %reason, "connection terminated");
                self.close_session(None, true, ctx);
                Ok(None)
            }
        }
    }

    fn handle_h3_event(&mut self, event: H3Event, ctx: &mut Context<'_>) -> Result<Option<Inbound>> {
        let Some(h3) = self.h3.as_mut() else {
            debug!(connection = %self.id, "HTTP/3 event before protocol negotiation; ignoring");
            return Ok(None);
        };

        match event {
            H3Event::SettingsReceived(mut settings) => {
                h3.validate_peer_settings(&mut settings);
                if h3.supports_registration() && !self.datagrams_registered {
                    self.allow_datagrams = false;
                }
                Ok(None)
            }
            H3Event::HeadersReceived {
                stream_id, headers, ..
            } => {
                self.on_headers(stream_id, headers, ctx)?;
                Ok(None)
            }
            H3Event::DataReceived {
                stream_id,
                data,
                stream_ended,
            } => {
                if self.session_stream_id != Some(stream_id) {
                    debug!(connection = %self.id, stream_id, "data on a non-session request stream; ignoring");
                    return Ok(None);
                }
                if !h3.supports_registration() && !data.is_empty() {
                    return Err(Error::ProtocolViolation(
                        "unexpected data on the session stream".into(),
                    ));
                }
                self.receive_session_stream_data(&data, stream_ended, ctx)?;
                Ok(None)
            }
            H3Event::WebTransportStreamDataReceived {
                stream_id,
                session_id,
                data,
                stream_ended,
            } => {
                if self.live_session_id() != Some(session_id) {
                    debug!(connection = %self.id, stream_id, session_id, "stream data for an unknown session; dropping");
                    return Ok(None);
                }
                Ok(Some(Inbound::Stream {
                    stream_id,
                    data,
                    stream_ended,
                }))
            }
            H3Event::DatagramReceived { flow_id, data } => {
                let Some(session_id) = self.live_session_id() else {
                    debug!(connection = %self.id, flow_id, "datagram without a session; dropping");
                    return Ok(None);
                };
                if !self.allow_datagrams {
                    warn!(connection = %self.id, session_id, "datagram received while not allowed; dropping it");
                    return Ok(None);
                }
                let expected = self.datagram_route(session_id).flow_id;
                if flow_id != expected {
                    debug!(
                        connection = %self.id,
                        session_id,
                        flow_id,
                        expected,
                        "datagram flow id differs from the session's"
                    );
                }
                Ok(Some(Inbound::Datagram { data }))
            }
        }
    }

    fn on_headers(
        &mut self,
        stream_id: u64,
        headers: Vec<(String, String)>,
        ctx: &mut Context<'_>,
    ) -> Result<()> {
        if self.session_stream_id == Some(stream_id) {
            debug!(connection = %self.id, stream_id, "trailers on the session stream; ignoring");
            return Ok(());
        }

        let method = h3::header(&headers, ":method");
        let protocol = h3::header(&headers, ":protocol");
        debug!(connection = %self.id, stream_id, ?method, ?protocol, "request headers");
        if method == Some("CONNECT") && protocol == Some("webtransport") {
            self.handshake(stream_id, headers, ctx)
        } else {
            Err(Error::Request {
                stream_id,
                status: 400,
            })
        }
    }

    fn handshake(
        &mut self,
        stream_id: u64,
        mut headers: Vec<(String, String)>,
        ctx: &mut Context<'_>,
    ) -> Result<()> {
        if self.session_stream_id.is_some() {
            debug!(connection = %self.id, stream_id, "connection already carries a session");
            return Err(Error::Request {
                stream_id,
                status: 400,
            });
        }
        let Some(path) = h3::header(&headers, ":path").map(str::to_owned) else {
            return Err(Error::Request {
                stream_id,
                status: 400,
            });
        };

        let mut handler = ctx.resolver.resolve(&path).map_err(|err| {
            info!(connection = %self.id, stream_id, %err, "cannot resolve handler");
            Error::Request {
                stream_id,
                status: 404,
            }
        })?;

        headers.push(ctx.config.request_marker.clone());
        let mut session = Session::new(stream_id, headers);
        session.state = SessionState::Handshaking;
        info!(connection = %self.id, session_id = stream_id, %path, "WebTransport session requested");

        let mut response = ctx.config.response_headers();
        handler::invoke("connect_received", stream_id, || {
            handler.connect_received(session.request_headers(), &mut response)
        });

        let status = response
            .iter()
            .find(|(name, _)| name == ":status")
            .map(|(_, value)| value.clone());
        if status.is_none() {
            response.push((":status".to_owned(), "200".to_owned()));
        }

        // Session state is committed only once the response is sent.
        if let Err(err) = self.transport.send_headers(stream_id, &response, false) {
            warn!(connection = %self.id, session_id = stream_id, %err, "cannot send CONNECT response");
            return Err(err.into());
        }
        self.session_stream_id = Some(stream_id);
        self.session = Some(session);
        self.handler = Some(handler);
        ctx.registry.register(SessionEntry {
            connection: self.id,
            session_id: stream_id,
        });

        match status.as_deref() {
            None | Some("200") => {
                if let Some(session) = self.session.as_mut() {
                    session.state = SessionState::Established;
                }
                info!(connection = %self.id, session_id = stream_id, "session established");
                self.with_handler("session_established", ctx, |h, s| h.session_established(s));
            }
            Some(status) => {
                info!(connection = %self.id, session_id = stream_id, status, "handler rejected session");
                if let Some(session) = self.session.as_mut() {
                    session.state = SessionState::Closed;
                }
                self.session_closed = true;
                self.handler = None;
                ctx.registry.remove(self.id);
            }
        }
        Ok(())
    }

    fn receive_session_stream_data(
        &mut self,
        data: &[u8],
        fin: bool,
        ctx: &mut Context<'_>,
    ) -> Result<()> {
        self.capsules.append(data)?;
        if fin {
            self.capsules.finish()?;
        }

        while let Some(capsule) = self.capsules.next_capsule()? {
            match capsule.classify()? {
                ControlCapsule::Unimplemented(capsule_type) => {
                    return Err(Error::ProtocolViolation(format!(
                        "unimplemented capsule type {capsule_type:#x}"
                    )));
                }
                ControlCapsule::Unknown(capsule_type) => {
                    debug!(connection = %self.id, capsule_type, "skipping unknown capsule");
                }
                _ if self.close_info.is_some() => {
                    return Err(Error::ProtocolViolation(format!(
                        "capsule {:#x} after CLOSE_WEBTRANSPORT_SESSION",
                        capsule.capsule_type
                    )));
                }
                ControlCapsule::RegisterDatagramNoContext { format_type } => {
                    if format_type != WEBTRANSPORT_DATAGRAM_FORMAT_TYPE {
                        return Err(Error::ProtocolViolation(format!(
                            "unexpected datagram format type {format_type:#x}"
                        )));
                    }
                    self.allow_datagrams = true;
                    self.datagrams_registered = true;
                    debug!(connection = %self.id, "datagrams registered");
                }
                ControlCapsule::CloseWebTransportSession(info) => {
                    info!(connection = %self.id, code = info.code, reason = %info.reason, "peer closed session");
                    if let Some(session) = self.session.as_mut() {
                        if !session.is_closed() {
                            session.state = SessionState::Closing;
                        }
                    }
                    self.close_info = Some(info);
                }
            }
        }

        if fin {
            let close_info = self.close_info.clone();
            self.close_session(close_info, false, ctx);
        }
        Ok(())
    }

    pub(crate) fn deliver(&mut self, inbound: Inbound, ctx: &mut Context<'_>) {
        match inbound {
            Inbound::Stream {
                stream_id,
                data,
                stream_ended,
            } => self.with_handler("stream_data_received", ctx, |h, s| {
                h.stream_data_received(s, stream_id, &data, stream_ended)
            }),
            Inbound::Datagram { data } => {
                self.with_handler("datagram_received", ctx, |h, s| h.datagram_received(s, &data))
            }
        }
    }

    /// Write a relayed stream payload on this connection.
    pub(crate) fn relay_stream_data(&self, stream_id: u64, data: &[u8], end: bool) -> Result<()> {
        self.transport.send_stream_data(stream_id, data, end)?;
        Ok(())
    }

    /// Send a relayed datagram on this connection's session. Returns false
    /// when it was dropped.
    pub(crate) fn relay_datagram(&self, data: &[u8]) -> Result<bool> {
        let Some(session_id) = self.session.as_ref().map(Session::id) else {
            return Ok(false);
        };
        let route = self.datagram_route(session_id);
        if !route.allowed {
            warn!(connection = %self.id, session_id, "sending a datagram while that's not allowed; discarding it");
            return Ok(false);
        }
        self.transport.send_datagram(route.flow_id, data)?;
        Ok(true)
    }

    /// The session id, if a handler is bound to it.
    fn live_session_id(&self) -> Option<u64> {
        self.handler.as_ref()?;
        self.session.as_ref().map(Session::id)
    }

    fn datagram_route(&self, session_id: u64) -> DatagramRoute {
        DatagramRoute {
            allowed: self.allow_datagrams,
            flow_id: self
                .h3
                .as_ref()
                .map_or(session_id, |h3| h3.flow_id(session_id)),
        }
    }

    fn with_handler<F>(&mut self, callback: &'static str, ctx: &mut Context<'_>, f: F)
    where
        F: FnOnce(&mut (dyn SessionHandler + 'static), &mut SessionHandle<'_>) -> HandlerResult,
    {
        let Some(session_id) = self.session.as_ref().map(Session::id) else {
            return;
        };
        let route = self.datagram_route(session_id);
        let (Some(handler), Some(session)) = (self.handler.as_mut(), self.session.as_mut()) else {
            return;
        };

        let mut handle = SessionHandle::new(
            session,
            &self.transport,
            route,
            ctx.stash,
            &ctx.config.stash_path,
        );
        handler::invoke(callback, session_id, || f(&mut **handler, &mut handle));

        let request = self.session.as_mut().and_then(|s| s.close_request.take());
        if let Some(close_info) = request {
            self.close_locally(close_info, ctx);
        }
    }

    fn close_locally(&mut self, close_info: Option<CloseInfo>, ctx: &mut Context<'_>) {
        if self.session_closed {
            debug!(
                connection = %self.id,
                code = close_info.as_ref().map(|c| c.code),
                "session already closed; dropping close request"
            );
            return;
        }
        let Some(stream_id) = self.session_stream_id else {
            return;
        };
        if let Some(session) = self.session.as_mut() {
            session.state = SessionState::Closing;
        }
        if let Err(err) = self.send_close(stream_id, close_info.as_ref()) {
            warn!(connection = %self.id, session_id = stream_id, %err, "failed to send session close");
        }
        info!(connection = %self.id, session_id = stream_id, "closing session locally");
        self.close_session(close_info, false, ctx);
    }

    fn send_close(&self, stream_id: u64, close_info: Option<&CloseInfo>) -> Result<()> {
        if let Some(info) = close_info {
            let capsule = Capsule::close_session(info).to_bytes()?;
            self.transport.send_data(stream_id, &capsule, false)?;
        }
        self.transport.send_data(stream_id, &[], true)?;
        Ok(())
    }

    /// Runs at most once per connection.
    fn close_session(&mut self, close_info: Option<CloseInfo>, abruptly: bool, ctx: &mut Context<'_>) {
        if self.session_closed {
            return;
        }
        self.session_closed = true;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.state = SessionState::Closed;
        info!(
            connection = %self.id,
            session_id = session.id(),
            abruptly,
            code = close_info.as_ref().map(|c| c.code),
            "session closed"
        );

        self.with_handler("session_closed", ctx, |h, s| {
            h.session_closed(s, close_info.as_ref(), abruptly)
        });
        if !ctx.config.retain_closed_sessions {
            ctx.registry.remove(self.id);
        }
    }
}

impl<T> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("session_stream_id", &self.session_stream_id)
            .field("allow_datagrams", &self.allow_datagrams)
            .field("session_closed", &self.session_closed)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}
