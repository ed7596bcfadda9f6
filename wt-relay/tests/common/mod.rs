#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::sync::{Arc, Mutex};

use wt_proto::frame::{SETTINGS_H3_DATAGRAM, SETTINGS_H3_DATAGRAM_DRAFT04};
use wt_proto::{Capsule, CloseInfo, PayloadHeader, Settings};
use wt_relay::transport::TransportResult;
use wt_relay::{
    Config, ConnectionId, Engine, H3Event, HandlerRegistry, HandlerResult, QuicEvent, Result,
    SessionHandle, SessionHandler, Transport, TransportError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Headers {
        stream_id: u64,
        headers: Vec<(String, String)>,
        end: bool,
    },
    Data {
        stream_id: u64,
        data: Vec<u8>,
        end: bool,
    },
    StreamData {
        stream_id: u64,
        data: Vec<u8>,
        end: bool,
    },
    CreateStream {
        session_id: u64,
        unidirectional: bool,
    },
    Datagram {
        flow_id: u64,
        data: Vec<u8>,
    },
    Stop {
        stream_id: u64,
        code: u64,
    },
    Reset {
        stream_id: u64,
        code: u64,
    },
    Close {
        code: u64,
        reason: String,
    },
}

/// Records every call; server-initiated stream ids start at 1 (bidi) and
/// 3 (uni).
#[derive(Debug)]
pub struct RecordingTransport {
    sent: RefCell<Vec<Sent>>,
    next_bidi: Cell<u64>,
    next_uni: Cell<u64>,
    pub fail_writes: Cell<bool>,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self {
            sent: RefCell::new(Vec::new()),
            next_bidi: Cell::new(1),
            next_uni: Cell::new(3),
            fail_writes: Cell::new(false),
        }
    }
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.borrow().clone()
    }

    pub fn clear(&self) {
        self.sent.borrow_mut().clear();
    }

    fn record(&self, s: Sent) -> TransportResult<()> {
        if self.fail_writes.get() {
            return Err(TransportError::Closed);
        }
        self.sent.borrow_mut().push(s);
        Ok(())
    }
}

impl Transport for RecordingTransport {
    fn send_headers(
        &self,
        stream_id: u64,
        headers: &[(String, String)],
        end_stream: bool,
    ) -> TransportResult<()> {
        self.record(Sent::Headers {
            stream_id,
            headers: headers.to_vec(),
            end: end_stream,
        })
    }

    fn send_data(&self, stream_id: u64, data: &[u8], end_stream: bool) -> TransportResult<()> {
        self.record(Sent::Data {
            stream_id,
            data: data.to_vec(),
            end: end_stream,
        })
    }

    fn send_stream_data(
        &self,
        stream_id: u64,
        data: &[u8],
        end_stream: bool,
    ) -> TransportResult<()> {
        self.record(Sent::StreamData {
            stream_id,
            data: data.to_vec(),
            end: end_stream,
        })
    }

    fn create_webtransport_stream(
        &self,
        session_id: u64,
        unidirectional: bool,
    ) -> TransportResult<u64> {
        self.record(Sent::CreateStream {
            session_id,
            unidirectional,
        })?;
        let next = if unidirectional {
            &self.next_uni
        } else {
            &self.next_bidi
        };
        let id = next.get();
        next.set(id + 4);
        Ok(id)
    }

    fn send_datagram(&self, flow_id: u64, data: &[u8]) -> TransportResult<()> {
        self.record(Sent::Datagram {
            flow_id,
            data: data.to_vec(),
        })
    }

    fn stop_stream(&self, stream_id: u64, code: u64) -> TransportResult<()> {
        self.record(Sent::Stop { stream_id, code })
    }

    fn reset_stream(&self, stream_id: u64, code: u64) -> TransportResult<()> {
        self.record(Sent::Reset { stream_id, code })
    }

    fn close(&self, error_code: u64, reason: &str) {
        self.sent.borrow_mut().push(Sent::Close {
            code: error_code,
            reason: reason.to_owned(),
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ConnectReceived {
        request_headers: Vec<(String, String)>,
    },
    Established {
        session_id: u64,
    },
    StreamData {
        stream_id: u64,
        data: Vec<u8>,
        ended: bool,
    },
    Datagram {
        data: Vec<u8>,
    },
    Closed {
        close_info: Option<CloseInfo>,
        abruptly: bool,
    },
    StreamReset {
        stream_id: u64,
        error_code: u64,
    },
}

pub type Log = Arc<Mutex<Vec<Call>>>;

pub fn calls(log: &Log) -> Vec<Call> {
    log.lock().unwrap().clone()
}

/// What a [`Recorder`] does beyond logging.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub status: Option<&'static str>,
    pub close_on_established: Option<Option<CloseInfo>>,
    pub panic_on_stream_data: bool,
    pub echo_datagrams: bool,
}

pub struct Recorder {
    log: Log,
    script: Script,
}

impl Recorder {
    fn push(&self, call: Call) {
        self.log.lock().unwrap().push(call);
    }
}

impl SessionHandler for Recorder {
    fn connect_received(
        &mut self,
        request_headers: &[(String, String)],
        response_headers: &mut Vec<(String, String)>,
    ) -> HandlerResult {
        self.push(Call::ConnectReceived {
            request_headers: request_headers.to_vec(),
        });
        if let Some(status) = self.script.status {
            response_headers.push((":status".into(), status.into()));
        }
        Ok(())
    }

    fn session_established(&mut self, session: &mut SessionHandle<'_>) -> HandlerResult {
        self.push(Call::Established {
            session_id: session.session_id(),
        });
        if let Some(info) = self.script.close_on_established.clone() {
            session.close(info);
        }
        Ok(())
    }

    fn stream_data_received(
        &mut self,
        _session: &mut SessionHandle<'_>,
        stream_id: u64,
        data: &[u8],
        stream_ended: bool,
    ) -> HandlerResult {
        self.push(Call::StreamData {
            stream_id,
            data: data.to_vec(),
            ended: stream_ended,
        });
        if self.script.panic_on_stream_data {
            panic!("scripted panic");
        }
        Ok(())
    }

    fn datagram_received(&mut self, session: &mut SessionHandle<'_>, data: &[u8]) -> HandlerResult {
        self.push(Call::Datagram {
            data: data.to_vec(),
        });
        if self.script.echo_datagrams {
            session.send_datagram(data)?;
        }
        Ok(())
    }

    fn session_closed(
        &mut self,
        _session: &mut SessionHandle<'_>,
        close_info: Option<&CloseInfo>,
        abruptly: bool,
    ) -> HandlerResult {
        self.push(Call::Closed {
            close_info: close_info.cloned(),
            abruptly,
        });
        Ok(())
    }

    fn stream_reset(
        &mut self,
        _session: &mut SessionHandle<'_>,
        stream_id: u64,
        error_code: u64,
    ) -> HandlerResult {
        self.push(Call::StreamReset {
            stream_id,
            error_code,
        });
        Ok(())
    }
}

/// Register a [`Recorder`] at `path`, returning its shared log.
pub fn record_at(registry: &mut HandlerRegistry, path: &str, script: Script) -> Log {
    let log = Log::default();
    let shared = log.clone();
    registry.register(path, move || Recorder {
        log: shared.clone(),
        script: script.clone(),
    });
    log
}

pub struct Harness {
    pub engine: Engine<RecordingTransport>,
}

impl Harness {
    pub fn new(registry: HandlerRegistry) -> Self {
        Self::with_config(Config::default(), registry)
    }

    pub fn with_config(config: Config, registry: HandlerRegistry) -> Self {
        Self {
            engine: Engine::new(config, Arc::new(registry)),
        }
    }

    /// Add connection `conn` and complete protocol negotiation.
    pub fn connect(&mut self, conn: u64) {
        self.engine
            .add_connection(ConnectionId(conn), RecordingTransport::default());
        self.event(
            conn,
            QuicEvent::ProtocolNegotiated {
                alpn: Some("h3".into()),
            },
        )
        .unwrap();
    }

    pub fn event(&mut self, conn: u64, event: impl Into<QuicEvent>) -> Result<()> {
        self.engine.handle_event(ConnectionId(conn), event.into())
    }

    pub fn settings(&mut self, conn: u64, settings: Settings) -> Result<()> {
        self.event(conn, H3Event::SettingsReceived(settings))
    }

    /// Peer settings with draft-04 HTTP Datagrams, so datagrams need
    /// registration.
    pub fn registration_settings(&mut self, conn: u64) {
        self.settings(conn, Settings::from([(SETTINGS_H3_DATAGRAM_DRAFT04, 1)]))
            .unwrap();
    }

    pub fn connect_request(&mut self, conn: u64, stream_id: u64, path: &str) -> Result<()> {
        self.headers(conn, stream_id, connect_headers(path))
    }

    pub fn headers(
        &mut self,
        conn: u64,
        stream_id: u64,
        headers: Vec<(String, String)>,
    ) -> Result<()> {
        self.event(
            conn,
            H3Event::HeadersReceived {
                stream_id,
                headers,
                stream_ended: false,
            },
        )
    }

    pub fn session_data(&mut self, conn: u64, stream_id: u64, data: Vec<u8>, fin: bool) -> Result<()> {
        self.event(
            conn,
            H3Event::DataReceived {
                stream_id,
                data,
                stream_ended: fin,
            },
        )
    }

    pub fn stream_data(
        &mut self,
        conn: u64,
        session_id: u64,
        stream_id: u64,
        data: Vec<u8>,
        fin: bool,
    ) -> Result<()> {
        self.event(
            conn,
            H3Event::WebTransportStreamDataReceived {
                stream_id,
                session_id,
                data,
                stream_ended: fin,
            },
        )
    }

    pub fn datagram(&mut self, conn: u64, flow_id: u64, data: Vec<u8>) -> Result<()> {
        self.event(conn, H3Event::DatagramReceived { flow_id, data })
    }

    pub fn terminate(&mut self, conn: u64) -> Result<()> {
        self.event(
            conn,
            QuicEvent::ConnectionTerminated {
                error_code: 0,
                reason: "gone".into(),
            },
        )
    }

    pub fn transport(&self, conn: u64) -> &RecordingTransport {
        self.engine
            .connection(ConnectionId(conn))
            .expect("connection exists")
            .transport()
    }

    pub fn sent(&self, conn: u64) -> Vec<Sent> {
        self.transport(conn).sent()
    }

    pub fn clear(&self, conn: u64) {
        self.transport(conn).clear();
    }
}

pub fn h(name: &str, value: &str) -> (String, String) {
    (name.to_owned(), value.to_owned())
}

pub fn connect_headers(path: &str) -> Vec<(String, String)> {
    vec![
        h(":method", "CONNECT"),
        h(":protocol", "webtransport"),
        h(":scheme", "https"),
        h(":authority", "localhost"),
        h(":path", path),
        h("origin", "https://localhost"),
    ]
}

/// A relay test payload carrying `app_stream_id` in its header.
pub fn payload(app_stream_id: u32, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    PayloadHeader {
        stream_id: app_stream_id,
        sequence: 7,
        timestamp: 1234,
        eof: 0,
    }
    .encode(&mut buf);
    buf.extend_from_slice(body);
    buf
}

pub fn close_capsule(code: u32, reason: &str) -> Vec<u8> {
    Capsule::close_session(&CloseInfo::new(code, reason))
        .to_bytes()
        .unwrap()
}

pub fn stable_datagram_only() -> Settings {
    Settings::from([(SETTINGS_H3_DATAGRAM, 1)])
}
