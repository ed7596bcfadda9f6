//! Turns one `quinn` connection into engine events.
//!
//! Only what a WebTransport session needs is spoken here: the control and
//! QPACK streams, request streams carrying HEADERS and DATA frames,
//! WebTransport streams and datagrams. Everything else is drained and
//! dropped.

use std::sync::Arc;

use bytes::Bytes;
use quinn::{Connection, ConnectionError, ReadError, RecvStream, SendStream, VarInt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use wt_proto::frame::{
    H3_FRAME_DATA, H3_FRAME_ERROR, H3_FRAME_HEADERS, H3_FRAME_SETTINGS, H3_STREAM_CREATION_ERROR,
    H3_STREAM_TYPE_CONTROL, H3_STREAM_TYPE_QPACK_DECODER, H3_STREAM_TYPE_QPACK_ENCODER,
    WT_BIDI_SIGNAL, WT_UNI_STREAM_TYPE,
};
use wt_proto::h3::frame::{decode_settings, encode_settings, FrameParser};
use wt_proto::h3::{self, qpack};
use wt_proto::stream::{StreamKind, StreamPreamble};
use wt_proto::varint::{self, VarintDecoder};
use wt_relay::{ConnectionId, DatagramNegotiator, H3Event, QuicEvent};

use crate::quinn_transport::{stream_index, QuinnTransport, Streams};

/// What connection tasks hand to the engine loop.
pub(crate) enum EngineMessage {
    Connected {
        id: ConnectionId,
        transport: QuinnTransport,
    },
    Event {
        id: ConnectionId,
        event: QuicEvent,
    },
}

#[derive(Clone)]
pub(crate) struct EventSink {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<EngineMessage>,
}

impl EventSink {
    fn send(&self, event: impl Into<QuicEvent>) {
        let message = EngineMessage::Event {
            id: self.id,
            event: event.into(),
        };
        if self.tx.send(message).is_err() {
            debug!(connection = %self.id, "engine loop gone; dropping event");
        }
    }
}

/// Everything a stream task needs from its connection.
#[derive(Clone)]
pub(crate) struct StreamContext {
    pub(crate) connection: Connection,
    pub(crate) streams: Arc<Streams>,
    sink: EventSink,
}

impl StreamContext {
    /// Read a bidirectional stream this side opened for `session_id`. The
    /// peer writes no preamble on it.
    pub(crate) fn spawn_session_reader(&self, recv: RecvStream, session_id: u64) {
        let ctx = self.clone();
        tokio::spawn(async move { ctx.forward_session_stream(recv, session_id, Bytes::new()).await });
    }

    fn protocol_error(&self, code: u64, reason: &str) {
        warn!(connection = %self.sink.id, reason, "closing connection");
        let code = VarInt::from_u64(code).unwrap_or(VarInt::MAX);
        self.connection.close(code, reason.as_bytes());
    }

    /// Pass a WebTransport stream's payload to the engine, starting with
    /// `first` (bytes read past the preamble).
    async fn forward_session_stream(&self, mut recv: RecvStream, session_id: u64, first: Bytes) {
        let stream_id = stream_index(recv.id());
        let mut stop = self.streams.stop_switch(stream_id);
        let deliver = |data: Vec<u8>, stream_ended: bool| {
            self.sink.send(H3Event::WebTransportStreamDataReceived {
                stream_id,
                session_id,
                data,
                stream_ended,
            })
        };

        if !first.is_empty() {
            deliver(first.to_vec(), false);
        }
        loop {
            tokio::select! {
                Some(code) = stop.recv() => {
                    if let Err(err) = recv.stop(code) {
                        debug!(stream_id, %err, "stop on a closed stream");
                    }
                    break;
                }
                chunk = recv.read_chunk(usize::MAX, true) => match chunk {
                    Ok(Some(chunk)) => deliver(chunk.bytes.to_vec(), false),
                    Ok(None) => {
                        deliver(Vec::new(), true);
                        break;
                    }
                    Err(err) => {
                        self.read_failed(stream_id, err);
                        break;
                    }
                },
            }
        }
        self.streams.reader_done(stream_id);
    }

    fn read_failed(&self, stream_id: u64, err: ReadError) {
        match err {
            ReadError::Reset(code) => self.sink.send(QuicEvent::StreamReset {
                stream_id,
                error_code: code.into_inner(),
            }),
            other => debug!(connection = %self.sink.id, stream_id, err = %other, "stream read ended"),
        }
    }

    async fn read_uni(self, mut recv: RecvStream) {
        let stream_id = stream_index(recv.id());
        let Some((stream_type, rest)) = self.read_signal(&mut recv).await else {
            return;
        };
        match stream_type {
            H3_STREAM_TYPE_CONTROL => self.read_control(recv, rest).await,
            H3_STREAM_TYPE_QPACK_ENCODER | H3_STREAM_TYPE_QPACK_DECODER => drain(recv).await,
            WT_UNI_STREAM_TYPE => {
                let preamble = StreamPreamble::after_signal(StreamKind::Unidirectional);
                self.read_preamble(recv, preamble, rest).await;
            }
            other => {
                debug!(connection = %self.sink.id, stream_id, stream_type = other, "ignoring unidirectional stream");
                let code = VarInt::from_u64(H3_STREAM_CREATION_ERROR).unwrap_or(VarInt::MAX);
                if let Err(err) = recv.stop(code) {
                    debug!(stream_id, %err, "stop on a closed stream");
                }
            }
        }
    }

    async fn read_bidi(self, send: SendStream, mut recv: RecvStream) {
        self.streams.attach_writer(send);
        let Some((signal, rest)) = self.read_signal(&mut recv).await else {
            return;
        };
        if signal == WT_BIDI_SIGNAL {
            let preamble = StreamPreamble::after_signal(StreamKind::Bidirectional);
            self.read_preamble(recv, preamble, rest).await;
            return;
        }
        // A request stream: the signal was the first frame type.
        let mut head = varint::to_vec(signal).unwrap_or_default();
        head.extend_from_slice(&rest);
        self.read_request(recv, head).await;
    }

    /// Read the leading varint of a stream. Returns it with any bytes read
    /// past it, or `None` if the stream ended first.
    async fn read_signal(&self, recv: &mut RecvStream) -> Option<(u64, Bytes)> {
        let mut decoder = VarintDecoder::new();
        loop {
            let chunk = match recv.read_chunk(usize::MAX, true).await {
                Ok(Some(chunk)) => chunk.bytes,
                Ok(None) => return None,
                Err(err) => {
                    self.read_failed(stream_index(recv.id()), err);
                    return None;
                }
            };
            for (i, &byte) in chunk.iter().enumerate() {
                if let Some(value) = decoder.feed(byte) {
                    return Some((value, chunk.slice(i + 1..)));
                }
            }
        }
    }

    async fn read_preamble(&self, mut recv: RecvStream, mut preamble: StreamPreamble, mut rest: Bytes) {
        let stream_id = stream_index(recv.id());
        loop {
            match preamble.feed(&rest) {
                Ok(used) => rest = rest.slice(used..),
                Err(err) => {
                    self.protocol_error(H3_FRAME_ERROR, &err.to_string());
                    return;
                }
            }
            if let Some(session_id) = preamble.session_id() {
                return self.forward_session_stream(recv, session_id, rest).await;
            }
            match recv.read_chunk(usize::MAX, true).await {
                Ok(Some(chunk)) => rest = chunk.bytes,
                Ok(None) => return,
                Err(err) => {
                    self.read_failed(stream_id, err);
                    return;
                }
            }
        }
    }

    async fn read_control(&self, mut recv: RecvStream, rest: Bytes) {
        let mut parser = FrameParser::new();
        parser.push(&rest);
        let mut settings_seen = false;
        loop {
            loop {
                let frame = match parser.next_frame() {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break,
                    Err(err) => return self.protocol_error(H3_FRAME_ERROR, &err.to_string()),
                };
                if frame.frame_type != H3_FRAME_SETTINGS {
                    debug!(connection = %self.sink.id, frame_type = frame.frame_type, "control frame ignored");
                    continue;
                }
                if settings_seen {
                    return self.protocol_error(H3_FRAME_ERROR, "second SETTINGS frame");
                }
                settings_seen = true;
                match decode_settings(&frame.payload) {
                    Ok(settings) => self.sink.send(H3Event::SettingsReceived(settings)),
                    Err(err) => return self.protocol_error(H3_FRAME_ERROR, &err.to_string()),
                }
            }
            match recv.read_chunk(usize::MAX, true).await {
                Ok(Some(chunk)) => parser.push(&chunk.bytes),
                Ok(None) => return,
                Err(err) => {
                    debug!(connection = %self.sink.id, %err, "control stream ended");
                    return;
                }
            }
        }
    }

    async fn read_request(&self, mut recv: RecvStream, head: Vec<u8>) {
        let stream_id = stream_index(recv.id());
        let mut stop = self.streams.stop_switch(stream_id);
        let mut parser = FrameParser::new();
        parser.push(&head);
        loop {
            loop {
                let frame = match parser.next_frame() {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break,
                    Err(err) => {
                        self.protocol_error(H3_FRAME_ERROR, &err.to_string());
                        self.streams.reader_done(stream_id);
                        return;
                    }
                };
                match frame.frame_type {
                    H3_FRAME_HEADERS => match qpack::decode_header_block(&frame.payload) {
                        Ok(headers) => self.sink.send(H3Event::HeadersReceived {
                            stream_id,
                            headers,
                            stream_ended: false,
                        }),
                        Err(err) => {
                            self.protocol_error(H3_FRAME_ERROR, &err.to_string());
                            self.streams.reader_done(stream_id);
                            return;
                        }
                    },
                    H3_FRAME_DATA => self.sink.send(H3Event::DataReceived {
                        stream_id,
                        data: frame.payload,
                        stream_ended: false,
                    }),
                    other => debug!(stream_id, frame_type = other, "request frame ignored"),
                }
            }
            tokio::select! {
                Some(code) = stop.recv() => {
                    if let Err(err) = recv.stop(code) {
                        debug!(stream_id, %err, "stop on a closed stream");
                    }
                    break;
                }
                chunk = recv.read_chunk(usize::MAX, true) => match chunk {
                    Ok(Some(chunk)) => parser.push(&chunk.bytes),
                    Ok(None) => {
                        self.sink.send(H3Event::DataReceived {
                            stream_id,
                            data: Vec::new(),
                            stream_ended: true,
                        });
                        break;
                    }
                    Err(err) => {
                        self.read_failed(stream_id, err);
                        break;
                    }
                },
            }
        }
        self.streams.reader_done(stream_id);
    }

    async fn read_datagrams(self) {
        loop {
            let datagram = match self.connection.read_datagram().await {
                Ok(datagram) => datagram,
                Err(err) => {
                    debug!(connection = %self.sink.id, %err, "datagram reader done");
                    return;
                }
            };
            match varint::decode(&datagram) {
                Ok((flow_id, used)) => self.sink.send(H3Event::DatagramReceived {
                    flow_id,
                    data: datagram[used..].to_vec(),
                }),
                Err(err) => debug!(connection = %self.sink.id, %err, "malformed datagram dropped"),
            }
        }
    }
}

async fn drain(mut recv: RecvStream) {
    while let Ok(Some(_)) = recv.read_chunk(usize::MAX, true).await {}
}

/// Open the control stream (with our SETTINGS) and both QPACK streams. They
/// must stay open for the connection's lifetime.
async fn open_critical_streams(connection: &Connection) -> Result<Vec<SendStream>, String> {
    let settings = DatagramNegotiator::local_settings(h3::server_settings());
    let mut control = varint::to_vec(H3_STREAM_TYPE_CONTROL).map_err(|e| e.to_string())?;
    control.extend(encode_settings(&settings).map_err(|e| e.to_string())?);

    let mut streams = Vec::with_capacity(3);
    for preamble in [
        control,
        vec![H3_STREAM_TYPE_QPACK_ENCODER as u8],
        vec![H3_STREAM_TYPE_QPACK_DECODER as u8],
    ] {
        let mut send = connection.open_uni().await.map_err(|e| e.to_string())?;
        send.write_all(&preamble).await.map_err(|e| e.to_string())?;
        streams.push(send);
    }
    Ok(streams)
}

fn termination(err: &ConnectionError) -> (u64, String) {
    match err {
        ConnectionError::ApplicationClosed(close) => (
            close.error_code.into_inner(),
            String::from_utf8_lossy(&close.reason).into_owned(),
        ),
        other => (0, other.to_string()),
    }
}

/// Run one connection from handshake to close.
pub(crate) async fn drive(
    id: ConnectionId,
    incoming: quinn::Incoming,
    tx: mpsc::UnboundedSender<EngineMessage>,
) {
    let connection = match incoming.await {
        Ok(connection) => connection,
        Err(err) => {
            debug!(connection = %id, %err, "handshake failed");
            return;
        }
    };
    let alpn = connection
        .handshake_data()
        .and_then(|data| data.downcast::<quinn::crypto::rustls::HandshakeData>().ok())
        .and_then(|data| data.protocol)
        .map(|protocol| String::from_utf8_lossy(&protocol).into_owned());
    info!(connection = %id, remote = %connection.remote_address(), "connection accepted");

    let ctx = StreamContext {
        connection: connection.clone(),
        streams: Arc::new(Streams::default()),
        sink: EventSink { id, tx: tx.clone() },
    };
    let transport = QuinnTransport::new(ctx.clone());
    if tx.send(EngineMessage::Connected { id, transport }).is_err() {
        return;
    }
    ctx.sink.send(QuicEvent::ProtocolNegotiated { alpn });

    let _critical = match open_critical_streams(&connection).await {
        Ok(streams) => streams,
        Err(err) => {
            warn!(connection = %id, %err, "cannot open control streams");
            Vec::new()
        }
    };

    tokio::spawn(ctx.clone().read_datagrams());
    let uni = {
        let ctx = ctx.clone();
        async move {
            while let Ok(recv) = ctx.connection.accept_uni().await {
                tokio::spawn(ctx.clone().read_uni(recv));
            }
        }
    };
    let bidi = {
        let ctx = ctx.clone();
        async move {
            while let Ok((send, recv)) = ctx.connection.accept_bi().await {
                tokio::spawn(ctx.clone().read_bidi(send, recv));
            }
        }
    };
    tokio::spawn(uni);
    tokio::spawn(bidi);

    let err = connection.closed().await;
    let (error_code, reason) = termination(&err);
    info!(connection = %id, error_code, %reason, "connection closed");
    ctx.sink.send(QuicEvent::ConnectionTerminated { error_code, reason });
}
