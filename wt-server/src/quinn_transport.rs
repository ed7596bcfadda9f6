//! [`Transport`] over a `quinn` connection.
//!
//! Writes never block the engine: every send stream gets a writer task fed
//! through an unbounded queue, so per-stream order is the call order.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use futures::FutureExt;
use quinn::{ConnectionError, SendDatagramError, SendStream, StreamId, VarInt};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use wt_proto::h3::{frame, qpack};
use wt_proto::stream::{encode_stream_header, StreamKind};
use wt_proto::varint;
use wt_relay::transport::TransportResult;
use wt_relay::{Transport, TransportError};

use crate::h3_source::StreamContext;

pub(crate) fn stream_index(id: StreamId) -> u64 {
    VarInt::from(id).into_inner()
}

pub(crate) fn to_varint(v: u64) -> TransportResult<VarInt> {
    VarInt::from_u64(v).map_err(|_| TransportError::Other(format!("{v} exceeds the varint range")))
}

#[derive(Debug)]
enum WriteOp {
    Write { data: Bytes, fin: bool },
    Reset(VarInt),
}

/// Write queues and stop switches for one connection's streams.
#[derive(Debug, Default)]
pub(crate) struct Streams {
    writers: DashMap<u64, mpsc::UnboundedSender<WriteOp>>,
    stoppers: DashMap<u64, mpsc::UnboundedSender<VarInt>>,
}

impl Streams {
    /// Start the writer task for `send` and return its stream id.
    pub(crate) fn attach_writer(self: &Arc<Self>, send: SendStream) -> u64 {
        let stream_id = stream_index(send.id());
        let (tx, rx) = mpsc::unbounded_channel();
        self.writers.insert(stream_id, tx);
        tokio::spawn(write_stream(stream_id, send, rx, Arc::clone(self)));
        stream_id
    }

    /// Register the stop switch a reader task listens on.
    pub(crate) fn stop_switch(&self, stream_id: u64) -> mpsc::UnboundedReceiver<VarInt> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.stoppers.insert(stream_id, tx);
        rx
    }

    pub(crate) fn reader_done(&self, stream_id: u64) {
        self.stoppers.remove(&stream_id);
    }

    fn queue(&self, stream_id: u64, op: WriteOp, last: bool) -> TransportResult<()> {
        let writer = self
            .writers
            .get(&stream_id)
            .map(|w| w.value().clone())
            .ok_or(TransportError::UnknownStream(stream_id))?;
        if last {
            self.writers.remove(&stream_id);
        }
        writer
            .send(op)
            .map_err(|_| TransportError::NotWritable(stream_id))
    }
}

async fn write_stream(
    stream_id: u64,
    mut send: SendStream,
    mut ops: mpsc::UnboundedReceiver<WriteOp>,
    streams: Arc<Streams>,
) {
    while let Some(op) = ops.recv().await {
        match op {
            WriteOp::Write { data, fin } => {
                if let Err(err) = send.write_all(&data).await {
                    debug!(stream_id, %err, "stream write failed");
                    break;
                }
                if fin {
                    if let Err(err) = send.finish() {
                        debug!(stream_id, %err, "stream finish failed");
                    }
                    break;
                }
            }
            WriteOp::Reset(code) => {
                if let Err(err) = send.reset(code) {
                    debug!(stream_id, %err, "stream reset failed");
                }
                break;
            }
        }
    }
    streams.writers.remove(&stream_id);
}

fn connection_error(err: ConnectionError) -> TransportError {
    match err {
        ConnectionError::LocallyClosed
        | ConnectionError::ApplicationClosed(_)
        | ConnectionError::ConnectionClosed(_)
        | ConnectionError::Reset
        | ConnectionError::TimedOut => TransportError::Closed,
        other => TransportError::Other(other.to_string()),
    }
}

fn wire_error(err: wt_proto::Error) -> TransportError {
    TransportError::Other(err.to_string())
}

pub struct QuinnTransport {
    ctx: StreamContext,
}

impl QuinnTransport {
    pub(crate) fn new(ctx: StreamContext) -> Self {
        Self { ctx }
    }

    pub fn connection(&self) -> &quinn::Connection {
        &self.ctx.connection
    }

    fn write(&self, stream_id: u64, data: Vec<u8>, fin: bool) -> TransportResult<()> {
        let op = WriteOp::Write {
            data: Bytes::from(data),
            fin,
        };
        self.ctx.streams.queue(stream_id, op, fin)
    }
}

impl Transport for QuinnTransport {
    fn send_headers(
        &self,
        stream_id: u64,
        headers: &[(String, String)],
        end_stream: bool,
    ) -> TransportResult<()> {
        let block = qpack::encode_header_block(headers);
        let frame = frame::headers_frame(block).map_err(wire_error)?;
        self.write(stream_id, frame, end_stream)
    }

    fn send_data(&self, stream_id: u64, data: &[u8], end_stream: bool) -> TransportResult<()> {
        if data.is_empty() {
            return self.write(stream_id, Vec::new(), end_stream);
        }
        let frame = frame::data_frame(data).map_err(wire_error)?;
        self.write(stream_id, frame, end_stream)
    }

    fn send_stream_data(
        &self,
        stream_id: u64,
        data: &[u8],
        end_stream: bool,
    ) -> TransportResult<()> {
        self.write(stream_id, data.to_vec(), end_stream)
    }

    fn create_webtransport_stream(
        &self,
        session_id: u64,
        unidirectional: bool,
    ) -> TransportResult<u64> {
        let connection = &self.ctx.connection;
        let (stream_id, kind) = if unidirectional {
            let send = connection
                .open_uni()
                .now_or_never()
                .ok_or(TransportError::StreamLimit)?
                .map_err(connection_error)?;
            (
                self.ctx.streams.attach_writer(send),
                StreamKind::Unidirectional,
            )
        } else {
            let (send, recv) = connection
                .open_bi()
                .now_or_never()
                .ok_or(TransportError::StreamLimit)?
                .map_err(connection_error)?;
            let stream_id = self.ctx.streams.attach_writer(send);
            self.ctx.spawn_session_reader(recv, session_id);
            (stream_id, StreamKind::Bidirectional)
        };
        let header = encode_stream_header(session_id, kind).map_err(wire_error)?;
        self.write(stream_id, header, false)?;
        Ok(stream_id)
    }

    fn send_datagram(&self, flow_id: u64, data: &[u8]) -> TransportResult<()> {
        let mut buf = varint::to_vec(flow_id).map_err(wire_error)?;
        buf.extend_from_slice(data);
        self.ctx
            .connection
            .send_datagram(Bytes::from(buf))
            .map_err(|err| match err {
                SendDatagramError::ConnectionLost(err) => connection_error(err),
                other => TransportError::Other(other.to_string()),
            })
    }

    fn stop_stream(&self, stream_id: u64, code: u64) -> TransportResult<()> {
        let code = to_varint(code)?;
        let (_, switch) = self
            .ctx
            .streams
            .stoppers
            .remove(&stream_id)
            .ok_or(TransportError::UnknownStream(stream_id))?;
        if switch.send(code).is_err() {
            debug!(stream_id, "reader already finished");
        }
        Ok(())
    }

    fn reset_stream(&self, stream_id: u64, code: u64) -> TransportResult<()> {
        let code = to_varint(code)?;
        self.ctx.streams.queue(stream_id, WriteOp::Reset(code), true)
    }

    fn close(&self, error_code: u64, reason: &str) {
        let code = to_varint(error_code).unwrap_or_else(|err| {
            warn!(error_code, %err, "close code out of range");
            VarInt::MAX
        });
        self.ctx.connection.close(code, reason.as_bytes());
    }
}

impl std::fmt::Debug for QuinnTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuinnTransport")
            .field("remote", &self.ctx.connection.remote_address())
            .finish_non_exhaustive()
    }
}
