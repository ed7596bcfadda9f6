//! Top-level event dispatch and the relay between sessions.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, warn};
use wt_proto::{stream, PayloadHeader};

use crate::config::Config;
use crate::connection::{Connection, Context, Inbound};
use crate::error::{Error, Result};
use crate::event::QuicEvent;
use crate::handler::HandlerResolver;
use crate::registry::{ConnectionId, SessionRegistry};
use crate::stash::{MemoryStash, Stash};
use crate::transport::Transport;

/// Owns every connection and the registry their sessions relay through.
pub struct Engine<T> {
    config: Config,
    resolver: Arc<dyn HandlerResolver>,
    stash: Arc<dyn Stash>,
    registry: SessionRegistry,
    connections: HashMap<ConnectionId, Connection<T>>,
}

impl<T: Transport> Engine<T> {
    pub fn new(config: Config, resolver: Arc<dyn HandlerResolver>) -> Self {
        Self::with_stash(config, resolver, Arc::new(MemoryStash::new()))
    }

    pub fn with_stash(
        config: Config,
        resolver: Arc<dyn HandlerResolver>,
        stash: Arc<dyn Stash>,
    ) -> Self {
        Self {
            config,
            resolver,
            stash,
            registry: SessionRegistry::new(),
            connections: HashMap::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stash(&self) -> &Arc<dyn Stash> {
        &self.stash
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn add_connection(&mut self, id: ConnectionId, transport: T) {
        if self
            .connections
            .insert(id, Connection::new(id, transport))
            .is_some()
        {
            warn!(connection = %id, "replaced an existing connection");
        }
        debug!(connection = %id, "connection added");
    }

    /// Forget a connection. Its registry entry, if any, is left alone.
    pub fn remove_connection(&mut self, id: ConnectionId) -> Option<Connection<T>> {
        self.connections.remove(&id)
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection<T>> {
        self.connections.get(&id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Sessions currently in the relay registry.
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Process one event for connection `id`.
    ///
    /// Request errors are answered on the wire and not returned. Fatal errors
    /// close the connection with their HTTP/3 code before being returned.
    pub fn handle_event(&mut self, id: ConnectionId, event: QuicEvent) -> Result<()> {
        let terminated = matches!(event, QuicEvent::ConnectionTerminated { .. });
        let result = self.dispatch(id, event);

        let result = match result {
            Err(Error::Request { stream_id, status }) => {
                self.send_error_response(id, stream_id, status);
                Ok(())
            }
            Err(err) if err.is_fatal() => {
                error!(connection = %id, error = %err, "closing connection");
                if let Some(conn) = self.connections.get(&id) {
                    conn.transport().close(err.h3_code(), &err.to_string());
                }
                Err(err)
            }
            Err(err) => {
                warn!(connection = %id, error = %err, "event failed");
                Err(err)
            }
            ok => ok,
        };

        if terminated {
            self.connections.remove(&id);
        }
        result
    }

    fn dispatch(&mut self, id: ConnectionId, event: QuicEvent) -> Result<()> {
        let Some(conn) = self.connections.get_mut(&id) else {
            debug!(connection = %id, "event for unknown connection; dropping");
            return Ok(());
        };
        let mut ctx = Context {
            config: &self.config,
            resolver: self.resolver.as_ref(),
            stash: &self.stash,
            registry: &mut self.registry,
        };
        let Some(inbound) = conn.handle_event(event, &mut ctx)? else {
            return Ok(());
        };

        relay(&self.connections, &self.registry, &self.config, id, &inbound);

        if let Some(conn) = self.connections.get_mut(&id) {
            let mut ctx = Context {
                config: &self.config,
                resolver: self.resolver.as_ref(),
                stash: &self.stash,
                registry: &mut self.registry,
            };
            conn.deliver(inbound, &mut ctx);
        }
        Ok(())
    }

    fn send_error_response(&self, id: ConnectionId, stream_id: u64, status: u16) {
        debug!(connection = %id, stream_id, status, "sending error response");
        let Some(conn) = self.connections.get(&id) else {
            return;
        };
        let headers = self.config.error_response(status);
        if let Err(err) = conn.transport().send_headers(stream_id, &headers, true) {
            warn!(connection = %id, stream_id, %err, "failed to send error response");
        }
    }
}

/// Fan `inbound` out to every other registered session. Failures toward one
/// target never affect the sender.
fn relay<T: Transport>(
    connections: &HashMap<ConnectionId, Connection<T>>,
    registry: &SessionRegistry,
    config: &Config,
    from: ConnectionId,
    inbound: &Inbound,
) {
    match inbound {
        Inbound::Stream {
            stream_id,
            data,
            stream_ended,
        } => {
            let eligible = PayloadHeader::parse(data)
                .is_some_and(|header| config.is_relay_stream(header.stream_id));
            if !eligible {
                return;
            }
            if !stream::is_bidi(*stream_id) {
                debug!(connection = %from, stream_id, "not relaying a unidirectional stream");
                return;
            }
            for entry in registry.peers(from) {
                let Some(target) = connections.get(&entry.connection) else {
                    debug!(connection = %entry.connection, "relay target is gone");
                    continue;
                };
                if let Err(err) = target.relay_stream_data(*stream_id, data, *stream_ended) {
                    warn!(from = %from, to = %entry.connection, stream_id, %err, "stream relay failed");
                }
            }
        }
        Inbound::Datagram { data } => {
            for entry in registry.peers(from) {
                let Some(target) = connections.get(&entry.connection) else {
                    debug!(connection = %entry.connection, "relay target is gone");
                    continue;
                };
                if let Err(err) = target.relay_datagram(data) {
                    warn!(from = %from, to = %entry.connection, %err, "datagram relay failed");
                }
            }
        }
    }
}
