//! Application callbacks and the capabilities they are handed.

use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, warn};
use url::Url;
use wt_proto::{stream, CloseInfo};

use crate::datagram::DatagramRoute;
use crate::session::{Attachments, Session};
use crate::stash::{Stash, StashHandle};
use crate::transport::{Transport, TransportResult};

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerResult = Result<(), HandlerError>;

/// Callbacks for one session. Every method defaults to doing nothing.
///
/// A callback that returns `Err` or panics is logged; the session carries on
/// as if the callback were absent.
#[allow(unused_variables)]
pub trait SessionHandler {
    /// Runs before the CONNECT response is sent. Adding a `:status` other
    /// than 200 to `response_headers` rejects the session.
    fn connect_received(
        &mut self,
        request_headers: &[(String, String)],
        response_headers: &mut Vec<(String, String)>,
    ) -> HandlerResult {
        Ok(())
    }

    fn session_established(&mut self, session: &mut SessionHandle<'_>) -> HandlerResult {
        Ok(())
    }

    fn stream_data_received(
        &mut self,
        session: &mut SessionHandle<'_>,
        stream_id: u64,
        data: &[u8],
        stream_ended: bool,
    ) -> HandlerResult {
        Ok(())
    }

    fn datagram_received(&mut self, session: &mut SessionHandle<'_>, data: &[u8]) -> HandlerResult {
        Ok(())
    }

    fn session_closed(
        &mut self,
        session: &mut SessionHandle<'_>,
        close_info: Option<&CloseInfo>,
        abruptly: bool,
    ) -> HandlerResult {
        Ok(())
    }

    fn stream_reset(
        &mut self,
        session: &mut SessionHandle<'_>,
        stream_id: u64,
        error_code: u64,
    ) -> HandlerResult {
        Ok(())
    }
}

/// What a callback may do with its session.
pub struct SessionHandle<'a> {
    session: &'a mut Session,
    transport: &'a dyn Transport,
    datagrams: DatagramRoute,
    stash_store: &'a Arc<dyn Stash>,
    stash_path: &'a str,
}

impl<'a> SessionHandle<'a> {
    pub(crate) fn new(
        session: &'a mut Session,
        transport: &'a dyn Transport,
        datagrams: DatagramRoute,
        stash_store: &'a Arc<dyn Stash>,
        stash_path: &'a str,
    ) -> Self {
        Self {
            session,
            transport,
            datagrams,
            stash_store,
            stash_path,
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session.id()
    }

    pub fn request_headers(&self) -> &[(String, String)] {
        self.session.request_headers()
    }

    pub fn attachments(&mut self) -> &mut Attachments {
        &mut self.session.attachments
    }

    /// The cross-session stash. Opened on first use.
    pub fn stash(&mut self) -> &StashHandle {
        let (store, path) = (self.stash_store, self.stash_path);
        self.session.stash.get_or_insert_with(|| {
            debug!(path, "opening stash");
            StashHandle::new(Arc::clone(store), path)
        })
    }

    pub fn stream_is_unidirectional(&self, stream_id: u64) -> bool {
        stream::is_unidirectional(stream_id)
    }

    /// Close the session once the current callback returns, sending
    /// CLOSE_WEBTRANSPORT_SESSION first when `close_info` is given.
    pub fn close(&mut self, close_info: Option<CloseInfo>) {
        if self.session.close_request.is_none() {
            self.session.close_request = Some(close_info);
        }
    }

    pub fn create_unidirectional_stream(&mut self) -> TransportResult<u64> {
        let id = self
            .transport
            .create_webtransport_stream(self.session.id(), true)?;
        debug!(session_id = self.session.id(), stream_id = id, "created unidirectional stream");
        Ok(id)
    }

    pub fn create_bidirectional_stream(&mut self) -> TransportResult<u64> {
        let id = self
            .transport
            .create_webtransport_stream(self.session.id(), false)?;
        debug!(session_id = self.session.id(), stream_id = id, "created bidirectional stream");
        Ok(id)
    }

    pub fn send_stream_data(
        &mut self,
        stream_id: u64,
        data: &[u8],
        end_stream: bool,
    ) -> TransportResult<()> {
        self.transport.send_stream_data(stream_id, data, end_stream)
    }

    /// Datagrams the peer has not agreed to receive are dropped with a
    /// warning.
    pub fn send_datagram(&mut self, data: &[u8]) -> TransportResult<()> {
        if !self.datagrams.allowed {
            warn!(
                session_id = self.session.id(),
                "sending a datagram while that's not allowed; discarding it"
            );
            return Ok(());
        }
        self.transport.send_datagram(self.datagrams.flow_id, data)
    }

    pub fn stop_stream(&mut self, stream_id: u64, code: u64) -> TransportResult<()> {
        self.transport.stop_stream(stream_id, code)
    }

    pub fn reset_stream(&mut self, stream_id: u64, code: u64) -> TransportResult<()> {
        self.transport.reset_stream(stream_id, code)
    }
}

/// Run one callback, containing its failure.
pub(crate) fn invoke<F>(callback: &'static str, session_id: u64, f: F)
where
    F: FnOnce() -> HandlerResult,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            let backtrace = Backtrace::force_capture();
            error!(callback, session_id, error = %err, %backtrace, "handler callback failed");
        }
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_owned());
            let backtrace = Backtrace::force_capture();
            error!(callback, session_id, panic = %message, %backtrace, "handler callback panicked");
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no handler for {0}")]
    NotFound(String),
}

/// Maps a CONNECT `:path` to a fresh handler for the new session.
pub trait HandlerResolver: Send + Sync {
    fn resolve(&self, path: &str) -> Result<Box<dyn SessionHandler>, ResolveError>;
}

type HandlerFactory = Box<dyn Fn() -> Box<dyn SessionHandler> + Send + Sync>;

/// Handlers registered by path ahead of time. The query string of a request
/// path is ignored when matching.
#[derive(Default)]
pub struct HandlerRegistry {
    factories: HashMap<String, HandlerFactory>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, H>(&mut self, path: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: SessionHandler + 'static,
    {
        let factory: HandlerFactory =
            Box::new(move || Box::new(factory()) as Box<dyn SessionHandler>);
        self.factories.insert(path.into(), factory);
        self
    }

    pub fn contains(&self, path: &str) -> bool {
        request_path(path).is_some_and(|p| self.factories.contains_key(&p))
    }

    /// A fresh handler registered under exactly `name`.
    pub fn create(&self, name: &str) -> Option<Box<dyn SessionHandler>> {
        self.factories.get(name).map(|factory| factory())
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl HandlerResolver for HandlerRegistry {
    fn resolve(&self, path: &str) -> Result<Box<dyn SessionHandler>, ResolveError> {
        request_path(path)
            .and_then(|p| self.create(&p))
            .ok_or_else(|| ResolveError::NotFound(path.to_owned()))
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

/// A request target (`:path`) as a URL on a placeholder origin.
pub fn request_url(target: &str) -> Option<Url> {
    Url::parse("https://localhost/").ok()?.join(target).ok()
}

/// The normalized path of a request target, without query or fragment.
pub fn request_path(target: &str) -> Option<String> {
    request_url(target).map(|url| url.path().to_owned())
}
