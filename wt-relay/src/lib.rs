//! WebTransport session engine.
//!
//! The engine is synchronous and performs no I/O of its own. A transport
//! adapter feeds it [`QuicEvent`]s per connection and implements
//! [`Transport`] so the engine can answer. Established sessions share a
//! [`SessionRegistry`] through which stream payloads and datagrams are
//! relayed to every other session.

pub mod config;
pub mod connection;
pub mod datagram;
pub mod engine;
pub mod error;
pub mod event;
pub mod handler;
pub mod registry;
pub mod session;
pub mod stash;
pub mod transport;

pub use config::Config;
pub use connection::Connection;
pub use datagram::DatagramNegotiator;
pub use engine::Engine;
pub use error::{Error, Result};
pub use event::{H3Event, QuicEvent};
pub use handler::{
    HandlerError, HandlerRegistry, HandlerResolver, HandlerResult, ResolveError, SessionHandle,
    SessionHandler,
};
pub use registry::{ConnectionId, SessionEntry, SessionRegistry};
pub use session::{Attachments, Session, SessionState};
pub use stash::{MemoryStash, Stash, StashError, StashHandle};
pub use transport::{Transport, TransportError};

pub use wt_proto::{CloseInfo, Settings};
