//! WebTransport over HTTP/3 server on `quinn`.
//!
//! Each accepted connection runs as a set of tasks that turn QUIC streams
//! into [`wt_relay::QuicEvent`]s. A single loop owns the
//! [`wt_relay::Engine`] and applies them in arrival order.

pub mod config;
pub mod error;
pub mod handlers;
pub(crate) mod h3_source;
pub mod probe;
pub mod quinn_transport;
pub mod resolver;
pub mod server;
pub mod tls;

pub use config::{Args, ServerConfig};
pub use error::{Result, ServerError};
pub use probe::{probe, server_is_running};
pub use quinn_transport::QuinnTransport;
pub use resolver::DocRootResolver;
pub use server::WebTransportH3Server;
pub use tls::SessionTicketStore;
