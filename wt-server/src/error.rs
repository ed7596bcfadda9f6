use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("TLS configuration: {0}")]
    Tls(#[from] rustls::Error),

    #[error("QUIC configuration: {0}")]
    Quic(String),

    #[error("cannot resolve {0}")]
    Address(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("server thread: {0}")]
    Thread(String),

    #[error("server already started")]
    AlreadyStarted,
}
