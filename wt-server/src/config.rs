use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::error::{Result, ServerError};

/// Command line of the `webtransport-h3-server` binary.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Host to serve from
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    #[arg(short, long, default_value_t = 11000)]
    pub port: u16,

    /// Directory handler paths are resolved against
    #[arg(long)]
    pub doc_root: PathBuf,

    /// PEM certificate chain
    #[arg(long)]
    pub cert: PathBuf,

    /// PEM private key
    #[arg(long)]
    pub key: PathBuf,

    /// Seconds without traffic before a connection is dropped
    #[arg(long, default_value_t = 30)]
    pub idle_timeout: u64,

    /// Log at debug level
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub doc_root: PathBuf,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    /// Advertised as the QUIC `max_datagram_frame_size`.
    pub max_datagram_frame_size: usize,
    pub idle_timeout: Duration,
    pub engine: wt_relay::Config,
}

impl ServerConfig {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        doc_root: impl Into<PathBuf>,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            doc_root: doc_root.into(),
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            max_datagram_frame_size: 65536,
            idle_timeout: Duration::from_secs(30),
            engine: wt_relay::Config::default(),
        }
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        resolve(&self.host, self.port)
    }
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            idle_timeout: Duration::from_secs(args.idle_timeout),
            ..Self::new(args.host, args.port, args.doc_root, args.cert, args.key)
        }
    }
}

pub(crate) fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(|_| ServerError::Address(format!("{host}:{port}")))?
        .next()
        .ok_or_else(|| ServerError::Address(format!("{host}:{port}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_map_onto_config() {
        let args = Args::parse_from([
            "webtransport-h3-server",
            "--doc-root",
            "/srv/wpt",
            "--cert",
            "cert.pem",
            "--key",
            "key.pem",
            "--port",
            "4433",
            "--verbose",
        ]);
        assert!(args.verbose);
        let config = ServerConfig::from(args);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 4433);
        assert_eq!(config.doc_root, PathBuf::from("/srv/wpt"));
        assert_eq!(config.max_datagram_frame_size, 65536);
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.bind_addr().unwrap(), "127.0.0.1:4433".parse().unwrap());
    }

    #[test]
    fn doc_root_is_required() {
        let err = Args::try_parse_from(["webtransport-h3-server", "--cert", "c", "--key", "k"]);
        assert!(err.is_err());
    }
}
