//! Liveness check: can a QUIC handshake with ALPN `h3` complete?

use std::net::SocketAddr;
use std::time::Duration;

use quinn::Endpoint;
use tracing::{debug, warn};

use crate::config::resolve;
use crate::error::{Result, ServerError};
use crate::tls::probe_client_config;

async fn connect(host: &str, port: u16) -> Result<()> {
    let addr = resolve(host, port)?;
    let local: SocketAddr = if addr.is_ipv6() {
        "[::]:0".parse()
    } else {
        "0.0.0.0:0".parse()
    }
    .map_err(|_| ServerError::Address(addr.to_string()))?;

    let mut endpoint = Endpoint::client(local).map_err(|source| ServerError::Bind {
        addr: local,
        source,
    })?;
    endpoint.set_default_client_config(probe_client_config()?);

    let connection = endpoint
        .connect(addr, host)
        .map_err(|e| ServerError::Connect(e.to_string()))?
        .await
        .map_err(|e| ServerError::Connect(e.to_string()))?;
    connection.close(0u32.into(), b"probe done");
    endpoint.wait_idle().await;
    Ok(())
}

/// True if a handshake with `host:port` completes within `timeout`.
pub async fn probe(host: &str, port: u16, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, connect(host, port)).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            debug!(host, port, %err, "probe failed");
            false
        }
        Err(_) => {
            warn!(host, port, "Failed to connect WebTransport over HTTP/3 server");
            false
        }
    }
}

/// Blocking form of [`probe`] for callers outside a runtime.
pub fn server_is_running(host: &str, port: u16, timeout: Duration) -> bool {
    match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime.block_on(probe(host, port, timeout)),
        Err(err) => {
            warn!(%err, "cannot build probe runtime");
            false
        }
    }
}
