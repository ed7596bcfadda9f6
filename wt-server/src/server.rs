use std::net::SocketAddr;
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

use quinn::{Endpoint, VarInt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use wt_relay::{ConnectionId, Engine, HandlerResolver};

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::h3_source::{self, EngineMessage};
use crate::quinn_transport::QuinnTransport;
use crate::resolver::DocRootResolver;
use crate::tls;

const SERVER_STOPPED: u32 = 0x100;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

struct Running {
    shutdown: oneshot::Sender<()>,
    thread: JoinHandle<()>,
    local_addr: SocketAddr,
}

/// WebTransport over HTTP/3 server running its own thread and runtime.
///
/// Dropping a started server stops it.
pub struct WebTransportH3Server {
    config: ServerConfig,
    running: Option<Running>,
}

impl WebTransportH3Server {
    pub fn new(config: ServerConfig) -> Self {
        info!(cert = %config.cert_path.display(), "WebTransport over HTTP/3 server");
        Self {
            config,
            running: None,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Address the endpoint is bound to once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.local_addr)
    }

    pub fn is_started(&self) -> bool {
        self.running.is_some()
    }

    /// Bind and start serving. Returns once the endpoint is bound.
    pub fn start(&mut self) -> Result<SocketAddr> {
        if self.running.is_some() {
            return Err(ServerError::AlreadyStarted);
        }
        let server_config = tls::quic_server_config(&self.config)?;
        let addr = self.config.bind_addr()?;
        let resolver: Arc<dyn HandlerResolver> =
            Arc::new(DocRootResolver::new(&self.config.doc_root));
        let engine = self.config.engine.clone();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let thread = std::thread::Builder::new()
            .name("webtransport-h3-server".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = ready_tx.send(Err(ServerError::Runtime(err)));
                        return;
                    }
                };
                runtime.block_on(async move {
                    let endpoint = match Endpoint::server(server_config, addr) {
                        Ok(endpoint) => endpoint,
                        Err(source) => {
                            let _ = ready_tx.send(Err(ServerError::Bind { addr, source }));
                            return;
                        }
                    };
                    let local_addr = match endpoint.local_addr() {
                        Ok(local_addr) => local_addr,
                        Err(source) => {
                            let _ = ready_tx.send(Err(ServerError::Bind { addr, source }));
                            return;
                        }
                    };
                    if ready_tx.send(Ok(local_addr)).is_err() {
                        return;
                    }
                    serve(endpoint, Engine::new(engine, resolver), shutdown_rx).await;
                });
            })
            .map_err(|err| ServerError::Thread(err.to_string()))?;

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(ServerError::Thread("exited before binding".into())));
        let local_addr = match ready {
            Ok(local_addr) => local_addr,
            Err(err) => {
                let _ = thread.join();
                return Err(err);
            }
        };

        info!(%local_addr, doc_root = %self.config.doc_root.display(), "Started");
        self.running = Some(Running {
            shutdown: shutdown_tx,
            thread,
            local_addr,
        });
        Ok(local_addr)
    }

    /// Stop serving and wait for the server thread. Stopping a server that
    /// is not running does nothing.
    pub fn stop(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        if running.shutdown.send(()).is_err() {
            debug!("server loop already gone");
        }
        running
            .thread
            .join()
            .map_err(|_| ServerError::Thread("server thread panicked".into()))?;
        info!(local_addr = %running.local_addr, "Stopped");
        Ok(())
    }
}

impl Drop for WebTransportH3Server {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!(%err, "failed to stop server");
        }
    }
}

impl std::fmt::Debug for WebTransportH3Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebTransportH3Server")
            .field("config", &self.config)
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

async fn serve(
    endpoint: Endpoint,
    mut engine: Engine<QuinnTransport>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut next_id = 0;
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            incoming = endpoint.accept() => {
                let Some(incoming) = incoming else {
                    break;
                };
                next_id += 1;
                tokio::spawn(h3_source::drive(ConnectionId(next_id), incoming, tx.clone()));
            }
            Some(message) = rx.recv() => dispatch(&mut engine, message),
        }
    }

    endpoint.close(VarInt::from_u32(SERVER_STOPPED), b"server stopped");
    if tokio::time::timeout(DRAIN_TIMEOUT, endpoint.wait_idle())
        .await
        .is_err()
    {
        debug!("connections still draining at shutdown");
    }
}

fn dispatch(engine: &mut Engine<QuinnTransport>, message: EngineMessage) {
    match message {
        EngineMessage::Connected { id, transport } => {
            debug!(connection = %id, ?transport, "registering connection");
            engine.add_connection(id, transport);
        }
        EngineMessage::Event { id, event } => {
            if let Err(err) = engine.handle_event(id, event) {
                debug!(connection = %id, %err, "event not applied");
            }
        }
    }
}
