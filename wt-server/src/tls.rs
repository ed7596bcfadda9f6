//! Certificates, rustls/quinn configuration and the TLS session store.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use quinn::crypto::rustls::{QuicClientConfig, QuicServerConfig};
use quinn::{IdleTimeout, TransportConfig};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::StoresServerSessions;
use rustls::{DigitallySignedStruct, SignatureScheme};
use tracing::debug;

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};

pub const H3_ALPN: &[u8] = b"h3";

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| ServerError::Read {
            path: path.to_owned(),
            source,
        })
}

pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|source| ServerError::Read {
            path: path.to_owned(),
            source,
        })?;
    if certs.is_empty() {
        return Err(ServerError::NoCertificates(path.to_owned()));
    }
    Ok(certs)
}

pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|source| ServerError::Read {
            path: path.to_owned(),
            source,
        })?
        .ok_or_else(|| ServerError::NoPrivateKey(path.to_owned()))
}

/// TLS 1.3 with ALPN `h3`, remembering sessions in `sessions`.
pub fn server_crypto(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    sessions: Arc<SessionTicketStore>,
) -> Result<rustls::ServerConfig> {
    let mut crypto = rustls::ServerConfig::builder_with_provider(provider())
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    crypto.alpn_protocols = vec![H3_ALPN.to_vec()];
    crypto.session_storage = sessions;
    Ok(crypto)
}

pub fn quic_server_config(config: &ServerConfig) -> Result<quinn::ServerConfig> {
    debug!(cert = %config.cert_path.display(), key = %config.key_path.display(), "loading TLS material");
    let certs = load_certs(&config.cert_path)?;
    let key = load_private_key(&config.key_path)?;
    let crypto = server_crypto(certs, key, Arc::new(SessionTicketStore::new()))?;

    let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(
        QuicServerConfig::try_from(crypto).map_err(|e| ServerError::Quic(e.to_string()))?,
    ));

    let mut transport = TransportConfig::default();
    transport.datagram_receive_buffer_size(Some(config.max_datagram_frame_size));
    transport.max_idle_timeout(Some(
        IdleTimeout::try_from(config.idle_timeout).map_err(|e| ServerError::Quic(e.to_string()))?,
    ));
    server_config.transport_config(Arc::new(transport));
    Ok(server_config)
}

/// Client configuration for the liveness probe. The server certificate is
/// not verified.
pub fn probe_client_config() -> Result<quinn::ClientConfig> {
    let provider = provider();
    let mut crypto = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerify(provider)))
        .with_no_client_auth();
    crypto.alpn_protocols = vec![H3_ALPN.to_vec()];
    Ok(quinn::ClientConfig::new(Arc::new(
        QuicClientConfig::try_from(crypto).map_err(|e| ServerError::Quic(e.to_string()))?,
    )))
}

/// In-memory TLS session store keyed by ticket label. Entries live until
/// popped; nothing is evicted.
#[derive(Debug, Default)]
pub struct SessionTicketStore {
    tickets: DashMap<Vec<u8>, Vec<u8>>,
}

impl SessionTicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, label: Vec<u8>, ticket: Vec<u8>) {
        self.tickets.insert(label, ticket);
    }

    pub fn pop(&self, label: &[u8]) -> Option<Vec<u8>> {
        self.tickets.remove(label).map(|(_, ticket)| ticket)
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }
}

impl StoresServerSessions for SessionTicketStore {
    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> bool {
        self.add(key, value);
        true
    }

    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.tickets.get(key).map(|ticket| ticket.value().clone())
    }

    fn take(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.pop(key)
    }

    fn can_cache(&self) -> bool {
        true
    }
}

#[derive(Debug)]
struct NoVerify(Arc<CryptoProvider>);

impl ServerCertVerifier for NoVerify {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_store_pops_once() {
        let store = SessionTicketStore::new();
        store.add(b"label".to_vec(), b"ticket".to_vec());
        assert_eq!(StoresServerSessions::get(&store, b"label"), Some(b"ticket".to_vec()));
        assert_eq!(store.pop(b"label"), Some(b"ticket".to_vec()));
        assert_eq!(store.pop(b"label"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn rustls_puts_and_takes_through_the_store() {
        let store = SessionTicketStore::new();
        assert!(store.can_cache());
        assert!(store.put(b"a".to_vec(), b"1".to_vec()));
        assert!(store.put(b"a".to_vec(), b"2".to_vec()));
        assert_eq!(store.len(), 1);
        assert_eq!(store.take(b"a"), Some(b"2".to_vec()));
        assert_eq!(store.take(b"a"), None);
    }

    #[test]
    fn missing_certificate_file_is_reported() {
        let err = load_certs(Path::new("/nonexistent/cert.pem")).unwrap_err();
        assert!(matches!(err, ServerError::Read { .. }), "{err}");
    }

    #[test]
    fn probe_config_builds() {
        probe_client_config().unwrap();
    }
}
