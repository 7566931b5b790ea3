//! Live endpoint probe
//!
//! Connects to the management service over TLS and reads back the leaf
//! certificate it is actually serving. The chain is not checked against any
//! trust store: the probe only compares what is served with what is on
//! disk. Handshake signatures are still verified.

use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::cert::fingerprint;

/// Errors raised while probing an endpoint.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid server name '{0}'")]
    InvalidName(String),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] rustls::Error),

    #[error("connection to {address} failed: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no response from {address} within {timeout:?}")]
    Timeout { address: String, timeout: Duration },

    #[error("{0} presented no certificate")]
    NoCertificate(String),
}

/// Leaf certificate presented by an endpoint.
#[derive(Debug, Clone)]
pub struct ServedCertificate {
    pub der: Vec<u8>,
    pub fingerprint_sha256: String,
}

/// Connect to `host:port` with SNI `server_name` and return the served leaf.
pub async fn served_certificate(
    host: &str,
    port: u16,
    server_name: &str,
    timeout: Duration,
) -> Result<ServedCertificate, ProbeError> {
    let address = format!("{host}:{port}");
    let name = ServerName::try_from(server_name.to_string())
        .map_err(|_| ProbeError::InvalidName(server_name.to_string()))?;
    let connector = TlsConnector::from(Arc::new(client_config()?));

    let handshake = async {
        let tcp = TcpStream::connect((host, port)).await?;
        connector.connect(name, tcp).await
    };
    let stream = tokio::time::timeout(timeout, handshake)
        .await
        .map_err(|_| ProbeError::Timeout {
            address: address.clone(),
            timeout,
        })?
        .map_err(|source| ProbeError::Connect {
            address: address.clone(),
            source,
        })?;

    let (_, connection) = stream.get_ref();
    let leaf = connection
        .peer_certificates()
        .and_then(|certs| certs.first())
        .ok_or_else(|| ProbeError::NoCertificate(address.clone()))?;

    let served = ServedCertificate {
        der: leaf.to_vec(),
        fingerprint_sha256: fingerprint(leaf),
    };
    debug!(address = %address, fingerprint = %served.fingerprint_sha256, "Read served certificate");
    Ok(served)
}

fn client_config() -> Result<ClientConfig, ProbeError> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let config = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
        .with_no_client_auth();
    Ok(config)
}

/// Accepts whatever chain the server presents.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
