//! CA extraction from the downstream API server.
//!
//! The signing flow returns a client certificate but not the CA that
//! clients must trust. The API server presents its chain on every TLS
//! handshake, so the CA is recovered by dialing the server with
//! verification disabled and walking the presented chain. Verification
//! is skipped only here; the extracted CA is what makes every later
//! connection verifiable.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use x509_parser::prelude::*;

use crate::spoke::host_port;

/// Fetch the CA certificate of an API server, PEM-encoded.
pub async fn fetch_ca_pem(server: &str) -> Result<Vec<u8>> {
    let address = host_port(server);
    let host = address
        .split(':')
        .next()
        .context("empty server address")?
        .to_string();

    let tcp = TcpStream::connect(&address)
        .await
        .with_context(|| format!("dialing {address}"))?;

    let provider = rustls::crypto::ring::default_provider();
    let config = rustls::ClientConfig::builder_with_provider(Arc::new(provider.clone()))
        .with_safe_default_protocol_versions()
        .context("configuring TLS")?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(ChainCollector { provider }))
        .with_no_client_auth();

    let server_name = ServerName::try_from(host).context("invalid server name")?;
    let stream = TlsConnector::from(Arc::new(config))
        .connect(server_name, tcp)
        .await
        .with_context(|| format!("TLS handshake with {address}"))?;

    let (_, session) = stream.get_ref();
    let chain: Vec<Vec<u8>> = session
        .peer_certificates()
        .unwrap_or_default()
        .iter()
        .map(|cert| cert.as_ref().to_vec())
        .collect();
    if chain.is_empty() {
        bail!("no certificates presented by {address}");
    }

    let index = pick_ca_index(&chain);
    Ok(::pem::encode(&::pem::Pem::new("CERTIFICATE", chain[index].clone())).into_bytes())
}

/// Choose the certificate to treat as the CA: the deepest chain entry
/// that declares itself a CA, falling back to the last entry.
pub fn pick_ca_index(chain: &[Vec<u8>]) -> usize {
    for (index, der) in chain.iter().enumerate().rev() {
        if let Ok((_, cert)) = X509Certificate::from_der(der) {
            let is_ca = cert
                .basic_constraints()
                .ok()
                .flatten()
                .map(|bc| bc.value.ca)
                .unwrap_or(false);
            if is_ca {
                return index;
            }
        }
    }
    chain.len() - 1
}

/// Accepts any certificate while capturing nothing; used only for the
/// chain-extraction dial.
#[derive(Debug)]
struct ChainCollector {
    provider: CryptoProvider,
}

impl ServerCertVerifier for ChainCollector {
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
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ca_der() -> Vec<u8> {
        let key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::default();
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "test-root");
        params.self_signed(&key).unwrap().der().to_vec()
    }

    fn leaf_der() -> Vec<u8> {
        let cert = rcgen::generate_simple_self_signed(vec!["leaf.example.com".to_string()])
            .unwrap();
        cert.cert.der().to_vec()
    }

    #[test]
    fn prefers_deepest_ca_certificate() {
        let chain = vec![leaf_der(), ca_der(), ca_der()];
        assert_eq!(pick_ca_index(&chain), 2);
    }

    #[test]
    fn falls_back_to_last_entry_without_any_ca() {
        let chain = vec![leaf_der(), leaf_der()];
        assert_eq!(pick_ca_index(&chain), 1);
    }
}
