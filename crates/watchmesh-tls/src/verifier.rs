//! Chain-only certificate verification against the cluster's private CA.
//!
//! watchmesh peers dial each other by configured `host:port`, not by DNS
//! name, so the usual hostname check a [`rustls::client::danger::ServerCertVerifier`]
//! performs does not apply here: a peer is who its certificate chains to
//! the shared CA, plus whatever CN the caller later matches against
//! `accept_config`. Both directions of the handshake therefore share one
//! chain-verification routine and skip SAN/hostname matching entirely.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{DigitallySignedStruct, DistinguishedName, Error as RustlsError, RootCertStore, SignatureScheme};
use webpki::{EndEntityCert, KeyUsage};

fn webpki_error(err: webpki::Error) -> RustlsError {
    RustlsError::InvalidCertificate(rustls::CertificateError::Other(rustls::OtherError(
        Arc::new(err),
    )))
}

fn verify_chain<'a>(
    end_entity: &CertificateDer<'a>,
    intermediates: &[CertificateDer<'a>],
    roots: &RootCertStore,
    usage: KeyUsage,
    now: UnixTime,
) -> Result<(), RustlsError> {
    let cert = EndEntityCert::try_from(end_entity).map_err(webpki_error)?;
    let anchors: Vec<_> = roots.roots.iter().collect();
    cert.verify_for_usage(
        webpki::ALL_VERIFICATION_ALGS,
        &anchors,
        intermediates,
        now,
        usage,
        None,
        None,
    )
    .map_err(webpki_error)
}

/// Verifies an inbound peer's client certificate chains to the cluster CA.
/// CN-based allowlisting (`accept_config`) happens one layer up, after the
/// handshake completes.
#[derive(Debug)]
pub struct MeshClientCertVerifier {
    roots: RootCertStore,
    provider: Arc<CryptoProvider>,
}

impl MeshClientCertVerifier {
    pub fn new(roots: RootCertStore) -> Arc<Self> {
        Arc::new(Self {
            roots,
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        })
    }
}

impl ClientCertVerifier for MeshClientCertVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        true
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<ClientCertVerified, RustlsError> {
        verify_chain(end_entity, intermediates, &self.roots, KeyUsage::client_auth(), now)?;
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

/// Verifies an outbound dial's server certificate chains to the cluster CA.
/// No hostname matching: the peer was reached at a configured `host:port`,
/// not a DNS name.
#[derive(Debug)]
pub struct MeshServerCertVerifier {
    roots: RootCertStore,
    provider: Arc<CryptoProvider>,
}

impl MeshServerCertVerifier {
    pub fn new(roots: RootCertStore) -> Arc<Self> {
        Arc::new(Self {
            roots,
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        })
    }
}

impl ServerCertVerifier for MeshServerCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, RustlsError> {
        verify_chain(end_entity, intermediates, &self.roots, KeyUsage::server_auth(), now)?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}
