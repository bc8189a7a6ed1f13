//! Mutual TLS identity layer for a watchmesh cluster.
//!
//! Every peer connection, dialed or accepted, authenticates with a
//! certificate chaining to one shared cluster CA. Identity is the
//! certificate's subject CN, not the socket address: [`identity::common_name`]
//! is how a [`ClusterListener`] (in `watchmesh-core`) learns which
//! configured peer it just heard from.

mod error;
mod identity;
mod load;
mod verifier;

pub use error::TlsError;
pub use identity::common_name;
pub use load::{load_certs, load_private_key, load_root_store};

use std::path::Path;

use rustls::{ClientConfig, ServerConfig};

/// Builds the server-side TLS config for accepting inbound peer connections.
/// Client certificates are mandatory; CN allowlisting happens after the
/// handshake.
pub fn server_config(
    cert_path: &Path,
    key_path: &Path,
    ca_path: &Path,
) -> Result<ServerConfig, TlsError> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;
    let roots = load_root_store(ca_path)?;

    let config = ServerConfig::builder()
        .with_client_cert_verifier(verifier::MeshClientCertVerifier::new(roots))
        .with_single_cert(certs, key)?;
    Ok(config)
}

/// Builds the client-side TLS config used when dialing a configured peer.
pub fn client_config(
    cert_path: &Path,
    key_path: &Path,
    ca_path: &Path,
) -> Result<ClientConfig, TlsError> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;
    let roots = load_root_store(ca_path)?;

    let mut config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(verifier::MeshServerCertVerifier::new(roots))
        .with_client_auth_cert(certs, key)?;
    config.alpn_protocols = vec![b"watchmesh/1".to_vec()];
    Ok(config)
}

/// Extracts the CN a peer presented during the just-completed handshake.
pub fn peer_common_name(
    certs: &[rustls::pki_types::CertificateDer<'_>],
) -> Result<String, TlsError> {
    let cert = certs.first().ok_or(TlsError::MissingCommonName)?;
    common_name(cert)
}
