use rustls::pki_types::CertificateDer;

use crate::error::TlsError;

/// Pulls the subject common name out of a DER-encoded certificate.
///
/// This is how a [`ClusterListener`] (in `watchmesh-core`) learns which
/// configured peer just dialed in or accepted a connection: the CN is
/// matched against `accept_config` and the configured peer list, never
/// against the socket's source address.
pub fn common_name(cert: &CertificateDer<'_>) -> Result<String, TlsError> {
    let (_, parsed) = x509_parser::parse_x509_certificate(cert.as_ref())
        .map_err(|e| TlsError::MalformedCertificate(e.to_string()))?;

    parsed
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_owned)
        .ok_or(TlsError::MissingCommonName)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::generate_simple_self_signed;

    #[test]
    fn extracts_common_name_from_self_signed_cert() {
        let cert = generate_simple_self_signed(vec!["node-a.cluster.local".to_string()]).unwrap();
        let der = CertificateDer::from(cert.serialize_der().unwrap());
        let cn = common_name(&der).unwrap();
        assert_eq!(cn, "node-a.cluster.local");
    }
}
