use thiserror::Error;

#[derive(Error, Debug)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} contains no PEM certificates")]
    NoCertificates { path: String },

    #[error("{path} contains no PEM private key")]
    NoPrivateKey { path: String },

    #[error("peer certificate has no parseable subject common name")]
    MissingCommonName,

    #[error("peer certificate could not be parsed: {0}")]
    MalformedCertificate(String),

    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}
