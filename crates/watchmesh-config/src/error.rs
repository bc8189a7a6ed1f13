use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("no peer entry matches this node's own identity {identity:?}")]
    MissingSelfEndpoint { identity: String },

    #[error("peer {name:?} is listed more than once")]
    DuplicatePeer { name: String },

    #[error("domain {domain:?} grants privileges to unknown endpoint {endpoint:?}")]
    UnknownEndpointInDomain { domain: String, endpoint: String },

    #[error("invalid peer address {address:?} for endpoint {name:?}: {source}")]
    InvalidAddress {
        name: String,
        address: String,
        #[source]
        source: std::net::AddrParseError,
    },
}
