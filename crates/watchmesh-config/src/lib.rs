//! Typed configuration for a watchmesh cluster node.
//!
//! A node reads one TOML file at startup describing its own identity, TLS
//! material, the peers it should dial or accept, the security domains that
//! scope command privileges, and the scheduler/cluster tunables in
//! [`Parameters`]. This crate only parses and validates; it performs no
//! networking and holds no runtime state.

mod domain;
mod error;
mod parameters;
mod peer;

pub use domain::{DomainConfig, DomainGrant};
pub use error::ConfigError;
pub use parameters::Parameters;
pub use peer::PeerConfig;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// TLS material a node loads at startup (spec §4.6 / §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub ca_path: PathBuf,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// This node's own CN; must match one entry in `peers`.
    pub identity: String,
    pub bind_address: String,
    pub tls: TlsConfig,
    pub state_dir: PathBuf,
    pub peers: Vec<PeerConfig>,
    /// CNs this node accepts inbound connections from. Checked after the TLS
    /// handshake has already verified the peer's certificate chains to the
    /// shared CA (spec §4.6, Accept).
    #[serde(default)]
    pub accept_config: Vec<String>,
    /// Glob patterns for files this node distributes to peers (spec §4.9).
    #[serde(default)]
    pub config_sync_globs: Vec<String>,
    #[serde(default)]
    pub domains: Vec<DomainConfig>,
    #[serde(default)]
    pub parameters: Parameters,
}

impl ClusterConfig {
    /// Reads and validates a config file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: ClusterConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        let mut found_self = false;
        for peer in &self.peers {
            if !seen.insert(peer.name.clone()) {
                return Err(ConfigError::DuplicatePeer {
                    name: peer.name.clone(),
                });
            }
            if peer.name == self.identity {
                found_self = true;
            }
            peer.address().parse::<std::net::SocketAddr>().map_err(|source| {
                ConfigError::InvalidAddress {
                    name: peer.name.clone(),
                    address: peer.address(),
                    source,
                }
            })?;
        }
        if !found_self {
            return Err(ConfigError::MissingSelfEndpoint {
                identity: self.identity.clone(),
            });
        }

        let known_endpoints: HashSet<&str> =
            self.peers.iter().map(|p| p.name.as_str()).collect();
        for domain in &self.domains {
            for grant in &domain.grants {
                if !known_endpoints.contains(grant.endpoint.as_str()) {
                    return Err(ConfigError::UnknownEndpointInDomain {
                        domain: domain.name.clone(),
                        endpoint: grant.endpoint.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    const BASE: &str = r#"
        identity = "node-a"
        bind_address = "0.0.0.0:5665"
        state_dir = "/var/lib/watchmesh"

        [tls]
        cert_path = "/etc/watchmesh/node-a.crt"
        key_path = "/etc/watchmesh/node-a.key"
        ca_path = "/etc/watchmesh/ca.crt"

        [[peers]]
        name = "node-a"
        host = "127.0.0.1"
        port = 5665

        [[peers]]
        name = "node-b"
        host = "127.0.0.1"
        port = 5666
    "#;

    #[test]
    fn loads_a_valid_config() {
        let file = write_config(BASE);
        let config = ClusterConfig::load(file.path()).unwrap();
        assert_eq!(config.peers.len(), 2);
        assert_eq!(config.parameters.max_concurrent_checks, 512);
    }

    #[test]
    fn rejects_identity_with_no_matching_peer() {
        let contents = BASE.replace("node-a\"\n        bind_address", "node-z\"\n        bind_address");
        let file = write_config(&contents);
        let err = ClusterConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSelfEndpoint { .. }));
    }

    #[test]
    fn rejects_duplicate_peer_names() {
        let contents = format!(
            "{BASE}\n[[peers]]\nname = \"node-b\"\nhost = \"127.0.0.1\"\nport = 5667\n"
        );
        let file = write_config(&contents);
        let err = ClusterConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicatePeer { .. }));
    }

    #[test]
    fn rejects_domain_grant_for_unknown_endpoint() {
        let contents = format!(
            "{BASE}\n[[domains]]\nname = \"dmz\"\n[[domains.grants]]\nendpoint = \"node-z\"\nprivileges = 3\n"
        );
        let file = write_config(&contents);
        let err = ClusterConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownEndpointInDomain { .. }));
    }
}
