use serde::{Deserialize, Serialize};

/// One entry from the node's configured peer list (spec §4.6, Dial).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerConfig {
    /// CN this peer is expected to present in its client certificate.
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl PeerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
