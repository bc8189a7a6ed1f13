use serde::{Deserialize, Serialize};
use watchmesh_types::Privilege;

/// A named security scope binding endpoints to privileges over the
/// checkables that list this domain. If a checkable belongs to no domain
/// at all, every endpoint has `Privilege::ALL` over it (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DomainConfig {
    pub name: String,
    pub grants: Vec<DomainGrant>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DomainGrant {
    pub endpoint: String,
    pub privileges: Privilege,
}

impl DomainConfig {
    pub fn privileges_for(&self, endpoint: &str) -> Option<Privilege> {
        self.grants
            .iter()
            .find(|g| g.endpoint == endpoint)
            .map(|g| g.privileges)
    }
}
