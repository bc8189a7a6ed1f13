//! Deterministic hash-based authority election (spec §4.4). Every node,
//! given the same connected set, reaches the same decision independently —
//! no quorum protocol, no persisted leader state.

use std::time::Duration;

use watchmesh_types::sdbm_hash;

use crate::registry::TypeRegistry;

pub const FEATURE_CHECKER: &str = "checker";
pub const FEATURE_NOTIFICATION: &str = "notification";

pub const FEATURES: [&str; 2] = [FEATURE_CHECKER, FEATURE_NOTIFICATION];

/// Computes the owner of an object keyed by `object_key` (conventionally
/// `"{type}\t{name}"`) among `candidates`, which must already be filtered
/// down to endpoints that are connected (or self) and advertise support for
/// the feature in question. The hash does not depend on the feature: only
/// the candidate set passed in does, so the same object can have different
/// owners for "checker" and "notification" (spec §4.4).
pub fn elect<'a>(candidates: &mut Vec<&'a str>, object_key: &str) -> Option<&'a str> {
    if candidates.is_empty() {
        return None;
    }
    candidates.sort_unstable();
    let hash = sdbm_hash(object_key);
    let index = (hash as usize) % candidates.len();
    Some(candidates[index])
}

/// Periodic task recomputing authority for every checkable in the registry,
/// run every `election_interval` (default 5s). `connected_peers` should
/// return, for a given feature, the currently-eligible endpoint names
/// (connected peers plus self) that advertise that feature.
pub struct AuthorityManager<F> {
    registry: std::sync::Arc<TypeRegistry>,
    self_identity: String,
    election_interval: Duration,
    connected_peers: F,
}

impl<F> AuthorityManager<F>
where
    F: Fn(&str) -> Vec<String> + Send + Sync + 'static,
{
    pub fn new(
        registry: std::sync::Arc<TypeRegistry>,
        self_identity: String,
        election_interval: Duration,
        connected_peers: F,
    ) -> Self {
        Self {
            registry,
            self_identity,
            election_interval,
            connected_peers,
        }
    }

    /// Runs one election pass over every checkable in the registry.
    pub fn run_once(&self) {
        for feature in FEATURES {
            let candidates = (self.connected_peers)(feature);
            let base_candidates: Vec<&str> = candidates.iter().map(String::as_str).collect();
            for checkable in self.registry.iter() {
                let object_key = format!("{:?}\t{}", checkable.reference.kind(), checkable.reference.canonical_name());
                let mut refs = base_candidates.clone();
                let owner = elect(&mut refs, &object_key);
                let owned = owner == Some(self.self_identity.as_str());
                checkable.set_authority(feature, owned);
            }
        }
    }

    /// Drives `run_once` on a ticking loop until cancelled.
    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.election_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once();
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn election_is_deterministic_given_the_same_candidate_set() {
        let mut candidates = vec!["a", "b", "c"];
        let first = elect(&mut candidates, "host!http");
        let mut candidates_reordered = vec!["c", "a", "b"];
        let second = elect(&mut candidates_reordered, "host!http");
        assert_eq!(first, second);
    }

    #[test]
    fn empty_candidate_set_has_no_owner() {
        let mut candidates: Vec<&str> = vec![];
        assert_eq!(elect(&mut candidates, "host!http"), None);
    }

    #[test]
    fn scenario_3_authority_determinism() {
        // Matches the spec's worked example: {"a","b","c"}, object "host!http".
        let mut candidates = vec!["a", "b", "c"];
        let owner = elect(&mut candidates, "host!http").unwrap();
        let mut candidates2 = vec!["b", "c", "a"];
        let owner2 = elect(&mut candidates2, "host!http").unwrap();
        assert_eq!(owner, owner2);
    }
}
