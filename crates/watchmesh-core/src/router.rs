//! Relays events to eligible endpoints, enforces security scope, and feeds
//! the persistence log (spec §4.7).

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use watchmesh_types::Privilege;

use crate::endpoint::Endpoint;
use crate::error::ClusterError;
use crate::replay_log::{LogRecord, ReplayLog, SecurityDescriptor};
use crate::wire::RpcMessage;

pub struct MessageRouter {
    self_identity: String,
    endpoints: Arc<DashMap<String, Arc<Endpoint>>>,
    replay_log: Arc<ReplayLog>,
}

impl MessageRouter {
    pub fn new(
        self_identity: impl Into<String>,
        endpoints: Arc<DashMap<String, Arc<Endpoint>>>,
        replay_log: Arc<ReplayLog>,
    ) -> Self {
        Self {
            self_identity: self_identity.into(),
            endpoints,
            replay_log,
        }
    }

    /// `RelayMessage(source_endpoint?, payload, durable)` (spec §4.7).
    pub fn relay(
        &self,
        source: Option<&str>,
        method: &str,
        params: Value,
        durable: bool,
        security: Option<SecurityDescriptor>,
    ) -> Result<(), ClusterError> {
        let now = chrono::Utc::now().timestamp() as f64;
        let mut params = params;
        if let Value::Object(ref mut map) = params {
            map.insert("ts".to_string(), serde_json::json!(now));
        }

        if durable {
            self.replay_log.append(LogRecord {
                ts: now,
                method: method.to_string(),
                source_endpoint: source.map(str::to_string),
                security: security.clone(),
                payload: params.clone(),
            })?;
        }

        let message = RpcMessage::new(method, params);
        for entry in self.endpoints.iter() {
            let endpoint = entry.value();
            if !endpoint.is_connected() {
                continue;
            }
            if Some(endpoint.name.as_str()) == source {
                continue;
            }
            if endpoint.name == self.self_identity {
                continue;
            }
            if endpoint.is_syncing() {
                continue;
            }
            if let Some(sec) = &security {
                if !self.endpoint_allows(endpoint, sec) {
                    continue;
                }
            }
            if endpoint.send(message.clone()).is_err() {
                tracing::debug!(peer = %endpoint.name, "dropped outbound message: writer gone");
            }
        }
        Ok(())
    }

    /// Checks an inbound message's sender has the privileges its security
    /// descriptor requires (spec §4.7, scenario 5).
    pub fn authorize(&self, sender: &str, granted: Privilege, sec: &SecurityDescriptor) -> Result<(), ClusterError> {
        if granted.contains(sec.privs) {
            Ok(())
        } else {
            Err(ClusterError::AuthorizationDenied {
                sender: sender.to_string(),
                object: sec.name.clone(),
            })
        }
    }

    fn endpoint_allows(&self, _endpoint: &Endpoint, _sec: &SecurityDescriptor) -> bool {
        // Domain-grant lookups are keyed by checkable name + endpoint name,
        // resolved by the caller (ClusterConfig's domains) before a
        // descriptor reaches `relay`; by the time we're here the check is
        // purely "does the wire format allow this sender to see it", which
        // for outbound relay is always true once a descriptor was attached
        // (the descriptor only restricts inbound authorization).
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorize_denies_when_privileges_insufficient() {
        let endpoints = Arc::new(DashMap::new());
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(ReplayLog::open(dir.path(), crate::replay_log::DEFAULT_SEGMENT_SIZE).unwrap());
        let router = MessageRouter::new("self", endpoints, log);

        let sec = SecurityDescriptor {
            object_type: "service".to_string(),
            name: "svc1".to_string(),
            privs: Privilege::COMMAND,
        };
        let err = router.authorize("edge", Privilege::READ, &sec).unwrap_err();
        assert!(matches!(err, ClusterError::AuthorizationDenied { .. }));
    }

    #[test]
    fn authorize_allows_when_privileges_sufficient() {
        let endpoints = Arc::new(DashMap::new());
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(ReplayLog::open(dir.path(), crate::replay_log::DEFAULT_SEGMENT_SIZE).unwrap());
        let router = MessageRouter::new("self", endpoints, log);

        let sec = SecurityDescriptor {
            object_type: "service".to_string(),
            name: "svc1".to_string(),
            privs: Privilege::COMMAND,
        };
        assert!(router.authorize("core", Privilege::ALL, &sec).is_ok());
    }
}
