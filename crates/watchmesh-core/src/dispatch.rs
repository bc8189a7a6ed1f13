//! Per-method handler table for inbound cluster messages (spec §9,
//! "Message dispatch dynamism"): a `method -> handler` map built once at
//! startup, replacing a long if-else chain so new protocol messages are
//! additive rather than requiring a central match arm.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::endpoint::Endpoint;
use crate::error::ClusterError;
use crate::registry::TypeRegistry;

pub struct HandlerContext<'a> {
    pub sender: &'a Endpoint,
    pub registry: &'a TypeRegistry,
}

pub type Handler = Arc<dyn Fn(&HandlerContext, &Value) -> Result<(), ClusterError> + Send + Sync>;

/// Built once at startup; `dispatch` is the hot path every inbound frame
/// goes through.
#[derive(Clone, Default)]
pub struct MessageHandlerTable {
    handlers: HashMap<String, Handler>,
}

impl MessageHandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, method: impl Into<String>, handler: Handler) {
        self.handlers.insert(method.into(), handler);
    }

    pub fn dispatch(&self, ctx: &HandlerContext, method: &str, params: &Value) -> Result<(), ClusterError> {
        match self.handlers.get(method) {
            Some(handler) => handler(ctx, params),
            None => Err(ClusterError::ProtocolViolation {
                peer: ctx.sender.name.clone(),
                reason: format!("unknown method {method:?}"),
            }),
        }
    }
}

/// Builds the standard table for the wire methods named in spec §6. Each
/// handler here only covers what the registry/endpoint need to stay
/// consistent; checkable-specific mutation methods (`SetNextCheck`,
/// `AddComment`, ...) follow the same registration pattern and are added by
/// the composition root once it has closures over its own services.
pub fn standard_handlers() -> MessageHandlerTable {
    let mut table = MessageHandlerTable::new();

    table.register(
        "cluster::HeartBeat",
        Arc::new(|ctx, params| {
            let features: Vec<String> = params
                .get("features")
                .and_then(Value::as_array)
                .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default();
            ctx.sender.set_features(features.into_iter().collect());
            ctx.sender.touch(chrono::Utc::now());
            Ok(())
        }),
    );

    table.register(
        "cluster::SetLogPosition",
        Arc::new(|ctx, params| {
            let Some(pos) = params.get("log_position").and_then(Value::as_f64) else {
                return Err(ClusterError::ProtocolViolation {
                    peer: ctx.sender.name.clone(),
                    reason: "SetLogPosition missing log_position".to_string(),
                });
            };
            // The peer is telling us how far it has acked our stream to it,
            // i.e. our replay bookmark for future sends to this peer.
            *ctx.sender.local_log_position.lock() = pos;
            Ok(())
        }),
    );

    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_method_is_a_protocol_violation() {
        let table = MessageHandlerTable::new();
        let (endpoint, _rx) = Endpoint::new("node-b");
        let registry = TypeRegistry::new();
        let ctx = HandlerContext { sender: &endpoint, registry: &registry };
        let err = table.dispatch(&ctx, "cluster::Bogus", &json!({})).unwrap_err();
        assert!(matches!(err, ClusterError::ProtocolViolation { .. }));
    }

    #[test]
    fn heartbeat_updates_features_and_last_seen() {
        let table = standard_handlers();
        let (endpoint, _rx) = Endpoint::new("node-b");
        let registry = TypeRegistry::new();
        let ctx = HandlerContext { sender: &endpoint, registry: &registry };
        table
            .dispatch(&ctx, "cluster::HeartBeat", &json!({"identity": "node-b", "features": ["checker"]}))
            .unwrap();
        assert!(endpoint.supports("checker"));
    }

    #[test]
    fn set_log_position_requires_the_field() {
        let table = standard_handlers();
        let (endpoint, _rx) = Endpoint::new("node-b");
        let registry = TypeRegistry::new();
        let ctx = HandlerContext { sender: &endpoint, registry: &registry };
        let err = table.dispatch(&ctx, "cluster::SetLogPosition", &json!({})).unwrap_err();
        assert!(matches!(err, ClusterError::ProtocolViolation { .. }));
    }
}
