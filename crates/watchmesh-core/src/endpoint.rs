//! One logical remote peer (spec §3, §4.6): connection state, send queue,
//! and the replay position bookmarks that drive the GC watermark.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::wire::RpcMessage;

/// Connection lifecycle (spec §4.6):
///
/// ```text
/// Disconnected --dial--> Handshaking --tls_ok--> Syncing --replay_done--> Connected
///      ^                      |                     |                        |
///      +-------- close -------+---- tls_fail -------+------- idle>60s -------+
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Handshaking,
    Syncing,
    Connected,
}

/// Idle timeout after which a `Connected` endpoint with no traffic is torn
/// down (spec §3 invariant, §4.6).
pub const IDLE_TIMEOUT_SECS: i64 = 60;

pub struct Endpoint {
    pub name: String,
    state: parking_lot::Mutex<ConnectionState>,
    pub last_seen: parking_lot::Mutex<Option<DateTime<Utc>>>,
    /// The remote's replay bookmark: how far *our* node must advance from
    /// when sending to this peer.
    pub local_log_position: parking_lot::Mutex<f64>,
    /// The timestamp we have told this peer we acknowledged.
    pub remote_log_position: parking_lot::Mutex<f64>,
    pub features: parking_lot::Mutex<HashSet<String>>,
    outbound: mpsc::UnboundedSender<RpcMessage>,
}

impl Endpoint {
    pub fn new(name: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<RpcMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                name: name.into(),
                state: parking_lot::Mutex::new(ConnectionState::Disconnected),
                last_seen: parking_lot::Mutex::new(None),
                local_log_position: parking_lot::Mutex::new(0.0),
                remote_log_position: parking_lot::Mutex::new(0.0),
                features: parking_lot::Mutex::new(HashSet::new()),
                outbound: tx,
            },
            rx,
        )
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn transition(&self, next: ConnectionState) {
        tracing::debug!(peer = %self.name, ?next, "endpoint connection state transition");
        *self.state.lock() = next;
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_syncing(&self) -> bool {
        self.state() == ConnectionState::Syncing
    }

    pub fn supports(&self, feature: &str) -> bool {
        self.features.lock().contains(feature)
    }

    pub fn set_features(&self, features: HashSet<String>) {
        *self.features.lock() = features;
    }

    pub fn touch(&self, now: DateTime<Utc>) {
        *self.last_seen.lock() = Some(now);
    }

    /// Whether this endpoint's last-seen timestamp has exceeded the idle
    /// eviction threshold.
    pub fn is_idle(&self, now: DateTime<Utc>) -> bool {
        match *self.last_seen.lock() {
            Some(last) => (now - last).num_seconds() >= IDLE_TIMEOUT_SECS,
            None => false,
        }
    }

    pub fn send(&self, message: RpcMessage) -> Result<(), mpsc::error::SendError<RpcMessage>> {
        self.outbound.send(message)
    }

    pub fn has_privileges(&self, _required: watchmesh_types::Privilege) -> bool {
        // Privilege checks are keyed by the checkable's domain grants, not
        // by anything stored on the endpoint; this hook exists so the
        // replay loop (spec §4.7) has a uniform call site. The real check
        // happens in `MessageRouter::authorize`.
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_disconnected_and_transitions_through_states() {
        let (endpoint, _rx) = Endpoint::new("node-b");
        assert_eq!(endpoint.state(), ConnectionState::Disconnected);
        endpoint.transition(ConnectionState::Handshaking);
        endpoint.transition(ConnectionState::Syncing);
        assert!(endpoint.is_syncing());
        endpoint.transition(ConnectionState::Connected);
        assert!(endpoint.is_connected());
    }

    #[test]
    fn idle_after_60s_of_silence() {
        let (endpoint, _rx) = Endpoint::new("node-b");
        let t0 = Utc::now();
        endpoint.touch(t0);
        assert!(!endpoint.is_idle(t0 + chrono::Duration::seconds(30)));
        assert!(endpoint.is_idle(t0 + chrono::Duration::seconds(61)));
    }
}
