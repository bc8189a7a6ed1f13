//! Drives the downtime/comment expiry sweep and the replay-log GC tick,
//! both on their own interval (spec §4.7 GC, §4.10 expiry sweep).

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::endpoint::Endpoint;
use crate::registry::TypeRegistry;
use crate::replay_log::ReplayLog;

pub async fn run_expiry_sweep(
    registry: Arc<TypeRegistry>,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = chrono::Utc::now();
                for checkable in registry.iter() {
                    checkable.sweep_expired(now);
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

pub async fn run_replay_log_gc(
    replay_log: Arc<ReplayLog>,
    endpoints: Arc<DashMap<String, Arc<Endpoint>>>,
    self_identity: String,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let min_pos = endpoints
                    .iter()
                    .filter(|e| e.key() != &self_identity)
                    .map(|e| *e.value().local_log_position.lock())
                    .fold(f64::INFINITY, f64::min);
                if min_pos.is_finite() {
                    match replay_log.gc(min_pos) {
                        Ok(removed) if removed > 0 => {
                            tracing::debug!(removed, min_pos, "replay log GC removed segments");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!(error = %e, "replay log GC failed"),
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}
