//! Wakes checkables at `next_check`, invokes the plugin collaborator, and
//! ingests results (spec §4.2).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use watchmesh_types::{CheckResult, ObjectState};

use crate::authority::FEATURE_CHECKER;
use crate::checkable::Checkable;
use crate::metrics::Metrics;
use crate::registry::TypeRegistry;

/// Invokes a configured check command and returns its result. Implemented
/// by the out-of-scope plugin execution layer; the scheduler only needs
/// this narrow async contract.
#[async_trait::async_trait]
pub trait PluginRunner: Send + Sync {
    async fn run(&self, checkable: &Checkable, timeout: Duration) -> CheckResult;
}

pub struct Scheduler<P> {
    registry: Arc<TypeRegistry>,
    plugin_runner: Arc<P>,
    self_identity: String,
    default_timeout: Duration,
    in_flight: Arc<Semaphore>,
    metrics: Arc<Metrics>,
}

impl<P> Scheduler<P>
where
    P: PluginRunner + 'static,
{
    pub fn new(
        registry: Arc<TypeRegistry>,
        plugin_runner: Arc<P>,
        self_identity: String,
        default_timeout: Duration,
        max_concurrent_checks: usize,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            registry,
            plugin_runner,
            self_identity,
            default_timeout,
            in_flight: Arc::new(Semaphore::new(max_concurrent_checks)),
            metrics,
        }
    }

    /// One scheduler tick (spec: every 0.5s). Pops every due checkable this
    /// node has checker authority over and not suppressed by downtime, and
    /// spawns a bounded-concurrency check for each. Backpressure: if every
    /// permit is taken, due checkables simply aren't popped this tick and
    /// their `next_check` is untouched, so the effective rate self-adapts.
    pub async fn tick(&self) {
        let now = Utc::now();
        for checkable in self.registry.iter() {
            if !checkable.config.active_checks {
                continue;
            }
            if !checkable.has_authority(FEATURE_CHECKER) {
                continue;
            }
            let Some(next_check) = checkable.next_check() else {
                continue;
            };
            if next_check > now && !checkable.force_next_check() {
                continue;
            }
            if checkable.downtime_depth(now) > 0 {
                continue;
            }

            let Ok(permit) = self.in_flight.clone().try_acquire_owned() else {
                // saturated: leave this checkable due, retried next tick
                continue;
            };

            self.metrics.checks_in_flight.inc();
            let plugin_runner = self.plugin_runner.clone();
            let self_identity = self.self_identity.clone();
            let timeout = self.default_timeout;
            let metrics = self.metrics.clone();
            let checkable = checkable.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let result = tokio::time::timeout(timeout, plugin_runner.run(&checkable, timeout))
                    .await
                    .unwrap_or_else(|_| CheckResult {
                        state: ObjectState::Unknown,
                        output: "timeout exceeded".to_string(),
                        performance_data: Vec::new(),
                        execution_start: None,
                        execution_end: None,
                        check_source: Some(self_identity.clone()),
                    });
                checkable.process_check_result(result, &self_identity, None);
                metrics.checks_in_flight.dec();
            });
        }
    }

    /// Applies a passive result received over the cluster mesh, bypassing
    /// the plugin collaborator entirely. Caller has already checked the
    /// sender holds `Command` privilege.
    pub fn accept_passive_result(&self, checkable: &Checkable, result: CheckResult, originator: &str) {
        if !checkable.config.passive_checks {
            return;
        }
        checkable.process_check_result(result, &self.self_identity, Some(originator));
    }

    pub async fn run(self: Arc<Self>, tick_interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(tick_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
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
    use crate::checkable::CheckableConfig;
    use crate::event_bus::EventBus;
    use watchmesh_types::{CheckableRef, PerfdataPoint};

    struct AlwaysOk;

    #[async_trait::async_trait]
    impl PluginRunner for AlwaysOk {
        async fn run(&self, _checkable: &Checkable, _timeout: Duration) -> CheckResult {
            CheckResult {
                state: ObjectState::Ok,
                output: "ok".to_string(),
                performance_data: Vec::<PerfdataPoint>::new(),
                execution_start: None,
                execution_end: None,
                check_source: Some("test".to_string()),
            }
        }
    }

    #[tokio::test]
    async fn tick_skips_checkables_without_checker_authority() {
        let registry = Arc::new(TypeRegistry::new());
        let checkable = Arc::new(Checkable::new(
            CheckableRef::host("web1"),
            CheckableConfig::default(),
            EventBus::new(),
        ));
        checkable.set_next_check(Utc::now() - chrono::Duration::seconds(1), "self", None);
        registry.insert(checkable.clone());

        let scheduler = Scheduler::new(
            registry,
            Arc::new(AlwaysOk),
            "self".to_string(),
            Duration::from_secs(60),
            4,
            Metrics::for_test(),
        );
        scheduler.tick().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        // no authority granted, so no check ran and state is unchanged default Ok/Hard
        assert_eq!(checkable.state(), ObjectState::Ok);
    }
}
