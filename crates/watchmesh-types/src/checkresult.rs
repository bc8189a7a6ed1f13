use serde::{Deserialize, Serialize};

use crate::state::ObjectState;

/// Seconds since the UNIX epoch, UTC. Carried as a float on the wire to
/// match the cluster protocol's `ts` fields.
pub type Timestamp = f64;

/// A single performance data point parsed from a plugin's stdout, e.g.
/// `rta=0.123ms;100;500;0`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerfdataPoint {
    pub label: String,
    pub value: f64,
    pub unit: Option<String>,
    pub warn: Option<String>,
    pub crit: Option<String>,
    pub min: Option<String>,
    pub max: Option<String>,
}

/// The outcome of one check execution, either produced locally by the
/// Plugin collaborator or received as a passive result from the cluster.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckResult {
    pub state: ObjectState,
    pub output: String,
    #[serde(default)]
    pub performance_data: Vec<PerfdataPoint>,
    pub execution_start: Option<Timestamp>,
    pub execution_end: Option<Timestamp>,
    /// Name of the endpoint that produced this result, if it arrived as a
    /// passive result from the cluster rather than from the local Plugin.
    pub check_source: Option<String>,
}

impl CheckResult {
    /// Clamp missing timestamps to `now`, per the first step of
    /// `ProcessCheckResult`.
    pub fn with_stamped_times(mut self, now: Timestamp) -> Self {
        if self.execution_start.is_none() {
            self.execution_start = Some(now);
        }
        if self.execution_end.is_none() {
            self.execution_end = Some(now);
        }
        self
    }

    pub fn latency(&self, scheduled_at: Timestamp) -> f64 {
        self.execution_start.unwrap_or(scheduled_at) - scheduled_at
    }

    pub fn execution_time(&self) -> f64 {
        match (self.execution_start, self.execution_end) {
            (Some(start), Some(end)) => (end - start).max(0.0),
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(state: ObjectState) -> CheckResult {
        CheckResult {
            state,
            output: "ok".into(),
            performance_data: vec![],
            execution_start: None,
            execution_end: None,
            check_source: None,
        }
    }

    #[test]
    fn stamps_missing_times_with_now() {
        let r = result(ObjectState::Ok).with_stamped_times(100.0);
        assert_eq!(r.execution_start, Some(100.0));
        assert_eq!(r.execution_end, Some(100.0));
    }

    #[test]
    fn execution_time_is_nonnegative() {
        let mut r = result(ObjectState::Ok);
        r.execution_start = Some(10.0);
        r.execution_end = Some(10.5);
        assert!((r.execution_time() - 0.5).abs() < 1e-9);
    }
}
