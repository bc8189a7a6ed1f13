use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Scheduler and cluster tunables. All defaults match the constants named
/// throughout the spec; every field is overridable from the node's config
/// file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Parameters {
    pub max_concurrent_checks: usize,
    #[serde(with = "humantime_serde")]
    pub scheduler_tick: Duration,
    #[serde(with = "humantime_serde")]
    pub authority_election_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub gc_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub expiry_sweep_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub endpoint_idle_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub dial_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
    pub replay_log_segment_size: usize,
    #[serde(with = "humantime_serde")]
    pub log_position_ack_threshold: Duration,
    #[serde(with = "humantime_serde")]
    pub default_check_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub flapping_window: Duration,
    pub flapping_threshold: f64,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            max_concurrent_checks: 512,
            scheduler_tick: Duration::from_millis(500),
            authority_election_interval: Duration::from_secs(5),
            gc_interval: Duration::from_secs(5),
            expiry_sweep_interval: Duration::from_secs(60),
            endpoint_idle_timeout: Duration::from_secs(60),
            dial_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(5),
            replay_log_segment_size: 50_000,
            log_position_ack_threshold: Duration::from_secs(10),
            default_check_timeout: Duration::from_secs(60),
            flapping_window: Duration::from_secs(30 * 60),
            flapping_threshold: 30.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_accept_human_readable_toml_strings() {
        let toml_str = r#"
            scheduler_tick = "250ms"
            heartbeat_interval = "10s"
        "#;
        let params: Parameters = toml::from_str(toml_str).unwrap();
        assert_eq!(params.scheduler_tick, Duration::from_millis(250));
        assert_eq!(params.heartbeat_interval, Duration::from_secs(10));
        // unspecified fields still fall back to their defaults
        assert_eq!(params.gc_interval, Duration::from_secs(5));
    }
}
