//! Thin process-exec implementation of the scheduler's `PluginRunner`
//! contract. Check plugin execution itself is an external collaborator
//! (out of scope); this is just enough of a concrete implementation for
//! the composition root to run an actual process.

use std::process::Stdio;
use std::time::Duration;

use chrono::Utc;
use watchmesh_core::checkable::Checkable;
use watchmesh_core::scheduler::PluginRunner;
use watchmesh_types::{CheckResult, ObjectState};

pub struct ProcessPluginRunner;

#[async_trait::async_trait]
impl PluginRunner for ProcessPluginRunner {
    async fn run(&self, checkable: &Checkable, _timeout: Duration) -> CheckResult {
        let start = Utc::now().timestamp() as f64;
        let Some(command) = &checkable.config.check_command else {
            return CheckResult {
                state: ObjectState::Unknown,
                output: "no check_command configured".to_string(),
                performance_data: Vec::new(),
                execution_start: Some(start),
                execution_end: Some(Utc::now().timestamp() as f64),
                check_source: Some("local".to_string()),
            };
        };

        let output = tokio::process::Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        let end = Utc::now().timestamp() as f64;
        match output {
            Ok(output) => CheckResult {
                state: ObjectState::from_exit_code(output.status.code().unwrap_or(3)),
                output: String::from_utf8_lossy(&output.stdout).trim().to_string(),
                performance_data: Vec::new(),
                execution_start: Some(start),
                execution_end: Some(end),
                check_source: Some("local".to_string()),
            },
            Err(e) => CheckResult {
                state: ObjectState::Unknown,
                output: format!("failed to spawn check command: {e}"),
                performance_data: Vec::new(),
                execution_start: Some(start),
                execution_end: Some(end),
                check_source: Some("local".to_string()),
            },
        }
    }
}
