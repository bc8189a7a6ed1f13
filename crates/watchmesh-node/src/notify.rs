//! Thin process-exec implementation of the `NotificationEngine`'s
//! `NotificationCommandRunner` contract, mirroring `plugin::ProcessPluginRunner`.
//! Notification command execution itself is an external collaborator (out
//! of scope); this is just enough of a concrete implementation for the
//! composition root to run an actual process.

use std::process::Stdio;
use std::sync::Arc;

use watchmesh_core::notification::NotificationCommandRunner;
use watchmesh_core::registry::TypeRegistry;
use watchmesh_types::{CheckableRef, NotificationType};

pub struct ProcessNotificationRunner {
    registry: Arc<TypeRegistry>,
}

impl ProcessNotificationRunner {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait::async_trait]
impl NotificationCommandRunner for ProcessNotificationRunner {
    async fn notify(&self, user: &str, checkable: &CheckableRef, kind: NotificationType, text: &str) {
        let Some(object) = self.registry.get(checkable) else {
            return;
        };
        let Some(command) = &object.config.notification_command else {
            tracing::debug!(%checkable, user, "no notification_command configured, skipping");
            return;
        };

        let output = tokio::process::Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .env("WATCHMESH_NOTIFICATION_USER", user)
            .env("WATCHMESH_NOTIFICATION_CHECKABLE", checkable.canonical_name())
            .env("WATCHMESH_NOTIFICATION_TYPE", format!("{kind:?}"))
            .env("WATCHMESH_NOTIFICATION_TEXT", text)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                tracing::info!(%checkable, user, ?kind, "notification command succeeded");
            }
            Ok(output) => {
                tracing::warn!(
                    %checkable, user, ?kind,
                    status = ?output.status.code(),
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "notification command exited non-zero",
                );
            }
            Err(e) => {
                tracing::warn!(%checkable, user, error = %e, "failed to spawn notification command");
            }
        }
    }
}
