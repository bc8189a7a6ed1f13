//! Decides when to notify which users, throttles, and escalates (spec
//! §4.3).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use watchmesh_types::{CheckableRef, NotificationFilter, NotificationType};

use crate::metrics::Metrics;

#[derive(Clone, Debug)]
pub struct NotificationTarget {
    pub user: String,
    pub filter: NotificationFilter,
    pub notification_interval: Duration,
}

#[derive(Clone, Debug)]
pub struct Notification {
    pub targets: Vec<NotificationTarget>,
}

/// Invokes the configured notification command for one user. A real
/// implementation shells out via the plugin collaborator the same way the
/// scheduler does for checks; tests substitute a recording stub.
#[async_trait::async_trait]
pub trait NotificationCommandRunner: Send + Sync {
    async fn notify(&self, user: &str, checkable: &CheckableRef, kind: NotificationType, text: &str);
}

pub struct NotificationEngine<R> {
    runner: Arc<R>,
    metrics: Arc<Metrics>,
    // last time each (checkable, user) pair was notified, for throttling.
    last_sent: Mutex<HashMap<(CheckableRef, String), DateTime<Utc>>>,
    notification_number: Mutex<HashMap<CheckableRef, u32>>,
}

impl<R> NotificationEngine<R>
where
    R: NotificationCommandRunner + 'static,
{
    pub fn new(runner: Arc<R>, metrics: Arc<Metrics>) -> Self {
        Self {
            runner,
            metrics,
            last_sent: Mutex::new(HashMap::new()),
            notification_number: Mutex::new(HashMap::new()),
        }
    }

    /// `RequestNotifications(checkable, type, result, author?, text?)` (spec §4.3).
    pub async fn request_notifications(
        &self,
        checkable: &CheckableRef,
        notification: &Notification,
        kind: NotificationType,
        state: watchmesh_types::ObjectState,
        now: DateTime<Utc>,
        force: bool,
        text: &str,
        is_user_active: impl Fn(&str) -> bool,
    ) {
        let mut sent_to_any = false;
        for target in &notification.targets {
            if !is_user_active(&target.user) {
                continue;
            }
            if !target.filter.state_filter.allows(state) || !target.filter.type_filter.allows(kind) {
                continue;
            }
            if !force && !self.throttle_elapsed(checkable, target, now) {
                continue;
            }

            self.runner.notify(&target.user, checkable, kind, text).await;
            self.last_sent
                .lock()
                .insert((checkable.clone(), target.user.clone()), now);
            self.metrics.notifications_sent.inc();
            sent_to_any = true;
        }

        if sent_to_any {
            if kind == NotificationType::Recovery {
                self.notification_number.lock().insert(checkable.clone(), 0);
            } else {
                *self
                    .notification_number
                    .lock()
                    .entry(checkable.clone())
                    .or_insert(0) += 1;
            }
        }
    }

    fn throttle_elapsed(&self, checkable: &CheckableRef, target: &NotificationTarget, now: DateTime<Utc>) -> bool {
        let last_sent = self.last_sent.lock();
        match last_sent.get(&(checkable.clone(), target.user.clone())) {
            Some(last) => (now - *last).to_std().unwrap_or_default() >= target.notification_interval,
            None => true,
        }
    }

    pub fn notification_number(&self, checkable: &CheckableRef) -> u32 {
        *self.notification_number.lock().get(checkable).unwrap_or(&0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex as AsyncMutex;
    use watchmesh_types::ObjectState;

    struct Recording {
        calls: AsyncMutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl NotificationCommandRunner for Recording {
        async fn notify(&self, user: &str, _checkable: &CheckableRef, _kind: NotificationType, _text: &str) {
            self.calls.lock().await.push(user.to_string());
        }
    }

    #[tokio::test]
    async fn throttles_repeated_notifications_within_interval() {
        let runner = Arc::new(Recording { calls: AsyncMutex::new(Vec::new()) });
        let engine = NotificationEngine::new(runner.clone(), Metrics::for_test());
        let checkable = CheckableRef::host("web1");
        let notification = Notification {
            targets: vec![NotificationTarget {
                user: "alice".to_string(),
                filter: NotificationFilter::default(),
                notification_interval: Duration::from_secs(3600),
            }],
        };
        let t0 = Utc::now();
        engine
            .request_notifications(&checkable, &notification, NotificationType::Problem, ObjectState::Critical, t0, false, "down", |_| true)
            .await;
        engine
            .request_notifications(&checkable, &notification, NotificationType::Problem, ObjectState::Critical, t0 + chrono::Duration::seconds(5), false, "down", |_| true)
            .await;
        assert_eq!(runner.calls.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn force_bypasses_throttle() {
        let runner = Arc::new(Recording { calls: AsyncMutex::new(Vec::new()) });
        let engine = NotificationEngine::new(runner.clone(), Metrics::for_test());
        let checkable = CheckableRef::host("web1");
        let notification = Notification {
            targets: vec![NotificationTarget {
                user: "alice".to_string(),
                filter: NotificationFilter::default(),
                notification_interval: Duration::from_secs(3600),
            }],
        };
        let t0 = Utc::now();
        engine
            .request_notifications(&checkable, &notification, NotificationType::Acknowledgement, ObjectState::Critical, t0, true, "ack", |_| true)
            .await;
        engine
            .request_notifications(&checkable, &notification, NotificationType::Acknowledgement, ObjectState::Critical, t0, true, "ack again", |_| true)
            .await;
        assert_eq!(runner.calls.lock().await.len(), 2);
    }
}
