use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use watchmesh_types::{AcknowledgementType, CheckableRef, NotificationType, ObjectState};

/// One state-changing fact about a checkable, raised by [`crate::checkable::Checkable`]
/// and consumed asynchronously by subscribers (the message router, the
/// notification engine, metrics). Dispatch is queue-then-drain: a signal is
/// never handled while the checkable's own mutex is held, so a slow or
/// panicking subscriber cannot wedge state mutation (spec §9).
#[derive(Clone, Debug)]
pub enum Signal {
    StateChange {
        checkable: CheckableRef,
        old_state: ObjectState,
        new_state: ObjectState,
        hard: bool,
        at: DateTime<Utc>,
    },
    NewCheckResult {
        checkable: CheckableRef,
        at: DateTime<Utc>,
    },
    NotificationsRequested {
        checkable: CheckableRef,
        kind: NotificationType,
    },
    NotificationSentToUser {
        checkable: CheckableRef,
        user: String,
    },
    NotificationSentToAllUsers {
        checkable: CheckableRef,
    },
    AcknowledgementSet {
        checkable: CheckableRef,
        kind: AcknowledgementType,
    },
    AcknowledgementCleared {
        checkable: CheckableRef,
    },
    CommentAdded {
        checkable: CheckableRef,
        comment_id: uuid::Uuid,
    },
    CommentRemoved {
        checkable: CheckableRef,
        comment_id: uuid::Uuid,
    },
    DowntimeAdded {
        checkable: CheckableRef,
        downtime_id: uuid::Uuid,
    },
    DowntimeRemoved {
        checkable: CheckableRef,
        downtime_id: uuid::Uuid,
    },
    DowntimeTriggered {
        checkable: CheckableRef,
        downtime_id: uuid::Uuid,
    },
    DowntimeStart {
        checkable: CheckableRef,
        downtime_id: uuid::Uuid,
    },
    DowntimeEnd {
        checkable: CheckableRef,
        downtime_id: uuid::Uuid,
    },
    FlappingChanged {
        checkable: CheckableRef,
        flapping: bool,
    },
}

const SIGNAL_CHANNEL_CAPACITY: usize = 4096;

/// Per-process fan-out point for [`Signal`]s. Cloning an `EventBus` shares
/// the same underlying channel; subscribers each get their own receiver and
/// lag independently.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Signal>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(SIGNAL_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.sender.subscribe()
    }

    /// Emits a signal. Returns the number of live subscribers that received
    /// it; an error here only means nobody is currently listening, which is
    /// not a failure.
    pub fn emit(&self, signal: Signal) {
        let _ = self.sender.send(signal);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_emitted_signals() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let checkable = CheckableRef::host("web1");
        bus.emit(Signal::NewCheckResult {
            checkable: checkable.clone(),
            at: Utc::now(),
        });
        let received = rx.recv().await.unwrap();
        assert!(matches!(received, Signal::NewCheckResult { .. }));
    }

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.emit(Signal::NewCheckResult {
            checkable: CheckableRef::host("web1"),
            at: Utc::now(),
        });
    }
}
