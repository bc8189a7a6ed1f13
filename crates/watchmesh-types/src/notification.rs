use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::state::ObjectState;

/// Notification event types, matching the events `NotificationEngine` can
/// be asked to fan out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Problem,
    Recovery,
    Acknowledgement,
    Custom,
    DowntimeStart,
    DowntimeEnd,
    DowntimeRemoved,
    FlappingStart,
    FlappingEnd,
}

bitflags! {
    /// Which of the nine `NotificationType`s a user's subscription covers.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    pub struct NotificationTypeFilter: u16 {
        const PROBLEM          = 1 << 0;
        const RECOVERY         = 1 << 1;
        const ACKNOWLEDGEMENT  = 1 << 2;
        const CUSTOM           = 1 << 3;
        const DOWNTIME_START   = 1 << 4;
        const DOWNTIME_END     = 1 << 5;
        const DOWNTIME_REMOVED = 1 << 6;
        const FLAPPING_START   = 1 << 7;
        const FLAPPING_END     = 1 << 8;
    }
}

impl NotificationTypeFilter {
    pub fn allows(self, kind: NotificationType) -> bool {
        self.contains(Self::from_type(kind))
    }

    fn from_type(kind: NotificationType) -> Self {
        match kind {
            NotificationType::Problem => Self::PROBLEM,
            NotificationType::Recovery => Self::RECOVERY,
            NotificationType::Acknowledgement => Self::ACKNOWLEDGEMENT,
            NotificationType::Custom => Self::CUSTOM,
            NotificationType::DowntimeStart => Self::DOWNTIME_START,
            NotificationType::DowntimeEnd => Self::DOWNTIME_END,
            NotificationType::DowntimeRemoved => Self::DOWNTIME_REMOVED,
            NotificationType::FlappingStart => Self::FLAPPING_START,
            NotificationType::FlappingEnd => Self::FLAPPING_END,
        }
    }
}

bitflags! {
    /// Which result states a user wants to be notified about.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    pub struct StateFilter: u8 {
        const OK       = 1 << 0;
        const WARNING  = 1 << 1;
        const CRITICAL = 1 << 2;
        const UNKNOWN  = 1 << 3;
    }
}

impl StateFilter {
    pub fn allows(self, state: ObjectState) -> bool {
        let bit = match state {
            ObjectState::Ok => Self::OK,
            ObjectState::Warning => Self::WARNING,
            ObjectState::Critical => Self::CRITICAL,
            ObjectState::Unknown => Self::UNKNOWN,
        };
        self.contains(bit)
    }
}

/// The combined filter a `Notification` applies per recipient: the user's
/// notification period, plus state and type filters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotificationFilter {
    pub state_filter: StateFilter,
    pub type_filter: NotificationTypeFilter,
}

impl Default for NotificationFilter {
    fn default() -> Self {
        Self {
            state_filter: StateFilter::all(),
            type_filter: NotificationTypeFilter::all(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_filter_excludes_unlisted_states() {
        let f = StateFilter::CRITICAL | StateFilter::UNKNOWN;
        assert!(f.allows(ObjectState::Critical));
        assert!(!f.allows(ObjectState::Warning));
    }

    #[test]
    fn type_filter_excludes_unlisted_types() {
        let f = NotificationTypeFilter::PROBLEM | NotificationTypeFilter::RECOVERY;
        assert!(f.allows(NotificationType::Problem));
        assert!(!f.allows(NotificationType::FlappingStart));
    }
}
