use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::checkresult::Timestamp;

/// A scheduled or triggered downtime window attached to a checkable.
///
/// Fixed downtimes are active for the whole `[start, end]` window. Flexible
/// (non-fixed) downtimes only become active once the checkable enters a
/// non-OK hard state inside the window; that moment is recorded in
/// `trigger_time` and the window then closes `duration` seconds later.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Downtime {
    pub id: Uuid,
    pub legacy_id: u64,
    pub author: String,
    pub comment: String,
    pub start: Timestamp,
    pub end: Timestamp,
    pub fixed: bool,
    pub duration: Option<Timestamp>,
    pub trigger_time: Option<Timestamp>,
    pub triggered_by: Option<Uuid>,
    pub triggers: HashSet<Uuid>,
    pub cancelled: bool,
    pub scheduled_by: Option<String>,
}

impl Downtime {
    /// `is_active(t) = start ≤ t ≤ end ∧ (fixed ∨ trigger_time ≠ 0 ∧ t ≤ trigger_time + duration)`
    pub fn is_active(&self, now: Timestamp) -> bool {
        if self.cancelled {
            return false;
        }
        if !(self.start <= now && now <= self.end) {
            return false;
        }
        if self.fixed {
            return true;
        }
        match (self.trigger_time, self.duration) {
            (Some(trigger_time), Some(duration)) if trigger_time != 0.0 => {
                now <= trigger_time + duration
            }
            _ => false,
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.fixed || self.trigger_time.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Downtime {
        Downtime {
            id: Uuid::nil(),
            legacy_id: 1,
            author: "ops".into(),
            comment: "maintenance".into(),
            start: 100.0,
            end: 200.0,
            fixed: true,
            duration: None,
            trigger_time: None,
            triggered_by: None,
            triggers: HashSet::new(),
            cancelled: false,
            scheduled_by: None,
        }
    }

    #[test]
    fn fixed_downtime_active_within_window() {
        let d = base();
        assert!(!d.is_active(99.0));
        assert!(d.is_active(100.0));
        assert!(d.is_active(150.0));
        assert!(d.is_active(200.0));
        assert!(!d.is_active(201.0));
    }

    #[test]
    fn flexible_downtime_inactive_until_triggered() {
        let mut d = base();
        d.fixed = false;
        d.duration = Some(30.0);
        assert!(!d.is_active(150.0));

        d.trigger_time = Some(150.0);
        assert!(d.is_active(150.0));
        assert!(d.is_active(180.0));
        assert!(!d.is_active(181.0));
    }

    #[test]
    fn cancelled_downtime_is_never_active() {
        let mut d = base();
        d.cancelled = true;
        assert!(!d.is_active(150.0));
    }
}
