//! The checkable state machine (spec §3, §4.1): a host or service's current
//! state, its soft/hard attempt counter, and the annotations (downtimes,
//! comments, acknowledgement) attached to it. One [`Checkable`] is owned by
//! the [`crate::registry::TypeRegistry`] for the lifetime of the process;
//! mutation is serialised by `parking_lot::Mutex` per spec §5 ("per-checkable
//! mutex... totally-ordered stream per checkable").

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use watchmesh_types::{
    AcknowledgementType, CheckResult, CheckableKind, CheckableRef, Comment, Downtime,
    NotificationType, ObjectState, Privilege, StateType,
};

use crate::error::CheckableError;
use crate::event_bus::{EventBus, Signal};
use crate::notification::NotificationTarget;

/// Static configuration, set at load time and not mutated by check results.
#[derive(Clone, Debug)]
pub struct CheckableConfig {
    /// Shell command line run by the plugin collaborator; `None` for a
    /// checkable that only ever receives passive results.
    pub check_command: Option<String>,
    pub check_interval: std::time::Duration,
    pub retry_interval: std::time::Duration,
    pub max_check_attempts: u32,
    pub active_checks: bool,
    pub passive_checks: bool,
    pub notifications: bool,
    pub flapping_detection: bool,
    pub flapping_threshold: f64,
    pub event_handler: bool,
    pub event_command: Option<String>,
    pub perfdata: bool,
    /// Name of the time period gating active checks and notifications.
    /// Time-period evaluation is an external collaborator not modelled
    /// here; `None` means always active.
    pub check_period: Option<String>,
    /// Privileges each endpoint has over this checkable; empty means every
    /// endpoint has `Privilege::ALL` (spec §3, Domain).
    pub privileges: HashMap<String, Privilege>,
    /// Notification recipients attached to this checkable (spec §4.3); empty
    /// means `NotificationsRequested` signals have nobody to fan out to.
    pub notification_targets: Vec<NotificationTarget>,
    /// Shell command line run by the notification collaborator. `None`
    /// disables sending even if `notification_targets` is non-empty.
    pub notification_command: Option<String>,
    /// Parent checkables whose hard state must be acceptable for this one to
    /// be considered reachable (spec §4.1, Reachability).
    pub parents: Vec<CheckableRef>,
}

impl Default for CheckableConfig {
    fn default() -> Self {
        Self {
            check_command: None,
            check_interval: std::time::Duration::from_secs(60),
            retry_interval: std::time::Duration::from_secs(60),
            max_check_attempts: 3,
            active_checks: true,
            passive_checks: true,
            notifications: true,
            flapping_detection: true,
            flapping_threshold: 30.0,
            event_handler: false,
            event_command: None,
            perfdata: true,
            check_period: None,
            privileges: HashMap::new(),
            notification_targets: Vec::new(),
            notification_command: None,
            parents: Vec::new(),
        }
    }
}

impl CheckableConfig {
    pub fn privileges_for(&self, endpoint: &str) -> Privilege {
        if self.privileges.is_empty() {
            Privilege::ALL
        } else {
            self.privileges.get(endpoint).copied().unwrap_or(Privilege::empty())
        }
    }
}

#[derive(Debug)]
struct Runtime {
    state: ObjectState,
    state_type: StateType,
    current_attempt: u32,
    last_check: Option<DateTime<Utc>>,
    next_check: Option<DateTime<Utc>>,
    last_state_change: Option<DateTime<Utc>>,
    last_hard_state_change: Option<DateTime<Utc>>,
    last_check_result: Option<CheckResult>,
    force_next_check: bool,
    acknowledgement: Option<watchmesh_types::Acknowledgement>,
    flapping_positive: f64,
    flapping_negative: f64,
    flapping_last_change: Option<DateTime<Utc>>,
    flapping: bool,
    downtimes: HashMap<uuid::Uuid, Downtime>,
    comments: HashMap<uuid::Uuid, Comment>,
    has_authority: HashMap<String, bool>,
    problem_notifications_sent: u32,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            state: ObjectState::Ok,
            state_type: StateType::Hard,
            current_attempt: 1,
            last_check: None,
            next_check: None,
            last_state_change: None,
            last_hard_state_change: None,
            last_check_result: None,
            force_next_check: false,
            acknowledgement: None,
            flapping_positive: 0.0,
            flapping_negative: 0.0,
            flapping_last_change: None,
            flapping: false,
            downtimes: HashMap::new(),
            comments: HashMap::new(),
            has_authority: HashMap::new(),
            problem_notifications_sent: 0,
        }
    }
}

pub struct Checkable {
    pub reference: CheckableRef,
    pub config: CheckableConfig,
    events: EventBus,
    runtime: Mutex<Runtime>,
}

/// Seconds in the flapping decay window (spec §4.5).
const FLAPPING_WINDOW_SECS: f64 = 30.0 * 60.0;

impl Checkable {
    pub fn new(reference: CheckableRef, config: CheckableConfig, events: EventBus) -> Self {
        Self {
            reference,
            config,
            events,
            runtime: Mutex::new(Runtime::default()),
        }
    }

    pub fn state(&self) -> ObjectState {
        self.runtime.lock().state
    }

    pub fn state_type(&self) -> StateType {
        self.runtime.lock().state_type
    }

    pub fn current_attempt(&self) -> u32 {
        self.runtime.lock().current_attempt
    }

    pub fn downtime_depth(&self, now: DateTime<Utc>) -> usize {
        self.runtime
            .lock()
            .downtimes
            .values()
            .filter(|d| d.is_active(now))
            .count()
    }

    pub fn has_authority(&self, feature: &str) -> bool {
        *self.runtime.lock().has_authority.get(feature).unwrap_or(&false)
    }

    pub fn set_authority(&self, feature: &str, owned: bool) {
        self.runtime.lock().has_authority.insert(feature.to_string(), owned);
    }

    pub fn acknowledgement(&self) -> Option<watchmesh_types::Acknowledgement> {
        self.runtime.lock().acknowledgement.clone()
    }

    pub fn last_check_result(&self) -> Option<CheckResult> {
        self.runtime.lock().last_check_result.clone()
    }

    pub fn comment(&self, id: uuid::Uuid) -> Option<Comment> {
        self.runtime.lock().comments.get(&id).cloned()
    }

    pub fn downtime(&self, id: uuid::Uuid) -> Option<Downtime> {
        self.runtime.lock().downtimes.get(&id).cloned()
    }

    /// Implements the ProcessCheckResult algorithm (spec §4.1).
    ///
    /// `authority` is the endpoint name permitted to originate this
    /// mutation. If set and not equal to `self_identity`, the call still
    /// raises signals (so local side effects like notifications fire
    /// consistently across the cluster) but does not mutate local state.
    pub fn process_check_result(
        &self,
        mut result: CheckResult,
        self_identity: &str,
        authority: Option<&str>,
    ) {
        let now = Utc::now();
        result = result.with_stamped_times(now.timestamp() as f64);

        let is_authoritative = authority.map(|a| a == self_identity).unwrap_or(true);

        let mut runtime = self.runtime.lock();

        let old_state = runtime.state;
        let old_state_type = runtime.state_type;
        let old_attempt = runtime.current_attempt;

        let new_state = if self.reference.kind() == CheckableKind::Host {
            result.state.collapse_for_host()
        } else {
            result.state
        };

        let (new_state_type, new_attempt, _became_hard, recovered) = match (old_state, new_state) {
            (ObjectState::Ok, ObjectState::Ok) => (StateType::Hard, 1, false, false),
            (ObjectState::Ok, _) => (StateType::Soft, 1, false, false),
            (_, ObjectState::Ok) => (StateType::Hard, 1, false, true),
            (_, _) => {
                if old_state_type == StateType::Soft {
                    let attempt = (old_attempt + 1).min(self.config.max_check_attempts);
                    let hard = attempt >= self.config.max_check_attempts;
                    let reported_attempt = if hard { 1 } else { attempt };
                    (if hard { StateType::Hard } else { StateType::Soft }, reported_attempt, hard, false)
                } else {
                    (StateType::Hard, self.config.max_check_attempts, false, false)
                }
            }
        };

        if is_authoritative {
            runtime.state = new_state;
            runtime.state_type = new_state_type;
            runtime.current_attempt = new_attempt;
            runtime.last_check = Some(now);
            runtime.last_check_result = Some(result.clone());
            if new_state_type == StateType::Hard && old_state_type != StateType::Hard {
                runtime.last_hard_state_change = Some(now);
            }
        }

        let state_changed = old_state != new_state || old_state_type != new_state_type;
        if state_changed {
            runtime.last_state_change = Some(now);
        }

        Self::update_flapping(&mut runtime, state_changed, now, self.config.flapping_threshold, &self.reference, &self.events);

        let interval = if new_state_type == StateType::Soft {
            self.config.retry_interval
        } else {
            self.config.check_interval
        };
        let next = Self::scheduling_offset(&self.reference, interval, runtime.next_check.is_none(), now);
        runtime.next_check = Some(next);
        runtime.force_next_check = false;

        if recovered && runtime.acknowledgement.as_ref().map(|a| a.kind) == Some(AcknowledgementType::Normal) {
            runtime.acknowledgement = None;
            self.events.emit(Signal::AcknowledgementCleared {
                checkable: self.reference.clone(),
            });
        }

        if state_changed {
            self.events.emit(Signal::StateChange {
                checkable: self.reference.clone(),
                old_state,
                new_state,
                hard: new_state_type == StateType::Hard,
                at: now,
            });
        }

        let downtime_depth = runtime
            .downtimes
            .values()
            .filter(|d| d.is_active(now))
            .count();
        let acknowledged = runtime
            .acknowledgement
            .as_ref()
            .map(|a| !a.is_expired(now.timestamp() as f64))
            .unwrap_or(false);

        let should_notify = self.config.notifications
            && new_state_type == StateType::Hard
            && (new_state != ObjectState::Ok || recovered)
            && self.has_authority("notification")
            && downtime_depth == 0
            && !acknowledged;

        if should_notify {
            let kind = if recovered {
                NotificationType::Recovery
            } else {
                NotificationType::Problem
            };
            if recovered {
                runtime.problem_notifications_sent = 0;
            } else {
                runtime.problem_notifications_sent += 1;
            }
            drop(runtime);
            self.events.emit(Signal::NotificationsRequested {
                checkable: self.reference.clone(),
                kind,
            });
        } else {
            drop(runtime);
        }

        self.events.emit(Signal::NewCheckResult {
            checkable: self.reference.clone(),
            at: now,
        });
    }

    fn update_flapping(
        runtime: &mut Runtime,
        state_changed: bool,
        now: DateTime<Utc>,
        threshold: f64,
        reference: &CheckableRef,
        events: &EventBus,
    ) {
        let elapsed = runtime
            .flapping_last_change
            .map(|last| (now - last).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0)
            .max(0.0);
        runtime.flapping_last_change = Some(now);

        if state_changed {
            runtime.flapping_positive += elapsed.min(1.0).max(0.0) + 1.0;
            runtime.flapping_negative += elapsed;
        } else {
            runtime.flapping_negative += elapsed + 1.0;
        }

        let total = runtime.flapping_positive + runtime.flapping_negative;
        if total > FLAPPING_WINDOW_SECS {
            let scale = FLAPPING_WINDOW_SECS / total;
            runtime.flapping_positive *= scale;
            runtime.flapping_negative *= scale;
        }

        let total = (runtime.flapping_positive + runtime.flapping_negative).max(f64::EPSILON);
        let flapping_current = 100.0 * runtime.flapping_positive / total;
        let is_flapping = flapping_current > threshold;

        if is_flapping != runtime.flapping {
            runtime.flapping = is_flapping;
            events.emit(Signal::FlappingChanged {
                checkable: reference.clone(),
                flapping: is_flapping,
            });
            events.emit(Signal::NotificationsRequested {
                checkable: reference.clone(),
                kind: if is_flapping {
                    NotificationType::FlappingStart
                } else {
                    NotificationType::FlappingEnd
                },
            });
        }
    }

    /// Spreads the first-ever schedule across the interval using the
    /// object's SDBM hash, so a bulk config load does not thunder-herd every
    /// check onto the same tick (spec §4.1).
    fn scheduling_offset(
        reference: &CheckableRef,
        interval: std::time::Duration,
        is_first_schedule: bool,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        if is_first_schedule {
            let hash = watchmesh_types::sdbm_hash(&reference.canonical_name());
            let fraction = hash as f64 / u32::MAX as f64;
            let offset = interval.as_secs_f64() * (1.0 - fraction.fract());
            now + chrono::Duration::milliseconds((offset * 1000.0) as i64)
        } else {
            now + chrono::Duration::milliseconds(interval.as_millis() as i64)
        }
    }

    pub fn set_next_check(&self, at: DateTime<Utc>, self_identity: &str, authority: Option<&str>) {
        if authority.map(|a| a == self_identity).unwrap_or(true) {
            self.runtime.lock().next_check = Some(at);
        }
    }

    pub fn set_force_next_check(&self, flag: bool, self_identity: &str, authority: Option<&str>) {
        if authority.map(|a| a == self_identity).unwrap_or(true) {
            self.runtime.lock().force_next_check = flag;
        }
    }

    pub fn next_check(&self) -> Option<DateTime<Utc>> {
        self.runtime.lock().next_check
    }

    pub fn force_next_check(&self) -> bool {
        self.runtime.lock().force_next_check
    }

    pub fn acknowledge_problem(
        &self,
        author: impl Into<String>,
        comment: impl Into<String>,
        kind: AcknowledgementType,
        expiry: Option<f64>,
    ) {
        let now = Utc::now();
        {
            let mut runtime = self.runtime.lock();
            runtime.acknowledgement = Some(watchmesh_types::Acknowledgement {
                kind,
                author: author.into(),
                comment: comment.into(),
                set_time: now.timestamp() as f64,
                expiry,
            });
        }
        self.events.emit(Signal::AcknowledgementSet {
            checkable: self.reference.clone(),
            kind,
        });
        self.events.emit(Signal::NotificationsRequested {
            checkable: self.reference.clone(),
            kind: NotificationType::Acknowledgement,
        });
    }

    pub fn clear_acknowledgement(&self) {
        let had_one = self.runtime.lock().acknowledgement.take().is_some();
        if had_one {
            self.events.emit(Signal::AcknowledgementCleared {
                checkable: self.reference.clone(),
            });
        }
    }

    pub fn add_downtime(&self, downtime: Downtime) {
        let id = downtime.id;
        let now = Utc::now();
        let becomes_active = downtime.is_active(now.timestamp() as f64);
        {
            let mut runtime = self.runtime.lock();
            for trigger in &downtime.triggers {
                if let Some(parent) = runtime.downtimes.get_mut(trigger) {
                    parent.triggers.insert(id);
                }
            }
            runtime.downtimes.insert(id, downtime);
        }
        self.events.emit(Signal::DowntimeAdded {
            checkable: self.reference.clone(),
            downtime_id: id,
        });
        if becomes_active {
            self.events.emit(Signal::DowntimeStart {
                checkable: self.reference.clone(),
                downtime_id: id,
            });
        }
    }

    pub fn remove_downtime(&self, id: uuid::Uuid, cancelled: bool) -> Result<(), CheckableError> {
        let removed = {
            let mut runtime = self.runtime.lock();
            let mut downtime = runtime
                .downtimes
                .remove(&id)
                .ok_or(CheckableError::UnknownDowntime(id))?;
            downtime.cancelled = cancelled;
            downtime
        };
        self.events.emit(Signal::DowntimeRemoved {
            checkable: self.reference.clone(),
            downtime_id: removed.id,
        });
        Ok(())
    }

    pub fn add_comment(&self, comment: Comment) {
        let id = comment.id;
        self.runtime.lock().comments.insert(id, comment);
        self.events.emit(Signal::CommentAdded {
            checkable: self.reference.clone(),
            comment_id: id,
        });
    }

    pub fn remove_comment(&self, id: uuid::Uuid) -> Result<(), CheckableError> {
        self.runtime
            .lock()
            .comments
            .remove(&id)
            .ok_or(CheckableError::UnknownComment(id))?;
        self.events.emit(Signal::CommentRemoved {
            checkable: self.reference.clone(),
            comment_id: id,
        });
        Ok(())
    }

    /// Sweeps expired downtimes and comments (spec §4.10). Called by the
    /// expiry timer every `expiry_sweep_interval`.
    pub fn sweep_expired(&self, now: DateTime<Utc>) {
        let (expired_downtimes, expired_comments) = {
            let mut runtime = self.runtime.lock();
            let ts = now.timestamp() as f64;
            let expired_downtimes: Vec<uuid::Uuid> = runtime
                .downtimes
                .iter()
                .filter(|(_, d)| d.end < ts && !d.cancelled)
                .map(|(id, _)| *id)
                .collect();
            for id in &expired_downtimes {
                runtime.downtimes.remove(id);
            }
            let expired_comments: Vec<uuid::Uuid> = runtime
                .comments
                .iter()
                .filter(|(_, c)| c.is_expired(ts))
                .map(|(id, _)| *id)
                .collect();
            for id in &expired_comments {
                runtime.comments.remove(id);
            }
            (expired_downtimes, expired_comments)
        };
        for id in expired_downtimes {
            self.events.emit(Signal::DowntimeRemoved {
                checkable: self.reference.clone(),
                downtime_id: id,
            });
        }
        for _ in expired_comments {
            // Comment expiry has no dedicated signal in the wire protocol;
            // the comment simply stops being relayed on the next sync.
        }
    }

    /// Reachability (spec §4.1): all parents' hard state must be acceptable.
    /// Guards against cyclic dependency graphs by aborting at a recursion
    /// depth of 20 and failing open (treated as reachable) rather than
    /// spuriously suppressing notifications.
    pub fn is_reachable(&self, registry: &crate::registry::TypeRegistry) -> bool {
        let mut visited = HashSet::new();
        Self::reachable_inner(&self.reference, &self.config.parents, registry, &mut visited, 0)
    }

    fn reachable_inner(
        origin: &CheckableRef,
        parents: &[CheckableRef],
        registry: &crate::registry::TypeRegistry,
        visited: &mut HashSet<CheckableRef>,
        depth: u32,
    ) -> bool {
        if depth >= 20 {
            tracing::warn!(root = %origin, "reachability recursion depth exceeded, treating as reachable");
            return true;
        }
        for parent_ref in parents {
            if !visited.insert(parent_ref.clone()) {
                continue;
            }
            let Some(parent) = registry.get(parent_ref) else {
                continue;
            };
            if parent.state() != ObjectState::Ok {
                return false;
            }
            if !Self::reachable_inner(origin, &parent.config.parents, registry, visited, depth + 1) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use watchmesh_types::PerfdataPoint;

    fn result(state: ObjectState) -> CheckResult {
        CheckResult {
            state,
            output: "test".to_string(),
            performance_data: Vec::<PerfdataPoint>::new(),
            execution_start: None,
            execution_end: None,
            check_source: Some("local".to_string()),
        }
    }

    fn make(max_attempts: u32) -> Checkable {
        let config = CheckableConfig {
            max_check_attempts: max_attempts,
            check_interval: std::time::Duration::from_secs(300),
            retry_interval: std::time::Duration::from_secs(60),
            ..Default::default()
        };
        let mut c = Checkable::new(CheckableRef::service("web1", "http"), config, EventBus::new());
        c.set_authority("notification", true);
        c
    }

    #[test]
    fn hard_state_escalation_matches_scenario_1() {
        let checkable = make(3);

        checkable.process_check_result(result(ObjectState::Critical), "node-a", None);
        assert_eq!(checkable.state_type(), StateType::Soft);
        assert_eq!(checkable.current_attempt(), 1);

        checkable.process_check_result(result(ObjectState::Critical), "node-a", None);
        assert_eq!(checkable.state_type(), StateType::Soft);
        assert_eq!(checkable.current_attempt(), 2);

        let before = Utc::now();
        checkable.process_check_result(result(ObjectState::Critical), "node-a", None);
        assert_eq!(checkable.state_type(), StateType::Hard);
        assert_eq!(checkable.current_attempt(), 1);
        assert_eq!(checkable.state(), ObjectState::Critical);

        // the natural Soft -> Hard escalation schedules on check_interval (300s),
        // not retry_interval (60s)
        let next = checkable.next_check().unwrap();
        assert!(next - before >= chrono::Duration::seconds(299));
    }

    #[test]
    fn recovery_clears_normal_acknowledgement() {
        let checkable = make(3);
        checkable.process_check_result(result(ObjectState::Critical), "node-a", None);
        checkable.process_check_result(result(ObjectState::Critical), "node-a", None);
        checkable.process_check_result(result(ObjectState::Critical), "node-a", None);
        assert_eq!(checkable.state_type(), StateType::Hard);

        checkable.acknowledge_problem("alice", "looking into it", AcknowledgementType::Normal, None);
        assert!(checkable.acknowledgement().is_some());

        checkable.process_check_result(result(ObjectState::Ok), "node-a", None);
        assert_eq!(checkable.state(), ObjectState::Ok);
        assert_eq!(checkable.state_type(), StateType::Hard);
        assert_eq!(checkable.current_attempt(), 1);
        assert!(checkable.acknowledgement().is_none());
    }

    #[test]
    fn non_authoritative_result_does_not_mutate_local_state() {
        let checkable = make(3);
        checkable.process_check_result(result(ObjectState::Critical), "node-a", Some("node-b"));
        assert_eq!(checkable.state(), ObjectState::Ok);
    }

    #[test]
    fn never_raises_hard_notification_before_max_attempts() {
        let checkable = make(5);
        for _ in 0..4 {
            checkable.process_check_result(result(ObjectState::Critical), "node-a", None);
            assert_eq!(checkable.state_type(), StateType::Soft);
        }
    }
}
