use serde::{Deserialize, Serialize};

/// Result state of the most recent check. A Host checkable only ever takes
/// on `Ok`, `Critical`, or `Unknown`; `collapse_for_host` maps `Warning` onto
/// `Critical` the way the scheduler does for host checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectState {
    Ok,
    Warning,
    Critical,
    Unknown,
}

impl ObjectState {
    pub fn from_exit_code(code: i32) -> Self {
        match code {
            0 => ObjectState::Ok,
            1 => ObjectState::Warning,
            2 => ObjectState::Critical,
            _ => ObjectState::Unknown,
        }
    }

    pub fn collapse_for_host(self) -> Self {
        match self {
            ObjectState::Warning => ObjectState::Critical,
            other => other,
        }
    }

    pub fn is_ok(self) -> bool {
        matches!(self, ObjectState::Ok)
    }
}

/// Soft = still escalating through `max_check_attempts`; Hard = accepted,
/// and the state at which this checkable notifies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateType {
    Soft,
    Hard,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_mapping() {
        assert_eq!(ObjectState::from_exit_code(0), ObjectState::Ok);
        assert_eq!(ObjectState::from_exit_code(1), ObjectState::Warning);
        assert_eq!(ObjectState::from_exit_code(2), ObjectState::Critical);
        assert_eq!(ObjectState::from_exit_code(3), ObjectState::Unknown);
        assert_eq!(ObjectState::from_exit_code(-1), ObjectState::Unknown);
    }

    #[test]
    fn host_collapses_warning_to_critical() {
        assert_eq!(ObjectState::Warning.collapse_for_host(), ObjectState::Critical);
        assert_eq!(ObjectState::Ok.collapse_for_host(), ObjectState::Ok);
    }
}
