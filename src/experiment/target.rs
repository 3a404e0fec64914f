//! Targets selected for fault injection

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cluster::TargetId;

/// Where a target stands in the apply/recover lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionState {
    /// Chosen for this run, apply not yet attempted
    Selected,
    /// Apply command succeeded; the fault is live
    Injected,
    /// Apply command failed
    ApplyFailed,
    /// Apply command timed out; side effects unknown
    ApplyTimedOut,
    /// Recover command succeeded
    Recovered,
    /// Recover command failed; re-attempted on replay
    RecoverFailed,
}

impl InjectionState {
    /// Whether the recover command should run for a target in this state.
    ///
    /// Only targets whose apply succeeded are recovered. Timed-out applies
    /// are included when defensive recovery is on.
    #[must_use]
    pub const fn needs_recovery(self, defensive: bool) -> bool {
        match self {
            Self::Injected | Self::RecoverFailed => true,
            Self::ApplyTimedOut => defensive,
            Self::Selected | Self::ApplyFailed | Self::Recovered => false,
        }
    }

    /// Short lowercase label
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Selected => "selected",
            Self::Injected => "injected",
            Self::ApplyFailed => "apply_failed",
            Self::ApplyTimedOut => "apply_timed_out",
            Self::Recovered => "recovered",
            Self::RecoverFailed => "recover_failed",
        }
    }
}

impl fmt::Display for InjectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One workload instance chosen for an experiment run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Pod identity
    pub id: TargetId,
    /// Containers to run commands in; empty means the default container
    #[serde(default)]
    pub containers: Vec<String>,
    /// Current injection state
    pub state: InjectionState,
}

impl Target {
    /// A freshly selected target
    #[must_use]
    pub const fn new(id: TargetId, containers: Vec<String>) -> Self {
        Self {
            id,
            containers,
            state: InjectionState::Selected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_recovery_only_after_successful_apply() {
        assert!(InjectionState::Injected.needs_recovery(false));
        assert!(InjectionState::RecoverFailed.needs_recovery(false));
        assert!(!InjectionState::ApplyFailed.needs_recovery(false));
        assert!(!InjectionState::ApplyFailed.needs_recovery(true));
        assert!(!InjectionState::Selected.needs_recovery(true));
        assert!(!InjectionState::Recovered.needs_recovery(true));
    }

    #[test]
    fn test_timed_out_apply_recovered_only_when_defensive() {
        assert!(!InjectionState::ApplyTimedOut.needs_recovery(false));
        assert!(InjectionState::ApplyTimedOut.needs_recovery(true));
    }

    #[test]
    fn test_state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&InjectionState::ApplyTimedOut).unwrap(),
            "\"apply_timed_out\""
        );
        assert_eq!(InjectionState::RecoverFailed.to_string(), "recover_failed");
    }

    #[test]
    fn test_new_target_is_selected() {
        let target = Target::new(TargetId::new("a", "b"), vec!["app".to_string()]);
        assert_eq!(target.state, InjectionState::Selected);
    }
}
