//! Per-target action records

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cluster::TargetId;
use crate::error::ExecutionError;

/// Which half of the fault an action belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// The fault-inducing command
    Apply,
    /// The fault-reverting command
    Recover,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Apply => "apply",
            Self::Recover => "recover",
        })
    }
}

/// Terminal outcome of one action against one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// Every container exited 0
    Success,
    /// The command exited non-zero
    Failure {
        /// Exit code (None if killed by signal)
        exit_code: Option<i32>,
        /// Captured stderr
        stderr: String,
    },
    /// The command did not finish in time
    Timeout {
        /// The bound that expired, in milliseconds
        after_ms: u64,
    },
    /// The target could not be reached
    Unreachable {
        /// Why
        reason: String,
    },
}

impl ActionOutcome {
    /// Whether the action succeeded
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Short label for display
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure { .. } => "failure",
            Self::Timeout { .. } => "timeout",
            Self::Unreachable { .. } => "unreachable",
        }
    }
}

impl From<ExecutionError> for ActionOutcome {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::CommandFailure { exit_code, stderr } => {
                Self::Failure { exit_code, stderr }
            }
            ExecutionError::Timeout { after_ms } => Self::Timeout { after_ms },
            ExecutionError::TargetUnreachable(reason) => Self::Unreachable { reason },
        }
    }
}

/// What happened when an apply or recover command ran against a target.
///
/// Records are created only once the action is terminal and are never
/// modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Target the action ran against
    pub target: TargetId,
    /// Apply or recover
    pub action: ActionKind,
    /// Experiment run (1-indexed) the action belongs to
    pub run: u32,
    /// Full argv that was executed
    pub command: Vec<String>,
    /// Containers the command ran in (empty = default container)
    #[serde(default)]
    pub containers: Vec<String>,
    /// Terminal outcome
    pub outcome: ActionOutcome,
    /// Extra attempts used before reaching the outcome
    #[serde(default)]
    pub retries: u32,
    /// When the first attempt started
    pub started_at: DateTime<Utc>,
    /// When the last attempt finished
    pub finished_at: DateTime<Utc>,
}
