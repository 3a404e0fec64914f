//! Error taxonomy
//!
//! Selection errors end an experiment, execution errors stay local to one
//! target's record, and lifecycle errors describe state machine trouble.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::experiment::lifecycle::{Event, Phase};

/// Target selection could not produce a usable target set.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    /// Mode `one` was asked to pick from nothing
    #[error("no candidate instances matched the selector")]
    EmptyCandidateSet,

    /// Mode `fixed` asked for more instances than matched (reject policy only)
    #[error("mode requires {requested} instance(s) but only {available} matched")]
    InsufficientCandidates {
        /// Instances requested by the mode value
        requested: usize,
        /// Instances available after filtering
        available: usize,
    },

    /// The mode value did not parse or was out of range
    #[error("invalid value '{value}' for mode '{mode}': {reason}")]
    InvalidValue {
        /// Mode the value belongs to
        mode: String,
        /// The offending value
        value: String,
        /// What is wrong with it
        reason: String,
    },

    /// The mode string is not one of the supported modes
    #[error(
        "unknown mode '{0}' (expected one of: one, all, fixed, fixed-percent, random-max-percent)"
    )]
    UnknownMode(String),
}

/// A single apply/recover attempt against one target failed.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionError {
    /// The command ran and exited unsuccessfully
    #[error("command failed with exit code {}", exit_code.map_or_else(|| "unknown".to_string(), |c| c.to_string()))]
    CommandFailure {
        /// Exit code, `None` when killed by a signal
        exit_code: Option<i32>,
        /// Captured stderr
        stderr: String,
    },

    /// The command did not finish within the configured bound
    #[error("command timed out after {after_ms}ms")]
    Timeout {
        /// Timeout that expired, in milliseconds
        after_ms: u64,
    },

    /// The target could not be reached at all
    #[error("target unreachable: {0}")]
    TargetUnreachable(String),
}

/// The lifecycle state machine was driven somewhere it cannot go.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// The event is not valid in the current phase
    #[error("illegal transition from {from} on {event:?}")]
    IllegalTransition {
        /// Phase the experiment was in
        from: Phase,
        /// Event that was rejected
        event: Event,
    },

    /// A persisted experiment was found mid-phase and is being replayed
    #[error("experiment '{experiment}' found stuck in {phase}, replaying phase")]
    StuckTransition {
        /// Experiment name
        experiment: String,
        /// Phase being replayed
        phase: Phase,
    },
}
