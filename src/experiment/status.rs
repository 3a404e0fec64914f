//! Experiment status
//!
//! The authoritative view of one experiment. Only the lifecycle tracker
//! mutates it; everyone else reads snapshots from a watch channel or the
//! persisted status file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::experiment::lifecycle::{Event, Phase};
use crate::experiment::record::{ActionKind, ActionRecord};
use crate::experiment::target::{InjectionState, Target};

/// One recorded phase change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTransition {
    /// Phase left
    pub from: Phase,
    /// Phase entered
    pub to: Phase,
    /// Event that caused it
    pub event: Event,
    /// When
    pub at: DateTime<Utc>,
}

/// Current state of an experiment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentStatus {
    /// Experiment name
    pub experiment: String,
    /// Current phase
    pub phase: Phase,
    /// Current run, 1-indexed; 0 before the first fire
    pub run: u32,
    /// Targets of the current run
    #[serde(default)]
    pub targets: Vec<Target>,
    /// Action records of the current run
    #[serde(default)]
    pub records: Vec<ActionRecord>,
    /// Why the run is failing or failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// A stop was requested; no further runs will fire
    #[serde(default)]
    pub stop_requested: bool,
    /// When the experiment was started
    pub started_at: DateTime<Utc>,
    /// When the current run entered Active
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_since: Option<DateTime<Utc>>,
    /// When the next scheduled run fires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_fire_at: Option<DateTime<Utc>>,
    /// Phase history, oldest first
    #[serde(default)]
    pub transitions: Vec<PhaseTransition>,
    /// Last modification
    pub updated_at: DateTime<Utc>,
}

impl ExperimentStatus {
    /// Fresh status in Pending
    #[must_use]
    pub fn new(experiment: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            experiment: experiment.into(),
            phase: Phase::Pending,
            run: 0,
            targets: Vec::new(),
            records: Vec::new(),
            failure: None,
            stop_requested: false,
            started_at: now,
            active_since: None,
            next_fire_at: None,
            transitions: Vec::new(),
            updated_at: now,
        }
    }

    /// Whether no further transitions will happen on their own
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Move to `to` and append the transition
    pub fn transition(&mut self, to: Phase, event: Event) {
        let now = Utc::now();
        self.transitions.push(PhaseTransition {
            from: self.phase,
            to,
            event,
            at: now,
        });
        self.phase = to;
        self.updated_at = now;
    }

    /// Number of targets in `state`
    #[must_use]
    pub fn count(&self, state: InjectionState) -> usize {
        self.targets.iter().filter(|t| t.state == state).count()
    }

    /// Percentage (0-100) of targets whose apply did not succeed
    #[must_use]
    pub fn apply_failure_percent(&self) -> usize {
        let applied: Vec<&ActionRecord> = self
            .records
            .iter()
            .filter(|r| r.action == ActionKind::Apply)
            .collect();
        if applied.is_empty() {
            return 0;
        }
        let failed = applied.iter().filter(|r| !r.outcome.is_success()).count();
        failed * 100 / applied.len()
    }

    /// Reset per-run state for run `run`
    pub fn begin_run(&mut self, run: u32) {
        self.run = run;
        self.targets.clear();
        self.records.clear();
        self.failure = None;
        self.active_since = None;
        self.next_fire_at = None;
        self.updated_at = Utc::now();
    }

    /// Append records and bump `updated_at`
    pub fn extend_records(&mut self, records: impl IntoIterator<Item = ActionRecord>) {
        self.records.extend(records);
        self.updated_at = Utc::now();
    }
}
