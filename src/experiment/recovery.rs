//! Recovery coordinator
//!
//! Runs the recover command against every target whose fault may be live.
//! Calling it again after a complete pass does nothing: recovered targets
//! are never touched twice.

use tracing::{info, warn};

use crate::experiment::config::CommandSpec;
use crate::experiment::executor::ActionExecutor;
use crate::experiment::record::{ActionKind, ActionRecord};
use crate::experiment::target::{InjectionState, Target};

/// Reverts injected faults
#[derive(Clone)]
pub struct RecoveryCoordinator {
    executor: ActionExecutor,
    defensive: bool,
}

impl RecoveryCoordinator {
    /// Coordinator running recover commands through `executor`.
    ///
    /// With `defensive` set, targets whose apply timed out are recovered too.
    #[must_use]
    pub const fn new(executor: ActionExecutor, defensive: bool) -> Self {
        Self {
            executor,
            defensive,
        }
    }

    /// Targets that still need the recover command
    #[must_use]
    pub fn pending<'a>(&self, targets: &'a [Target]) -> Vec<&'a Target> {
        targets
            .iter()
            .filter(|t| t.state.needs_recovery(self.defensive))
            .collect()
    }

    /// Recover every eligible target and update its state in place.
    ///
    /// Returns one record per recover attempt; empty when nothing was eligible.
    pub async fn recover(
        &self,
        targets: &mut [Target],
        command: &CommandSpec,
        run: u32,
    ) -> Vec<ActionRecord> {
        let eligible: Vec<Target> = self.pending(targets).into_iter().cloned().collect();
        if eligible.is_empty() {
            return Vec::new();
        }

        let records = self
            .executor
            .run_batch(ActionKind::Recover, &eligible, command, run)
            .await;

        for record in &records {
            if let Some(target) = targets.iter_mut().find(|t| t.id == record.target) {
                target.state = if record.outcome.is_success() {
                    InjectionState::Recovered
                } else {
                    warn!(target = %target.id, outcome = record.outcome.label(), "recovery failed");
                    InjectionState::RecoverFailed
                };
            }
        }

        let recovered = records.iter().filter(|r| r.outcome.is_success()).count();
        info!(recovered, attempted = records.len(), "recovery pass complete");
        records
    }
}
