//! Action executor
//!
//! Runs an apply or recover command against targets with a per-target
//! timeout, bounded retries and bounded concurrency. Every target ends with
//! exactly one [`ActionRecord`]; one target failing never affects another.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::error::ExecutionError;
use crate::exec::RemoteExec;
use crate::experiment::config::{CommandSpec, EngineConfig};
use crate::experiment::record::{ActionKind, ActionOutcome, ActionRecord};
use crate::experiment::target::{InjectionState, Target};

/// Target state after an apply with this outcome
#[must_use]
pub const fn state_after_apply(outcome: &ActionOutcome) -> InjectionState {
    match outcome {
        ActionOutcome::Success => InjectionState::Injected,
        ActionOutcome::Timeout { .. } => InjectionState::ApplyTimedOut,
        ActionOutcome::Failure { .. } | ActionOutcome::Unreachable { .. } => {
            InjectionState::ApplyFailed
        }
    }
}

/// Runs commands against targets through a [`RemoteExec`]
#[derive(Clone)]
pub struct ActionExecutor {
    exec: Arc<dyn RemoteExec>,
    timeout: Duration,
    max_retries: u32,
    max_concurrency: usize,
}

impl ActionExecutor {
    /// Executor using the engine's timeout, retry and concurrency settings
    #[must_use]
    pub fn new(exec: Arc<dyn RemoteExec>, engine: &EngineConfig) -> Self {
        Self::with_limits(
            exec,
            engine.command_timeout.get(),
            engine.max_retries,
            engine.max_concurrency,
        )
    }

    /// Executor with explicit limits
    #[must_use]
    pub fn with_limits(
        exec: Arc<dyn RemoteExec>,
        timeout: Duration,
        max_retries: u32,
        max_concurrency: usize,
    ) -> Self {
        Self {
            exec,
            timeout,
            max_retries,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Run `command` against one target until it succeeds or retries run out.
    pub async fn execute(
        &self,
        kind: ActionKind,
        target: &Target,
        command: &CommandSpec,
        run: u32,
    ) -> ActionRecord {
        let started_at = Utc::now();
        let mut retries = 0;

        let outcome = loop {
            let outcome = match self.attempt(target, command).await {
                Ok(()) => ActionOutcome::Success,
                Err(err) => {
                    warn!(
                        target = %target.id,
                        action = %kind,
                        attempt = retries + 1,
                        error = %err,
                        "command attempt failed"
                    );
                    ActionOutcome::from(err)
                }
            };
            if outcome.is_success() || retries >= self.max_retries {
                break outcome;
            }
            retries += 1;
        };

        debug!(target = %target.id, action = %kind, outcome = outcome.label(), retries, "action finished");

        ActionRecord {
            target: target.id.clone(),
            action: kind,
            run,
            command: command.argv(),
            containers: target.containers.clone(),
            outcome,
            retries,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Run `command` against every target, at most `max_concurrency` at once.
    ///
    /// Records come back in the order of `targets`.
    pub async fn run_batch(
        &self,
        kind: ActionKind,
        targets: &[Target],
        command: &CommandSpec,
        run: u32,
    ) -> Vec<ActionRecord> {
        let actions = targets.iter().cloned().enumerate().map(|(i, target)| {
            let executor = self.clone();
            let command = command.clone();
            async move { (i, executor.execute(kind, &target, &command, run).await) }
        });
        let mut records: Vec<(usize, ActionRecord)> = stream::iter(actions)
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;
        records.sort_by_key(|(i, _)| *i);
        records.into_iter().map(|(_, record)| record).collect()
    }

    /// One attempt: the command in each scoped container in turn, bounded
    /// as a whole by the timeout.
    async fn attempt(&self, target: &Target, command: &CommandSpec) -> Result<(), ExecutionError> {
        let containers: Vec<Option<&str>> = if target.containers.is_empty() {
            vec![None]
        } else {
            target.containers.iter().map(|c| Some(c.as_str())).collect()
        };

        let run_all = async {
            for container in containers {
                let output = self
                    .exec
                    .exec(&target.id, container, &command.command, &command.args)
                    .await?;
                if !output.success() {
                    return Err(ExecutionError::CommandFailure {
                        exit_code: output.exit_code,
                        stderr: output.stderr,
                    });
                }
            }
            Ok(())
        };

        tokio::time::timeout(self.timeout, run_all)
            .await
            .unwrap_or_else(|_| {
                Err(ExecutionError::Timeout {
                    after_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                })
            })
    }
}
