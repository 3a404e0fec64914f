//! Shared test utilities
//!
//! Common helpers used across test modules. Only compiled in test builds.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::cluster::{Pod, TargetId};
use crate::error::ExecutionError;
use crate::exec::{ExecOutput, RemoteExec};
use crate::experiment::config::CommandSpec;
use crate::experiment::record::{ActionKind, ActionOutcome, ActionRecord};

/// A running pod with one `app` container and the given labels.
#[must_use]
pub fn make_pod(namespace: &str, name: &str, labels: &[(&str, &str)]) -> Pod {
    Pod {
        namespace: namespace.to_string(),
        name: name.to_string(),
        labels: labels
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect(),
        annotations: BTreeMap::new(),
        node_name: Some("node-1".to_string()),
        phase: "Running".to_string(),
        containers: vec!["app".to_string()],
    }
}

/// A command spec from string slices
#[must_use]
pub fn command(argv: &[&str]) -> CommandSpec {
    CommandSpec::new(argv.iter().map(ToString::to_string).collect(), vec![])
}

/// A finished record with the given outcome
#[must_use]
pub fn make_record(name: &str, action: ActionKind, outcome: ActionOutcome) -> ActionRecord {
    let now = Utc::now();
    ActionRecord {
        target: TargetId::new("default", name),
        action,
        run: 1,
        command: vec!["true".to_string()],
        containers: vec![],
        outcome,
        retries: 0,
        started_at: now,
        finished_at: now,
    }
}

/// How [`MockExec`] answers a call
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Exit 0
    Succeed,
    /// Exit with this code
    Fail(i32),
    /// Return `TargetUnreachable`
    Unreachable,
    /// Sleep this long, then exit 0
    Hang(Duration),
    /// Exit 1 this many times, then exit 0
    FailTimes(u32),
}

/// One recorded invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecCall {
    /// Target the command ran against
    pub target: TargetId,
    /// Container, if scoped
    pub container: Option<String>,
    /// `command ++ args`
    pub argv: Vec<String>,
}

/// Scripted [`RemoteExec`] that records every call.
///
/// Behaviors are keyed by pod name and, optionally, the first argv word,
/// so apply and recover commands can be scripted separately.
#[derive(Debug, Default)]
pub struct MockExec {
    behaviors: HashMap<(String, Option<String>), Behavior>,
    failures_left: Mutex<HashMap<(String, Option<String>), u32>>,
    calls: Mutex<Vec<ExecCall>>,
}

impl MockExec {
    /// Everything succeeds
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script every command against `name`
    #[must_use]
    pub fn on(mut self, name: &str, behavior: Behavior) -> Self {
        self.script((name.to_string(), None), behavior);
        self
    }

    /// Script commands against `name` whose argv starts with `program`
    #[must_use]
    pub fn on_command(mut self, name: &str, program: &str, behavior: Behavior) -> Self {
        self.script((name.to_string(), Some(program.to_string())), behavior);
        self
    }

    fn script(&mut self, key: (String, Option<String>), behavior: Behavior) {
        if let Behavior::FailTimes(n) = behavior {
            self.failures_left.lock().unwrap().insert(key.clone(), n);
        }
        self.behaviors.insert(key, behavior);
    }

    /// All calls so far
    pub fn calls(&self) -> Vec<ExecCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls whose argv starts with `program`
    pub fn calls_to(&self, program: &str) -> Vec<ExecCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.argv.first().map(String::as_str) == Some(program))
            .collect()
    }
}

#[async_trait]
impl RemoteExec for MockExec {
    async fn exec(
        &self,
        target: &TargetId,
        container: Option<&str>,
        command: &[String],
        args: &[String],
    ) -> Result<ExecOutput, ExecutionError> {
        let argv: Vec<String> = command.iter().chain(args).cloned().collect();
        self.calls.lock().unwrap().push(ExecCall {
            target: target.clone(),
            container: container.map(str::to_string),
            argv: argv.clone(),
        });

        let specific = (target.name.clone(), argv.first().cloned());
        let general = (target.name.clone(), None);
        let (key, behavior) = match self.behaviors.get(&specific) {
            Some(b) => (specific, b.clone()),
            None => match self.behaviors.get(&general) {
                Some(b) => (general, b.clone()),
                None => (general, Behavior::Succeed),
            },
        };

        let ok = ExecOutput {
            exit_code: Some(0),
            ..ExecOutput::default()
        };
        match behavior {
            Behavior::Succeed => Ok(ok),
            Behavior::Fail(code) => Ok(ExecOutput {
                exit_code: Some(code),
                stdout: String::new(),
                stderr: format!("exit {code}"),
            }),
            Behavior::Unreachable => Err(ExecutionError::TargetUnreachable(format!(
                "pod {target} not found"
            ))),
            Behavior::Hang(d) => {
                tokio::time::sleep(d).await;
                Ok(ok)
            }
            Behavior::FailTimes(_) => {
                let mut left = self.failures_left.lock().unwrap();
                let remaining = left.entry(key).or_insert(0);
                if *remaining > 0 {
                    *remaining -= 1;
                    Ok(ExecOutput {
                        exit_code: Some(1),
                        stdout: String::new(),
                        stderr: "transient".to_string(),
                    })
                } else {
                    Ok(ok)
                }
            }
        }
    }
}
