//! Experiment configuration parser
//!
//! Parses an experiments TOML file (`[engine]` plus `[[experiment]]`
//! tables) and turns each manifest into a validated [`ExperimentSpec`].

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::experiment::duration::HumanDuration;
use crate::experiment::mode::{Mode, OverflowPolicy};
use crate::experiment::scheduler::SchedulerRule;
use crate::experiment::selector::SelectorSpec;

/// Engine-wide execution policy shared by all experiments
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Bound on one command attempt against one target (default: 30s)
    #[serde(default = "default_command_timeout")]
    pub command_timeout: HumanDuration,
    /// Extra attempts per target after a failed one (default: 0)
    #[serde(default)]
    pub max_retries: u32,
    /// Targets acted on concurrently within a batch (default: 16)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Also recover targets whose apply timed out (default: false)
    #[serde(default)]
    pub defensive_recovery: bool,
    /// Abort the run when more than this percentage of applies fail.
    /// None means best effort: proceed while at least one apply succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply_failure_threshold: Option<u8>,
    /// What `fixed` does when asking for more targets than matched (default: cap)
    #[serde(default)]
    pub fixed_overflow: OverflowPolicy,
}

fn default_command_timeout() -> HumanDuration {
    HumanDuration::from(Duration::from_secs(30))
}

const fn default_max_concurrency() -> usize {
    16
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_timeout: default_command_timeout(),
            max_retries: 0,
            max_concurrency: default_max_concurrency(),
            defensive_recovery: false,
            apply_failure_threshold: None,
            fixed_overflow: OverflowPolicy::default(),
        }
    }
}

/// An executable and its arguments
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Executable (and leading arguments)
    pub command: Vec<String>,
    /// Arguments appended after `command`
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Build from command and args
    #[must_use]
    pub const fn new(command: Vec<String>, args: Vec<String>) -> Self {
        Self { command, args }
    }

    /// The full argv, `command ++ args`
    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        self.command.iter().chain(&self.args).cloned().collect()
    }

    /// Whether there is nothing to run
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.command.is_empty() && self.args.is_empty()
    }
}

/// One `[[experiment]]` table as written
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExperimentManifest {
    /// Unique experiment name
    pub name: String,
    /// Selection mode: one, all, fixed, fixed-percent, random-max-percent
    pub mode: String,
    /// Mode value (count or percentage), required for valued modes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Which pods are candidates
    #[serde(default)]
    pub selector: SelectorSpec,
    /// Restrict commands to these containers (all when empty)
    #[serde(default)]
    pub container_names: Vec<String>,
    /// How long the fault stays active; indefinite when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<HumanDuration>,
    /// Recurring-run rule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<SchedulerRule>,
    /// Command that injects the fault
    #[serde(default)]
    pub apply_command: Vec<String>,
    /// Arguments for the apply command
    #[serde(default)]
    pub apply_args: Vec<String>,
    /// Command that reverts the fault
    #[serde(default)]
    pub recover_command: Vec<String>,
    /// Arguments for the recover command
    #[serde(default)]
    pub recover_args: Vec<String>,
}

impl ExperimentManifest {
    /// Validate the manifest and build the immutable spec.
    pub fn to_spec(&self) -> Result<ExperimentSpec> {
        if self.name.trim().is_empty() {
            bail!("Experiment name cannot be empty");
        }

        let mode = Mode::parse(&self.mode, self.value.as_deref())?;

        self.selector.validate()?;

        if self.container_names.iter().any(|c| c.trim().is_empty()) {
            bail!("Container names cannot be empty");
        }

        let apply = CommandSpec::new(self.apply_command.clone(), self.apply_args.clone());
        if apply.is_empty() {
            bail!("Apply command cannot be empty");
        }
        let recover = CommandSpec::new(self.recover_command.clone(), self.recover_args.clone());
        if recover.is_empty() {
            bail!("Recover command cannot be empty");
        }

        if let Some(rule) = &self.scheduler {
            rule.validate()?;
            if self.duration.is_none() {
                bail!("A scheduled experiment needs a duration, otherwise the first run never ends");
            }
        }

        Ok(ExperimentSpec {
            name: self.name.clone(),
            mode,
            selector: self.selector.clone(),
            container_names: self.container_names.clone(),
            duration: self.duration.as_ref().map(HumanDuration::get),
            scheduler: self.scheduler.clone(),
            apply,
            recover,
        })
    }
}

/// A validated experiment, immutable once started
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentSpec {
    /// Experiment name
    pub name: String,
    /// Selection mode
    pub mode: Mode,
    /// Candidate filter
    pub selector: SelectorSpec,
    /// Container restriction (all when empty)
    pub container_names: Vec<String>,
    /// Active phase length; None runs until stopped
    pub duration: Option<Duration>,
    /// Recurring-run rule
    pub scheduler: Option<SchedulerRule>,
    /// Fault-inducing command
    pub apply: CommandSpec,
    /// Fault-reverting command
    pub recover: CommandSpec,
}

/// Top-level configuration parsed from the experiments file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChaosConfig {
    /// Engine policy
    #[serde(default)]
    pub engine: EngineConfig,
    /// Experiment definitions
    #[serde(rename = "experiment", default)]
    pub experiments: Vec<ExperimentManifest>,
}

impl ChaosConfig {
    /// Parse an experiments file from a path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse experiments TOML from a string
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse experiments TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Find an experiment manifest by name
    #[must_use]
    pub fn get_experiment(&self, name: &str) -> Option<&ExperimentManifest> {
        self.experiments.iter().find(|e| e.name == name)
    }

    /// Validated spec for the named experiment
    pub fn spec(&self, name: &str) -> Result<ExperimentSpec> {
        self.get_experiment(name)
            .with_context(|| {
                format!(
                    "Unknown experiment '{name}'. Available experiments: {}",
                    self.experiment_names().join(", ")
                )
            })?
            .to_spec()
    }

    /// Names of all experiments, in file order
    #[must_use]
    pub fn experiment_names(&self) -> Vec<&str> {
        self.experiments.iter().map(|e| e.name.as_str()).collect()
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for experiment in &self.experiments {
            if !seen.insert(&experiment.name) {
                bail!("Duplicate experiment name: '{}'", experiment.name);
            }
        }

        for experiment in &self.experiments {
            experiment
                .to_spec()
                .with_context(|| format!("in experiment '{}'", experiment.name))?;
        }

        if self.engine.max_concurrency == 0 {
            bail!("engine.max_concurrency must be at least 1");
        }
        if self.engine.command_timeout.get().is_zero() {
            bail!("engine.command_timeout must be greater than zero");
        }
        if let Some(threshold) = self.engine.apply_failure_threshold {
            if threshold > 100 {
                bail!("engine.apply_failure_threshold must be a percentage (0-100), got {threshold}");
            }
        }

        Ok(())
    }
}
