//! Chaos doctor: diagnostics and health checks
//!
//! Analyzes the experiments file, `history.jsonl` and the persisted status
//! files to find leftover faults and risky configuration. Returns a
//! structured report with categories: errors (must fix), warnings (should
//! fix), info (suggestions).

use std::collections::BTreeMap;

use crate::experiment::config::ChaosConfig;
use crate::experiment::mode::Mode;
use crate::experiment::record::{ActionKind, ActionOutcome};
use crate::experiment::status::ExperimentStatus;
use crate::experiment::target::InjectionState;
use crate::log::HistoryEntry;

/// Severity level for a diagnostic finding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Severity {
    /// Must fix: a fault may still be live
    Error,
    /// Should fix: risky configuration or unhealthy history
    Warning,
    /// Suggestion
    Info,
}

/// A single diagnostic finding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    /// Severity of the finding
    pub severity: Severity,
    /// Short code for the finding (e.g., "D001")
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Suggested fix (optional)
    pub suggestion: Option<String>,
}

/// Diagnostic report from `doctor`
#[derive(Debug, Clone)]
pub struct DiagnosticReport {
    /// All findings, in order of severity (errors first)
    pub findings: Vec<Finding>,
}

impl DiagnosticReport {
    /// Returns true if the report has no findings at all
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    /// Returns the number of errors
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.count(&Severity::Error)
    }

    /// Returns the number of warnings
    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.count(&Severity::Warning)
    }

    /// Returns the number of info items
    #[must_use]
    pub fn info_count(&self) -> usize {
        self.count(&Severity::Info)
    }

    fn count(&self, severity: &Severity) -> usize {
        self.findings
            .iter()
            .filter(|f| &f.severity == severity)
            .count()
    }
}

/// Run all diagnostic checks and return a report.
#[must_use]
pub fn diagnose(
    config: &ChaosConfig,
    history: &[HistoryEntry],
    statuses: &[ExperimentStatus],
) -> DiagnosticReport {
    let mut findings = Vec::new();

    check_leftover_faults(statuses, &mut findings);
    check_apply_health(history, &mut findings);
    check_config_lint(config, &mut findings);
    check_timeouts_without_defensive_recovery(config, history, &mut findings);

    findings.sort_by_key(|f| match f.severity {
        Severity::Error => 0,
        Severity::Warning => 1,
        Severity::Info => 2,
    });

    DiagnosticReport { findings }
}

/// D001: terminal experiments that left targets injected or unrecovered
fn check_leftover_faults(statuses: &[ExperimentStatus], findings: &mut Vec<Finding>) {
    for status in statuses.iter().filter(|s| s.is_terminal()) {
        let leftover: Vec<String> = status
            .targets
            .iter()
            .filter(|t| {
                matches!(
                    t.state,
                    InjectionState::Injected | InjectionState::RecoverFailed
                )
            })
            .map(|t| t.id.to_string())
            .collect();
        if leftover.is_empty() {
            continue;
        }
        findings.push(Finding {
            severity: Severity::Error,
            code: "D001".to_string(),
            message: format!(
                "Experiment '{}' ended {} with {} target(s) not recovered: {}",
                status.experiment,
                status.phase,
                leftover.len(),
                leftover.join(", ")
            ),
            suggestion: Some(format!(
                "Run `custom-chaos recover --experiment {}` once the targets are reachable",
                status.experiment
            )),
        });
    }
}

/// D002: experiments whose applies fail at least half the time
fn check_apply_health(history: &[HistoryEntry], findings: &mut Vec<Finding>) {
    let mut applies: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for entry in history.iter().filter(|e| e.record.action == ActionKind::Apply) {
        let counts = applies.entry(entry.experiment.as_str()).or_default();
        counts.1 += 1;
        if !entry.record.outcome.is_success() {
            counts.0 += 1;
        }
    }

    for (experiment, (failed, total)) in applies {
        if total >= 2 && failed * 2 >= total {
            findings.push(Finding {
                severity: Severity::Warning,
                code: "D002".to_string(),
                message: format!(
                    "Experiment '{experiment}' apply command failed {failed}/{total} times"
                ),
                suggestion: Some(
                    "Check the apply command and the container names; run it by hand with `kubectl exec` to debug."
                        .to_string(),
                ),
            });
        }
    }
}

/// D003/D004: lint the experiments file
fn check_config_lint(config: &ChaosConfig, findings: &mut Vec<Finding>) {
    for manifest in &config.experiments {
        let Ok(spec) = manifest.to_spec() else {
            continue;
        };

        if spec.duration.is_none() {
            findings.push(Finding {
                severity: Severity::Warning,
                code: "D003".to_string(),
                message: format!(
                    "Experiment '{}' has no duration and keeps its fault until stopped",
                    spec.name
                ),
                suggestion: Some(format!(
                    "Add `duration = \"5m\"` to '{}' so the fault is always recovered",
                    spec.name
                )),
            });
        }

        if matches!(spec.mode, Mode::FixedPercent(0) | Mode::RandomMaxPercent(0)) {
            findings.push(Finding {
                severity: Severity::Info,
                code: "D004".to_string(),
                message: format!(
                    "Experiment '{}' uses {} and will never select a target",
                    spec.name, spec.mode
                ),
                suggestion: Some("Raise the mode value above 0".to_string()),
            });
        }
    }
}

/// D005: apply timeouts while timed-out targets are not recovered
fn check_timeouts_without_defensive_recovery(
    config: &ChaosConfig,
    history: &[HistoryEntry],
    findings: &mut Vec<Finding>,
) {
    if config.engine.defensive_recovery {
        return;
    }

    let mut timeouts: BTreeMap<&str, usize> = BTreeMap::new();
    for entry in history {
        if entry.record.action == ActionKind::Apply
            && matches!(entry.record.outcome, ActionOutcome::Timeout { .. })
        {
            *timeouts.entry(entry.experiment.as_str()).or_default() += 1;
        }
    }

    for (experiment, count) in timeouts {
        findings.push(Finding {
            severity: Severity::Info,
            code: "D005".to_string(),
            message: format!(
                "Experiment '{experiment}' had {count} apply timeout(s); those targets were never recovered"
            ),
            suggestion: Some(
                "Set `defensive_recovery = true` under [engine] or raise `command_timeout`"
                    .to_string(),
            ),
        });
    }
}
