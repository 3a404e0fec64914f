//! Terminal display for experiments
//!
//! Renders phase transitions, status snapshots and doctor reports.
//! All output goes to stderr so stdout remains clean for piping.

use colored::{ColoredString, Colorize};

use crate::doctor::{DiagnosticReport, Severity};
use crate::experiment::config::ExperimentSpec;
use crate::experiment::duration::format_duration;
use crate::experiment::lifecycle::Phase;
use crate::experiment::record::{ActionOutcome, ActionRecord};
use crate::experiment::status::{ExperimentStatus, PhaseTransition};
use crate::experiment::target::InjectionState;

const STATE_ORDER: [InjectionState; 6] = [
    InjectionState::Selected,
    InjectionState::Injected,
    InjectionState::ApplyFailed,
    InjectionState::ApplyTimedOut,
    InjectionState::Recovered,
    InjectionState::RecoverFailed,
];

/// Display handler for one experiment
pub struct ExperimentDisplay {
    experiment: String,
}

impl ExperimentDisplay {
    /// Create a display handler for the given experiment
    #[must_use]
    pub fn new(experiment: &str) -> Self {
        Self {
            experiment: experiment.to_string(),
        }
    }

    /// Print the experiment header
    pub fn print_header(&self, spec: &ExperimentSpec) {
        eprintln!(
            "\n{} {}",
            "===".bold().cyan(),
            format!("Experiment: {}", self.experiment).bold().cyan()
        );
        let duration = spec
            .duration
            .map_or_else(|| "until stopped".to_string(), format_duration);
        eprintln!(
            "  {} {} | {} {}",
            "Mode:".dimmed(),
            spec.mode,
            "Duration:".dimmed(),
            duration
        );
        if let Some(rule) = &spec.scheduler {
            eprintln!("  {} {}", "Schedule:".dimmed(), rule.cron);
        }
        eprintln!("{}", "─".repeat(50).dimmed());
    }

    /// Render one phase transition
    pub fn render_transition(&self, transition: &PhaseTransition) {
        eprintln!("  {}", self.transition_line(transition));
    }

    fn transition_line(&self, transition: &PhaseTransition) -> String {
        format!(
            "{} {} {} {} {}",
            transition.at.format("%H:%M:%S").to_string().dimmed(),
            self.experiment.bold(),
            phase_label(transition.from),
            "→".dimmed(),
            phase_label(transition.to)
        )
    }

    /// Render the end-of-run summary
    pub fn render_summary(&self, status: &ExperimentStatus) {
        eprintln!("{}", "─".repeat(50).dimmed());
        eprintln!(
            "  {} {} (run {})",
            phase_label(status.phase).bold(),
            self.experiment.bold(),
            status.run
        );
        let summary = summarize_targets(status);
        if !summary.is_empty() {
            eprintln!("  {} {summary}", "Targets:".dimmed());
        }
        if let Some(failure) = &status.failure {
            eprintln!("  {} {}", "✗".red().bold(), failure.red());
        }
        for record in status.records.iter().filter(|r| !r.outcome.is_success()) {
            eprintln!("  {} {}", "⚠".yellow().bold(), describe_record(record));
        }
        eprintln!();
    }
}

/// Colored phase name
#[must_use]
pub fn phase_label(phase: Phase) -> ColoredString {
    let name = phase.as_str();
    match phase {
        Phase::Pending => name.dimmed(),
        Phase::Injecting => name.yellow(),
        Phase::Active => name.magenta().bold(),
        Phase::Recovering => name.blue(),
        Phase::Finished => name.green(),
        Phase::Failed => name.red().bold(),
    }
}

/// Target counts by state, e.g. `2 recovered, 1 apply_failed`
#[must_use]
pub fn summarize_targets(status: &ExperimentStatus) -> String {
    STATE_ORDER
        .iter()
        .filter_map(|state| {
            let n = status.count(*state);
            (n > 0).then(|| format!("{n} {state}"))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// One line describing a record
#[must_use]
pub fn describe_record(record: &ActionRecord) -> String {
    let detail = match &record.outcome {
        ActionOutcome::Success => String::new(),
        ActionOutcome::Failure { exit_code, stderr } => {
            let code = exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string());
            let stderr = stderr.trim();
            if stderr.is_empty() {
                format!(" (exit {code})")
            } else {
                format!(" (exit {code}: {})", truncate(stderr, 80))
            }
        }
        ActionOutcome::Timeout { after_ms } => {
            format!(" (after {after_ms}ms)")
        }
        ActionOutcome::Unreachable { reason } => {
            format!(" ({})", truncate(reason, 80))
        }
    };
    format!(
        "{} {} {}{detail}",
        record.action,
        record.target,
        record.outcome.label()
    )
}

/// Print a status table of experiments to stderr
pub fn render_status_table(statuses: &[ExperimentStatus]) {
    if statuses.is_empty() {
        eprintln!("{}", "No experiment status found.".dimmed());
        return;
    }
    for status in statuses {
        let next = status
            .next_fire_at
            .map(|at| format!(" next fire {}", at.format("%Y-%m-%d %H:%M:%S UTC")))
            .unwrap_or_default();
        eprintln!(
            "  {:<24} {:<12} run {:<4} {}{}",
            status.experiment.bold(),
            phase_label(status.phase),
            status.run,
            summarize_targets(status),
            next.dimmed()
        );
        if let Some(failure) = &status.failure {
            eprintln!("  {:<24} {}", "", failure.red());
        }
    }
}

/// Print a doctor report to stderr
pub fn render_diagnostic_report(report: &DiagnosticReport) {
    if report.is_clean() {
        eprintln!("{} No issues found.", "✓".green().bold());
        return;
    }
    for finding in &report.findings {
        let tag = match finding.severity {
            Severity::Error => "error".red().bold(),
            Severity::Warning => "warning".yellow().bold(),
            Severity::Info => "info".blue(),
        };
        eprintln!("  {tag} [{}] {}", finding.code, finding.message);
        if let Some(suggestion) = &finding.suggestion {
            eprintln!("        {} {suggestion}", "→".dimmed());
        }
    }
    eprintln!(
        "\n  {} error(s), {} warning(s), {} info",
        report.error_count(),
        report.warning_count(),
        report.info_count()
    );
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let short: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{short}...")
    } else {
        text.to_string()
    }
}
