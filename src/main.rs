//! Custom chaos - command-driven fault injection for pods
//!
//! CLI entry point.

// Allow multiple crate versions from dependencies (can't easily control)
#![allow(clippy::multiple_crate_versions)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use custom_chaos::cli::{render_diagnostic_report, render_status_table, ExperimentDisplay};
use custom_chaos::cluster::{ClusterObserver, KubectlObserver, StaticInventory};
use custom_chaos::doctor::diagnose;
use custom_chaos::exec::{KubectlExec, LocalExec, RemoteExec};
use custom_chaos::experiment::config::{ChaosConfig, ExperimentManifest, ExperimentSpec};
use custom_chaos::experiment::engine::Engine;
use custom_chaos::experiment::duration::format_duration;
use custom_chaos::experiment::lifecycle::{LifecycleTracker, Phase};
use custom_chaos::experiment::status::ExperimentStatus;
use custom_chaos::experiment::target::InjectionState;
use custom_chaos::log::{persist_updates, HistoryLog, StatusWriter};

/// Command-driven chaos experiments
///
/// Selects pods, runs an apply command against them to inject a fault,
/// and runs a recover command once the experiment's duration is over.
#[derive(Parser, Debug)]
#[command(name = "custom-chaos", version, about)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run experiments, resuming any left mid-run by a previous invocation
    Run {
        /// Path to the experiments file
        #[arg(long, default_value = "experiments.toml")]
        config: PathBuf,

        /// Experiments to run (all when omitted)
        #[arg(long = "experiment")]
        experiments: Vec<String>,

        /// Read candidate pods from a `kubectl get pods -o json` dump instead of the cluster
        #[arg(long)]
        inventory: Option<PathBuf>,

        #[command(flatten)]
        exec: ExecArgs,

        /// Directory for status files and history
        #[arg(long, default_value = ".chaos")]
        state_dir: PathBuf,
    },

    /// Recover whatever a persisted experiment left injected
    Recover {
        /// Path to the experiments file
        #[arg(long, default_value = "experiments.toml")]
        config: PathBuf,

        /// Experiment to recover
        #[arg(long)]
        experiment: String,

        #[command(flatten)]
        exec: ExecArgs,

        /// Directory for status files and history
        #[arg(long, default_value = ".chaos")]
        state_dir: PathBuf,
    },

    /// Show persisted experiment status
    Status {
        /// Directory for status files and history
        #[arg(long, default_value = ".chaos")]
        state_dir: PathBuf,

        /// Only this experiment
        #[arg(long)]
        experiment: Option<String>,

        /// Print JSON to stdout instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Diagnose leftover faults and risky configuration
    Doctor {
        /// Path to the experiments file
        #[arg(long, default_value = "experiments.toml")]
        config: PathBuf,

        /// Directory for status files and history
        #[arg(long, default_value = ".chaos")]
        state_dir: PathBuf,
    },

    /// Parse and validate the experiments file
    Validate {
        /// Path to the experiments file
        #[arg(long, default_value = "experiments.toml")]
        config: PathBuf,
    },
}

#[derive(Args, Debug)]
struct ExecArgs {
    /// How commands reach the targets
    #[arg(long = "exec", value_enum, default_value_t = ExecKind::Kubectl)]
    kind: ExecKind,

    /// kubectl binary
    #[arg(long, default_value = "kubectl")]
    kubectl: String,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ExecKind {
    /// `kubectl exec` into the pod
    Kubectl,
    /// Run on this machine with the target in environment variables
    Local,
}

impl ExecArgs {
    fn build(&self) -> Arc<dyn RemoteExec> {
        match self.kind {
            ExecKind::Kubectl => Arc::new(KubectlExec::new(&self.kubectl)),
            ExecKind::Local => Arc::new(LocalExec),
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: &Path) -> Result<ChaosConfig> {
    ChaosConfig::from_path(path)
        .with_context(|| format!("Failed to load config from '{}'", path.display()))
}

/// Specs to run: the named ones, or every experiment in the file
fn select_specs(config: &ChaosConfig, names: &[String]) -> Result<Vec<ExperimentSpec>> {
    if names.is_empty() {
        return config
            .experiments
            .iter()
            .map(ExperimentManifest::to_spec)
            .collect();
    }
    names.iter().map(|name| config.spec(name)).collect()
}

/// Print transitions as they happen and a summary at the end
fn follow(
    mut status_rx: watch::Receiver<ExperimentStatus>,
    display: ExperimentDisplay,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut shown = status_rx.borrow().transitions.len();
        while status_rx.changed().await.is_ok() {
            let status = status_rx.borrow_and_update().clone();
            for transition in status.transitions.iter().skip(shown) {
                display.render_transition(transition);
            }
            shown = shown.max(status.transitions.len());
        }
        display.render_summary(&status_rx.borrow());
    })
}

/// Exit code for a set of final statuses
fn exit_code(statuses: &[ExperimentStatus]) -> i32 {
    let failed = statuses.iter().any(|s| s.phase == Phase::Failed);
    let leftover = statuses
        .iter()
        .any(|s| s.count(InjectionState::RecoverFailed) + s.count(InjectionState::Injected) > 0);
    i32::from(failed || leftover)
}

async fn run(
    config_path: &Path,
    names: &[String],
    inventory: Option<&Path>,
    exec: &ExecArgs,
    state_dir: &Path,
) -> Result<i32> {
    let config = load_config(config_path)?;
    let specs = select_specs(&config, names)?;
    if specs.is_empty() {
        bail!("No experiments defined in '{}'", config_path.display());
    }

    let observer: Arc<dyn ClusterObserver> = match inventory {
        Some(path) => Arc::new(StaticInventory::from_path(path)?),
        None => Arc::new(KubectlObserver::new(&exec.kubectl)),
    };
    let writer = Arc::new(StatusWriter::new(state_dir)?);
    let history =
        Arc::new(HistoryLog::new(state_dir).context("Failed to initialize history log")?);

    let mut engine = Engine::new(config.engine.clone(), observer, exec.build());
    let mut tasks = Vec::new();
    let mut followers = Vec::new();
    let mut receivers = Vec::new();

    // Resumed experiments go first so their live targets are claimed before
    // any fresh experiment selects.
    let mut plans = Vec::with_capacity(specs.len());
    for spec in specs {
        let resumable = writer.read(&spec.name)?.filter(|s| !s.is_terminal());
        plans.push((spec, resumable));
    }
    plans.sort_by_key(|(_, resumable)| resumable.is_none());

    for (spec, resumable) in plans {
        let display = ExperimentDisplay::new(&spec.name);
        display.print_header(&spec);

        let (status_rx, already_logged) = match resumable {
            Some(status) => {
                eprintln!(
                    "Resuming '{}' from phase {} (run {})",
                    spec.name, status.phase, status.run
                );
                let mark = (status.run, status.records.len());
                (engine.resume(spec, status)?, Some(mark))
            }
            None => (engine.launch(spec)?, None),
        };

        tasks.push(tokio::spawn(persist_updates(
            status_rx.clone(),
            Arc::clone(&writer),
            Arc::clone(&history),
            already_logged,
        )));
        receivers.push(status_rx.clone());
        followers.push(follow(status_rx, display));
    }

    let all_done = futures::future::join_all(receivers.into_iter().map(|mut rx| async move {
        while rx.changed().await.is_ok() {}
    }));
    tokio::select! {
        _ = all_done => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            warn!("interrupted, stopping experiments and recovering targets");
            eprintln!("Interrupted: recovering targets before exit...");
            engine.stop_all();
        }
    }

    let statuses = engine.wait_all().await?;
    for task in tasks {
        task.await.context("Status persistence task panicked")??;
    }
    for follower in followers {
        follower.await.context("Display task panicked")?;
    }

    info!(experiments = statuses.len(), "all experiments ended");
    Ok(exit_code(&statuses))
}

async fn recover(
    config_path: &Path,
    experiment: &str,
    exec: &ExecArgs,
    state_dir: &Path,
) -> Result<i32> {
    let config = load_config(config_path)?;
    let spec = config.spec(experiment)?;
    let writer = Arc::new(StatusWriter::new(state_dir)?);
    let history = Arc::new(HistoryLog::new(state_dir)?);

    let status = writer
        .read(experiment)?
        .with_context(|| {
            format!(
                "No status found for experiment '{experiment}' in {}",
                state_dir.display()
            )
        })?;

    let display = ExperimentDisplay::new(experiment);
    display.print_header(&spec);
    let mark = (status.run, status.records.len());

    let (_stop_tx, stop_rx) = watch::channel(false);
    let tracker = LifecycleTracker::new(
        spec,
        &config.engine,
        Arc::new(StaticInventory::new(Vec::new())),
        exec.build(),
        stop_rx,
    )
    .resume_from(status);
    let status_rx = tracker.subscribe();
    let persist = tokio::spawn(persist_updates(
        status_rx.clone(),
        writer,
        history,
        Some(mark),
    ));
    let follower = follow(status_rx, display);

    let status = tracker.force_recovery().await;
    persist.await.context("Status persistence task panicked")??;
    follower.await.context("Display task panicked")?;

    Ok(exit_code(&[status]))
}

fn status(state_dir: &Path, experiment: Option<&str>, json: bool) -> Result<()> {
    let writer = StatusWriter::new(state_dir)?;
    let statuses = match experiment {
        Some(name) => writer.read(name)?.into_iter().collect(),
        None => writer.read_all()?,
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&statuses).context("Failed to serialize status")?
        );
    } else {
        render_status_table(&statuses);
    }
    Ok(())
}

fn doctor(config_path: &Path, state_dir: &Path) -> Result<i32> {
    let config = load_config(config_path)?;
    let history = HistoryLog::new(state_dir)?
        .read_all()
        .context("Failed to read history")?;
    let statuses = StatusWriter::new(state_dir)?.read_all()?;

    let report = diagnose(&config, &history, &statuses);
    render_diagnostic_report(&report);
    Ok(i32::from(report.error_count() > 0))
}

fn validate(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    for manifest in &config.experiments {
        let spec = manifest.to_spec()?;
        let duration = spec.duration.map_or_else(
            || "until stopped".to_string(),
            format_duration,
        );
        let schedule = spec
            .scheduler
            .as_ref()
            .map(|rule| format!(", {}", rule.cron))
            .unwrap_or_default();
        println!("{}: {} for {duration}{schedule}", spec.name, spec.mode);
    }
    eprintln!(
        "{} experiment(s) in '{}' are valid",
        config.experiments.len(),
        config_path.display()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match &cli.command {
        Command::Run {
            config,
            experiments,
            inventory,
            exec,
            state_dir,
        } => run(config, experiments, inventory.as_deref(), exec, state_dir).await?,
        Command::Recover {
            config,
            experiment,
            exec,
            state_dir,
        } => recover(config, experiment, exec, state_dir).await?,
        Command::Status {
            state_dir,
            experiment,
            json,
        } => {
            status(state_dir, experiment.as_deref(), *json)?;
            0
        }
        Command::Doctor { config, state_dir } => doctor(config, state_dir)?,
        Command::Validate { config } => {
            validate(config)?;
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use custom_chaos::cluster::TargetId;
    use custom_chaos::experiment::target::Target;

    const CONFIG: &str = r#"
[[experiment]]
name = "a"
mode = "one"
apply_command = ["true"]
recover_command = ["true"]

[[experiment]]
name = "b"
mode = "all"
apply_command = ["true"]
recover_command = ["true"]
"#;

    fn status_with(phase: Phase, state: InjectionState) -> ExperimentStatus {
        let mut status = ExperimentStatus::new("a");
        status.phase = phase;
        let mut target = Target::new(TargetId::new("default", "web-0"), vec![]);
        target.state = state;
        status.targets.push(target);
        status
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::parse_from([
            "custom-chaos",
            "-vv",
            "run",
            "--experiment",
            "a",
            "--experiment",
            "b",
            "--exec",
            "local",
        ]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Run {
                experiments, exec, ..
            } => {
                assert_eq!(experiments, vec!["a", "b"]);
                assert_eq!(exec.kind, ExecKind::Local);
                assert_eq!(exec.kubectl, "kubectl");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_select_specs_all_and_named() {
        let config = ChaosConfig::parse(CONFIG).unwrap();
        let all = select_specs(&config, &[]).unwrap();
        assert_eq!(all.len(), 2);

        let named = select_specs(&config, &["b".to_string()]).unwrap();
        assert_eq!(named[0].name, "b");

        let err = select_specs(&config, &["zzz".to_string()]).unwrap_err();
        assert!(err.to_string().contains("Unknown experiment 'zzz'"));
    }

    #[test]
    fn test_exit_code() {
        assert_eq!(
            exit_code(&[status_with(Phase::Finished, InjectionState::Recovered)]),
            0
        );
        assert_eq!(
            exit_code(&[status_with(Phase::Finished, InjectionState::RecoverFailed)]),
            1
        );
        assert_eq!(
            exit_code(&[status_with(Phase::Failed, InjectionState::ApplyFailed)]),
            1
        );
    }
}
