//! Experiment engine
//!
//! Owns one lifecycle task per experiment, keyed by name. Experiments run
//! concurrently and share target claims so they never overlap.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::cluster::ClusterObserver;
use crate::exec::RemoteExec;
use crate::experiment::claims::TargetClaims;
use crate::experiment::config::{EngineConfig, ExperimentSpec};
use crate::experiment::lifecycle::LifecycleTracker;
use crate::experiment::scheduler::{FireTimeProvider, IntervalSchedule};
use crate::experiment::status::ExperimentStatus;

struct RunningExperiment {
    stop_tx: watch::Sender<bool>,
    status_rx: watch::Receiver<ExperimentStatus>,
    handle: JoinHandle<ExperimentStatus>,
}

/// Runs experiments, each in its own task
pub struct Engine {
    config: EngineConfig,
    observer: Arc<dyn ClusterObserver>,
    exec: Arc<dyn RemoteExec>,
    fire_times: Arc<dyn FireTimeProvider>,
    claims: TargetClaims,
    seed: Option<u64>,
    experiments: BTreeMap<String, RunningExperiment>,
}

impl Engine {
    /// Engine using `observer` for candidates and `exec` for commands
    #[must_use]
    pub fn new(
        config: EngineConfig,
        observer: Arc<dyn ClusterObserver>,
        exec: Arc<dyn RemoteExec>,
    ) -> Self {
        Self {
            config,
            observer,
            exec,
            fire_times: Arc::new(IntervalSchedule),
            claims: TargetClaims::new(),
            seed: None,
            experiments: BTreeMap::new(),
        }
    }

    /// Compute scheduled fire times with `provider`
    #[must_use]
    pub fn with_fire_times(mut self, provider: Arc<dyn FireTimeProvider>) -> Self {
        self.fire_times = provider;
        self
    }

    /// Seed target selection for reproducible runs
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Claims shared by every experiment of this engine
    #[must_use]
    pub const fn claims(&self) -> &TargetClaims {
        &self.claims
    }

    /// Start a fresh experiment
    pub fn launch(&mut self, spec: ExperimentSpec) -> Result<watch::Receiver<ExperimentStatus>> {
        self.start(spec, None)
    }

    /// Continue an experiment from a persisted status
    pub fn resume(
        &mut self,
        spec: ExperimentSpec,
        status: ExperimentStatus,
    ) -> Result<watch::Receiver<ExperimentStatus>> {
        if status.experiment != spec.name {
            bail!(
                "Status belongs to experiment '{}', not '{}'",
                status.experiment,
                spec.name
            );
        }
        self.start(spec, Some(status))
    }

    fn start(
        &mut self,
        spec: ExperimentSpec,
        status: Option<ExperimentStatus>,
    ) -> Result<watch::Receiver<ExperimentStatus>> {
        if let Some(running) = self.experiments.get(&spec.name) {
            if !running.handle.is_finished() {
                bail!("Experiment '{}' is already running", spec.name);
            }
        }

        let name = spec.name.clone();
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(self.experiments.len() as u64)),
            None => StdRng::from_entropy(),
        };
        let (stop_tx, stop_rx) = watch::channel(false);

        let mut tracker = LifecycleTracker::new(
            spec,
            &self.config,
            Arc::clone(&self.observer),
            Arc::clone(&self.exec),
            stop_rx,
        )
        .with_rng(rng)
        .with_claims(self.claims.clone())
        .with_fire_times(Arc::clone(&self.fire_times));
        if let Some(status) = status {
            tracker = tracker.resume_from(status);
        }

        let status_rx = tracker.subscribe();
        let handle = tokio::spawn(tracker.run());
        info!(experiment = %name, "experiment launched");

        self.experiments.insert(
            name,
            RunningExperiment {
                stop_tx,
                status_rx: status_rx.clone(),
                handle,
            },
        );
        Ok(status_rx)
    }

    /// Ask one experiment to stop. False if it is not known.
    pub fn stop(&self, name: &str) -> bool {
        let Some(running) = self.experiments.get(name) else {
            return false;
        };
        info!(experiment = %name, "stopping");
        running.stop_tx.send_replace(true);
        true
    }

    /// Ask every experiment to stop
    pub fn stop_all(&self) {
        for (name, running) in &self.experiments {
            info!(experiment = %name, "stopping");
            running.stop_tx.send_replace(true);
        }
    }

    /// Latest status snapshot of one experiment
    #[must_use]
    pub fn status(&self, name: &str) -> Option<ExperimentStatus> {
        self.experiments
            .get(name)
            .map(|running| running.status_rx.borrow().clone())
    }

    /// Subscribe to one experiment's status
    #[must_use]
    pub fn subscribe(&self, name: &str) -> Option<watch::Receiver<ExperimentStatus>> {
        self.experiments
            .get(name)
            .map(|running| running.status_rx.clone())
    }

    /// Names of all experiments started by this engine
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.experiments.keys().map(String::as_str).collect()
    }

    /// Wait for one experiment to end and return its final status
    pub async fn wait(&mut self, name: &str) -> Result<ExperimentStatus> {
        let running = self
            .experiments
            .remove(name)
            .with_context(|| format!("Unknown experiment '{name}'"))?;
        running
            .handle
            .await
            .with_context(|| format!("Experiment task '{name}' panicked"))
    }

    /// Wait for every experiment to end, in name order
    pub async fn wait_all(&mut self) -> Result<Vec<ExperimentStatus>> {
        let experiments = std::mem::take(&mut self.experiments);
        let mut statuses = Vec::with_capacity(experiments.len());
        for (name, running) in experiments {
            let status = running
                .handle
                .await
                .with_context(|| format!("Experiment task '{name}' panicked"))?;
            statuses.push(status);
        }
        Ok(statuses)
    }
}
