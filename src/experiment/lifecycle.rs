//! Experiment lifecycle
//!
//! [`Phase::on`] is the transition table. [`LifecycleTracker`] drives one
//! experiment through it: select, apply, hold, recover, and with a
//! scheduler, re-arm. Each phase handler is safe to replay, so a tracker
//! resumed from a persisted status simply re-enters its phase.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::cluster::ClusterObserver;
use crate::error::LifecycleError;
use crate::exec::RemoteExec;
use crate::experiment::claims::TargetClaims;
use crate::experiment::config::{EngineConfig, ExperimentSpec};
use crate::experiment::executor::{state_after_apply, ActionExecutor};
use crate::experiment::mode::ModeResolver;
use crate::experiment::record::ActionKind;
use crate::experiment::recovery::RecoveryCoordinator;
use crate::experiment::scheduler::{FireTimeProvider, IntervalSchedule};
use crate::experiment::selector::{evaluate, scope_targets};
use crate::experiment::status::ExperimentStatus;
use crate::experiment::target::{InjectionState, Target};

/// Lifecycle phase of an experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Waiting to fire
    Pending,
    /// Selecting targets and running the apply command
    Injecting,
    /// Fault is live
    Active,
    /// Running the recover command
    Recovering,
    /// Run complete
    Finished,
    /// Run could not complete
    Failed,
}

impl Phase {
    /// Whether the phase ends the run
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    /// Lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Injecting => "injecting",
            Self::Active => "active",
            Self::Recovering => "recovering",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }

    /// Phase reached from `self` on `event`
    pub const fn on(self, event: Event) -> Result<Self, LifecycleError> {
        match (self, event) {
            (Self::Pending, Event::Fire) => Ok(Self::Injecting),
            (Self::Pending, Event::StopRequested)
            | (Self::Injecting, Event::NothingSelected)
            | (Self::Recovering, Event::RecoveryComplete) => Ok(Self::Finished),
            (Self::Injecting, Event::BatchComplete) => Ok(Self::Active),
            (Self::Injecting, Event::Abort)
            | (Self::Active, Event::DurationElapsed | Event::StopRequested) => {
                Ok(Self::Recovering)
            }
            (Self::Finished, Event::Rearm) => Ok(Self::Pending),
            (Self::Pending | Self::Injecting | Self::Active | Self::Recovering, Event::Fail) => {
                Ok(Self::Failed)
            }
            (from, event) => Err(LifecycleError::IllegalTransition { from, event }),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that moves an experiment between phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    /// The experiment is due
    Fire,
    /// Someone asked the experiment to stop
    StopRequested,
    /// The apply batch finished with enough successes
    BatchComplete,
    /// The mode resolved to zero targets
    NothingSelected,
    /// The apply batch failed; clean up and fail
    Abort,
    /// The active duration ran out
    DurationElapsed,
    /// The recover batch finished
    RecoveryComplete,
    /// A scheduled experiment waits for its next fire time
    Rearm,
    /// Selection or apply made the run impossible
    Fail,
}

/// Drives one experiment through its phases.
///
/// Built with [`LifecycleTracker::new`], then consumed by
/// [`run`](LifecycleTracker::run) inside its own task. Status snapshots are
/// published on a watch channel after every change.
pub struct LifecycleTracker {
    spec: ExperimentSpec,
    engine: EngineConfig,
    observer: Arc<dyn ClusterObserver>,
    executor: ActionExecutor,
    recovery: RecoveryCoordinator,
    resolver: ModeResolver,
    fire_times: Arc<dyn FireTimeProvider>,
    claims: TargetClaims,
    rng: StdRng,
    status: ExperimentStatus,
    status_tx: watch::Sender<ExperimentStatus>,
    stop_rx: watch::Receiver<bool>,
    resumed: bool,
}

impl LifecycleTracker {
    /// Tracker for a fresh experiment in Pending.
    ///
    /// Setting `stop_rx` to true (or dropping its sender) stops the
    /// experiment after recovery.
    #[must_use]
    pub fn new(
        spec: ExperimentSpec,
        engine: &EngineConfig,
        observer: Arc<dyn ClusterObserver>,
        exec: Arc<dyn RemoteExec>,
        stop_rx: watch::Receiver<bool>,
    ) -> Self {
        let executor = ActionExecutor::new(exec, engine);
        let recovery = RecoveryCoordinator::new(executor.clone(), engine.defensive_recovery);
        let status = ExperimentStatus::new(&spec.name);
        let (status_tx, _) = watch::channel(status.clone());
        Self {
            spec,
            engine: engine.clone(),
            observer,
            executor,
            recovery,
            resolver: ModeResolver::new(engine.fixed_overflow),
            fire_times: Arc::new(IntervalSchedule),
            claims: TargetClaims::new(),
            rng: StdRng::from_entropy(),
            status,
            status_tx,
            stop_rx,
            resumed: false,
        }
    }

    /// Use this RNG for mode resolution
    #[must_use]
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// Share target claims with other experiments
    #[must_use]
    pub fn with_claims(mut self, claims: TargetClaims) -> Self {
        self.claims = claims;
        if self.resumed && !self.status.is_terminal() {
            self.reclaim();
        }
        self
    }

    /// Compute scheduled fire times with `provider`
    #[must_use]
    pub fn with_fire_times(mut self, provider: Arc<dyn FireTimeProvider>) -> Self {
        self.fire_times = provider;
        self
    }

    /// Continue from a persisted status instead of starting fresh.
    ///
    /// Targets that may still carry a fault are claimed here, before the
    /// tracker runs, so no other experiment can select them in between.
    #[must_use]
    pub fn resume_from(mut self, status: ExperimentStatus) -> Self {
        self.status = status;
        self.status_tx.send_replace(self.status.clone());
        self.resumed = true;
        if !self.status.is_terminal() {
            self.reclaim();
        }
        self
    }

    /// Receive status snapshots
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ExperimentStatus> {
        self.status_tx.subscribe()
    }

    /// Current status
    #[must_use]
    pub const fn status(&self) -> &ExperimentStatus {
        &self.status
    }

    /// Run until the experiment is Finished with nothing scheduled, or Failed.
    pub async fn run(mut self) -> ExperimentStatus {
        let name = self.spec.name.clone();

        if self.resumed && !self.status.is_terminal() && self.status.phase != Phase::Pending {
            let stuck = LifecycleError::StuckTransition {
                experiment: name.clone(),
                phase: self.status.phase,
            };
            warn!(experiment = %name, "{stuck}");
        }
        self.publish();

        loop {
            let event = match self.status.phase {
                Phase::Pending => self.pending().await,
                Phase::Injecting => self.inject().await,
                Phase::Active => self.active().await,
                Phase::Recovering => self.recovering().await,
                Phase::Finished => match self.rearm() {
                    Some(event) => event,
                    None => break,
                },
                Phase::Failed => break,
            };
            self.advance(event);
        }

        info!(
            experiment = %name,
            phase = %self.status.phase,
            runs = self.status.run,
            "experiment ended"
        );
        self.status
    }

    /// Recover whatever a persisted experiment left behind and stop it.
    ///
    /// Injecting aborts and Active stops, both into Recovering. Terminal
    /// statuses get one more pass over targets whose recovery failed.
    pub async fn force_recovery(mut self) -> ExperimentStatus {
        self.status.stop_requested = true;
        self.reclaim();
        match self.status.phase {
            Phase::Pending | Phase::Active => self.advance(Event::StopRequested),
            Phase::Injecting => self.advance(Event::Abort),
            Phase::Recovering | Phase::Finished | Phase::Failed => {}
        }

        if self.status.phase == Phase::Recovering {
            let event = self.recovering().await;
            self.advance(event);
        } else {
            self.recover_targets().await;
            self.claims.release_all(&self.spec.name);
            self.publish();
        }
        self.status
    }

    fn publish(&mut self) {
        self.status.updated_at = Utc::now();
        self.status_tx.send_replace(self.status.clone());
    }

    /// Apply `event`. An illegal event fails the experiment.
    fn advance(&mut self, event: Event) {
        let from = self.status.phase;
        match from.on(event) {
            Ok(to) => {
                info!(experiment = %self.spec.name, from = %from, to = %to, event = ?event, "phase transition");
                self.status.transition(to, event);
            }
            Err(err) => {
                error!(experiment = %self.spec.name, error = %err, "lifecycle error");
                self.status.failure.get_or_insert_with(|| err.to_string());
                if !from.is_terminal() {
                    self.status.transition(Phase::Failed, Event::Fail);
                }
            }
        }
        if self.status.is_terminal() {
            self.claims.release_all(&self.spec.name);
        }
        self.publish();
    }

    /// Claim targets this experiment may still have faults on
    fn reclaim(&self) {
        for target in &self.status.targets {
            if target.state != InjectionState::Recovered
                && !self.claims.claim(&self.spec.name, &target.id)
            {
                warn!(experiment = %self.spec.name, target = %target.id, "target held by another experiment");
            }
        }
    }

    fn stop_requested(&mut self) -> bool {
        let stop = *self.stop_rx.borrow() || self.stop_rx.has_changed().is_err();
        if stop && !self.status.stop_requested {
            info!(experiment = %self.spec.name, "stop requested");
            self.status.stop_requested = true;
        }
        self.status.stop_requested
    }

    /// Sleep for `delay` (forever when None) unless a stop arrives first.
    /// True when stopped.
    async fn sleep_unless_stopped(&mut self, delay: Option<Duration>) -> bool {
        if self.stop_requested() {
            return true;
        }
        let stop_rx = &mut self.stop_rx;
        let stopped = async move {
            // A dropped sender also counts as a stop
            let _ = stop_rx.wait_for(|stop| *stop).await;
        };
        let stopped = match delay {
            Some(delay) => tokio::select! {
                () = stopped => true,
                () = tokio::time::sleep(delay) => false,
            },
            None => {
                stopped.await;
                true
            }
        };
        if stopped {
            self.stop_requested();
        }
        stopped
    }

    async fn pending(&mut self) -> Event {
        if self.status.run > 0 {
            let delay = self
                .status
                .next_fire_at
                .map(|at| (at - Utc::now()).to_std().unwrap_or(Duration::ZERO));
            if self.sleep_unless_stopped(delay).await {
                return Event::StopRequested;
            }
        } else if self.stop_requested() {
            return Event::StopRequested;
        }

        let run = self.status.run + 1;
        self.status.begin_run(run);
        info!(experiment = %self.spec.name, run, mode = %self.spec.mode, "firing");
        Event::Fire
    }

    async fn inject(&mut self) -> Event {
        if self.status.targets.is_empty() {
            match self.select().await {
                Ok(targets) if targets.is_empty() => {
                    info!(experiment = %self.spec.name, "no targets selected, nothing to inject");
                    return Event::NothingSelected;
                }
                Ok(targets) => {
                    self.status.targets = targets;
                    self.publish();
                }
                Err(reason) => {
                    error!(experiment = %self.spec.name, %reason, "target selection failed");
                    self.status.failure = Some(reason);
                    return Event::Fail;
                }
            }
        }

        let to_apply: Vec<Target> = self
            .status
            .targets
            .iter()
            .filter(|t| t.state == InjectionState::Selected)
            .cloned()
            .collect();
        let records = self
            .executor
            .run_batch(ActionKind::Apply, &to_apply, &self.spec.apply, self.status.run)
            .await;
        for record in &records {
            if let Some(target) = self.status.targets.iter_mut().find(|t| t.id == record.target) {
                target.state = state_after_apply(&record.outcome);
            }
        }
        self.status.extend_records(records);
        self.publish();

        self.judge_apply()
    }

    /// Event after the apply batch
    fn judge_apply(&mut self) -> Event {
        let injected = self.status.count(InjectionState::Injected);
        let failed_percent = self.status.apply_failure_percent();

        if injected == 0 {
            self.status.failure = Some(format!(
                "apply failed on all {} target(s)",
                self.status.targets.len()
            ));
            return if self.recovery.pending(&self.status.targets).is_empty() {
                Event::Fail
            } else {
                Event::Abort
            };
        }

        if let Some(threshold) = self.engine.apply_failure_threshold {
            if failed_percent > usize::from(threshold) {
                self.status.failure = Some(format!(
                    "{failed_percent}% of applies failed, above the {threshold}% threshold"
                ));
                return Event::Abort;
            }
        }

        info!(
            experiment = %self.spec.name,
            injected,
            targets = self.status.targets.len(),
            "fault injected"
        );
        self.status.active_since = Some(Utc::now());
        Event::BatchComplete
    }

    /// Filter, exclude foreign claims, resolve the mode and claim the result
    async fn select(&mut self) -> Result<Vec<Target>, String> {
        let candidates = self
            .observer
            .list_candidates(&self.spec.selector)
            .await
            .map_err(|e| format!("listing candidates failed: {e:#}"))?;
        let matched = evaluate(&candidates, &self.spec.selector);
        let scoped = scope_targets(&matched, &self.spec.container_names);
        let free = self.claims.exclude_foreign(&self.spec.name, scoped);

        let chosen = self
            .resolver
            .resolve(&free, self.spec.mode, &mut self.rng)
            .map_err(|e| e.to_string())?;
        let won = self.claims.claim_all(&self.spec.name, chosen);

        info!(
            experiment = %self.spec.name,
            candidates = candidates.len(),
            matched = matched.len(),
            selected = won.len(),
            "targets selected"
        );
        Ok(won)
    }

    async fn active(&mut self) -> Event {
        let elapsed = self
            .status
            .active_since
            .and_then(|since| (Utc::now() - since).to_std().ok())
            .unwrap_or_default();
        let remaining = self.spec.duration.map(|d| d.saturating_sub(elapsed));

        if self.sleep_unless_stopped(remaining).await {
            Event::StopRequested
        } else {
            Event::DurationElapsed
        }
    }

    async fn recovering(&mut self) -> Event {
        self.recover_targets().await;

        let left = self.status.count(InjectionState::RecoverFailed);
        if left > 0 {
            warn!(experiment = %self.spec.name, targets = left, "targets left unrecovered");
        }

        if self.status.failure.is_some() {
            Event::Fail
        } else {
            Event::RecoveryComplete
        }
    }

    async fn recover_targets(&mut self) {
        let records = self
            .recovery
            .recover(&mut self.status.targets, &self.spec.recover, self.status.run)
            .await;
        self.status.extend_records(records);
        self.publish();
    }

    /// Next event after Finished, None when the experiment is done
    fn rearm(&mut self) -> Option<Event> {
        if self.stop_requested() {
            return None;
        }
        let rule = self.spec.scheduler.as_ref()?;
        match self.fire_times.next_fire_time(rule, Utc::now()) {
            Some(at) => {
                info!(experiment = %self.spec.name, next_fire_at = %at, "re-armed");
                self.status.next_fire_at = Some(at);
                Some(Event::Rearm)
            }
            None => {
                info!(experiment = %self.spec.name, rule = %rule.cron, "schedule has no further fire times");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::StaticInventory;
    use crate::experiment::config::CommandSpec;
    use crate::experiment::mode::Mode;
    use crate::experiment::scheduler::SchedulerRule;
    use crate::experiment::selector::SelectorSpec;
    use crate::testutil::{command, make_pod, Behavior, MockExec};

    fn spec(mode: Mode, duration: Option<Duration>) -> ExperimentSpec {
        ExperimentSpec {
            name: "burn".to_string(),
            mode,
            selector: SelectorSpec::default(),
            container_names: vec![],
            duration,
            scheduler: None,
            apply: command(&["apply"]),
            recover: CommandSpec::new(vec!["recover".to_string()], vec![]),
        }
    }

    fn inventory(n: usize) -> Arc<StaticInventory> {
        Arc::new(StaticInventory::new(
            (0..n)
                .map(|i| make_pod("default", &format!("web-{i}"), &[("app", "web")]))
                .collect(),
        ))
    }

    fn tracker(
        spec: ExperimentSpec,
        engine: &EngineConfig,
        pods: usize,
        mock: Arc<MockExec>,
    ) -> (LifecycleTracker, watch::Sender<bool>) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let tracker = LifecycleTracker::new(spec, engine, inventory(pods), mock, stop_rx)
            .with_rng(StdRng::seed_from_u64(1));
        (tracker, stop_tx)
    }

    fn phases(status: &ExperimentStatus) -> Vec<Phase> {
        let mut path = vec![Phase::Pending];
        path.extend(status.transitions.iter().map(|t| t.to));
        path
    }

    #[test]
    fn test_transition_table() {
        use Event::*;
        use Phase::*;
        assert_eq!(Pending.on(Fire), Ok(Injecting));
        assert_eq!(Pending.on(StopRequested), Ok(Finished));
        assert_eq!(Injecting.on(BatchComplete), Ok(Active));
        assert_eq!(Injecting.on(NothingSelected), Ok(Finished));
        assert_eq!(Injecting.on(Abort), Ok(Recovering));
        assert_eq!(Active.on(DurationElapsed), Ok(Recovering));
        assert_eq!(Active.on(StopRequested), Ok(Recovering));
        assert_eq!(Recovering.on(RecoveryComplete), Ok(Finished));
        assert_eq!(Finished.on(Rearm), Ok(Pending));
        for phase in [Pending, Injecting, Active, Recovering] {
            assert_eq!(phase.on(Fail), Ok(Failed));
        }
    }

    #[test]
    fn test_illegal_transitions() {
        assert_eq!(
            Phase::Active.on(Event::Fire),
            Err(LifecycleError::IllegalTransition {
                from: Phase::Active,
                event: Event::Fire
            })
        );
        assert!(Phase::Failed.on(Event::Rearm).is_err());
        assert!(Phase::Finished.on(Event::Fail).is_err());
        assert!(Phase::Recovering.on(Event::StopRequested).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_run_with_duration() {
        let mock = Arc::new(MockExec::new());
        let (tracker, _stop) = tracker(
            spec(Mode::All, Some(Duration::from_secs(30))),
            &EngineConfig::default(),
            3,
            mock.clone(),
        );

        let status = tracker.run().await;

        assert_eq!(
            phases(&status),
            vec![
                Phase::Pending,
                Phase::Injecting,
                Phase::Active,
                Phase::Recovering,
                Phase::Finished
            ]
        );
        assert_eq!(status.count(InjectionState::Recovered), 3);
        assert_eq!(mock.calls_to("apply").len(), 3);
        assert_eq!(mock.calls_to("recover").len(), 3);
        assert!(status.failure.is_none());
    }

    #[tokio::test]
    async fn test_empty_candidates_with_one_fails() {
        let mock = Arc::new(MockExec::new());
        let (tracker, _stop) = tracker(spec(Mode::One, None), &EngineConfig::default(), 0, mock.clone());

        let status = tracker.run().await;

        assert_eq!(status.phase, Phase::Failed);
        assert!(status.failure.unwrap().contains("no candidate"));
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_zero_selected_is_inert() {
        let mock = Arc::new(MockExec::new());
        let (tracker, _stop) = tracker(
            spec(Mode::FixedPercent(0), None),
            &EngineConfig::default(),
            5,
            mock.clone(),
        );

        let status = tracker.run().await;

        assert_eq!(phases(&status), vec![Phase::Pending, Phase::Injecting, Phase::Finished]);
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_all_applies_failed() {
        let mock = Arc::new(MockExec::new().on("web-0", Behavior::Fail(1)));
        let (tracker, _stop) = tracker(spec(Mode::All, None), &EngineConfig::default(), 1, mock.clone());

        let status = tracker.run().await;

        assert_eq!(status.phase, Phase::Failed);
        assert_eq!(status.count(InjectionState::ApplyFailed), 1);
        assert!(mock.calls_to("recover").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_apply_failure_recovers_only_succeeded() {
        let mock = Arc::new(MockExec::new().on_command("web-1", "apply", Behavior::Fail(1)));
        let (tracker, _stop) = tracker(
            spec(Mode::All, Some(Duration::from_secs(5))),
            &EngineConfig::default(),
            3,
            mock.clone(),
        );

        let status = tracker.run().await;

        assert_eq!(status.phase, Phase::Finished);
        let recovered: Vec<_> = mock
            .calls_to("recover")
            .into_iter()
            .map(|c| c.target.name)
            .collect();
        assert_eq!(recovered, vec!["web-0", "web-2"]);
        assert_eq!(status.count(InjectionState::ApplyFailed), 1);
    }

    #[tokio::test]
    async fn test_threshold_aborts_and_recovers() {
        let mock = Arc::new(
            MockExec::new()
                .on_command("web-1", "apply", Behavior::Fail(1))
                .on_command("web-2", "apply", Behavior::Fail(1)),
        );
        let engine = EngineConfig {
            apply_failure_threshold: Some(50),
            ..EngineConfig::default()
        };
        let (tracker, _stop) = tracker(spec(Mode::All, None), &engine, 3, mock.clone());

        let status = tracker.run().await;

        assert_eq!(
            phases(&status),
            vec![Phase::Pending, Phase::Injecting, Phase::Recovering, Phase::Failed]
        );
        assert_eq!(mock.calls_to("recover").len(), 1);
        assert!(status.failure.unwrap().contains("threshold"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_defensive_recovery_of_timed_out_apply() {
        let mock = Arc::new(
            MockExec::new().on_command("web-0", "apply", Behavior::Hang(Duration::from_secs(600))),
        );
        let engine = EngineConfig {
            defensive_recovery: true,
            ..EngineConfig::default()
        };
        let (tracker, _stop) = tracker(spec(Mode::All, None), &engine, 1, mock.clone());

        let status = tracker.run().await;

        assert_eq!(
            phases(&status),
            vec![Phase::Pending, Phase::Injecting, Phase::Recovering, Phase::Failed]
        );
        assert_eq!(status.targets[0].state, InjectionState::Recovered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_active() {
        let mock = Arc::new(MockExec::new());
        let (tracker, stop_tx) = tracker(spec(Mode::All, None), &EngineConfig::default(), 2, mock.clone());
        let mut status_rx = tracker.subscribe();
        let handle = tokio::spawn(tracker.run());

        status_rx.wait_for(|s| s.phase == Phase::Active).await.unwrap();
        stop_tx.send(true).unwrap();
        let status = handle.await.unwrap();

        assert_eq!(status.phase, Phase::Finished);
        assert!(status.stop_requested);
        assert_eq!(status.count(InjectionState::Recovered), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_stop_sender_stops() {
        let mock = Arc::new(MockExec::new());
        let (tracker, stop_tx) = tracker(spec(Mode::One, None), &EngineConfig::default(), 2, mock);
        drop(stop_tx);

        let status = tracker.run().await;
        assert_eq!(status.phase, Phase::Finished);
        assert!(status.stop_requested);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_runs_reselect() {
        let mock = Arc::new(MockExec::new());
        let mut spec = spec(Mode::One, Some(Duration::from_secs(10)));
        spec.scheduler = Some(SchedulerRule::new("@every 1m"));
        let (tracker, stop_tx) = tracker(spec, &EngineConfig::default(), 4, mock.clone());
        let mut status_rx = tracker.subscribe();
        let handle = tokio::spawn(tracker.run());

        status_rx
            .wait_for(|s| s.run == 3 && s.phase == Phase::Active)
            .await
            .unwrap();
        stop_tx.send(true).unwrap();
        let status = handle.await.unwrap();

        assert_eq!(status.run, 3);
        assert_eq!(status.phase, Phase::Finished);
        assert_eq!(mock.calls_to("apply").len(), 3);
        assert_eq!(mock.calls_to("recover").len(), 3);
        let rearms = status
            .transitions
            .iter()
            .filter(|t| t.event == Event::Rearm)
            .count();
        assert_eq!(rearms, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_claimed_targets_excluded() {
        let mock = Arc::new(MockExec::new());
        let claims = TargetClaims::new();
        claims.claim("other", &crate::cluster::TargetId::new("default", "web-0"));
        let (tracker, _stop) = tracker(
            spec(Mode::All, Some(Duration::from_secs(1))),
            &EngineConfig::default(),
            2,
            mock.clone(),
        );

        let status = tracker.with_claims(claims.clone()).run().await;

        assert_eq!(status.phase, Phase::Finished);
        let applied: Vec<_> = mock.calls_to("apply").into_iter().map(|c| c.target.name).collect();
        assert_eq!(applied, vec!["web-1"]);
        assert_eq!(claims.holder(&crate::cluster::TargetId::new("default", "web-1")), None);
        assert_eq!(
            claims.holder(&crate::cluster::TargetId::new("default", "web-0")).as_deref(),
            Some("other")
        );
    }

    #[tokio::test]
    async fn test_resume_recovering_replays_recovery() {
        let mock = Arc::new(MockExec::new());
        let (tracker, _stop) = tracker(spec(Mode::All, None), &EngineConfig::default(), 2, mock.clone());

        let mut persisted = ExperimentStatus::new("burn");
        persisted.run = 1;
        persisted.phase = Phase::Recovering;
        let mut done = Target::new(crate::cluster::TargetId::new("default", "web-0"), vec![]);
        done.state = InjectionState::Recovered;
        let mut live = Target::new(crate::cluster::TargetId::new("default", "web-1"), vec![]);
        live.state = InjectionState::RecoverFailed;
        persisted.targets = vec![done, live];

        let status = tracker.resume_from(persisted).run().await;

        assert_eq!(status.phase, Phase::Finished);
        let recovered: Vec<_> = mock.calls().into_iter().map(|c| c.target.name).collect();
        assert_eq!(recovered, vec!["web-1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_injecting_applies_only_selected() {
        let mock = Arc::new(MockExec::new());
        let (tracker, _stop) = tracker(
            spec(Mode::All, Some(Duration::from_secs(1))),
            &EngineConfig::default(),
            3,
            mock.clone(),
        );

        let mut persisted = ExperimentStatus::new("burn");
        persisted.run = 1;
        persisted.phase = Phase::Injecting;
        let mut injected = Target::new(crate::cluster::TargetId::new("default", "web-0"), vec![]);
        injected.state = InjectionState::Injected;
        persisted.targets = vec![
            injected,
            Target::new(crate::cluster::TargetId::new("default", "web-1"), vec![]),
            Target::new(crate::cluster::TargetId::new("default", "web-2"), vec![]),
        ];

        let status = tracker.resume_from(persisted).run().await;

        assert_eq!(status.phase, Phase::Finished);
        let mut applied: Vec<_> = mock.calls_to("apply").into_iter().map(|c| c.target.name).collect();
        applied.sort();
        assert_eq!(applied, vec!["web-1", "web-2"]);
        assert_eq!(mock.calls_to("recover").len(), 3);
        assert_eq!(status.count(InjectionState::Recovered), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_active_waits_out_remaining_duration() {
        let mock = Arc::new(MockExec::new());
        let (tracker, _stop) = tracker(
            spec(Mode::All, Some(Duration::from_secs(30))),
            &EngineConfig::default(),
            1,
            mock.clone(),
        );

        let mut persisted = ExperimentStatus::new("burn");
        persisted.run = 1;
        persisted.phase = Phase::Active;
        persisted.active_since = Some(Utc::now() - chrono::Duration::seconds(20));
        let mut target = Target::new(crate::cluster::TargetId::new("default", "web-0"), vec![]);
        target.state = InjectionState::Injected;
        persisted.targets = vec![target];

        let tracker = tracker.resume_from(persisted);
        let mut status_rx = tracker.subscribe();
        let started = tokio::time::Instant::now();
        let handle = tokio::spawn(tracker.run());

        status_rx
            .wait_for(|s| s.phase == Phase::Recovering || s.phase.is_terminal())
            .await
            .unwrap();
        let waited = started.elapsed();
        let status = handle.await.unwrap();

        assert!(waited > Duration::from_secs(9), "recovered after {waited:?}");
        assert!(waited <= Duration::from_millis(10_050), "recovered after {waited:?}");
        assert_eq!(status.phase, Phase::Finished);
        assert!(mock.calls_to("apply").is_empty());
        assert_eq!(mock.calls_to("recover").len(), 1);
    }

    #[test]
    fn test_resume_claims_live_targets_before_running() {
        let claims = TargetClaims::new();
        let mut persisted = ExperimentStatus::new("burn");
        persisted.run = 1;
        persisted.phase = Phase::Active;
        let mut live = Target::new(crate::cluster::TargetId::new("default", "web-0"), vec![]);
        live.state = InjectionState::Injected;
        let mut done = Target::new(crate::cluster::TargetId::new("default", "web-1"), vec![]);
        done.state = InjectionState::Recovered;
        persisted.targets = vec![live, done];

        let (tracker, _stop) = tracker(spec(Mode::All, None), &EngineConfig::default(), 2, Arc::new(MockExec::new()));
        let _tracker = tracker.with_claims(claims.clone()).resume_from(persisted);

        assert_eq!(
            claims.holder(&crate::cluster::TargetId::new("default", "web-0")).as_deref(),
            Some("burn")
        );
        assert_eq!(claims.holder(&crate::cluster::TargetId::new("default", "web-1")), None);
    }

    #[tokio::test]
    async fn test_force_recovery_from_active() {
        let mock = Arc::new(MockExec::new());
        let (tracker, _stop) = tracker(spec(Mode::All, None), &EngineConfig::default(), 1, mock.clone());

        let mut persisted = ExperimentStatus::new("burn");
        persisted.run = 1;
        persisted.phase = Phase::Active;
        let mut target = Target::new(crate::cluster::TargetId::new("default", "web-0"), vec![]);
        target.state = InjectionState::Injected;
        persisted.targets = vec![target];

        let status = tracker.resume_from(persisted).force_recovery().await;

        assert_eq!(status.phase, Phase::Finished);
        assert_eq!(status.targets[0].state, InjectionState::Recovered);
        assert_eq!(mock.calls_to("recover").len(), 1);
    }
}
