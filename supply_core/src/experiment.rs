//! The experiment engine: one run of a profile (or a power target) against a
//! shared power supply.
//!
//! `start()` spawns two workers. The scheduling loop is the only thread that
//! commands the supply; the refresh loop samples telemetry on its own cadence
//! and is the only writer of data rows. Control state lives behind one mutex
//! and a condvar so kill, pause and mode changes wake any waiting loop at
//! once. Every loop iteration re-checks the registry token, so an experiment
//! displaced by a newer one winds down on its own.
//!
//! Instrument calls are never made under the control mutex. Commands are
//! serialized by a separate `issue` mutex that `stop()` also passes through,
//! so once `stop()` returns no command is in flight and none can follow.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use supply_traits::clock::Clock;
use supply_traits::{PowerSupply, Registry, Stoppable, Token};

use crate::builder::{ExperimentBuilder, Missing};
use crate::config::ExperimentConfig;
use crate::error::{ExperimentError, ProfileError, Result};
use crate::hw_error::map_instrument_error;
use crate::mailbox;
use crate::profile::Profile;
use crate::runner::{self, Runner};
use crate::sink::ExperimentSink;
use crate::status::{ExperimentState, RunMode, RunOutcome, RunReport};
use crate::storage::StorageHandler;
use crate::timer::Timer;

/// Longest a loop sleeps before re-checking kill and supersession.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// How long `start()` waits for a displaced experiment's loops to exit.
pub const SUPERSEDE_WAIT: Duration = Duration::from_secs(2);

pub type OnFinish = Box<dyn FnOnce(RunOutcome) + Send>;

pub(crate) struct Control {
    pub(crate) active: bool,
    pub(crate) paused: bool,
    pub(crate) mode: RunMode,
    /// Run-relative; paused by `pause()` and by manual mode.
    pub(crate) run_timer: Timer,
    /// Wall time since start, never paused.
    pub(crate) abs_timer: Timer,
    /// Voltage to command on the next manual tick, set when entering manual.
    pub(crate) manual_seed: Option<f64>,
    pub(crate) state: ExperimentState,
    /// First recorded reason for the run ending.
    pub(crate) ending: Option<RunOutcome>,
}

pub(crate) enum Wake<'a> {
    /// Scheduled time reached in automatic mode; the guard is still held.
    Reached(MutexGuard<'a, Control>),
    Manual,
    Stop,
}

pub(crate) struct Shared {
    control: Mutex<Control>,
    wake: Condvar,
    issue: Mutex<()>,
    loops_done: Mutex<bool>,
    done: Condvar,
    registry: Arc<Registry>,
    token: OnceLock<Token>,
    pub(crate) supply: Arc<dyn PowerSupply>,
    pub(crate) sink: Arc<dyn ExperimentSink>,
    pub(crate) clock: Arc<dyn Clock + Send + Sync>,
}

impl Shared {
    pub(crate) fn new(
        supply: Arc<dyn PowerSupply>,
        registry: Arc<Registry>,
        sink: Arc<dyn ExperimentSink>,
        clock: Arc<dyn Clock + Send + Sync>,
        mode: RunMode,
    ) -> Self {
        Self {
            control: Mutex::new(Control {
                active: false,
                paused: false,
                mode,
                run_timer: Timer::new(clock.clone()),
                abs_timer: Timer::new(clock.clone()),
                manual_seed: None,
                state: ExperimentState::Idle,
                ending: None,
            }),
            wake: Condvar::new(),
            issue: Mutex::new(()),
            loops_done: Mutex::new(false),
            done: Condvar::new(),
            registry,
            token: OnceLock::new(),
            supply,
            sink,
            clock,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wait_on<'a>(
        &self,
        guard: MutexGuard<'a, Control>,
        timeout: Duration,
    ) -> MutexGuard<'a, Control> {
        match self.wake.wait_timeout(guard, timeout) {
            Ok((g, _)) => g,
            Err(e) => e.into_inner().0,
        }
    }

    pub(crate) fn notify(&self) {
        self.wake.notify_all();
    }

    pub(crate) fn is_current(&self) -> bool {
        self.token
            .get()
            .is_some_and(|t| self.registry.experiment.is_current(*t))
    }

    /// Still allowed to drive hardware and record data.
    pub(crate) fn is_live(&self, c: &Control) -> bool {
        c.active && self.is_current()
    }

    /// Flip `active` off, recording `why` unless an earlier reason exists,
    /// then wait out any command already being issued.
    pub(crate) fn stop(&self, why: RunOutcome) {
        let mut c = self.lock();
        self.stop_locked(&mut c, why);
        drop(c);
        self.notify();
        drop(self.issue.lock().unwrap_or_else(|e| e.into_inner()));
    }

    pub(crate) fn stop_locked(&self, c: &mut Control, why: RunOutcome) {
        if c.active {
            c.active = false;
            c.ending.get_or_insert(why);
        }
    }

    /// Stop quietly if another experiment has claimed the slot. Returns whether it had.
    pub(crate) fn check_superseded(&self, c: &mut Control) -> bool {
        if c.active && !self.is_current() {
            tracing::info!("experiment superseded, stopping");
            self.stop_locked(c, RunOutcome::Superseded);
            return true;
        }
        false
    }

    /// Block until `at` of run time has elapsed in automatic mode, the mode
    /// flips to manual, or the run stops. Paused runs never reach `at`.
    pub(crate) fn wait_for_point(&self, at: Duration) -> Wake<'_> {
        let mut c = self.lock();
        loop {
            if self.check_superseded(&mut c) || !c.active {
                return Wake::Stop;
            }
            if c.mode == RunMode::Manual {
                return Wake::Manual;
            }
            let elapsed = c.run_timer.elapsed();
            if !c.paused && elapsed >= at {
                return Wake::Reached(c);
            }
            let slice = at.saturating_sub(elapsed).clamp(Duration::from_millis(1), POLL_INTERVAL);
            c = self.wait_on(c, slice);
        }
    }

    /// Sleep until `deadline` unless the run stops first. Returns the guard
    /// while still live.
    pub(crate) fn sleep_until(&self, deadline: Instant) -> Option<MutexGuard<'_, Control>> {
        let mut c = self.lock();
        loop {
            if self.check_superseded(&mut c) || !c.active {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return Some(c);
            }
            c = self.wait_on(c, (deadline - now).min(POLL_INTERVAL));
        }
    }

    /// Command the supply if the run is still live. Returns false, without
    /// touching the supply, once the run has stopped.
    pub(crate) fn command(&self, volts: f64) -> bool {
        let _issue = self.issue.lock().unwrap_or_else(|e| e.into_inner());
        let live = self.is_live(&self.lock());
        if !live {
            return false;
        }
        match self.supply.set_voltage(volts) {
            Ok(()) => tracing::debug!(volts, "setpoint committed"),
            Err(e) => {
                let err = map_instrument_error(e.as_ref());
                tracing::warn!(error = %err, volts, "setpoint not applied, continuing");
            }
        }
        true
    }

    pub(crate) fn signal_loops_done(&self) {
        let mut done = self.loops_done.lock().unwrap_or_else(|e| e.into_inner());
        *done = true;
        drop(done);
        self.done.notify_all();
    }

    pub(crate) fn release_slot(&self) {
        if let Some(t) = self.token.get()
            && self.registry.experiment.release(*t)
        {
            tracing::debug!("experiment slot released");
        }
    }
}

impl Stoppable for Shared {
    fn request_stop(&self) {
        self.stop(RunOutcome::Superseded);
    }

    fn wait_stopped(&self, timeout: Duration) -> bool {
        let done = self.loops_done.lock().unwrap_or_else(|e| e.into_inner());
        match self.done.wait_timeout_while(done, timeout, |d| !*d) {
            Ok((d, _)) => *d,
            Err(e) => *e.into_inner().0,
        }
    }
}

/// One run of the engine. Construct with [`Experiment::builder`].
pub struct Experiment {
    pub(crate) shared: Arc<Shared>,
    pub(crate) config: ExperimentConfig,
    pub(crate) on_finish: Option<OnFinish>,
    pub(crate) storage_handler: Option<StorageHandler>,
    pub(crate) worker: Option<JoinHandle<RunReport>>,
    pub(crate) report: Option<RunReport>,
}

impl std::fmt::Debug for Experiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Experiment")
            .field("profile", &self.config.profile_path)
            .field("state", &self.state())
            .field("mode", &self.run_mode())
            .finish_non_exhaustive()
    }
}

impl Experiment {
    pub fn builder() -> ExperimentBuilder<Missing, Missing, Missing> {
        ExperimentBuilder::default()
    }

    /// Load and validate the profile, take over the registry slot, and spawn
    /// the scheduling and refresh loops.
    ///
    /// Configuration problems are returned before the supply is touched.
    pub fn start(&mut self) -> Result<()> {
        if self.state() != ExperimentState::Idle {
            return Err(ExperimentError::State("experiment already started".into()).into());
        }
        let run_time = self.config.run_time.parse_f64().filter(|t| *t > 0.0);
        let Some(run_time) = run_time else {
            return Err(ExperimentError::from(ProfileError::RunTime(self.config.run_time.get())).into());
        };
        let profile = Profile::load(
            &self.config.profile_path,
            self.config.profile_kind,
            self.config.run_time.clone(),
        )
        .map_err(ExperimentError::from)?;

        let holder: Arc<dyn Stoppable> = self.shared.clone();
        let (token, previous) = self.shared.registry.experiment.claim(holder);
        let _ = self.shared.token.set(token);
        if let Some(prev) = previous {
            prev.request_stop();
            if !prev.wait_stopped(SUPERSEDE_WAIT) {
                tracing::warn!("previous experiment did not stop in time");
            }
        }

        let seed = self.manual_seed();
        let mode = {
            let mut c = self.shared.lock();
            c.run_timer.reset();
            c.abs_timer.reset();
            c.active = true;
            c.paused = false;
            c.ending = None;
            c.state = ExperimentState::Running;
            if c.mode == RunMode::Manual {
                c.run_timer.pause();
                c.manual_seed = Some(seed);
            }
            c.mode
        };
        self.shared.sink.plot_reset();
        self.shared.sink.progress(0.0);
        self.shared.sink.state(ExperimentState::Running);
        tracing::info!(
            profile = %self.config.profile_path.display(),
            points = profile.len(),
            kind = %profile.kind(),
            run_time_s = run_time,
            ?mode,
            "experiment started"
        );

        let (publisher, snapshots) = mailbox::slot();
        let refresh = {
            let shared = self.shared.clone();
            let period = self.config.refresh;
            std::thread::Builder::new()
                .name("experiment-refresh".into())
                .spawn(move || crate::refresh::run(&shared, snapshots, period))
        };
        let refresh = match refresh {
            Ok(h) => h,
            Err(e) => return Err(self.abort_start(e)),
        };

        let runner = Runner {
            shared: self.shared.clone(),
            profile,
            run_time,
            config: self.config.clone(),
            publisher,
            refresh,
            on_finish: self.on_finish.take(),
            storage_handler: self.storage_handler.take(),
        };
        let worker = std::thread::Builder::new()
            .name("experiment-schedule".into())
            .spawn(move || runner::run(runner));
        match worker {
            Ok(h) => {
                self.worker = Some(h);
                Ok(())
            }
            Err(e) => Err(self.abort_start(e)),
        }
    }

    fn abort_start(&self, e: std::io::Error) -> eyre::Report {
        self.shared.stop(RunOutcome::Killed);
        self.shared.lock().state = ExperimentState::Killed;
        self.shared.signal_loops_done();
        self.shared.release_slot();
        ExperimentError::State(format!("cannot spawn worker: {e}")).into()
    }

    /// `target_power / current`, or 0 when no current flows.
    fn manual_seed(&self) -> f64 {
        let target = self.config.target_power.parse_f64().unwrap_or(0.0);
        let current = self.shared.supply.current();
        if current == 0.0 || !current.is_finite() {
            0.0
        } else {
            target / current
        }
    }

    pub fn pause(&self) {
        let mut c = self.shared.lock();
        if !c.active || c.paused {
            return;
        }
        c.paused = true;
        c.run_timer.pause();
        c.state = ExperimentState::Paused;
        drop(c);
        self.shared.notify();
        self.shared.sink.state(ExperimentState::Paused);
        tracing::info!("experiment paused");
    }

    pub fn unpause(&self) {
        let mut c = self.shared.lock();
        if !c.active || !c.paused {
            return;
        }
        c.paused = false;
        if c.mode == RunMode::Automatic {
            c.run_timer.unpause();
        }
        c.state = ExperimentState::Running;
        drop(c);
        self.shared.notify();
        self.shared.sink.state(ExperimentState::Running);
        tracing::info!("experiment resumed");
    }

    /// Switch between profile-driven and power-target control.
    ///
    /// Entering manual freezes the run timer and seeds the next command with
    /// `target_power / current`. Leaving it resumes the timer unless paused.
    pub fn set_run_mode(&self, mode: RunMode) {
        let seed = (mode == RunMode::Manual).then(|| self.manual_seed());
        let mut c = self.shared.lock();
        if c.mode == mode {
            return;
        }
        c.mode = mode;
        match mode {
            RunMode::Manual => {
                c.run_timer.pause();
                c.manual_seed = seed;
            }
            RunMode::Automatic => {
                c.manual_seed = None;
                if !c.paused {
                    c.run_timer.unpause();
                }
            }
        }
        drop(c);
        self.shared.notify();
        tracing::info!(?mode, "run mode changed");
    }

    /// Ask both loops to stop. Idempotent; data captured so far is still saved.
    pub fn kill(&self) {
        let was_active = self.shared.lock().active;
        self.shared.stop(RunOutcome::Killed);
        if was_active {
            tracing::info!("experiment killed");
        }
    }

    /// Wait for the run to end and return what it produced.
    pub fn join(&mut self) -> Result<RunReport> {
        if let Some(report) = &self.report {
            return Ok(report.clone());
        }
        let Some(worker) = self.worker.take() else {
            return Err(ExperimentError::State("experiment was never started".into()).into());
        };
        let report = worker
            .join()
            .map_err(|_| ExperimentError::State("scheduling thread panicked".into()))?;
        self.report = Some(report.clone());
        Ok(report)
    }

    pub fn is_active(&self) -> bool {
        self.shared.lock().active
    }

    pub fn state(&self) -> ExperimentState {
        self.shared.lock().state
    }

    pub fn run_mode(&self) -> RunMode {
        self.shared.lock().mode
    }

    pub fn is_paused(&self) -> bool {
        self.shared.lock().paused
    }

    /// Run-relative elapsed time.
    pub fn elapsed(&self) -> Duration {
        self.shared.lock().run_timer.elapsed()
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }
}

impl Drop for Experiment {
    fn drop(&mut self) {
        self.kill();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            tracing::warn!("scheduling thread panicked during shutdown");
        }
    }
}
