//! Type-state builder for [`Experiment`].
//!
//! The supply, the registry and the [`ExperimentConfig`] must be provided
//! before `build()` is available. `try_build()` is always available for
//! dynamic checks.

use std::marker::PhantomData;
use std::sync::Arc;

use supply_traits::clock::{Clock, MonotonicClock};
use supply_traits::{PowerSupply, Registry};

use crate::config::ExperimentConfig;
use crate::error::{BuildError, Result, StorageError};
use crate::experiment::{Experiment, OnFinish, Shared};
use crate::sink::{ExperimentSink, NullSink};
use crate::status::RunOutcome;
use crate::storage::{StorageDecision, StorageHandler};

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

pub struct ExperimentBuilder<S, R, C> {
    supply: Option<Arc<dyn PowerSupply>>,
    registry: Option<Arc<Registry>>,
    config: Option<ExperimentConfig>,
    sink: Option<Arc<dyn ExperimentSink>>,
    on_finish: Option<OnFinish>,
    storage_handler: Option<StorageHandler>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    _s: PhantomData<S>,
    _r: PhantomData<R>,
    _c: PhantomData<C>,
}

impl Default for ExperimentBuilder<Missing, Missing, Missing> {
    fn default() -> Self {
        Self {
            supply: None,
            registry: None,
            config: None,
            sink: None,
            on_finish: None,
            storage_handler: None,
            clock: None,
            _s: PhantomData,
            _r: PhantomData,
            _c: PhantomData,
        }
    }
}

fn validate(config: &ExperimentConfig) -> std::result::Result<(), BuildError> {
    if config.refresh.is_zero() {
        return Err(BuildError::InvalidConfig("refresh period must be > 0"));
    }
    if config.manual_period.is_zero() {
        return Err(BuildError::InvalidConfig("manual period must be > 0"));
    }
    let g = config.pid;
    if !(g.kp.is_finite() && g.ki.is_finite() && g.kd.is_finite()) {
        return Err(BuildError::InvalidConfig("PID gains must be finite"));
    }
    if config.profile_path.as_os_str().is_empty() {
        return Err(BuildError::InvalidConfig("profile path must not be empty"));
    }
    Ok(())
}

impl<S, R, C> ExperimentBuilder<S, R, C> {
    /// Fallible build available in any type-state; reports the first missing piece.
    pub fn try_build(self) -> Result<Experiment> {
        let supply = self
            .supply
            .ok_or_else(|| eyre::Report::new(BuildError::MissingSupply))?;
        let registry = self
            .registry
            .ok_or_else(|| eyre::Report::new(BuildError::MissingRegistry))?;
        let config = self
            .config
            .ok_or_else(|| eyre::Report::new(BuildError::MissingConfig))?;
        validate(&config).map_err(eyre::Report::new)?;

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        let sink = self.sink.unwrap_or_else(|| Arc::new(NullSink));
        let shared = Shared::new(supply, registry, sink, clock, config.run_mode);

        Ok(Experiment {
            shared: Arc::new(shared),
            config,
            on_finish: self.on_finish,
            storage_handler: self.storage_handler,
            worker: None,
            report: None,
        })
    }

    fn retype<S2, R2, C2>(self) -> ExperimentBuilder<S2, R2, C2> {
        ExperimentBuilder {
            supply: self.supply,
            registry: self.registry,
            config: self.config,
            sink: self.sink,
            on_finish: self.on_finish,
            storage_handler: self.storage_handler,
            clock: self.clock,
            _s: PhantomData,
            _r: PhantomData,
            _c: PhantomData,
        }
    }
}

/// Chainable setters that do not affect type-state.
impl<S, R, C> ExperimentBuilder<S, R, C> {
    pub fn with_sink(mut self, sink: Arc<dyn ExperimentSink>) -> Self {
        self.sink = Some(sink);
        self
    }
    /// Called once with the outcome when the loops have stopped, before the
    /// data is saved.
    pub fn with_on_finish<F>(mut self, f: F) -> Self
    where
        F: FnOnce(RunOutcome) + Send + 'static,
    {
        self.on_finish = Some(Box::new(f));
        self
    }
    /// Decide what to do when saving results fails. Without one, failed
    /// saves are logged and the data discarded.
    pub fn with_storage_handler<F>(mut self, f: F) -> Self
    where
        F: FnMut(&StorageError) -> StorageDecision + Send + 'static,
    {
        self.storage_handler = Some(Box::new(f));
        self
    }
    /// Provide a custom clock implementation; defaults to `MonotonicClock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }
}

// Setters that advance type-state
impl<R, C> ExperimentBuilder<Missing, R, C> {
    pub fn with_supply(self, supply: impl PowerSupply + 'static) -> ExperimentBuilder<Set, R, C> {
        let mut next = self.retype();
        next.supply = Some(Arc::new(supply));
        next
    }
}

impl<S, C> ExperimentBuilder<S, Missing, C> {
    pub fn with_registry(self, registry: Arc<Registry>) -> ExperimentBuilder<S, Set, C> {
        let mut next = self.retype();
        next.registry = Some(registry);
        next
    }
}

impl<S, R> ExperimentBuilder<S, R, Missing> {
    pub fn with_config(self, config: ExperimentConfig) -> ExperimentBuilder<S, R, Set> {
        let mut next = self.retype();
        next.config = Some(config);
        next
    }
}

impl ExperimentBuilder<Set, Set, Set> {
    /// Validate and build. Only available once supply, registry and config are set.
    pub fn build(self) -> Result<Experiment> {
        self.try_build()
    }
}
