//! Runtime configuration for one experiment.
//!
//! Separate from the TOML model in `supply_config`; see `conversions` for the
//! bridge. Text fields are [`TextEntry`] cells so an operator can edit them
//! while a run is in progress.

use std::path::PathBuf;
use std::time::Duration;

use crate::entry::TextEntry;
use crate::pid::PidGains;
use crate::profile::ProfileKind;
use crate::status::RunMode;

#[derive(Debug, Clone)]
pub struct ExperimentConfig {
    pub profile_path: PathBuf,
    pub profile_kind: ProfileKind,
    pub storage_dir: PathBuf,
    /// Total run time in seconds, as typed.
    pub run_time: TextEntry,
    /// Command 0 V after the last setpoint of a completed run.
    pub end_at_zero: bool,
    pub run_mode: RunMode,
    pub pid: PidGains,
    pub integral_reset: bool,
    /// Watts, as typed; unparsable text counts as 0.
    pub target_power: TextEntry,
    pub refresh: Duration,
    pub manual_period: Duration,
}

impl ExperimentConfig {
    pub fn new(
        profile_path: impl Into<PathBuf>,
        storage_dir: impl Into<PathBuf>,
        run_time: impl Into<TextEntry>,
    ) -> Self {
        Self {
            profile_path: profile_path.into(),
            profile_kind: ProfileKind::EvenlySpaced,
            storage_dir: storage_dir.into(),
            run_time: run_time.into(),
            end_at_zero: true,
            run_mode: RunMode::Automatic,
            pid: PidGains::default(),
            integral_reset: true,
            target_power: TextEntry::new("0"),
            refresh: Duration::from_millis(100),
            manual_period: Duration::from_millis(10),
        }
    }

    pub fn with_profile_kind(mut self, kind: ProfileKind) -> Self {
        self.profile_kind = kind;
        self
    }

    pub fn with_end_at_zero(mut self, on: bool) -> Self {
        self.end_at_zero = on;
        self
    }

    pub fn with_run_mode(mut self, mode: RunMode) -> Self {
        self.run_mode = mode;
        self
    }

    pub fn with_pid(mut self, gains: PidGains, integral_reset: bool) -> Self {
        self.pid = gains;
        self.integral_reset = integral_reset;
        self
    }

    pub fn with_target_power(mut self, watts: impl Into<TextEntry>) -> Self {
        self.target_power = watts.into();
        self
    }

    pub fn with_refresh(mut self, period: Duration) -> Self {
        self.refresh = period;
        self
    }

    pub fn with_manual_period(mut self, period: Duration) -> Self {
        self.manual_period = period;
        self
    }
}
