//! `From` implementations bridging `supply_config` types to `supply_core` types.

use std::time::Duration;

use crate::config::ExperimentConfig;
use crate::entry::TextEntry;
use crate::error::ExperimentError;
use crate::pid::PidGains;
use crate::profile::ProfileKind;
use crate::status::RunMode;

impl From<supply_config::ProfileKind> for ProfileKind {
    fn from(k: supply_config::ProfileKind) -> Self {
        match k {
            supply_config::ProfileKind::EvenlySpaced => Self::EvenlySpaced,
            supply_config::ProfileKind::OrderedPairs => Self::OrderedPairs,
        }
    }
}

impl From<supply_config::RunMode> for RunMode {
    fn from(m: supply_config::RunMode) -> Self {
        match m {
            supply_config::RunMode::Automatic => Self::Automatic,
            supply_config::RunMode::Manual => Self::Manual,
        }
    }
}

impl From<&supply_config::PidCfg> for PidGains {
    fn from(c: &supply_config::PidCfg) -> Self {
        Self {
            kp: c.kp,
            ki: c.ki,
            kd: c.kd,
        }
    }
}

/// Requires `experiment.profile` and `experiment.storage_dir` to be set.
impl TryFrom<&supply_config::Config> for ExperimentConfig {
    type Error = ExperimentError;

    fn try_from(c: &supply_config::Config) -> Result<Self, Self::Error> {
        let exp = &c.experiment;
        let profile = exp
            .profile
            .clone()
            .ok_or_else(|| ExperimentError::Config("experiment.profile is not set".into()))?;
        let storage = exp
            .storage_dir
            .clone()
            .ok_or_else(|| ExperimentError::Config("experiment.storage_dir is not set".into()))?;

        Ok(
            ExperimentConfig::new(profile, storage, TextEntry::from(exp.test_time_s))
                .with_profile_kind(exp.profile_kind.into())
                .with_end_at_zero(exp.reset_voltage)
                .with_run_mode(exp.mode.into())
                .with_pid(PidGains::from(&c.pid), c.pid.integral_reset)
                .with_target_power(c.pid.target_power_w)
                .with_refresh(Duration::from_millis(exp.refresh_ms))
                .with_manual_period(Duration::from_millis(c.pid.period_ms)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_config_maps_every_field() {
        let cfg = supply_config::load_toml(
            r#"
            [experiment]
            profile = "p.csv"
            storage_dir = "out"
            profile_kind = "ordered_pairs"
            test_time_s = 3
            reset_voltage = false
            refresh_ms = 50
            mode = "manual"

            [pid]
            kp = 0.2
            ki = 0.1
            target_power_w = 12.5
            period_ms = 20
            "#,
        )
        .unwrap();
        let ec = ExperimentConfig::try_from(&cfg).unwrap();
        assert_eq!(ec.profile_kind, ProfileKind::OrderedPairs);
        assert_eq!(ec.run_time.parse_f64(), Some(3.0));
        assert!(!ec.end_at_zero);
        assert_eq!(ec.run_mode, RunMode::Manual);
        assert_eq!(ec.pid.kp, 0.2);
        assert_eq!(ec.target_power.parse_f64(), Some(12.5));
        assert_eq!(ec.refresh, Duration::from_millis(50));
        assert_eq!(ec.manual_period, Duration::from_millis(20));
    }

    #[test]
    fn missing_profile_is_a_config_error() {
        let cfg = supply_config::Config::default();
        assert!(matches!(
            ExperimentConfig::try_from(&cfg),
            Err(ExperimentError::Config(_))
        ));
    }
}
