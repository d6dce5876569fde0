#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Settings schema for the power supply experiment tool.
//!
//! - `Config` and its sections are deserialized from TOML and validated.
//! - Every section is optional; defaults match the bench setup the tool was
//!   written for (LAN-attached supply, 10 s test, 30 A current limit).
use serde::Deserialize;
use serde::de::Deserializer;
use std::path::{Path, PathBuf};

/// VISA resource string of the bench supply on the lab network.
pub const DEFAULT_ADDRESS: &str = "TCPIP0::169.254.197.112::inst0::INSTR";

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct InstrumentCfg {
    /// Resource address of the supply (informational for the simulator).
    pub address: String,
    /// Current limit applied right after connecting (A).
    pub current_limit_a: f64,
    /// Instrument polling period (ms).
    pub poll_ms: u64,
}

impl Default for InstrumentCfg {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            current_limit_a: 30.0,
            poll_ms: 100,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    /// One value per row, spread evenly over the test time.
    #[default]
    EvenlySpaced,
    /// `value,time` rows used verbatim.
    OrderedPairs,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Automatic,
    Manual,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ExperimentCfg {
    /// Setpoint CSV (no header).
    pub profile: Option<PathBuf>,
    pub profile_kind: ProfileKind,
    /// Directory that receives the result CSV.
    pub storage_dir: Option<PathBuf>,
    /// Total test time in seconds. Accepts a number or a numeric string.
    #[serde(deserialize_with = "de_seconds")]
    pub test_time_s: f64,
    /// Command 0 V once the profile completes.
    pub reset_voltage: bool,
    /// Telemetry refresh period (ms).
    pub refresh_ms: u64,
    /// Mode the run starts in.
    pub mode: RunMode,
}

impl Default for ExperimentCfg {
    fn default() -> Self {
        Self {
            profile: None,
            profile_kind: ProfileKind::EvenlySpaced,
            storage_dir: None,
            test_time_s: 10.0,
            reset_voltage: true,
            refresh_ms: 100,
            mode: RunMode::Automatic,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PidCfg {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Zero the integral whenever the power target changes.
    pub integral_reset: bool,
    /// Initial power target for manual mode (W).
    pub target_power_w: f64,
    /// Manual control loop period (ms).
    pub period_ms: u64,
}

impl Default for PidCfg {
    fn default() -> Self {
        Self {
            kp: 0.05,
            ki: 0.01,
            kd: 0.0,
            integral_reset: true,
            target_power_w: 0.0,
            period_ms: 10,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SimulationCfg {
    /// Resistive load across the output terminals (ohms).
    pub load_ohms: f64,
    /// First-order time constant of the output voltage (ms).
    pub response_ms: u64,
}

impl Default for SimulationCfg {
    fn default() -> Self {
        Self {
            load_ohms: 10.0,
            response_ms: 50,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub instrument: InstrumentCfg,
    pub experiment: ExperimentCfg,
    pub pid: PidCfg,
    pub simulation: SimulationCfg,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Read and parse a config file. Validation is left to the caller.
pub fn load_file(path: &Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("read config {}: {}", path.display(), e))?;
    load_toml(&text).map_err(|e| eyre::eyre!("parse config {}: {}", path.display(), e))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SecondsToml {
    Number(f64),
    Text(String),
}

fn de_seconds<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match SecondsToml::deserialize(deserializer)? {
        SecondsToml::Number(v) => Ok(v),
        SecondsToml::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| serde::de::Error::custom(format!("test time {s:?} is not a number"))),
    }
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Instrument
        if !(self.instrument.current_limit_a.is_finite() && self.instrument.current_limit_a > 0.0)
        {
            eyre::bail!("instrument.current_limit_a must be > 0");
        }
        if self.instrument.poll_ms == 0 {
            eyre::bail!("instrument.poll_ms must be >= 1");
        }
        if self.instrument.address.trim().is_empty() {
            eyre::bail!("instrument.address must not be empty");
        }

        // Experiment
        if !(self.experiment.test_time_s.is_finite() && self.experiment.test_time_s > 0.0) {
            eyre::bail!("experiment.test_time_s must be > 0");
        }
        if self.experiment.refresh_ms == 0 {
            eyre::bail!("experiment.refresh_ms must be >= 1");
        }
        if self.experiment.refresh_ms > 10_000 {
            eyre::bail!("experiment.refresh_ms is unreasonably large (>10s)");
        }

        // PID
        for (name, v) in [
            ("kp", self.pid.kp),
            ("ki", self.pid.ki),
            ("kd", self.pid.kd),
        ] {
            if !v.is_finite() {
                eyre::bail!("pid.{name} must be finite");
            }
        }
        if self.pid.target_power_w.is_sign_negative() || !self.pid.target_power_w.is_finite() {
            eyre::bail!("pid.target_power_w must be >= 0");
        }
        if self.pid.period_ms == 0 {
            eyre::bail!("pid.period_ms must be >= 1");
        }

        // Simulation
        if !(self.simulation.load_ohms.is_finite() && self.simulation.load_ohms > 0.0) {
            eyre::bail!("simulation.load_ohms must be > 0");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = load_toml("").expect("empty TOML parses");
        assert_eq!(cfg.instrument.address, DEFAULT_ADDRESS);
        assert_eq!(cfg.experiment.test_time_s, 10.0);
        assert!(cfg.experiment.reset_voltage);
        assert_eq!(cfg.experiment.profile_kind, ProfileKind::EvenlySpaced);
        cfg.validate().expect("defaults are valid");
    }

    #[test]
    fn test_time_accepts_numeric_string() {
        let cfg = load_toml("[experiment]\ntest_time_s = \" 12.5 \"\n").expect("parse");
        assert_eq!(cfg.experiment.test_time_s, 12.5);
    }

    #[test]
    fn test_time_rejects_text() {
        let err = load_toml("[experiment]\ntest_time_s = \"soon\"\n").expect_err("bad time");
        assert!(err.to_string().contains("not a number"));
    }
}
