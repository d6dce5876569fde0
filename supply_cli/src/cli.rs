//! CLI argument definitions and shared statics.

use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

pub fn json_mode() -> bool {
    JSON_MODE.get().copied().unwrap_or(false)
}

#[derive(Parser, Debug)]
#[command(name = "supply", version, about = "Power supply experiment runner")]
pub struct Cli {
    /// Path to config TOML; built-in defaults are used when omitted
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print results and errors as JSON lines
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Profile options shared by `run` and `check-profile`.
#[derive(Args, Debug, Clone)]
pub struct ProfileArgs {
    /// Setpoint CSV (overrides experiment.profile)
    #[arg(long, value_name = "FILE")]
    pub profile: Option<PathBuf>,
    /// Total test time in seconds (overrides experiment.test_time_s)
    #[arg(long, value_name = "SECS")]
    pub time: Option<String>,
    /// Read `value,time` rows instead of evenly spaced values
    #[arg(long, action = ArgAction::SetTrue)]
    pub ordered_pairs: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a setpoint profile against the supply and save the results
    Run {
        #[command(flatten)]
        profile: ProfileArgs,
        /// Directory for the result CSV (overrides experiment.storage_dir)
        #[arg(long, value_name = "DIR")]
        storage: Option<PathBuf>,
        /// Start in manual mode, holding a target power
        #[arg(long, action = ArgAction::SetTrue)]
        manual: bool,
        /// Manual-mode power target in watts
        #[arg(long, value_name = "W", requires = "manual")]
        target_power: Option<f64>,
        /// Leave the last setpoint applied instead of returning to 0 V
        #[arg(long, action = ArgAction::SetTrue)]
        no_reset: bool,
        /// Discard results instead of prompting when saving fails
        #[arg(long, action = ArgAction::SetTrue)]
        no_prompt: bool,
    },
    /// Load a profile and print its schedule
    CheckProfile {
        #[command(flatten)]
        profile: ProfileArgs,
    },
    /// Connect to the supply and report its status
    SelfCheck,
}
