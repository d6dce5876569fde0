//! Experiment lifecycle states and run outcomes.

use std::fmt;
use std::path::PathBuf;

use crate::storage::DataRow;

/// `Idle → Running ⇄ Paused → Finished | Killed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExperimentState {
    #[default]
    Idle,
    Running,
    Paused,
    Finished,
    Killed,
}

impl ExperimentState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExperimentState::Finished | ExperimentState::Killed)
    }
}

impl fmt::Display for ExperimentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExperimentState::Idle => "idle",
            ExperimentState::Running => "running",
            ExperimentState::Paused => "paused",
            ExperimentState::Finished => "finished",
            ExperimentState::Killed => "killed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Profile-driven open-loop voltage schedule.
    #[default]
    Automatic,
    /// PID toward a target power.
    Manual,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Killed,
    /// A newer experiment claimed the registry slot.
    Superseded,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunOutcome::Completed => "completed",
            RunOutcome::Killed => "killed",
            RunOutcome::Superseded => "superseded",
        })
    }
}

/// Returned by `Experiment::join`.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub rows: Vec<DataRow>,
    /// `None` when saving was discarded or gave up.
    pub saved_to: Option<PathBuf>,
}
