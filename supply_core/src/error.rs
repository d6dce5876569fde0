use std::path::PathBuf;

use thiserror::Error;

use crate::profile::ProfileKind;

#[derive(Debug, Error, Clone)]
pub enum ExperimentError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("profile error: {0}")]
    Profile(#[from] ProfileError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("invalid state: {0}")]
    State(String),
    #[error("instrument error: {0}")]
    Instrument(String),
}

/// Setpoint file problems. All of them are reported before the supply is touched.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProfileError {
    #[error("cannot read setpoint file {}: {reason}", .path.display())]
    Read { path: PathBuf, reason: String },
    #[error("line {line}: {kind} profile rows need {expected} column(s), found {found}")]
    Format {
        line: u64,
        kind: ProfileKind,
        expected: usize,
        found: usize,
    },
    #[error("line {line}, column {column}: {cell:?} is not a number")]
    Parse {
        line: u64,
        column: usize,
        cell: String,
    },
    #[error("setpoint file has no rows")]
    Empty,
    #[error("run time {0:?} is not a positive number of seconds")]
    RunTime(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StorageError {
    #[error("storage directory {} does not exist", .0.display())]
    MissingDir(PathBuf),
    #[error("cannot write {}: {reason}", .path.display())]
    Write { path: PathBuf, reason: String },
    #[error("cannot encode results: {0}")]
    Encode(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing power supply")]
    MissingSupply,
    #[error("missing registry")]
    MissingRegistry,
    #[error("missing experiment config")]
    MissingConfig,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
