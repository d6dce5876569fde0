#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_precision_loss
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Power-supply experiment engine (hardware-agnostic).
//!
//! All instrument access goes through `supply_traits::PowerSupply`; the
//! "who may drive the hardware" bookkeeping goes through an injected
//! `supply_traits::Registry`.
//!
//! ## Architecture
//!
//! - **Timer**: pausable run-relative clock (`timer`)
//! - **Profile**: setpoint schedules from headerless CSV (`profile`)
//! - **PID**: derivative-on-measurement control law for manual mode (`pid`)
//! - **Experiment**: scheduling loop + refresh loop, lifecycle, supersession
//!   (`experiment`, `runner`, `refresh`)
//! - **Storage**: result CSV with operator-driven retry (`storage`)
//! - **Sinks**: passive receivers for display values (`sink`)

pub mod atomic;
pub mod builder;
pub mod config;
pub mod conversions;
pub mod entry;
pub mod error;
pub mod experiment;
pub mod hw_error;
pub mod mailbox;
pub mod mocks;
pub mod pid;
pub mod profile;
mod refresh;
mod runner;
pub mod sink;
pub mod status;
pub mod storage;
pub mod timer;

pub use builder::{ExperimentBuilder, Missing, Set};
pub use config::ExperimentConfig;
pub use entry::TextEntry;
pub use error::{BuildError, ExperimentError, ProfileError, Result, StorageError};
pub use experiment::{Experiment, POLL_INTERVAL};
pub use pid::{PidController, PidGains};
pub use profile::{Profile, ProfileIter, ProfileKind, SetPoint};
pub use sink::{ExperimentSink, NullSink, Series, Telemetry};
pub use status::{ExperimentState, RunMode, RunOutcome, RunReport};
pub use storage::{CSV_HEADER, DataRow, StorageDecision};
pub use timer::Timer;
