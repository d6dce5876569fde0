//! Passive receivers for values the engine produces.
//!
//! Every method has a no-op default so front ends implement only what they
//! display. Calls arrive from the engine's worker threads.

use crate::status::ExperimentState;

/// Plot series a front end may draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Series {
    Target,
    Voltage,
    Current,
    Power,
}

/// Instrument readings sampled by one refresh tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Telemetry {
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
    pub target: f64,
}

pub trait ExperimentSink: Send + Sync {
    fn target_voltage(&self, _volts: f64) {}
    fn elapsed(&self, _secs: f64) {}
    fn progress(&self, _fraction: f64) {}
    fn telemetry(&self, _reading: &Telemetry) {}
    /// Drop everything plotted by a previous run.
    fn plot_reset(&self) {}
    fn plot(&self, _series: Series, _t: f64, _y: f64) {}
    fn state(&self, _state: ExperimentState) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ExperimentSink for NullSink {}
