//! Test and helper mocks for supply_core

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use supply_traits::{BoxError, PowerSupply};

use crate::sink::{ExperimentSink, Series, Telemetry};
use crate::status::ExperimentState;

#[derive(Debug, Default)]
struct SpyState {
    voltage: f64,
    current: f64,
    target: f64,
    disconnected: bool,
    reject: bool,
    load_ohms: Option<f64>,
    command_delay: Duration,
    commands: Vec<(f64, Instant)>,
}

/// A supply that records every `set_voltage` call with the instant it arrived.
///
/// With a load configured, readings follow commands instantly through Ohm's
/// law; otherwise they stay at whatever `set_readings` put there.
#[derive(Debug, Default)]
pub struct SpySupply {
    state: Mutex<SpyState>,
}

impl SpySupply {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_load(ohms: f64) -> Self {
        let s = Self::default();
        s.lock().load_ohms = Some(ohms);
        s
    }

    fn lock(&self) -> MutexGuard<'_, SpyState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_readings(&self, voltage: f64, current: f64) {
        let mut s = self.lock();
        s.voltage = voltage;
        s.current = current;
    }

    pub fn set_connected(&self, up: bool) {
        self.lock().disconnected = !up;
    }

    /// Make `set_voltage` fail while still recording the attempt.
    pub fn reject_commands(&self, on: bool) {
        self.lock().reject = on;
    }

    /// Make every `set_voltage` take `delay`, like a slow instrument write.
    /// The attempt is recorded once the write returns.
    pub fn set_command_delay(&self, delay: Duration) {
        self.lock().command_delay = delay;
    }

    pub fn commands(&self) -> Vec<(f64, Instant)> {
        self.lock().commands.clone()
    }

    pub fn command_values(&self) -> Vec<f64> {
        self.lock().commands.iter().map(|(v, _)| *v).collect()
    }

    pub fn command_count(&self) -> usize {
        self.lock().commands.len()
    }
}

impl PowerSupply for SpySupply {
    fn voltage(&self) -> f64 {
        self.lock().voltage
    }

    fn current(&self) -> f64 {
        self.lock().current
    }

    fn power(&self) -> f64 {
        let s = self.lock();
        if s.disconnected {
            0.0
        } else {
            s.voltage * s.current
        }
    }

    fn target_voltage(&self) -> f64 {
        self.lock().target
    }

    fn set_voltage(&self, volts: f64) -> Result<(), BoxError> {
        let arrived = Instant::now();
        let delay = self.lock().command_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let mut s = self.lock();
        s.commands.push((volts, arrived));
        if s.disconnected {
            return Err(Box::new(std::io::Error::other("supply not connected")));
        }
        if s.reject {
            return Err(Box::new(std::io::Error::other(format!(
                "VOLT {volts} rejected"
            ))));
        }
        s.target = volts;
        if let Some(ohms) = s.load_ohms {
            s.voltage = volts;
            s.current = volts / ohms;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.lock().disconnected
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Target(f64),
    Elapsed(f64),
    Progress(f64),
    Telemetry(Telemetry),
    PlotReset,
    Plot(Series, f64, f64),
    State(ExperimentState),
}

/// Sink that keeps everything it is told, in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, e: SinkEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(e);
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn progress_values(&self) -> Vec<f64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Progress(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn states(&self) -> Vec<ExperimentState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::State(s) => Some(s),
                _ => None,
            })
            .collect()
    }
}

impl ExperimentSink for RecordingSink {
    fn target_voltage(&self, volts: f64) {
        self.push(SinkEvent::Target(volts));
    }
    fn elapsed(&self, secs: f64) {
        self.push(SinkEvent::Elapsed(secs));
    }
    fn progress(&self, fraction: f64) {
        self.push(SinkEvent::Progress(fraction));
    }
    fn telemetry(&self, reading: &Telemetry) {
        self.push(SinkEvent::Telemetry(*reading));
    }
    fn plot_reset(&self) {
        self.push(SinkEvent::PlotReset);
    }
    fn plot(&self, series: Series, t: f64, y: f64) {
        self.push(SinkEvent::Plot(series, t, y));
    }
    fn state(&self, state: ExperimentState) {
        self.push(SinkEvent::State(state));
    }
}
