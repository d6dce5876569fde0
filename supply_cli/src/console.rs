//! Terminal front end: progress lines and the storage retry prompt.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use supply_core::error::StorageError;
use supply_core::{ExperimentSink, ExperimentState, StorageDecision, Telemetry};

/// Setpoints closer than this to the last printed one are not shown.
const SETPOINT_EPSILON: f64 = 1e-3;
/// Minimum spacing between printed setpoints (manual mode ticks every 10 ms).
const SETPOINT_INTERVAL: Duration = Duration::from_millis(250);

/// Prints state changes, new setpoints and progress in 10 % steps.
pub struct ConsoleSink {
    json: bool,
    last: Mutex<Option<Telemetry>>,
    last_decile: Mutex<i64>,
    last_setpoint: Mutex<Option<(f64, Instant)>>,
}

fn setpoint_due(last: Option<(f64, Instant)>, volts: f64, now: Instant) -> bool {
    match last {
        None => true,
        Some((v, at)) => {
            (volts - v).abs() >= SETPOINT_EPSILON
                && now.saturating_duration_since(at) >= SETPOINT_INTERVAL
        }
    }
}

impl ConsoleSink {
    pub fn new(json: bool) -> Self {
        Self {
            json,
            last: Mutex::new(None),
            last_decile: Mutex::new(-1),
            last_setpoint: Mutex::new(None),
        }
    }

    fn emit(&self, text: String, value: serde_json::Value) {
        let mut out = std::io::stdout().lock();
        let _ = if self.json {
            writeln!(out, "{value}")
        } else {
            writeln!(out, "{text}")
        };
    }
}

impl ExperimentSink for ConsoleSink {
    fn target_voltage(&self, volts: f64) {
        let now = Instant::now();
        let mut last = self.last_setpoint.lock().unwrap_or_else(|e| e.into_inner());
        if !setpoint_due(*last, volts, now) {
            return;
        }
        *last = Some((volts, now));
        drop(last);
        self.emit(
            format!("setpoint {volts:.3} V"),
            serde_json::json!({ "event": "setpoint", "volts": volts }),
        );
    }

    #[allow(clippy::cast_possible_truncation)]
    fn progress(&self, fraction: f64) {
        let decile = (fraction.clamp(0.0, 1.0) * 10.0).floor() as i64;
        let mut last = self.last_decile.lock().unwrap_or_else(|e| e.into_inner());
        if decile == *last {
            return;
        }
        *last = decile;
        drop(last);
        let reading = *self.last.lock().unwrap_or_else(|e| e.into_inner());
        let r = reading.unwrap_or_default();
        self.emit(
            format!(
                "[{:>3.0}%] {:.3} V  {:.3} A  {:.3} W",
                fraction * 100.0,
                r.voltage,
                r.current,
                r.power
            ),
            serde_json::json!({
                "event": "progress",
                "fraction": fraction,
                "voltage": r.voltage,
                "current": r.current,
                "power": r.power,
            }),
        );
    }

    fn telemetry(&self, reading: &Telemetry) {
        *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some(*reading);
    }

    fn state(&self, state: ExperimentState) {
        self.emit(
            format!("experiment {state}"),
            serde_json::json!({ "event": "state", "state": state.to_string() }),
        );
    }
}

/// Storage failure prompt. `r` retries, `d` (or end of input) discards, any
/// other line is taken as a new directory.
pub fn prompt_storage<R: BufRead + Send, W: Write + Send>(
    mut input: R,
    mut output: W,
) -> impl FnMut(&StorageError) -> StorageDecision + Send {
    move |err| {
        let _ = writeln!(output, "Saving results failed: {err}");
        let _ = write!(output, "[r]etry, [d]iscard, or enter a new directory: ");
        let _ = output.flush();
        let mut line = String::new();
        match input.read_line(&mut line) {
            Ok(0) | Err(_) => StorageDecision::Discard,
            Ok(_) => parse_choice(line.trim()),
        }
    }
}

fn parse_choice(choice: &str) -> StorageDecision {
    match choice {
        "" | "r" | "retry" => StorageDecision::Retry,
        "d" | "discard" => StorageDecision::Discard,
        dir => StorageDecision::RetryIn(PathBuf::from(dir)),
    }
}
