//! Feedback law used by manual (target-power) mode.
//!
//! The derivative acts on the measurement rather than on the error, scaled by
//! `kp`: `d = kp * (m - m_prev) / dt`. A setpoint jump therefore produces no
//! derivative kick. `kd` is carried for configuration symmetry and is not part
//! of the law.

use std::sync::Arc;
use std::time::Instant;

use supply_traits::clock::{Clock, MonotonicClock};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: 0.05,
            ki: 0.01,
            kd: 0.0,
        }
    }
}

pub struct PidController {
    gains: PidGains,
    integral: f64,
    last_time: Option<Instant>,
    last_measurement: Option<f64>,
    last_setpoint: Option<f64>,
    integral_reset: bool,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl PidController {
    pub fn new(gains: PidGains, integral_reset: bool) -> Self {
        Self::with_clock(gains, integral_reset, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(
        gains: PidGains,
        integral_reset: bool,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        Self {
            gains,
            integral: 0.0,
            last_time: None,
            last_measurement: None,
            last_setpoint: None,
            integral_reset,
            clock,
        }
    }

    pub fn calculate(&mut self, measurement: f64, setpoint: f64) -> f64 {
        let now = self.clock.now();
        self.calculate_at(measurement, setpoint, now)
    }

    /// One step of the control law evaluated at `now`.
    pub fn calculate_at(&mut self, measurement: f64, setpoint: f64, now: Instant) -> f64 {
        let dt = self
            .last_time
            .map_or(0.0, |t| now.saturating_duration_since(t).as_secs_f64());
        let dx = self.last_measurement.map_or(0.0, |m| measurement - m);
        let error = setpoint - measurement;

        if self.integral_reset && self.last_setpoint.is_some_and(|s| s != setpoint) {
            self.integral = 0.0;
        }
        self.integral += self.gains.ki * error * dt;

        self.last_time = Some(now);
        self.last_measurement = Some(measurement);
        self.last_setpoint = Some(setpoint);

        let d_term = if dt > 0.0 {
            self.gains.kp * dx / dt
        } else {
            0.0
        };
        self.gains.kp * error + self.integral + d_term
    }

    /// Forget history and the accumulated integral.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_time = None;
        self.last_measurement = None;
        self.last_setpoint = None;
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }
}

impl std::fmt::Debug for PidController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PidController")
            .field("gains", &self.gains)
            .field("integral", &self.integral)
            .field("last_measurement", &self.last_measurement)
            .field("last_setpoint", &self.last_setpoint)
            .field("integral_reset", &self.integral_reset)
            .finish_non_exhaustive()
    }
}
