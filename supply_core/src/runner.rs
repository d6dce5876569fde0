//! Scheduling loop and end-of-run handling.
//!
//! Automatic mode walks the profile, waiting on the run timer for each point.
//! Manual mode runs the PID toward the target power every manual period. The
//! loop hands back to automatic on the same pending point, so the schedule
//! resumes where it stopped.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::ExperimentConfig;
use crate::error::StorageError;
use crate::experiment::{OnFinish, Shared, Wake};
use crate::mailbox::{SlotSender, Snapshot};
use crate::pid::PidController;
use crate::profile::{Profile, ProfileKind, SetPoint};
use crate::sink::Series;
use crate::status::{ExperimentState, RunMode, RunOutcome, RunReport};
use crate::storage::{self, DataRow, StorageDecision, StorageHandler};

pub(crate) struct Runner {
    pub(crate) shared: Arc<Shared>,
    pub(crate) profile: Profile,
    pub(crate) run_time: f64,
    pub(crate) config: ExperimentConfig,
    pub(crate) publisher: SlotSender<Snapshot>,
    pub(crate) refresh: JoinHandle<Vec<DataRow>>,
    pub(crate) on_finish: Option<OnFinish>,
    pub(crate) storage_handler: Option<StorageHandler>,
}

/// Body of the scheduling thread.
pub(crate) fn run(mut r: Runner) -> RunReport {
    let mut pid = PidController::with_clock(
        r.config.pid,
        r.config.integral_reset,
        r.shared.clock.clone(),
    );
    let completed = schedule(&mut r, &mut pid);
    if completed {
        finish_naturally(&r);
    }
    finalize(r)
}

/// Returns true when every point was committed without a stop.
fn schedule(r: &mut Runner, pid: &mut PidController) -> bool {
    let shared = r.shared.clone();
    let end_of_run = (r.profile.kind() == ProfileKind::EvenlySpaced).then_some(r.run_time);
    let mut progress = 0.0;

    let mut points = match r.profile.iter() {
        Ok(it) => it,
        Err(e) => {
            tracing::warn!(error = %e, "profile cannot be iterated");
            shared.stop(RunOutcome::Killed);
            return false;
        }
    };
    let mut pending: Option<SetPoint> = points.next();

    loop {
        let at = match (pending, end_of_run) {
            (Some(p), _) => p.at,
            (None, Some(end)) => end,
            (None, None) => return true,
        };
        match shared.wait_for_point(secs(at)) {
            Wake::Stop => return false,
            Wake::Manual => drive_manual(&shared, &r.publisher, &r.config, pid, progress),
            Wake::Reached(c) => {
                let Some(point) = pending else {
                    return true;
                };
                let volts = point.value.max(0.0);
                let plot_at = point.at + c.run_timer.total_paused().as_secs_f64();
                drop(c);
                if !shared.command(volts) {
                    return false;
                }
                progress = points.progress();
                r.publisher.publish(Snapshot {
                    target: volts,
                    progress,
                });
                shared.sink.target_voltage(volts);
                shared.sink.progress(progress);
                shared.sink.plot(Series::Target, plot_at, volts);
                tracing::debug!(index = point.index, volts, at = point.at, progress, "setpoint");
                pending = points.next();
            }
        }
    }
}

/// PID toward the target power until the mode flips back or the run stops.
fn drive_manual(
    shared: &Shared,
    publisher: &SlotSender<Snapshot>,
    config: &ExperimentConfig,
    pid: &mut PidController,
    progress: f64,
) {
    loop {
        let (seed, paused) = {
            let mut c = shared.lock();
            if shared.check_superseded(&mut c) || !c.active || c.mode != RunMode::Manual {
                return;
            }
            (c.manual_seed.take(), c.paused)
        };
        let volts = if let Some(seed) = seed {
            pid.reset();
            Some(seed.max(0.0))
        } else if paused {
            None
        } else {
            let power = shared.supply.power();
            let present = shared.supply.target_voltage();
            let target = config.target_power.parse_f64().unwrap_or(0.0);
            let correction = pid.calculate(power, target);
            Some((present + correction).max(0.0))
        };
        if let Some(volts) = volts {
            if !shared.command(volts) {
                return;
            }
            let t = shared.lock().abs_timer.elapsed_secs();
            publisher.publish(Snapshot {
                target: volts,
                progress,
            });
            shared.sink.target_voltage(volts);
            shared.sink.plot(Series::Target, t, volts);
        }
        if shared.sleep_until(Instant::now() + config.manual_period).is_none() {
            return;
        }
    }
}

/// Optional drive to 0 V, then one refresh period so the last rows show it.
fn finish_naturally(r: &Runner) {
    let shared = &r.shared;
    {
        let mut c = shared.lock();
        c.ending.get_or_insert(RunOutcome::Completed);
    }
    if !r.config.end_at_zero {
        return;
    }
    if shared.command(0.0) {
        r.publisher.publish(Snapshot {
            target: 0.0,
            progress: 1.0,
        });
        shared.sink.target_voltage(0.0);
        tracing::debug!("output reset to 0 V");
        let _ = shared.sleep_until(Instant::now() + r.config.refresh);
    }
}

fn finalize(r: Runner) -> RunReport {
    let Runner {
        shared,
        config,
        refresh,
        on_finish,
        storage_handler,
        ..
    } = r;

    let outcome = {
        let mut c = shared.lock();
        shared.stop_locked(&mut c, RunOutcome::Completed);
        c.ending.unwrap_or(RunOutcome::Completed)
    };
    shared.notify();

    let rows = refresh.join().unwrap_or_else(|_| {
        tracing::error!("refresh thread panicked; captured rows lost");
        Vec::new()
    });
    shared.signal_loops_done();
    tracing::info!(%outcome, rows = rows.len(), "experiment loops stopped");

    if let Some(cb) = on_finish {
        cb(outcome);
    }

    let mut discard = |_: &StorageError| StorageDecision::Discard;
    let saved_to = match storage_handler {
        Some(mut h) => storage::persist(&config.storage_dir, &rows, &mut *h),
        None => storage::persist(&config.storage_dir, &rows, &mut discard),
    };

    let state = match outcome {
        RunOutcome::Completed => ExperimentState::Finished,
        RunOutcome::Killed | RunOutcome::Superseded => ExperimentState::Killed,
    };
    shared.lock().state = state;
    if outcome == RunOutcome::Completed {
        shared.sink.progress(1.0);
    }
    shared.sink.state(state);
    shared.release_slot();

    RunReport {
        outcome,
        rows,
        saved_to,
    }
}

/// Seconds to a `Duration`, saturating instead of panicking.
fn secs(s: f64) -> Duration {
    Duration::try_from_secs_f64(s.max(0.0)).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secs_saturates() {
        assert_eq!(secs(-1.0), Duration::ZERO);
        assert_eq!(secs(1.5), Duration::from_millis(1500));
        assert_eq!(secs(1e300), Duration::MAX);
    }
}
