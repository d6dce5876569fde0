//! Telemetry refresh loop.
//!
//! Samples the supply every `period` on a fixed cadence (deadlines advance by
//! `period`, so slow sinks do not stretch the schedule). Each tick appends one
//! row and pushes readings to the sink. The loop keeps sampling while paused.

use std::time::{Duration, Instant};

use crate::experiment::Shared;
use crate::mailbox::{SlotReceiver, Snapshot};
use crate::sink::{Series, Telemetry};
use crate::storage::DataRow;

pub(crate) fn run(
    shared: &Shared,
    mut snapshots: SlotReceiver<Snapshot>,
    period: Duration,
) -> Vec<DataRow> {
    let mut rows = Vec::new();
    let mut next = Instant::now();
    loop {
        let (elapsed, run_elapsed) = {
            let mut c = shared.lock();
            if shared.check_superseded(&mut c) || !c.active {
                break;
            }
            (c.abs_timer.elapsed_secs(), c.run_timer.elapsed_secs())
        };

        let supply = &shared.supply;
        let target = snapshots
            .latest()
            .map_or_else(|| supply.target_voltage(), |s| s.target);
        let reading = Telemetry {
            voltage: supply.voltage(),
            current: supply.current(),
            power: supply.power(),
            target,
        };
        rows.push(DataRow {
            elapsed,
            target_voltage: reading.target,
            actual_voltage: reading.voltage,
            current: reading.current,
            power: reading.power,
        });

        let sink = &shared.sink;
        sink.elapsed(run_elapsed);
        sink.telemetry(&reading);
        sink.plot(Series::Voltage, elapsed, reading.voltage);
        sink.plot(Series::Current, elapsed, reading.current);
        sink.plot(Series::Power, elapsed, reading.power);

        next += period;
        let now = Instant::now();
        if next < now {
            // Fell behind; skip missed ticks instead of bursting.
            next = now;
        }
        if shared.sleep_until(next).is_none() {
            break;
        }
    }
    tracing::trace!(rows = rows.len(), "refresh loop exiting");
    shared.notify();
    rows
}
