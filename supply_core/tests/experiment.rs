//! End-to-end runs of the experiment engine against a recording supply.

mod common;

use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use common::{config, csv_files, experiment, write_profile};
use supply_core::mocks::{RecordingSink, SinkEvent, SpySupply};
use supply_core::{
    ExperimentConfig, ExperimentError, ExperimentState, ProfileError, ProfileKind, RunMode,
    RunOutcome, Series,
};
use supply_traits::Registry;

fn secs_between(a: Instant, b: Instant) -> f64 {
    b.saturating_duration_since(a).as_secs_f64()
}

#[test]
fn evenly_spaced_run_commands_on_schedule_and_saves_csv() {
    let dir = tempfile::tempdir().unwrap();
    let supply = Arc::new(SpySupply::with_load(10.0));
    let registry = Arc::new(Registry::new());
    let mut exp = experiment(&supply, &registry, config(dir.path(), "2.0\n4.0\n0.0\n", "3"));

    let t0 = Instant::now();
    exp.start().unwrap();
    assert!(exp.is_active());
    let report = exp.join().unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(exp.state(), ExperimentState::Finished);
    assert!(!exp.is_active());

    let cmds = supply.commands();
    let values: Vec<f64> = cmds.iter().map(|(v, _)| *v).collect();
    assert_eq!(values, vec![2.0, 4.0, 0.0, 0.0]);
    for ((_, at), expected) in cmds.iter().zip([0.0, 1.0, 2.0, 3.0]) {
        let t = secs_between(t0, *at);
        assert!((t - expected).abs() < 0.25, "command at {t:.3}s, expected {expected}s");
    }

    assert!(report.rows.len() >= 30, "only {} rows", report.rows.len());
    let saved = report.saved_to.unwrap();
    let text = std::fs::read_to_string(&saved).unwrap();
    let mut lines = text.lines();
    assert_eq!(
        lines.next(),
        Some("Elapsed Time,Target Voltage,Actual Voltage,Current,Power")
    );
    assert_eq!(lines.count(), report.rows.len());
    assert!(registry.experiment.is_vacant());
}

#[test]
fn rows_are_time_ordered_and_follow_commands() {
    let dir = tempfile::tempdir().unwrap();
    let supply = Arc::new(SpySupply::with_load(4.0));
    let registry = Arc::new(Registry::new());
    let mut exp = experiment(&supply, &registry, config(dir.path(), "8\n", "0.5"));
    exp.start().unwrap();
    let report = exp.join().unwrap();

    assert!(report.rows.windows(2).all(|w| w[0].elapsed <= w[1].elapsed));
    let first_live = report
        .rows
        .iter()
        .find(|r| r.target_voltage == 8.0)
        .unwrap();
    assert_eq!(first_live.actual_voltage, 8.0);
    assert_eq!(first_live.current, 2.0);
    assert_eq!(first_live.power, 16.0);
}

#[test]
fn kill_while_waiting_stops_promptly_without_further_commands() {
    let dir = tempfile::tempdir().unwrap();
    let supply = Arc::new(SpySupply::new());
    let registry = Arc::new(Registry::new());
    let (tx, rx) = mpsc::channel();
    let mut exp = supply_core::Experiment::builder()
        .with_supply(supply.clone())
        .with_registry(registry.clone())
        .with_config(config(dir.path(), "1\n5\n", "20"))
        .with_on_finish(move |outcome| {
            let _ = tx.send((outcome, Instant::now()));
        })
        .build()
        .unwrap();

    exp.start().unwrap();
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(supply.command_values(), vec![1.0]);

    let killed_at = Instant::now();
    exp.kill();
    let (outcome, stopped_at) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(outcome, RunOutcome::Killed);
    assert!(
        stopped_at - killed_at < Duration::from_millis(100),
        "loops took {:?} to stop",
        stopped_at - killed_at
    );

    let report = exp.join().unwrap();
    assert_eq!(report.outcome, RunOutcome::Killed);
    assert_eq!(exp.state(), ExperimentState::Killed);
    std::thread::sleep(Duration::from_millis(50));
    // No reset-to-zero after a kill, and nothing after the kill instant.
    assert_eq!(supply.command_values(), vec![1.0]);
    assert!(supply.commands().iter().all(|(_, at)| *at < killed_at));
    assert!(report.saved_to.is_some());
}

#[test]
fn kill_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let supply = Arc::new(SpySupply::new());
    let registry = Arc::new(Registry::new());
    let mut exp = experiment(&supply, &registry, config(dir.path(), "1\n", "10"));
    exp.start().unwrap();
    exp.kill();
    exp.kill();
    assert_eq!(exp.join().unwrap().outcome, RunOutcome::Killed);
    exp.kill();
    assert_eq!(exp.join().unwrap().outcome, RunOutcome::Killed);
}

#[test]
fn pause_holds_the_schedule_and_keeps_sampling() {
    let dir = tempfile::tempdir().unwrap();
    let supply = Arc::new(SpySupply::new());
    let registry = Arc::new(Registry::new());
    let cfg = config(dir.path(), "1\n2\n", "1").with_end_at_zero(false);
    let mut exp = experiment(&supply, &registry, cfg);

    let t0 = Instant::now();
    exp.start().unwrap();
    std::thread::sleep(Duration::from_millis(100));
    exp.pause();
    assert!(exp.is_paused());
    assert_eq!(exp.state(), ExperimentState::Paused);
    std::thread::sleep(Duration::from_millis(700));
    assert_eq!(supply.command_values(), vec![1.0]);

    exp.unpause();
    assert_eq!(exp.state(), ExperimentState::Running);
    let report = exp.join().unwrap();
    let cmds = supply.commands();
    assert_eq!(supply.command_values(), vec![1.0, 2.0]);
    // 0.5 s of run time plus the 0.7 s pause.
    assert!(secs_between(t0, cmds[1].1) > 1.1);
    // The refresh loop kept appending rows during the pause.
    assert!(report.rows.len() >= 12, "only {} rows", report.rows.len());
}

#[test]
fn manual_mode_seeds_then_drives_toward_target_power() {
    let dir = tempfile::tempdir().unwrap();
    let supply = Arc::new(SpySupply::new());
    supply.set_readings(2.0, 1.0);
    let registry = Arc::new(Registry::new());
    let cfg = config(dir.path(), "1\n", "10")
        .with_run_mode(RunMode::Manual)
        .with_target_power("3");
    let mut exp = experiment(&supply, &registry, cfg);

    exp.start().unwrap();
    std::thread::sleep(Duration::from_millis(200));
    exp.kill();
    exp.join().unwrap();

    let values = supply.command_values();
    assert!(values.len() > 3, "{values:?}");
    // seed = 3 W / 1 A
    assert_eq!(values[0], 3.0);
    // power is stuck below target, so every correction is positive
    assert!(values.windows(2).all(|w| w[1] > w[0]), "{values:?}");
    // the profile never ran
    assert!(!values.contains(&1.0));
}

#[test]
fn switching_modes_resumes_the_pending_point() {
    let dir = tempfile::tempdir().unwrap();
    let supply = Arc::new(SpySupply::new());
    let registry = Arc::new(Registry::new());
    let cfg = config(dir.path(), "1\n2\n", "2").with_target_power("not a number");
    let mut exp = experiment(&supply, &registry, cfg);

    let t0 = Instant::now();
    exp.start().unwrap();
    std::thread::sleep(Duration::from_millis(200));
    exp.set_run_mode(RunMode::Manual);
    assert_eq!(exp.run_mode(), RunMode::Manual);
    std::thread::sleep(Duration::from_millis(300));
    exp.set_run_mode(RunMode::Automatic);
    let report = exp.join().unwrap();
    assert_eq!(report.outcome, RunOutcome::Completed);

    let cmds = supply.commands();
    let values: Vec<f64> = cmds.iter().map(|(v, _)| *v).collect();
    assert_eq!(values.first(), Some(&1.0));
    // unparsable target power counts as 0 W, and no current flows: seed is 0 V
    assert_eq!(values.get(1), Some(&0.0));
    let two_at = cmds.iter().find(|(v, _)| *v == 2.0).unwrap().1;
    // 1 s of run time plus 0.3 s spent in manual mode
    assert!(secs_between(t0, two_at) > 1.2);
    assert_eq!(values.last(), Some(&0.0));
}

#[test]
fn rejected_commands_do_not_abort_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let supply = Arc::new(SpySupply::new());
    supply.reject_commands(true);
    let registry = Arc::new(Registry::new());
    let mut exp = experiment(&supply, &registry, config(dir.path(), "1\n2\n", "0.4"));
    exp.start().unwrap();
    let report = exp.join().unwrap();
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(supply.command_values(), vec![1.0, 2.0, 0.0]);
    assert!(!report.rows.is_empty());
}

#[test]
fn unparsable_run_time_is_rejected_before_any_command() {
    let dir = tempfile::tempdir().unwrap();
    let supply = Arc::new(SpySupply::new());
    let registry = Arc::new(Registry::new());
    let mut exp = experiment(&supply, &registry, config(dir.path(), "1\n", "soon"));
    let err = exp.start().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ExperimentError>(),
        Some(ExperimentError::Profile(ProfileError::RunTime(_)))
    ));
    assert_eq!(supply.command_count(), 0);
    assert_eq!(exp.state(), ExperimentState::Idle);
    assert!(registry.experiment.is_vacant());
}

#[test]
fn arity_mismatch_is_rejected_before_any_command() {
    let dir = tempfile::tempdir().unwrap();
    let supply = Arc::new(SpySupply::new());
    let registry = Arc::new(Registry::new());
    let path = write_profile(dir.path(), "single.csv", "1\n2\n");
    let cfg = ExperimentConfig::new(path, dir.path(), "5").with_profile_kind(ProfileKind::OrderedPairs);
    let mut exp = experiment(&supply, &registry, cfg);
    let err = exp.start().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ExperimentError>(),
        Some(ExperimentError::Profile(ProfileError::Format { .. }))
    ));
    assert_eq!(supply.command_count(), 0);
    assert!(csv_files(dir.path()).is_empty());
}

#[test]
fn ordered_pairs_use_file_times() {
    let dir = tempfile::tempdir().unwrap();
    let supply = Arc::new(SpySupply::new());
    let registry = Arc::new(Registry::new());
    let path = write_profile(dir.path(), "pairs.csv", "1.0,0.0\n-3.0,0.3\n0.5,0.6\n");
    let cfg = ExperimentConfig::new(path, dir.path(), "100")
        .with_profile_kind(ProfileKind::OrderedPairs)
        .with_end_at_zero(false);
    let mut exp = experiment(&supply, &registry, cfg);

    let t0 = Instant::now();
    exp.start().unwrap();
    exp.join().unwrap();
    let cmds = supply.commands();
    // negative setpoints are clamped to 0
    assert_eq!(supply.command_values(), vec![1.0, 0.0, 0.5]);
    // the run ends with the last pair, not with the configured run time
    assert!(secs_between(t0, cmds[2].1) < 1.0);
}

#[test]
fn starting_twice_is_a_state_error() {
    let dir = tempfile::tempdir().unwrap();
    let supply = Arc::new(SpySupply::new());
    let registry = Arc::new(Registry::new());
    let mut exp = experiment(&supply, &registry, config(dir.path(), "1\n", "10"));
    exp.start().unwrap();
    let err = exp.start().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ExperimentError>(),
        Some(ExperimentError::State(_))
    ));
    exp.kill();
}

#[test]
fn join_without_start_is_a_state_error() {
    let dir = tempfile::tempdir().unwrap();
    let supply = Arc::new(SpySupply::new());
    let registry = Arc::new(Registry::new());
    let mut exp = experiment(&supply, &registry, config(dir.path(), "1\n", "10"));
    assert!(exp.join().is_err());
}

#[test]
fn sink_sees_reset_progress_and_final_state() {
    let dir = tempfile::tempdir().unwrap();
    let supply = Arc::new(SpySupply::new());
    let registry = Arc::new(Registry::new());
    let sink = Arc::new(RecordingSink::new());
    let mut exp = supply_core::Experiment::builder()
        .with_supply(supply.clone())
        .with_registry(registry.clone())
        .with_config(config(dir.path(), "1\n2\n3\n4\n", "0.4"))
        .with_sink(sink.clone())
        .build()
        .unwrap();
    exp.start().unwrap();
    exp.join().unwrap();

    let events = sink.events();
    assert_eq!(events[0], SinkEvent::PlotReset);
    assert_eq!(sink.progress_values(), vec![0.0, 0.25, 0.5, 0.75, 1.0, 1.0]);
    assert_eq!(
        sink.states(),
        vec![ExperimentState::Running, ExperimentState::Finished]
    );
}

#[test]
fn dropping_a_running_experiment_stops_it() {
    let dir = tempfile::tempdir().unwrap();
    let supply = Arc::new(SpySupply::new());
    let registry = Arc::new(Registry::new());
    let mut exp = experiment(&supply, &registry, config(dir.path(), "1\n2\n", "30"));
    exp.start().unwrap();
    std::thread::sleep(Duration::from_millis(50));
    drop(exp);
    assert!(registry.experiment.is_vacant());
    assert_eq!(csv_files(dir.path()).len(), 1);
}

#[test]
fn slow_commands_do_not_stall_queries_or_sampling() {
    let dir = tempfile::tempdir().unwrap();
    let supply = Arc::new(SpySupply::new());
    supply.set_command_delay(Duration::from_millis(400));
    let registry = Arc::new(Registry::new());
    let cfg = config(dir.path(), "1\n2\n", "0.4").with_end_at_zero(false);
    let mut exp = experiment(&supply, &registry, cfg);

    exp.start().unwrap();
    std::thread::sleep(Duration::from_millis(50));
    let asked = Instant::now();
    assert!(exp.is_active());
    assert_eq!(exp.state(), ExperimentState::Running);
    assert!(asked.elapsed() < Duration::from_millis(50));

    let report = exp.join().unwrap();
    assert_eq!(supply.command_values(), vec![1.0, 2.0]);
    assert!(report.rows.len() >= 6, "only {} rows", report.rows.len());
    let worst_gap = report
        .rows
        .windows(2)
        .map(|w| w[1].elapsed - w[0].elapsed)
        .fold(0.0, f64::max);
    assert!(worst_gap < 0.25, "refresh stalled for {worst_gap:.3} s");
}

#[test]
fn kill_waits_out_an_in_flight_command_and_blocks_later_ones() {
    let dir = tempfile::tempdir().unwrap();
    let supply = Arc::new(SpySupply::new());
    supply.set_command_delay(Duration::from_millis(300));
    let registry = Arc::new(Registry::new());
    let mut exp = experiment(&supply, &registry, config(dir.path(), "1\n2\n3\n", "0.3"));

    exp.start().unwrap();
    std::thread::sleep(Duration::from_millis(50));
    exp.kill();
    // The write that was under way when kill() was called has landed.
    assert_eq!(supply.command_values(), vec![1.0]);
    std::thread::sleep(Duration::from_millis(400));
    assert_eq!(supply.command_values(), vec![1.0]);
    assert_eq!(exp.join().unwrap().outcome, RunOutcome::Killed);
}

#[test]
fn target_plot_points_include_time_spent_paused() {
    let dir = tempfile::tempdir().unwrap();
    let supply = Arc::new(SpySupply::new());
    let registry = Arc::new(Registry::new());
    let sink = Arc::new(RecordingSink::new());
    let mut exp = supply_core::Experiment::builder()
        .with_supply(supply.clone())
        .with_registry(registry.clone())
        .with_config(config(dir.path(), "1\n2\n", "1").with_end_at_zero(false))
        .with_sink(sink.clone())
        .build()
        .unwrap();

    exp.start().unwrap();
    std::thread::sleep(Duration::from_millis(100));
    exp.pause();
    std::thread::sleep(Duration::from_millis(500));
    exp.unpause();
    exp.join().unwrap();

    let targets: Vec<(f64, f64)> = sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            SinkEvent::Plot(Series::Target, t, y) => Some((t, y)),
            _ => None,
        })
        .collect();
    assert_eq!(targets.len(), 2, "{targets:?}");
    assert_eq!(targets[0], (0.0, 1.0));
    // scheduled at 0.5 s of run time, plotted after a 0.5 s pause
    let (t, y) = targets[1];
    assert_eq!(y, 2.0);
    assert!((t - 1.0).abs() < 0.05, "plotted at {t}");
}
