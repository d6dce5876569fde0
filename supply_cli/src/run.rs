//! Command implementations: config mapping, supply assembly, run supervision.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use eyre::WrapErr;
use supply_config::Config;
use supply_core::{
    Experiment, ExperimentConfig, ExperimentError, Profile, ProfileKind, RunMode, RunReport,
    TextEntry,
};
use supply_hardware::util::wait_until;
use supply_hardware::{SimParams, SimulatedSupply};
use supply_traits::{PowerSupply, Registry};

use crate::cli::{ProfileArgs, json_mode};
use crate::console::{ConsoleSink, prompt_storage};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
pub struct RunOverrides {
    pub profile: Option<ProfileArgs>,
    pub storage: Option<std::path::PathBuf>,
    pub manual: bool,
    pub target_power: Option<f64>,
    pub no_reset: bool,
}

fn apply_profile_args(cfg: &mut Config, args: &ProfileArgs) -> eyre::Result<()> {
    if let Some(p) = &args.profile {
        cfg.experiment.profile = Some(p.clone());
    }
    if let Some(t) = &args.time {
        cfg.experiment.test_time_s = t.trim().parse::<f64>().map_err(|_| {
            ExperimentError::from(supply_core::ProfileError::RunTime(t.clone()))
        })?;
    }
    if args.ordered_pairs {
        cfg.experiment.profile_kind = supply_config::ProfileKind::OrderedPairs;
    }
    Ok(())
}

/// Fold command-line overrides into the loaded config.
pub fn apply_overrides(cfg: &mut Config, o: &RunOverrides) -> eyre::Result<()> {
    if let Some(p) = &o.profile {
        apply_profile_args(cfg, p)?;
    }
    if let Some(dir) = &o.storage {
        cfg.experiment.storage_dir = Some(dir.clone());
    }
    if o.manual {
        cfg.experiment.mode = supply_config::RunMode::Manual;
    }
    if let Some(w) = o.target_power {
        cfg.pid.target_power_w = w;
    }
    if o.no_reset {
        cfg.experiment.reset_voltage = false;
    }
    Ok(())
}

fn sim_params(cfg: &Config) -> SimParams {
    SimParams {
        address: cfg.instrument.address.clone(),
        load_ohms: cfg.simulation.load_ohms,
        response: Duration::from_millis(cfg.simulation.response_ms),
        poll: Duration::from_millis(cfg.instrument.poll_ms),
        current_limit: cfg.instrument.current_limit_a,
    }
}

/// Bring up the simulated supply and apply the configured current limit.
pub fn connect_supply(cfg: &Config, registry: &Arc<Registry>) -> eyre::Result<Arc<SimulatedSupply>> {
    let supply = Arc::new(SimulatedSupply::new(sim_params(cfg)));
    supply.try_connect(registry)?;
    wait_until(
        || supply.is_connected(),
        CONNECT_TIMEOUT,
        Duration::from_millis(5),
    )?;
    supply.apply_current_limit(cfg.instrument.current_limit_a)?;
    tracing::info!(
        address = %cfg.instrument.address,
        current_limit_a = cfg.instrument.current_limit_a,
        "supply ready"
    );
    Ok(supply)
}

pub fn run_experiment(
    cfg: &Config,
    no_prompt: bool,
    shutdown: &Arc<AtomicBool>,
) -> eyre::Result<RunReport> {
    let exp_cfg = ExperimentConfig::try_from(cfg)?;
    let registry = Arc::new(Registry::new());
    let supply = connect_supply(cfg, &registry)?;

    let json = json_mode();
    let mut builder = Experiment::builder()
        .with_supply(supply.clone())
        .with_registry(registry)
        .with_config(exp_cfg)
        .with_sink(Arc::new(ConsoleSink::new(json)));
    if !no_prompt {
        builder = builder.with_storage_handler(prompt_storage(
            std::io::BufReader::new(std::io::stdin()),
            std::io::stderr(),
        ));
    }
    let mut experiment = builder.build()?;

    experiment.start()?;
    while !experiment.state().is_terminal() {
        if shutdown.load(Ordering::Relaxed) {
            tracing::warn!("interrupted, killing experiment");
            experiment.kill();
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    let report = experiment.join()?;
    supply.kill();
    Ok(report)
}

pub fn print_report(report: &RunReport) {
    let saved = report
        .saved_to
        .as_ref()
        .map(|p| p.display().to_string());
    if json_mode() {
        println!(
            "{}",
            serde_json::json!({
                "event": "report",
                "outcome": report.outcome.to_string(),
                "rows": report.rows.len(),
                "saved_to": saved,
            })
        );
    } else {
        println!("Experiment {} ({} rows).", report.outcome, report.rows.len());
        match saved {
            Some(p) => println!("Results saved to {p}"),
            None => println!("Results were not saved."),
        }
    }
}

/// Load the profile described by `cfg` and print its schedule.
pub fn check_profile(cfg: &Config) -> eyre::Result<()> {
    let exp = &cfg.experiment;
    let path = exp
        .profile
        .clone()
        .ok_or_else(|| ExperimentError::Config("experiment.profile is not set".into()))?;
    let kind = ProfileKind::from(exp.profile_kind);
    let profile = Profile::load(&path, kind, TextEntry::from(exp.test_time_s))
        .map_err(ExperimentError::from)?;
    let points = profile.points();

    if json_mode() {
        let rows: Vec<_> = points
            .iter()
            .map(|(v, t)| serde_json::json!({ "value": v, "at": t }))
            .collect();
        println!(
            "{}",
            serde_json::json!({ "kind": kind.to_string(), "points": rows })
        );
    } else {
        println!(
            "{}: {} setpoints ({kind})",
            path.display(),
            points.len()
        );
        for (v, t) in &points {
            println!("  t={t:>9.3} s  {v:>9.3} V");
        }
    }
    Ok(())
}

pub fn self_check(cfg: &Config) -> eyre::Result<()> {
    let registry = Arc::new(Registry::new());
    let supply = connect_supply(cfg, &registry).wrap_err("supply did not come up")?;
    supply
        .set_voltage(0.0)
        .map_err(|e| ExperimentError::Instrument(e.to_string()))?;
    let idn = supply.idn().unwrap_or_default();
    if json_mode() {
        println!(
            "{}",
            serde_json::json!({ "connected": true, "idn": idn, "mode": run_mode_name(cfg) })
        );
    } else {
        println!("connected: {idn}");
    }
    supply.kill();
    Ok(())
}

fn run_mode_name(cfg: &Config) -> &'static str {
    match RunMode::from(cfg.experiment.mode) {
        RunMode::Automatic => "automatic",
        RunMode::Manual => "manual",
    }
}
