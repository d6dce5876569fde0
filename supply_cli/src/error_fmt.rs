//! Human-readable error descriptions and structured JSON error formatting.

use supply_core::error::{BuildError, ExperimentError, ProfileError, StorageError};
use supply_hardware::error::SupplyError;

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingSupply | BuildError::MissingRegistry => format!(
                "What happened: The experiment could not be assembled ({be}).\nLikely causes: The supply failed to initialize.\nHow to fix: Run `supply self-check` and review the [instrument] section."
            ),
            BuildError::MissingConfig => {
                "What happened: No experiment settings were provided.\nLikely causes: The [experiment] section is incomplete.\nHow to fix: Set experiment.profile and experiment.storage_dir or pass --profile and --storage.".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Zero periods or non-finite PID gains in the TOML.\nHow to fix: Edit the config file, then rerun."
            ),
        };
    }

    let profile = err.downcast_ref::<ProfileError>().or_else(|| {
        match err.downcast_ref::<ExperimentError>() {
            Some(ExperimentError::Profile(p)) => Some(p),
            _ => None,
        }
    });
    if let Some(pe) = profile {
        return match pe {
            ProfileError::Read { .. } => format!(
                "What happened: {pe}.\nLikely causes: Wrong path or missing permissions.\nHow to fix: Check --profile / experiment.profile."
            ),
            ProfileError::Format { .. } => format!(
                "What happened: {pe}.\nLikely causes: The file was written for the other profile format.\nHow to fix: Toggle --ordered-pairs or fix the row."
            ),
            ProfileError::Parse { .. } => format!(
                "What happened: {pe}.\nLikely causes: A header row or a stray character.\nHow to fix: Profiles have no header; every cell must be a number."
            ),
            ProfileError::Empty => {
                "What happened: The setpoint file has no rows.\nHow to fix: Add at least one setpoint.".to_string()
            }
            ProfileError::RunTime(_) => format!(
                "What happened: {pe}.\nHow to fix: Pass --time with a positive number of seconds."
            ),
        };
    }

    let storage = err.downcast_ref::<StorageError>().or_else(|| {
        match err.downcast_ref::<ExperimentError>() {
            Some(ExperimentError::Storage(s)) => Some(s),
            _ => None,
        }
    });
    if let Some(se) = storage {
        return format!(
            "What happened: {se}.\nLikely causes: The storage directory is missing or read-only.\nHow to fix: Create the directory or pass --storage."
        );
    }

    if let Some(ee) = err.downcast_ref::<ExperimentError>() {
        return match ee {
            ExperimentError::Config(msg) => format!(
                "What happened: Configuration is incomplete ({msg}).\nHow to fix: Edit the TOML config or pass the matching command-line option."
            ),
            ExperimentError::Instrument(msg) => format!(
                "What happened: The supply rejected a command ({msg}).\nLikely causes: Lost connection or an out-of-range value.\nHow to fix: Run `supply self-check`."
            ),
            other => format!(
                "What happened: {other}.\nHow to fix: Re-run with --log-level=debug for more detail."
            ),
        };
    }

    if let Some(SupplyError::Timeout) = err.downcast_ref::<SupplyError>() {
        return "What happened: The supply did not connect in time.\nLikely causes: Wrong address or the instrument is off.\nHow to fix: Check [instrument] address and the network link.".to_string();
    }

    // String-based heuristics for errors coming from config loading
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();
    if lower.contains("read config") || lower.contains("parse config") {
        return format!(
            "What happened: The config file could not be loaded.\nHow to fix: Check the path and TOML syntax. Original: {msg}"
        );
    }
    if lower.contains("must be") {
        return format!(
            "What happened: Configuration is invalid ({msg}).\nHow to fix: Edit the TOML config and try again."
        );
    }

    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if err.downcast_ref::<BuildError>().is_some() {
        return "Build";
    }
    if err.downcast_ref::<ProfileError>().is_some() {
        return "Profile";
    }
    if err.downcast_ref::<StorageError>().is_some() {
        return "Storage";
    }
    match err.downcast_ref::<ExperimentError>() {
        Some(ExperimentError::Config(_)) => "Config",
        Some(ExperimentError::Profile(_)) => "Profile",
        Some(ExperimentError::Storage(_)) => "Storage",
        Some(ExperimentError::State(_)) => "State",
        Some(ExperimentError::Instrument(_)) => "Instrument",
        None if err.downcast_ref::<SupplyError>().is_some() => "Instrument",
        None => "Error",
    }
}

/// Stable exit codes per error family; anything unrecognised returns 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match reason_name(err) {
        "Profile" => 3,
        "Config" | "Build" => 4,
        "Storage" => 5,
        "Instrument" => 6,
        _ => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    serde_json::json!({
        "reason": reason_name(err),
        "error": err.to_string(),
        "message": humanize(err),
    })
    .to_string()
}
