use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod console;
mod error_fmt;
mod run;

use cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use error_fmt::{exit_code_for_error, format_error_json, humanize};
use run::RunOverrides;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    let _ = color_eyre::install();

    match real_main(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            if cli::json_mode() {
                eprintln!("{}", format_error_json(&e));
            } else {
                eprintln!("{}", humanize(&e));
            }
            let code = u8::try_from(exit_code_for_error(&e)).unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

fn real_main(cli: Cli) -> eyre::Result<()> {
    let mut cfg = match &cli.config {
        Some(path) => supply_config::load_file(path)?,
        None => supply_config::Config::default(),
    };
    init_tracing(&cli, &cfg.logging)?;

    match cli.cmd {
        Commands::Run {
            profile,
            storage,
            manual,
            target_power,
            no_reset,
            no_prompt,
        } => {
            let overrides = RunOverrides {
                profile: Some(profile),
                storage,
                manual,
                target_power,
                no_reset,
            };
            run::apply_overrides(&mut cfg, &overrides)?;
            cfg.validate()?;

            let shutdown = Arc::new(AtomicBool::new(false));
            let flag = shutdown.clone();
            ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))?;

            let report = run::run_experiment(&cfg, no_prompt, &shutdown)?;
            run::print_report(&report);
            Ok(())
        }
        Commands::CheckProfile { profile } => {
            let overrides = RunOverrides {
                profile: Some(profile),
                ..RunOverrides::default()
            };
            run::apply_overrides(&mut cfg, &overrides)?;
            cfg.validate()?;
            run::check_profile(&cfg)
        }
        Commands::SelfCheck => {
            cfg.validate()?;
            run::self_check(&cfg)
        }
    }
}

/// Console layer on stderr plus an optional JSON-lines file layer.
fn init_tracing(cli: &Cli, logging: &supply_config::Logging) -> eyre::Result<()> {
    let level = cli
        .log_level
        .clone()
        .or_else(|| logging.level.clone())
        .unwrap_or_else(|| "warn".to_string());
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&level))?;

    let console = if cli.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let file = match logging.file.as_deref() {
        Some(path) => {
            let path = std::path::Path::new(path);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| eyre::eyre!("logging.file {} has no file name", path.display()))?;
            let appender = match logging.rotation.as_deref() {
                Some("daily") => tracing_appender::rolling::daily(dir, name),
                Some("hourly") => tracing_appender::rolling::hourly(dir, name),
                _ => tracing_appender::rolling::never(dir, name),
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()?;
    Ok(())
}
