#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use supply_core::mocks::SpySupply;
use supply_core::{Experiment, ExperimentConfig};
use supply_traits::Registry;

pub fn write_profile(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, text).unwrap();
    path
}

/// Evenly spaced profile stored in `dir`, results into `dir` as well.
pub fn config(dir: &Path, profile: &str, run_time: &str) -> ExperimentConfig {
    let path = write_profile(dir, "profile.csv", profile);
    ExperimentConfig::new(path, dir, run_time).with_refresh(Duration::from_millis(100))
}

pub fn experiment(
    supply: &Arc<SpySupply>,
    registry: &Arc<Registry>,
    config: ExperimentConfig,
) -> Experiment {
    Experiment::builder()
        .with_supply(supply.clone())
        .with_registry(registry.clone())
        .with_config(config)
        .build()
        .unwrap()
}

pub fn csv_files(dir: &Path) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("experiment-") && n.ends_with(".csv"))
        })
        .collect();
    out.sort();
    out
}
