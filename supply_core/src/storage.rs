//! Result log persistence.
//!
//! Rows are encoded as CSV with a fixed header and written once per run to a
//! timestamped file inside the storage directory. Failures go to a caller
//! supplied handler which decides whether to retry, retry elsewhere, or give
//! the data up. Giving up is logged, never silent.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::atomic::write_atomic;
use crate::error::StorageError;

pub const CSV_HEADER: [&str; 5] = [
    "Elapsed Time",
    "Target Voltage",
    "Actual Voltage",
    "Current",
    "Power",
];

/// Upper bound on handler-driven retries for a single run.
pub const MAX_SAVE_ATTEMPTS: usize = 16;

/// One refresh tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DataRow {
    pub elapsed: f64,
    pub target_voltage: f64,
    pub actual_voltage: f64,
    pub current: f64,
    pub power: f64,
}

impl DataRow {
    fn fields(&self) -> [String; 5] {
        [
            self.elapsed.to_string(),
            self.target_voltage.to_string(),
            self.actual_voltage.to_string(),
            self.current.to_string(),
            self.power.to_string(),
        ]
    }
}

/// Operator answer to a failed save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageDecision {
    Retry,
    RetryIn(PathBuf),
    Discard,
}

pub type StorageHandler = Box<dyn FnMut(&StorageError) -> StorageDecision + Send>;

pub fn encode_csv(rows: &[DataRow]) -> Result<Vec<u8>, StorageError> {
    let mut w = csv::Writer::from_writer(Vec::new());
    w.write_record(CSV_HEADER)
        .map_err(|e| StorageError::Encode(e.to_string()))?;
    for row in rows {
        w.write_record(row.fields())
            .map_err(|e| StorageError::Encode(e.to_string()))?;
    }
    w.into_inner()
        .map_err(|e| StorageError::Encode(e.to_string()))
}

pub fn result_file_name(at: DateTime<Local>) -> String {
    format!("experiment-{}.csv", at.format("%Y-%m-%d_%H-%M-%S"))
}

/// First free name in `dir`, appending `-1`, `-2`, ... to the stem on collision.
pub fn unique_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }
    let stem = file_name.strip_suffix(".csv").unwrap_or(file_name);
    (1u32..)
        .map(|n| dir.join(format!("{stem}-{n}.csv")))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

/// Write `rows` to a fresh timestamped file in `dir`.
pub fn save(dir: &Path, rows: &[DataRow]) -> Result<PathBuf, StorageError> {
    if !dir.is_dir() {
        return Err(StorageError::MissingDir(dir.to_path_buf()));
    }
    let bytes = encode_csv(rows)?;
    let path = unique_path(dir, &result_file_name(Local::now()));
    write_atomic(&path, &bytes).map_err(|e| StorageError::Write {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    Ok(path)
}

/// Save with operator-driven retries. Returns the written path, or `None` when
/// the data was discarded.
pub fn persist(
    dir: &Path,
    rows: &[DataRow],
    handler: &mut dyn FnMut(&StorageError) -> StorageDecision,
) -> Option<PathBuf> {
    let mut dir = dir.to_path_buf();
    for attempt in 1..=MAX_SAVE_ATTEMPTS {
        let err = match save(&dir, rows) {
            Ok(path) => {
                tracing::info!(path = %path.display(), rows = rows.len(), "results saved");
                return Some(path);
            }
            Err(e) => e,
        };
        tracing::warn!(error = %err, attempt, "saving results failed");
        match handler(&err) {
            StorageDecision::Retry => {}
            StorageDecision::RetryIn(next) => dir = next,
            StorageDecision::Discard => {
                tracing::warn!(rows = rows.len(), "results discarded by operator");
                return None;
            }
        }
    }
    tracing::error!(
        rows = rows.len(),
        attempts = MAX_SAVE_ATTEMPTS,
        "giving up on saving results"
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(t: f64) -> DataRow {
        DataRow {
            elapsed: t,
            target_voltage: 2.0,
            actual_voltage: 1.5,
            current: 0.15,
            power: 0.225,
        }
    }

    #[test]
    fn header_and_rows() {
        let bytes = encode_csv(&[row(0.0), row(0.1)]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("Elapsed Time,Target Voltage,Actual Voltage,Current,Power")
        );
        assert_eq!(lines.next(), Some("0,2,1.5,0.15,0.225"));
        assert_eq!(lines.count(), 1);
    }

    #[test]
    fn file_name_carries_timestamp() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).single().unwrap();
        assert_eq!(result_file_name(at), "experiment-2024-03-09_07-05-01.csv");
    }

    #[test]
    fn collisions_get_a_suffix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.csv"), "").unwrap();
        std::fs::write(dir.path().join("a-1.csv"), "").unwrap();
        assert_eq!(unique_path(dir.path(), "a.csv"), dir.path().join("a-2.csv"));
    }

    #[test]
    fn missing_dir_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("gone");
        assert_eq!(
            save(&gone, &[row(0.0)]).unwrap_err(),
            StorageError::MissingDir(gone)
        );
    }

    #[test]
    fn retry_in_other_dir_succeeds() {
        let good = tempfile::tempdir().unwrap();
        let target = good.path().to_path_buf();
        let mut asked = 0;
        let mut handler = |_: &StorageError| {
            asked += 1;
            StorageDecision::RetryIn(target.clone())
        };
        let saved = persist(Path::new("/definitely/not/here"), &[row(0.0)], &mut handler);
        assert_eq!(asked, 1);
        assert!(saved.unwrap().starts_with(good.path()));
    }

    #[test]
    fn discard_returns_none() {
        let mut handler = |_: &StorageError| StorageDecision::Discard;
        assert!(persist(Path::new("/definitely/not/here"), &[], &mut handler).is_none());
    }

    #[test]
    fn endless_retry_is_capped() {
        let mut asked = 0;
        let mut handler = |_: &StorageError| {
            asked += 1;
            StorageDecision::Retry
        };
        assert!(persist(Path::new("/definitely/not/here"), &[], &mut handler).is_none());
        assert_eq!(asked, MAX_SAVE_ATTEMPTS);
    }
}
