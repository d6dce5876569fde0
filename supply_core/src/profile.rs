//! Setpoint schedules loaded from headerless CSV.
//!
//! Two layouts are supported:
//! - evenly spaced: one value per row, row `i` of `N` fires at `T * i / N`
//!   where `T` is the current run-time entry;
//! - ordered pairs: `value,time` rows used verbatim.
//!
//! Loading is strict. A row with the wrong number of columns, a cell that is
//! not a finite number, or an empty file is an error and leaves the profile
//! with zero points.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::entry::TextEntry;
use crate::error::ProfileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProfileKind {
    #[default]
    EvenlySpaced,
    OrderedPairs,
}

impl ProfileKind {
    /// Number of columns each row must have.
    pub fn columns(self) -> usize {
        match self {
            ProfileKind::EvenlySpaced => 1,
            ProfileKind::OrderedPairs => 2,
        }
    }
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProfileKind::EvenlySpaced => "evenly spaced",
            ProfileKind::OrderedPairs => "ordered pairs",
        })
    }
}

/// One scheduled command: drive the supply to `value` once `at` seconds of
/// run time have elapsed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetPoint {
    pub index: usize,
    pub value: f64,
    pub at: f64,
}

#[derive(Debug, Clone)]
pub struct Profile {
    path: PathBuf,
    kind: ProfileKind,
    run_time: TextEntry,
    values: Vec<f64>,
    /// Verbatim times for ordered pairs; re-derived for evenly spaced.
    times: Vec<f64>,
    /// Points handed out by the current iteration.
    emitted: usize,
}

impl Profile {
    /// An unloaded profile bound to `path`; call [`Profile::reload`] to read it.
    pub fn new(path: impl Into<PathBuf>, kind: ProfileKind, run_time: TextEntry) -> Self {
        Self {
            path: path.into(),
            kind,
            run_time,
            values: Vec::new(),
            times: Vec::new(),
            emitted: 0,
        }
    }

    pub fn load(
        path: impl Into<PathBuf>,
        kind: ProfileKind,
        run_time: TextEntry,
    ) -> Result<Self, ProfileError> {
        let mut profile = Self::new(path, kind, run_time);
        profile.reload()?;
        Ok(profile)
    }

    /// Parse from any reader; the resulting profile has an empty path.
    pub fn from_reader<R: Read>(
        reader: R,
        kind: ProfileKind,
        run_time: TextEntry,
    ) -> Result<Self, ProfileError> {
        let mut profile = Self::new(PathBuf::new(), kind, run_time);
        let rows = parse_rows(reader, kind, Path::new(""))?;
        profile.install(rows)?;
        Ok(profile)
    }

    /// Re-read the file. On failure the profile is left with zero points.
    pub fn reload(&mut self) -> Result<(), ProfileError> {
        self.clear();
        let file = std::fs::File::open(&self.path).map_err(|e| ProfileError::Read {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        let rows = parse_rows(file, self.kind, &self.path)?;
        self.install(rows)
    }

    fn install(&mut self, rows: Vec<(f64, f64)>) -> Result<(), ProfileError> {
        self.clear();
        if rows.is_empty() {
            return Err(ProfileError::Empty);
        }
        let (values, times): (Vec<f64>, Vec<f64>) = rows.into_iter().unzip();
        self.values = values;
        self.times = times;
        if self.kind == ProfileKind::EvenlySpaced
            && let Err(e) = self.respace()
        {
            self.clear();
            return Err(e);
        }
        tracing::debug!(
            points = self.values.len(),
            kind = %self.kind,
            path = %self.path.display(),
            "profile loaded"
        );
        Ok(())
    }

    fn clear(&mut self) {
        self.values.clear();
        self.times.clear();
        self.emitted = 0;
    }

    /// Recompute evenly spaced times from the current run-time entry.
    fn respace(&mut self) -> Result<(), ProfileError> {
        let total = self.total_time()?;
        let step = total / self.values.len() as f64;
        self.times = (0..self.values.len()).map(|i| step * i as f64).collect();
        Ok(())
    }

    fn total_time(&self) -> Result<f64, ProfileError> {
        match self.run_time.parse_f64() {
            Some(t) if t > 0.0 => Ok(t),
            _ => Err(ProfileError::RunTime(self.run_time.get())),
        }
    }

    /// Restart iteration from the first point.
    ///
    /// Evenly spaced schedules are re-derived from the run-time entry as it
    /// reads now, so editing the run time between runs changes the spacing.
    pub fn iter(&mut self) -> Result<ProfileIter<'_>, ProfileError> {
        if self.values.is_empty() {
            return Err(ProfileError::Empty);
        }
        if self.kind == ProfileKind::EvenlySpaced {
            self.respace()?;
        }
        self.emitted = 0;
        Ok(ProfileIter { profile: self })
    }

    pub fn kind(&self) -> ProfileKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn setpoint_values(&self) -> &[f64] {
        &self.values
    }

    pub fn time_values(&self) -> &[f64] {
        &self.times
    }

    pub fn points(&self) -> Vec<(f64, f64)> {
        self.values
            .iter()
            .copied()
            .zip(self.times.iter().copied())
            .collect()
    }

    /// Fraction of points handed out by the current iteration.
    pub fn progress(&self) -> f64 {
        if self.emitted == 0 {
            return 0.0;
        }
        self.progress_at(self.emitted - 1)
    }

    /// `(index + 1) / N`, clamped to `[0, 1]`. An unloaded profile reports 0.
    pub fn progress_at(&self, index: usize) -> f64 {
        let n = self.values.len();
        if n == 0 {
            return 0.0;
        }
        ((index as f64 + 1.0) / n as f64).clamp(0.0, 1.0)
    }
}

/// Lazy walk over a loaded profile; obtained from [`Profile::iter`].
#[derive(Debug)]
pub struct ProfileIter<'a> {
    profile: &'a mut Profile,
}

impl ProfileIter<'_> {
    pub fn progress(&self) -> f64 {
        self.profile.progress()
    }

    pub fn len(&self) -> usize {
        self.profile.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profile.is_empty()
    }
}

impl Iterator for ProfileIter<'_> {
    type Item = SetPoint;

    fn next(&mut self) -> Option<SetPoint> {
        let p = &mut *self.profile;
        let index = p.emitted;
        let value = *p.values.get(index)?;
        let at = p.times.get(index).copied().unwrap_or(0.0);
        p.emitted += 1;
        Some(SetPoint { index, value, at })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.profile.len().saturating_sub(self.profile.emitted);
        (left, Some(left))
    }
}

/// Read `(value, time)` rows; for evenly spaced files the time is a placeholder.
fn parse_rows<R: Read>(
    reader: R,
    kind: ProfileKind,
    path: &Path,
) -> Result<Vec<(f64, f64)>, ProfileError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let expected = kind.columns();
    let mut rows = Vec::new();
    for rec in rdr.records() {
        let rec = rec.map_err(|e| ProfileError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let line = rec.position().map(|p| p.line()).unwrap_or(0);
        if rec.iter().all(str::is_empty) {
            continue;
        }
        if rec.len() != expected {
            return Err(ProfileError::Format {
                line,
                kind,
                expected,
                found: rec.len(),
            });
        }
        let mut cells = [0.0f64; 2];
        for (column, cell) in rec.iter().enumerate() {
            cells[column] = cell
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| ProfileError::Parse {
                    line,
                    column: column + 1,
                    cell: cell.to_string(),
                })?;
        }
        rows.push((cells[0], cells[1]));
    }
    Ok(rows)
}
