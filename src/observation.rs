//! Loading observation files into per-variable, time-sorted tables.
use crate::arguments::ObservationSource;
use crate::error::configuration_error;
use crate::input::{input_err_msg, read_csv};
use crate::time::deserialise_timestamp;
use anyhow::{Context, Result, ensure};
use chrono::{DateTime, Utc};
use log::debug;
use serde::Deserialize;
use std::path::{Path, PathBuf};

fn default_weight() -> f64 {
    1.0
}

/// A row of an observation CSV file
#[derive(Debug, Deserialize)]
struct ObservationRaw {
    #[serde(deserialize_with = "deserialise_timestamp")]
    time: DateTime<Utc>,
    depth: Option<f64>,
    value: f64,
    #[serde(default = "default_weight")]
    weight: f64,
}

/// A single observed value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    /// When the value was observed
    pub time: DateTime<Utc>,
    /// Depth below the surface in metres (positive down)
    pub depth: f64,
    /// The observed value
    pub value: f64,
    /// How much the observation counts towards the error
    pub weight: f64,
}

/// The observations for one objective variable
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationRecord {
    /// The objective variable observed (e.g. "temperature")
    pub variable: String,
    /// The file the observations came from
    pub file: PathBuf,
    /// Start of the window the observations were filtered to
    pub start: DateTime<Utc>,
    /// End of the window the observations were filtered to
    pub end: DateTime<Utc>,
    /// Observations, sorted by time
    pub rows: Vec<Observation>,
}

impl ObservationRecord {
    /// Read the observation file described by `source`.
    ///
    /// Rows outside the source's time window or without a depth are dropped.
    pub fn from_source(source: &ObservationSource) -> Result<ObservationRecord> {
        let raw: Vec<ObservationRaw> = read_csv(&source.file)?;
        let rows = observations_from_iter(raw.into_iter(), source.start, source.end);
        ensure!(
            !rows.is_empty(),
            "No {} observations between {} and {} in {}",
            source.parameter,
            source.start,
            source.end,
            source.file.display()
        );

        Ok(ObservationRecord {
            variable: source.parameter.clone(),
            file: source.file.clone(),
            start: source.start,
            end: source.end,
            rows,
        })
    }

    /// Build a record from rows which are already loaded
    pub fn from_rows(variable: &str, mut rows: Vec<Observation>) -> ObservationRecord {
        rows.sort_by_key(|row| row.time);
        let start = rows.first().map_or(DateTime::<Utc>::MIN_UTC, |row| row.time);
        let end = rows.last().map_or(DateTime::<Utc>::MAX_UTC, |row| row.time);
        ObservationRecord {
            variable: variable.to_string(),
            file: PathBuf::new(),
            start,
            end,
            rows,
        }
    }

    /// A copy of this record keeping only the rows for which `keep` returns true
    pub fn filtered<F>(&self, keep: F) -> ObservationRecord
    where
        F: Fn(&Observation) -> bool,
    {
        ObservationRecord {
            rows: self.rows.iter().copied().filter(keep).collect(),
            file: self.file.clone(),
            variable: self.variable.clone(),
            start: self.start,
            end: self.end,
        }
    }
}

/// Convert raw rows into time-sorted observations within `[start, end]`
fn observations_from_iter<I>(iter: I, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Observation>
where
    I: Iterator<Item = ObservationRaw>,
{
    let mut missing_depth = 0;
    let mut rows: Vec<Observation> = iter
        .filter(|raw| (start..=end).contains(&raw.time))
        .filter_map(|raw| {
            let Some(depth) = raw.depth else {
                missing_depth += 1;
                return None;
            };
            Some(Observation {
                time: raw.time,
                depth,
                value: raw.value,
                weight: raw.weight,
            })
        })
        .collect();

    if missing_depth > 0 {
        debug!("Discarded {missing_depth} observations without a depth");
    }

    // Stable sort, so rows with equal times keep their file order
    rows.sort_by_key(|row| row.time);
    rows
}

/// Load one observation record per objective variable.
///
/// Each variable must be provided by exactly one of `sources`.
pub fn load_observations(
    objective_variables: &[String],
    sources: &[ObservationSource],
) -> Result<Vec<ObservationRecord>> {
    objective_variables
        .iter()
        .map(|variable| {
            let source = find_source(variable, sources)?;
            ObservationRecord::from_source(source).with_context(|| input_err_msg(&source.file))
        })
        .collect()
}

/// Find the only observation source for `variable`
fn find_source<'a>(variable: &str, sources: &'a [ObservationSource]) -> Result<&'a ObservationSource> {
    let mut matching = sources.iter().filter(|s| s.parameter == variable);
    let source = matching.next().ok_or_else(|| {
        configuration_error!("Cannot find {variable} observations to calculate residuals")
    })?;
    ensure!(
        matching.next().is_none(),
        configuration_error!("More than one observation source provided for {variable}")
    );

    Ok(source)
}

/// Check that a path to an observation file exists
pub fn check_source_exists(source: &ObservationSource) -> Result<()> {
    let path: &Path = &source.file;
    ensure!(
        path.is_file(),
        configuration_error!("Observation file not found at {}", path.display())
    );
    Ok(())
}
