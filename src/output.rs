//! Reading the simulator's columnar result files.
use crate::error::configuration_error;
use crate::input::input_err_msg;
use crate::time::{datetime_from_days, round_to_minute};
use anyhow::{Context, Result, ensure};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use std::path::Path;

/// Name of the time column in result files
const TIME_COLUMN: &str = "Datetime";

/// The result file, inside the results folder, holding an objective variable
pub fn output_file_name(variable: &str) -> Result<&'static str> {
    match variable {
        "temperature" => Ok("T_out.dat"),
        "salinity" => Ok("S_out.dat"),
        _ => Err(configuration_error!(
            "Objective variable {variable} is not supported. Use temperature or salinity."
        )
        .into()),
    }
}

/// Simulated values on a time-by-depth grid
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationResult {
    /// Output times in ascending order, rounded to the minute
    times: Vec<DateTime<Utc>>,
    /// Output depths in ascending order (positive down)
    depths: Vec<f64>,
    /// `values[i][j]` is the value at `times[i]` and `depths[j]`
    values: Vec<Vec<f64>>,
}

impl SimulationResult {
    /// Read a result file.
    ///
    /// The header is `Datetime` followed by the output depths (negative down). Each row holds the
    /// time, in days since the start of `reference_year`, followed by one value per depth.
    pub fn from_path(file_path: &Path, reference_year: i32) -> Result<SimulationResult> {
        SimulationResult::read(file_path, reference_year).with_context(|| input_err_msg(file_path))
    }

    fn read(file_path: &Path, reference_year: i32) -> Result<SimulationResult> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(file_path)?;

        let headers = reader.headers()?.clone();
        ensure!(
            headers.get(0) == Some(TIME_COLUMN),
            "First column must be {TIME_COLUMN}"
        );
        let depths: Vec<f64> = headers
            .iter()
            .skip(1)
            .map(|header| {
                let depth: f64 = header
                    .parse::<f64>()
                    .with_context(|| format!("Invalid depth in header: {header}"))?;
                Ok(-depth)
            })
            .collect::<Result<_>>()?;

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let mut fields = record.iter().map(|field| {
                field
                    .parse::<f64>()
                    .with_context(|| format!("Invalid number: {field}"))
            });
            let days = fields.next().context("Empty row")??;
            let values: Vec<f64> = fields.collect::<Result<_>>()?;
            ensure!(
                values.len() == depths.len(),
                "Row at day {days} has {} values, expected {}",
                values.len(),
                depths.len()
            );
            let time = round_to_minute(datetime_from_days(days, reference_year)?);
            rows.push((time, values));
        }

        Ok(SimulationResult::from_columns(depths, rows))
    }

    /// Build a result from `(time, values)` rows, with values given in the order of `depths`
    pub fn from_columns(
        depths: Vec<f64>,
        mut rows: Vec<(DateTime<Utc>, Vec<f64>)>,
    ) -> SimulationResult {
        rows.sort_by_key(|(time, _)| *time);

        // Reorder columns so depths are ascending
        let order = (0..depths.len())
            .sorted_by(|a, b| depths[*a].total_cmp(&depths[*b]))
            .collect_vec();
        let depths = order.iter().map(|j| depths[*j]).collect();
        let (times, values): (Vec<_>, Vec<_>) = rows
            .into_iter()
            .map(|(time, row)| (time, order.iter().map(|j| row[*j]).collect_vec()))
            .unzip();

        SimulationResult {
            times,
            depths,
            values,
        }
    }

    /// Output times in ascending order
    pub fn times(&self) -> &[DateTime<Utc>] {
        &self.times
    }

    /// Output depths in ascending order
    pub fn depths(&self) -> &[f64] {
        &self.depths
    }

    /// The simulated value at exactly `time` and `depth`.
    ///
    /// Depths are matched to within `tolerance`.
    pub fn value_at(&self, time: DateTime<Utc>, depth: f64, tolerance: f64) -> Option<f64> {
        let i = self.times.binary_search(&time).ok()?;
        let j = self
            .depths
            .iter()
            .position(|d| (d - depth).abs() <= tolerance)?;
        Some(self.values[i][j])
    }

    /// Index of the output time closest to `time`.
    ///
    /// Ties go to the earlier time.
    pub fn nearest_time_index(&self, time: DateTime<Utc>) -> Option<usize> {
        match self.times.binary_search(&time) {
            Ok(i) => Some(i),
            Err(0) => (!self.times.is_empty()).then_some(0),
            Err(i) if i == self.times.len() => Some(i - 1),
            Err(i) => {
                let before = time - self.times[i - 1];
                let after = self.times[i] - time;
                Some(if after < before { i } else { i - 1 })
            }
        }
    }

    /// Linearly interpolate the value at row `time_index` to `depth`.
    ///
    /// Returns `None` when `depth` lies outside the output depths.
    pub fn interpolate_depth(&self, time_index: usize, depth: f64) -> Option<f64> {
        let row = self.values.get(time_index)?;
        let first = *self.depths.first()?;
        let last = *self.depths.last()?;
        if depth < first || depth > last {
            return None;
        }

        let upper = self.depths.partition_point(|d| *d < depth);
        if self.depths[upper] == depth || upper == 0 {
            return Some(row[upper]);
        }

        let (d0, d1) = (self.depths[upper - 1], self.depths[upper]);
        let (v0, v1) = (row[upper - 1], row[upper]);
        Some(v0 + (v1 - v0) * (depth - d0) / (d1 - d0))
    }
}
