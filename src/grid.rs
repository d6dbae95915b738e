//! Reduction of observation records to the canonical time/depth grid the simulator must output.
use crate::error::configuration_error;
use crate::input::{input_err_msg, is_sorted_and_unique};
use crate::observation::ObservationRecord;
use crate::time::{add_burn_in, days_since_year};
use anyhow::{Context, Result, ensure};
use chrono::{DateTime, TimeDelta, Utc};
use itertools::Itertools;
use log::info;
use std::fmt::Write;
use std::fs;
use std::path::Path;

/// File listing the depths the simulator should output
pub const DEPTHS_FILE_NAME: &str = "z_out.dat";

/// File listing the times the simulator should output
pub const TIMES_FILE_NAME: &str = "t_out.dat";

/// The time window of the simulation and the limits of usable observations
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationWindow {
    /// Start of the simulation
    pub start: DateTime<Utc>,
    /// End of the simulation
    pub end: DateTime<Utc>,
    /// Length of the burn-in period in days, or `None` for one year
    pub burn_in_days: Option<f64>,
    /// Depth of the deepest point of the lake (positive down)
    pub max_depth: f64,
}

/// The sorted, de-duplicated times and depths at which observations exist
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalGrid {
    times: Vec<DateTime<Utc>>,
    depths: Vec<f64>,
}

impl CanonicalGrid {
    /// Build the grid from every row of `records`.
    ///
    /// Fails if the observations cover fewer than two depths, which the simulator's output request
    /// format cannot express.
    pub fn from_records(records: &[ObservationRecord]) -> Result<CanonicalGrid> {
        let rows = || records.iter().flat_map(|record| record.rows.iter());
        let times = rows().map(|row| row.time).sorted().dedup().collect_vec();
        let depths = rows()
            .map(|row| row.depth)
            .sorted_by(f64::total_cmp)
            .dedup()
            .collect_vec();

        ensure!(
            depths.len() >= 2,
            configuration_error!(
                "There is a single output depth ({} distinct depths found), probably because there \
                are observations only at one depth. This will be misunderstood by the simulator.",
                depths.len()
            )
        );
        debug_assert!(is_sorted_and_unique(&depths));

        Ok(CanonicalGrid { times, depths })
    }

    /// Observation times in ascending order
    pub fn times(&self) -> &[DateTime<Utc>] {
        &self.times
    }

    /// Observation depths in ascending order (surface first)
    pub fn depths(&self) -> &[f64] {
        &self.depths
    }

    /// Observation depths in descending order (bottom first), the order of simulator output columns
    pub fn depths_descending(&self) -> Vec<f64> {
        self.depths.iter().rev().copied().collect()
    }

    /// The position of `time` in [`Self::times`]
    pub fn time_index(&self, time: DateTime<Utc>) -> Option<usize> {
        self.times.binary_search(&time).ok()
    }

    /// The position of `depth` in [`Self::depths_descending`]
    pub fn descending_depth_index(&self, depth: f64) -> Option<usize> {
        let ascending = self
            .depths
            .binary_search_by(|probe| probe.total_cmp(&depth))
            .ok()?;
        Some(self.depths.len() - 1 - ascending)
    }

    /// Contents of the depth request file.
    ///
    /// Depths are written negative-down with two decimals.
    pub fn depths_file_contents(&self) -> String {
        let mut out = String::from("output depths\n");
        for depth in &self.depths {
            writeln!(&mut out, "{:.2}", -depth.abs()).unwrap();
        }
        out
    }

    /// Contents of the time request file.
    ///
    /// Times are written as fractional days since the start of `reference_year` with four decimals.
    pub fn times_file_contents(&self, reference_year: i32) -> Result<String> {
        let mut out = String::from("output times\n");
        for time in &self.times {
            writeln!(&mut out, "{:.4}", days_since_year(*time, reference_year)?).unwrap();
        }
        Ok(out)
    }

    /// Write the depth and time request files into `folder`
    pub fn write_output_requests(&self, folder: &Path, reference_year: i32) -> Result<()> {
        let depths_path = folder.join(DEPTHS_FILE_NAME);
        fs::write(&depths_path, self.depths_file_contents())
            .with_context(|| format!("Failed to write {}", depths_path.display()))?;

        let times_path = folder.join(TIMES_FILE_NAME);
        fs::write(&times_path, self.times_file_contents(reference_year)?)
            .with_context(|| format!("Failed to write {}", times_path.display()))?;

        Ok(())
    }
}

/// The result of planning the simulation's outputs
#[derive(Debug, Clone, PartialEq)]
pub struct GridPlan {
    /// The grid the simulator must output
    pub grid: CanonicalGrid,
    /// The observations which fall on the grid
    pub records: Vec<ObservationRecord>,
    /// A new, earlier simulation end when the observations stop well before the configured end
    pub shortened_end: Option<DateTime<Utc>>,
}

/// Trim observations to the usable part of the simulation and derive the grid from them.
///
/// Observations taken during the burn-in period, after the end of the simulation or deeper than
/// the lake are dropped.
pub fn plan_grid(records: &[ObservationRecord], window: &SimulationWindow) -> Result<GridPlan> {
    let first_usable = add_burn_in(window.start, window.burn_in_days)?;
    match window.burn_in_days {
        Some(days) => info!("Using burn in period of {days} days"),
        None => info!("\"burn_in_days\" not defined in calibration_options, using default of 1 year"),
    }

    let records = records
        .iter()
        .map(|record| {
            record.filtered(|row| {
                (first_usable..=window.end).contains(&row.time)
                    && (0.0..=window.max_depth).contains(&row.depth)
            })
        })
        .collect_vec();

    for record in &records {
        ensure!(
            !record.rows.is_empty(),
            configuration_error!(
                "No {} observations remain between {first_usable} and {} above {} m",
                record.variable,
                window.end,
                window.max_depth
            )
        );
    }

    let grid = CanonicalGrid::from_records(&records)?;

    // If the observations stop early, there is no need to simulate past them
    let shortened_end = grid
        .times()
        .last()
        .map(|last| *last + TimeDelta::days(1))
        .filter(|new_end| *new_end < window.end);

    Ok(GridPlan {
        grid,
        records,
        shortened_end,
    })
}

/// Read the maximum depth of the lake from a bathymetry file.
///
/// The file has one header line followed by whitespace-separated columns, the first of which is
/// depth (negative down).
pub fn read_max_depth(file_path: &Path) -> Result<f64> {
    let contents = fs::read_to_string(file_path).with_context(|| input_err_msg(file_path))?;
    let depths: Vec<f64> = contents
        .lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let field = line.split_whitespace().next().unwrap_or_default();
            field
                .parse::<f64>()
                .with_context(|| format!("Invalid depth in bathymetry: {field}"))
        })
        .collect::<Result<_>>()
        .with_context(|| input_err_msg(file_path))?;

    let min = depths
        .into_iter()
        .min_by(f64::total_cmp)
        .with_context(|| format!("No depths found in {}", file_path.display()))?;

    Ok(min.abs())
}
