//! Alignment of simulated against observed values and the weighted RMS error.
use crate::error::{CalibrationError, configuration_error};
use crate::observation::ObservationRecord;
use crate::output::SimulationResult;
use anyhow::{Result, ensure};
use indexmap::IndexMap;
use itertools::Itertools;
use log::debug;
use serde::Serialize;

/// Tolerance for matching observation depths to output depths exactly
const DEPTH_TOLERANCE: f64 = 1e-6;

/// The only supported way of matching observation times to output times
const NEAREST_TIME: &str = "nearest";

/// The only supported way of matching observation depths to output depths
const LINEAR_DEPTH: &str = "linear";

/// How observations are matched to simulated values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentStrategy {
    /// Only use observations at exactly an output time and depth
    Exact,
    /// Use the nearest output time and interpolate linearly between output depths
    Interpolated,
}

impl AlignmentStrategy {
    /// The interpolating strategy, after checking the configured interpolation methods
    pub fn interpolated(
        time_interpolation: Option<&str>,
        depth_interpolation: Option<&str>,
    ) -> Result<AlignmentStrategy> {
        if let Some(method) = time_interpolation {
            ensure!(
                method == NEAREST_TIME,
                configuration_error!(
                    "Time interpolation method {method} is not supported. Use {NEAREST_TIME}."
                )
            );
        }
        if let Some(method) = depth_interpolation {
            ensure!(
                method == LINEAR_DEPTH,
                configuration_error!(
                    "Depth interpolation method {method} is not supported. Use {LINEAR_DEPTH}."
                )
            );
        }

        Ok(AlignmentStrategy::Interpolated)
    }
}

/// An observation paired with the simulated value at the same place and time
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedRow {
    /// The objective variable
    pub variable: String,
    /// Depth of the observation (positive down)
    pub depth: f64,
    /// Observed value
    pub observed: f64,
    /// Simulated value
    pub simulated: f64,
    /// Observation weight multiplied by the objective weight
    pub weight: f64,
}

/// Pair each observation in `record` with a simulated value
pub fn align(
    record: &ObservationRecord,
    result: &SimulationResult,
    objective_weight: f64,
    strategy: AlignmentStrategy,
) -> Vec<AlignedRow> {
    let mut skipped = 0;
    let rows = record
        .rows
        .iter()
        .filter_map(|obs| {
            let simulated = match strategy {
                AlignmentStrategy::Exact => result.value_at(obs.time, obs.depth, DEPTH_TOLERANCE),
                AlignmentStrategy::Interpolated => result
                    .nearest_time_index(obs.time)
                    .and_then(|i| result.interpolate_depth(i, obs.depth)),
            };
            let Some(simulated) = simulated else {
                skipped += 1;
                return None;
            };

            Some(AlignedRow {
                variable: record.variable.clone(),
                depth: obs.depth,
                observed: obs.value,
                simulated,
                weight: obs.weight * objective_weight,
            })
        })
        .collect_vec();

    if skipped > 0 {
        debug!(
            "{skipped} {} observations could not be matched to simulated values",
            record.variable
        );
    }

    rows
}

/// Weighted root mean square of the differences between observed and simulated values
fn weighted_rms<'a, I>(rows: I) -> Option<f64>
where
    I: IntoIterator<Item = &'a AlignedRow>,
{
    let (residuals, weights) = rows.into_iter().fold((0.0, 0.0), |(r, w), row| {
        (
            r + row.weight * (row.observed - row.simulated).powi(2),
            w + row.weight,
        )
    });

    (weights > 0.0).then(|| (residuals / weights).sqrt())
}

/// The error between simulated and observed values
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    /// Weighted RMS over every aligned row
    pub overall: f64,
    /// Weighted RMS over rows at the shallowest aligned depth
    pub surface: f64,
    /// Weighted RMS over rows at the deepest aligned depth
    pub bottom: f64,
    /// Weighted RMS of each objective variable
    pub per_variable: IndexMap<String, f64>,
    /// Number of aligned rows
    pub count: usize,
}

impl ErrorReport {
    /// Compute the error from aligned rows.
    ///
    /// Every objective variable must have aligned rows with a positive total weight.
    pub fn from_rows(rows: &[AlignedRow], objective_variables: &[String]) -> Result<ErrorReport> {
        let alignment_error = |what: &str| {
            CalibrationError::Alignment(format!(
                "No weighted observations of {what} could be matched to simulated values"
            ))
        };

        let per_variable = objective_variables
            .iter()
            .map(|variable| {
                let rms = weighted_rms(rows.iter().filter(|row| row.variable == *variable))
                    .ok_or_else(|| alignment_error(variable))?;
                Ok((variable.clone(), rms))
            })
            .collect::<Result<IndexMap<_, _>>>()?;

        let overall = weighted_rms(rows).ok_or_else(|| alignment_error("any variable"))?;
        let (min_depth, max_depth) = rows
            .iter()
            .map(|row| row.depth)
            .minmax_by(f64::total_cmp)
            .into_option()
            .ok_or_else(|| alignment_error("any variable"))?;
        let surface = weighted_rms(rows.iter().filter(|row| row.depth == min_depth))
            .ok_or_else(|| alignment_error("the surface layer"))?;
        let bottom = weighted_rms(rows.iter().filter(|row| row.depth == max_depth))
            .ok_or_else(|| alignment_error("the bottom layer"))?;

        Ok(ErrorReport {
            overall,
            surface,
            bottom,
            per_variable,
            count: rows.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::classify;
    use crate::fixture::{observation, utc};
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    fn row(variable: &str, depth: f64, observed: f64, simulated: f64) -> AlignedRow {
        AlignedRow {
            variable: variable.into(),
            depth,
            observed,
            simulated,
            weight: 1.0,
        }
    }

    fn result() -> SimulationResult {
        SimulationResult::from_columns(
            vec![10.0, 0.0],
            vec![
                (utc(2020, 1, 1), vec![4.0, 8.0]),
                (utc(2020, 1, 2), vec![5.0, 9.0]),
            ],
        )
    }

    #[test]
    fn test_rms_single_mismatch() {
        let rows = [
            row("temperature", 1.0, 1.0, 1.0),
            row("temperature", 2.0, 2.0, 2.0),
            row("temperature", 3.0, 3.0, 4.0),
        ];
        let report = ErrorReport::from_rows(&rows, &["temperature".into()]).unwrap();
        assert_approx_eq!(f64, report.overall, 0.577, epsilon = 1e-3);
        assert_approx_eq!(f64, report.surface, 0.0);
        assert_approx_eq!(f64, report.bottom, 1.0);
        assert_approx_eq!(f64, report.per_variable["temperature"], 0.577, epsilon = 1e-3);
        assert_eq!(report.count, 3);
    }

    #[test]
    fn test_rms_weights() {
        let mut rows = vec![
            row("temperature", 1.0, 1.0, 2.0),
            row("salinity", 1.0, 1.0, 1.0),
        ];
        rows[0].weight = 3.0;
        let report =
            ErrorReport::from_rows(&rows, &["temperature".into(), "salinity".into()]).unwrap();
        assert_approx_eq!(f64, report.overall, (3.0_f64 / 4.0).sqrt());
        assert_approx_eq!(f64, report.per_variable["temperature"], 1.0);
        assert_approx_eq!(f64, report.per_variable["salinity"], 0.0);
    }

    #[test]
    fn test_stratified_between_surface_and_bottom() {
        let rows = [
            row("temperature", 0.0, 10.0, 9.0),
            row("temperature", 5.0, 8.0, 8.5),
            row("temperature", 10.0, 4.0, 4.0),
        ];
        let report = ErrorReport::from_rows(&rows, &["temperature".into()]).unwrap();
        let (low, high) = if report.surface < report.bottom {
            (report.surface, report.bottom)
        } else {
            (report.bottom, report.surface)
        };
        assert!(low <= report.overall && report.overall <= high);
    }

    #[test]
    fn test_rms_no_rows_for_variable() {
        let rows = [row("temperature", 1.0, 1.0, 1.0)];
        let err =
            ErrorReport::from_rows(&rows, &["temperature".into(), "salinity".into()]).unwrap_err();
        assert!(matches!(classify(&err), Some(CalibrationError::Alignment(_))));
    }

    #[test]
    fn test_rms_zero_weight() {
        let mut rows = [row("temperature", 1.0, 1.0, 2.0)];
        rows[0].weight = 0.0;
        let err = ErrorReport::from_rows(&rows, &["temperature".into()]).unwrap_err();
        assert!(matches!(classify(&err), Some(CalibrationError::Alignment(_))));
    }

    #[test]
    fn test_align_exact() {
        let record = ObservationRecord::from_rows(
            "temperature",
            vec![
                observation(utc(2020, 1, 1), 0.0, 7.0),
                // Not an output depth
                observation(utc(2020, 1, 1), 5.0, 7.0),
                // Not an output time
                observation(utc(2020, 1, 3), 10.0, 7.0),
            ],
        );
        let rows = align(&record, &result(), 2.0, AlignmentStrategy::Exact);
        assert_eq!(
            rows,
            [AlignedRow {
                variable: "temperature".into(),
                depth: 0.0,
                observed: 7.0,
                simulated: 8.0,
                weight: 2.0,
            }]
        );
    }

    #[test]
    fn test_align_interpolated() {
        let record = ObservationRecord::from_rows(
            "temperature",
            vec![
                observation(utc(2020, 1, 1), 5.0, 7.0),
                observation(utc(2020, 1, 3), 10.0, 7.0),
                // Deeper than the simulation output
                observation(utc(2020, 1, 1), 12.0, 7.0),
            ],
        );
        let rows = align(&record, &result(), 1.0, AlignmentStrategy::Interpolated);
        assert_eq!(rows.len(), 2);
        assert_approx_eq!(f64, rows[0].simulated, 6.0);
        assert_approx_eq!(f64, rows[1].simulated, 5.0);
    }

    #[rstest]
    #[case(None, None, true)]
    #[case(Some("nearest"), Some("linear"), true)]
    #[case(Some("linear"), None, false)]
    #[case(None, Some("cubic"), false)]
    fn test_interpolated_strategy(
        #[case] time: Option<&str>,
        #[case] depth: Option<&str>,
        #[case] ok: bool,
    ) {
        let result = AlignmentStrategy::interpolated(time, depth);
        assert_eq!(result.is_ok(), ok);
        if let Err(err) = result {
            assert!(matches!(
                classify(&err),
                Some(CalibrationError::Configuration(_))
            ));
        }
    }
}
