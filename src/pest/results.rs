//! Reading the files the estimation engine leaves behind when it finishes.
use super::observations::parse_observation_id;
use super::{PARAMETER_RESULTS_FILE_NAME, RESIDUALS_FILE_NAME};
use crate::error::CalibrationError;
use crate::grid::CanonicalGrid;
use crate::input::input_err_msg;
use crate::metrics::AlignedRow;
use anyhow::{Context, Result, ensure};
use indexmap::IndexMap;
use std::fs;
use std::path::Path;

/// Columns of the residuals file used to rebuild aligned rows
const RESIDUAL_COLUMNS: [&str; 4] = ["Name", "Measured", "Modelled", "Weight"];

/// The outcome of an estimation run
#[derive(Debug, Clone, PartialEq)]
pub struct EngineResults {
    /// Final parameter values, in file order
    pub parameters: IndexMap<String, f64>,
    /// Observations paired with the final simulated values
    pub rows: Vec<AlignedRow>,
}

/// Read the final parameters and residuals from the engine's working folder.
///
/// A missing parameter file means the engine run by `command` did not finish.
pub fn read_engine_results(
    folder: &Path,
    grid: &CanonicalGrid,
    command: &str,
) -> Result<EngineResults> {
    let par_path = folder.join(PARAMETER_RESULTS_FILE_NAME);
    if !par_path.is_file() {
        Err(CalibrationError::ExternalProcess {
            command: command.to_string(),
            status: format!("no {PARAMETER_RESULTS_FILE_NAME} written"),
            stderr: "The estimation engine failed to complete. Run in debug mode to see its log."
                .into(),
        })?;
    }

    let parameters = read_parameter_values(&par_path)?;
    let res_path = folder.join(RESIDUALS_FILE_NAME);
    let rows = read_residuals(&res_path, grid)?;

    Ok(EngineResults { parameters, rows })
}

/// Read parameter values from a parameter file.
///
/// The first line is a header. Each other line starts with a parameter name and its value.
pub fn read_parameter_values(file_path: &Path) -> Result<IndexMap<String, f64>> {
    let contents = fs::read_to_string(file_path).with_context(|| input_err_msg(file_path))?;
    contents
        .lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let mut fields = line.split_whitespace();
            let (Some(name), Some(value)) = (fields.next(), fields.next()) else {
                anyhow::bail!("Invalid line: {line}");
            };
            let value = value
                .parse::<f64>()
                .with_context(|| format!("Invalid value for parameter {name}: {value}"))?;
            Ok((name.to_string(), value))
        })
        .collect::<Result<_>>()
        .with_context(|| input_err_msg(file_path))
}

/// Read the residuals file, recovering each observation's depth from its identifier
pub fn read_residuals(file_path: &Path, grid: &CanonicalGrid) -> Result<Vec<AlignedRow>> {
    let contents = fs::read_to_string(file_path).with_context(|| input_err_msg(file_path))?;
    parse_residuals(&contents, grid).with_context(|| input_err_msg(file_path))
}

fn parse_residuals(contents: &str, grid: &CanonicalGrid) -> Result<Vec<AlignedRow>> {
    let mut lines = contents.lines().filter(|line| !line.trim().is_empty());
    let header = lines.next().context("Missing header")?;
    let header: Vec<&str> = header.split_whitespace().collect();
    let [name_col, measured_col, modelled_col, weight_col] = RESIDUAL_COLUMNS.map(|column| {
        header
            .iter()
            .position(|h| h.eq_ignore_ascii_case(column))
            .with_context(|| format!("Missing column {column}"))
    });
    let (name_col, measured_col, modelled_col, weight_col) =
        (name_col?, measured_col?, modelled_col?, weight_col?);

    let depths = grid.depths_descending();
    lines
        .map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            ensure!(
                fields.len() >= header.len(),
                "Expected {} columns: {line}",
                header.len()
            );
            let number = |col: usize| -> Result<f64> {
                fields[col]
                    .parse::<f64>()
                    .with_context(|| format!("Invalid number: {}", fields[col]))
            };

            let (variable, _, depth_index) = parse_observation_id(fields[name_col])?;
            let depth = *depths
                .get(depth_index)
                .with_context(|| format!("Depth index out of range in {}", fields[name_col]))?;

            Ok(AlignedRow {
                variable: variable.to_string(),
                depth,
                observed: number(measured_col)?,
                simulated: number(modelled_col)?,
                weight: number(weight_col)?,
            })
        })
        .collect()
}
