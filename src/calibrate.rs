//! Running a calibration end to end.
//!
//! [`run_calibration`] dispatches on the framework named in the argument file. The local optimiser
//! runs every simulation itself, one at a time, while the batch engine hands the simulations over
//! to an external master process and its workers. The collaborators which touch the outside world
//! are injected through [`Collaborators`] so they can be replaced in tests.
use crate::arguments::{CalibrationSpec, Framework};
use crate::grid::{GridPlan, SimulationWindow, plan_grid, read_max_depth};
use crate::metrics::ErrorReport;
use crate::model_config::ModelConfig;
use crate::observation::ObservationRecord;
use crate::optimiser::{NelderMeadOptimiser, Optimiser};
use crate::process::{CommandRunner, LocalProcessGroup, ProcessGroup, ShellRunner};
use crate::time::days_since_year;
use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::info;
use serde::Serialize;
use std::path::Path;

pub mod batch;
pub mod local;

/// The outcome of a calibration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationReport {
    /// Calibrated parameter values, in declaration order
    pub parameters: IndexMap<String, f64>,
    /// The error of the simulation with the calibrated parameters
    pub error: ErrorReport,
}

impl CalibrationReport {
    /// Log the calibrated parameters and the final error
    pub fn log_summary(&self) {
        info!("Calibrated parameters:");
        for (name, value) in &self.parameters {
            info!("    {name}: {value}");
        }
        info!("RMSE: {}", self.error.overall);
        info!("Surface RMSE: {}", self.error.surface);
        info!("Bottom RMSE: {}", self.error.bottom);
        for (variable, rms) in &self.error.per_variable {
            info!("{variable} RMSE: {rms}");
        }
    }
}

/// The parts of a calibration which run external programs
pub struct Collaborators {
    /// Runs the simulator for the local optimiser
    pub runner: Box<dyn CommandRunner>,
    /// Runs the batch engine's master and workers
    pub process_group: Box<dyn ProcessGroup>,
    /// Searches the parameter space for the local optimiser
    pub optimiser: Box<dyn Optimiser>,
}

impl Collaborators {
    /// The collaborators which run real programs, configured from the argument file
    pub fn from_spec(spec: &CalibrationSpec) -> Result<Collaborators> {
        let options = &spec.calibration_options;
        let optimiser = match spec.calibration_framework {
            Framework::LocalOptimiser => NelderMeadOptimiser::from_options(options)?,
            Framework::BatchEngine => NelderMeadOptimiser::default(),
        };

        Ok(Collaborators {
            runner: Box::new(ShellRunner {
                debug: options.debug,
            }),
            process_group: Box::new(LocalProcessGroup::new(options.debug)),
            optimiser: Box::new(optimiser),
        })
    }
}

/// Run a calibration with the default collaborators
pub fn run_calibration(spec: &CalibrationSpec) -> Result<CalibrationReport> {
    let collaborators = Collaborators::from_spec(spec)?;
    run_calibration_with(spec, collaborators)
}

/// Run a calibration with the given collaborators
pub fn run_calibration_with(
    spec: &CalibrationSpec,
    mut collaborators: Collaborators,
) -> Result<CalibrationReport> {
    spec.validate()?;
    spec.create_calibration_folder()?;

    match spec.calibration_framework {
        Framework::LocalOptimiser => local::calibrate(
            spec,
            collaborators.runner.as_ref(),
            collaborators.optimiser.as_ref(),
        ),
        Framework::BatchEngine => batch::calibrate(spec, collaborators.process_group.as_mut()),
    }
}

/// Work out the simulation window from the parameter document and plan the output grid.
///
/// The bathymetry file is looked up in `inputs_folder`.
fn plan_simulation_grid(
    spec: &CalibrationSpec,
    config: &ModelConfig,
    records: &[ObservationRecord],
    inputs_folder: &Path,
) -> Result<GridPlan> {
    let morphology_path = inputs_folder.join(config.morphology_file()?);
    let max_depth = read_max_depth(&morphology_path)
        .context("Failed to read the maximum depth from the bathymetry")?;
    let window = SimulationWindow {
        start: config.start_time()?,
        end: config.end_time()?,
        burn_in_days: spec.calibration_options.burn_in_days,
        max_depth,
    };

    plan_grid(records, &window)
}

/// End the simulation early when the observations stop well before the configured end
fn shorten_simulation(config: &mut ModelConfig, plan: &GridPlan) -> Result<()> {
    if let Some(end) = plan.shortened_end {
        let day = days_since_year(end, config.reference_year()?)?;
        info!("Observations end before the simulation. Shortening the simulation to end on day {day}");
        config.set_end_day(day)?;
    }

    Ok(())
}
