//! Calibration driven by a local optimiser, one simulation per evaluation.
use super::{CalibrationReport, plan_simulation_grid, shorten_simulation};
use crate::arguments::CalibrationSpec;
use crate::log::StageLogger;
use crate::metrics::{AlignmentStrategy, ErrorReport, align};
use crate::model_config::{
    EditMode, ModelConfig, ParameterValue, RESULTS_FOLDER_NAME, copy_recursive,
    stage_simulation_inputs,
};
use crate::observation::{ObservationRecord, load_observations};
use crate::optimiser::{Objective, Optimiser};
use crate::output::{SimulationResult, output_file_name};
use crate::process::CommandRunner;
use anyhow::{Context, Result, ensure};
use indexmap::IndexMap;
use itertools::Itertools;
use log::info;
use std::fs;
use std::path::{Path, absolute};

/// Folder holding the prepared inputs every run starts from
pub const BASE_FOLDER_NAME: &str = "base";

/// Folder for the last run, with the calibrated parameters
pub const FINAL_FOLDER_NAME: &str = "final";

/// What every run needs from the setup
struct Prepared {
    reference_year: i32,
    records: Vec<ObservationRecord>,
}

/// Calibrate with `optimiser`, running each simulation with `runner`
pub fn calibrate(
    spec: &CalibrationSpec,
    runner: &dyn CommandRunner,
    optimiser: &dyn Optimiser,
) -> Result<CalibrationReport> {
    let options = &spec.calibration_options;
    let mut stages = StageLogger::default();

    stages.begin("Preparing simulation inputs");
    let base = spec.calibration_folder.join(BASE_FOLDER_NAME);
    let prepared = prepare_base(spec, &base)?;
    let strategy = AlignmentStrategy::interpolated(
        options.time_interpolation.as_deref(),
        options.depth_interpolation.as_deref(),
    )?;
    if options.xatol.is_some() {
        info!("\"xatol\" is not used by the Nelder-Mead solver and will be ignored");
    }
    stages.complete();

    stages.begin("Optimising parameters");
    let mut evaluator = Evaluator {
        spec,
        runner,
        base: &base,
        prepared: &prepared,
        strategy,
        iteration: 0,
        run: 0,
    };
    let initial = spec.parameters.iter().map(|p| p.initial).collect_vec();
    let bounds = spec.parameters.iter().map(|p| p.min..=p.max).collect_vec();
    let outcome = optimiser.minimise(&mut evaluator, &initial, &bounds)?;
    ensure!(
        outcome.converged,
        "Optimiser exited unsuccessfully: {}",
        outcome.message
    );
    info!("Optimiser finished: {}", outcome.message);
    stages.complete();

    stages.begin("Running simulation with calibrated parameters");
    let final_folder = spec.calibration_folder.join(FINAL_FOLDER_NAME);
    if final_folder.exists() {
        fs::remove_dir_all(&final_folder)
            .with_context(|| format!("Failed to remove {}", final_folder.display()))?;
    }
    copy_recursive(&base, &final_folder)?;
    let error = evaluator.simulate(&final_folder, &outcome.parameters)?;
    stages.complete();

    Ok(CalibrationReport {
        parameters: spec
            .parameter_names()
            .into_iter()
            .zip(outcome.parameters)
            .collect(),
        error,
    })
}

/// Build the folder every run is copied from
fn prepare_base(spec: &CalibrationSpec, base: &Path) -> Result<Prepared> {
    stage_simulation_inputs(&spec.simulation_folder, base)?;
    let results = base.join(RESULTS_FOLDER_NAME);
    fs::create_dir_all(&results)
        .with_context(|| format!("Failed to create {}", results.display()))?;

    let mut config = ModelConfig::load_working(base)?;
    config.apply(&IndexMap::new(), EditMode::Initial)?;
    let reference_year = config.reference_year()?;

    let records = load_observations(
        &spec.calibration_options.objective_variables,
        &spec.observations,
    )?;
    let plan = plan_simulation_grid(spec, &config, &records, base)?;
    shorten_simulation(&mut config, &plan)?;
    plan.grid.write_output_requests(base, reference_year)?;
    config.save(base)?;

    Ok(Prepared {
        reference_year,
        records: plan.records,
    })
}

/// The calibration objective: the overall RMS error of a simulation run with candidate parameters
struct Evaluator<'a> {
    spec: &'a CalibrationSpec,
    runner: &'a dyn CommandRunner,
    base: &'a Path,
    prepared: &'a Prepared,
    strategy: AlignmentStrategy,
    /// The iteration the last run belonged to
    iteration: u64,
    /// Runs so far in the current iteration
    run: u64,
}

impl Evaluator<'_> {
    /// Run the simulation in `folder` with the given parameter values and compute its error
    fn simulate(&self, folder: &Path, values: &[f64]) -> Result<ErrorReport> {
        let overrides: IndexMap<_, _> = self
            .spec
            .parameter_names()
            .into_iter()
            .zip(values.iter().map(|value| ParameterValue::Value(*value)))
            .collect();
        let mut config = ModelConfig::load_working(folder)?;
        config.apply(&overrides, EditMode::Update)?;
        config.save(folder)?;

        let folder = absolute(folder)
            .with_context(|| format!("Failed to resolve {}", folder.display()))?;
        self.runner
            .run(&self.spec.execute_command(&folder), &folder)?;

        let options = &self.spec.calibration_options;
        let mut rows = Vec::new();
        for (record, weight) in self
            .prepared
            .records
            .iter()
            .zip(options.objective_weights())
        {
            let file_path = folder
                .join(RESULTS_FOLDER_NAME)
                .join(output_file_name(&record.variable)?);
            let result = SimulationResult::from_path(&file_path, self.prepared.reference_year)?;
            rows.extend(align(record, &result, weight, self.strategy));
        }

        ErrorReport::from_rows(&rows, &options.objective_variables)
    }
}

impl Objective for Evaluator<'_> {
    fn evaluate(&mut self, iteration: u64, parameters: &[f64]) -> Result<f64> {
        if iteration != self.iteration {
            self.iteration = iteration;
            self.run = 0;
        }
        self.run += 1;

        let candidate = self
            .spec
            .parameter_names()
            .iter()
            .zip(parameters)
            .map(|(name, value)| format!("{name}={value}"))
            .join(", ");
        info!("Iteration {iteration}, run {}: {candidate}", self.run);

        // Removed when dropped, whether or not the run succeeds
        let run_folder = tempfile::Builder::new()
            .prefix(&format!("{iteration}_{}_", self.run))
            .tempdir_in(&self.spec.calibration_folder)
            .context("Failed to create a run folder")?;
        copy_recursive(self.base, run_folder.path())?;
        let error = self.simulate(run_folder.path(), parameters)?;
        info!("RMSE: {}", error.overall);

        Ok(error.overall)
    }
}
