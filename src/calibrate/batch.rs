//! Calibration by an external estimation engine with a pool of local workers.
//!
//! The control files are generated once, up front. The engine's master process then drives the
//! workers, each of which runs simulations in its own folder, and leaves its results in the master
//! folder when it finishes.
use super::{CalibrationReport, plan_simulation_grid, shorten_simulation};
use crate::arguments::CalibrationSpec;
use crate::log::StageLogger;
use crate::metrics::ErrorReport;
use crate::model_config::{ModelConfig, copy_model_inputs};
use crate::observation::load_observations;
use crate::pest::results::read_engine_results;
use crate::pest::{ControlFiles, GenerationOptions};
use crate::process::{ProcessGroup, executable_name};
use anyhow::{Context, Result};
use itertools::Itertools;
use log::info;
use std::fs;
use std::path::{Path, absolute};

/// Folder holding the simulation inputs shared by every worker
pub const INPUTS_FOLDER_NAME: &str = "inputs";

/// Folder in which the master runs
pub const MASTER_FOLDER_NAME: &str = "master";

/// The folder in which worker `k` (counting from 1) runs
pub fn agent_folder_name(k: usize) -> String {
    format!("agent_{k}")
}

/// Calibrate with the estimation engine, running its processes in `group`
pub fn calibrate(spec: &CalibrationSpec, group: &mut dyn ProcessGroup) -> Result<CalibrationReport> {
    let options = &spec.calibration_options;
    let mut stages = StageLogger::default();

    stages.begin("Copying simulation inputs");
    let inputs = absolute(spec.calibration_folder.join(INPUTS_FOLDER_NAME))
        .context("Failed to resolve the inputs folder")?;
    recreate_folder(&inputs)?;
    copy_model_inputs(&spec.simulation_folder, &inputs)?;
    stages.complete();

    stages.begin("Reading observations");
    let mut config = ModelConfig::load_source(&spec.simulation_folder)?;
    let reference_year = config.reference_year()?;
    let records = load_observations(&options.objective_variables, &spec.observations)?;
    let plan = plan_simulation_grid(spec, &config, &records, &inputs)?;
    shorten_simulation(&mut config, &plan)?;
    plan.grid.write_output_requests(&inputs, reference_year)?;
    info!(
        "{} output times and {} output depths requested",
        plan.grid.times().len(),
        plan.grid.depths().len()
    );
    stages.complete();

    stages.begin("Generating control files");
    let files = ControlFiles::generate(
        &config,
        &spec.parameters,
        &plan.grid,
        &plan.records,
        &GenerationOptions {
            objective_variables: options.objective_variables.clone(),
            objective_weights: options.objective_weights(),
            execute: spec.execute.clone(),
            inputs_folder: inputs,
        },
    )?;
    info!("{} observations to fit", files.observations.len());

    let master = spec.calibration_folder.join(MASTER_FOLDER_NAME);
    let agents = (1..=options.agents)
        .map(|k| spec.calibration_folder.join(agent_folder_name(k)))
        .collect_vec();
    for folder in std::iter::once(&master).chain(&agents) {
        recreate_folder(folder)?;
        files.write(folder)?;
    }
    stages.complete();

    stages.begin("Running the estimation engine");
    let master_command = options.master_command_line();
    let worker_command = options.worker_command_line();
    let stale = [&master_command, &worker_command]
        .into_iter()
        .filter_map(|command| executable_name(command))
        .unique()
        .collect_vec();
    group.terminate_stale(&stale);

    group.spawn(&master_command, &master)?;
    for folder in &agents {
        group.spawn(&worker_command, folder)?;
    }
    group.wait_all()?;
    stages.complete();

    stages.begin("Reading results");
    let results = read_engine_results(&master, &plan.grid, &master_command)?;
    let error = ErrorReport::from_rows(&results.rows, &options.objective_variables)?;
    stages.complete();

    Ok(CalibrationReport {
        parameters: results.parameters,
        error,
    })
}

/// Remove `folder` if it exists and create it empty
fn recreate_folder(folder: &Path) -> Result<()> {
    if folder.exists() {
        fs::remove_dir_all(folder)
            .with_context(|| format!("Failed to remove {}", folder.display()))?;
    }
    fs::create_dir_all(folder).with_context(|| format!("Failed to create {}", folder.display()))
}
