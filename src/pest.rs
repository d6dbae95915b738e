//! Generation of the control artifacts for the batch estimation engine.
//!
//! Everything is rendered in memory by [`ControlFiles::generate`], which validates every artifact,
//! and is only written to disk afterwards by [`ControlFiles::write`]. A failed generation leaves no
//! partial files behind.
use crate::arguments::Parameter;
use crate::grid::CanonicalGrid;
use crate::model_config::ModelConfig;
use crate::observation::ObservationRecord;
use anyhow::{Context, Result, ensure};
use std::fs;
use std::path::{Path, PathBuf};

pub mod control;
pub mod format;
pub mod instruction;
pub mod observations;
pub mod results;
pub mod script;
pub mod template;

use control::render_control;
use instruction::render_instructions;
use observations::CombinedObservations;
use script::render_run_script;
use template::render_template;

/// The template from which the engine writes the parameter file
pub const TEMPLATE_FILE_NAME: &str = "pest.tpl";

/// The control file
pub const CONTROL_FILE_NAME: &str = "pest.pst";

/// The script the engine runs for each simulation
pub const RUN_SCRIPT_NAME: &str = "run.sh";

/// The engine's final parameter values
pub const PARAMETER_RESULTS_FILE_NAME: &str = "pest.par";

/// The engine's final residuals
pub const RESIDUALS_FILE_NAME: &str = "pest.res";

/// Options controlling what the generated files ask the engine to do
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    /// Objective variables, in the order of the observation records
    pub objective_variables: Vec<String>,
    /// Weight of each objective variable
    pub objective_weights: Vec<f64>,
    /// The command which runs the simulator
    pub execute: String,
    /// The folder holding the simulation inputs shared by all workers
    pub inputs_folder: PathBuf,
}

/// The rendered control artifacts
#[derive(Debug, Clone, PartialEq)]
pub struct ControlFiles {
    /// Contents of the template file
    pub template: String,
    /// Instruction file name and contents, one per objective variable
    pub instructions: Vec<(String, String)>,
    /// Contents of the control file
    pub control: String,
    /// Contents of the run script
    pub run_script: String,
    /// The observations the files were built from
    pub observations: CombinedObservations,
}

impl ControlFiles {
    /// Render and validate every control artifact
    pub fn generate(
        config: &ModelConfig,
        parameters: &[Parameter],
        grid: &CanonicalGrid,
        records: &[ObservationRecord],
        options: &GenerationOptions,
    ) -> Result<ControlFiles> {
        ensure!(
            records.len() == options.objective_variables.len()
                && records
                    .iter()
                    .zip(&options.objective_variables)
                    .all(|(record, variable)| record.variable == *variable),
            "Observation records do not match the objective variables"
        );

        let observations =
            CombinedObservations::build(grid, records, &options.objective_weights)?;
        let template = render_template(config, parameters)?;
        let instructions = options
            .objective_variables
            .iter()
            .map(|variable| {
                let contents = render_instructions(variable, grid, &observations)?;
                Ok((format!("{variable}.ins"), contents))
            })
            .collect::<Result<Vec<_>>>()?;
        let control = render_control(parameters, &options.objective_variables, &observations)?;
        let run_script = render_run_script(&options.execute, &options.inputs_folder);

        Ok(ControlFiles {
            template,
            instructions,
            control,
            run_script,
            observations,
        })
    }

    /// Write every artifact into `folder`
    pub fn write(&self, folder: &Path) -> Result<()> {
        fs::create_dir_all(folder)
            .with_context(|| format!("Failed to create {}", folder.display()))?;

        write_file(&folder.join(TEMPLATE_FILE_NAME), &self.template)?;
        for (file_name, contents) in &self.instructions {
            write_file(&folder.join(file_name), contents)?;
        }
        write_file(&folder.join(CONTROL_FILE_NAME), &self.control)?;

        let script_path = folder.join(RUN_SCRIPT_NAME);
        write_file(&script_path, &self.run_script)?;
        make_executable(&script_path)
    }
}

fn write_file(file_path: &Path, contents: &str) -> Result<()> {
    fs::write(file_path, contents)
        .with_context(|| format!("Failed to write {}", file_path.display()))
}

#[cfg(unix)]
fn make_executable(file_path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(file_path, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("Failed to make {} executable", file_path.display()))
}

#[cfg(not(unix))]
fn make_executable(_file_path: &Path) -> Result<()> {
    Ok(())
}
