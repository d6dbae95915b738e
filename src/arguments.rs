//! The calibration argument file: where the model lives, what to fit and how.
use crate::error::configuration_error;
use crate::input::{deserialise_non_negative, read_json};
use crate::optimiser::{DEFAULT_FATOL, DEFAULT_MAX_ITERATIONS};
use crate::output::output_file_name;
use crate::time::deserialise_timestamp;
use anyhow::{Context, Result, ensure};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_string_enum::DeserializeLabeledStringEnum;
use std::fs;
use std::path::{Path, PathBuf};

/// The name given to the working copy of the simulator's parameter file
pub const WORKING_PAR_FILE_NAME: &str = "Calibration.par";

/// Placeholder in the execute command for the folder the simulation runs in
pub const CALIBRATION_FOLDER_PLACEHOLDER: &str = "{calibration_folder}";

/// Default port for the estimation engine's master process
const DEFAULT_PORT: u16 = 4005;

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_agents() -> usize {
    1
}

fn default_master_command() -> String {
    "pest_hp pest.pst /h :{port}".into()
}

fn default_worker_command() -> String {
    "agent_hp pest.pst /h {host}:{port}".into()
}

fn default_host() -> String {
    "localhost".into()
}

fn default_max_iterations() -> u64 {
    DEFAULT_MAX_ITERATIONS
}

fn default_fatol() -> f64 {
    DEFAULT_FATOL
}

/// Everything needed to run one calibration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CalibrationSpec {
    /// Folder containing the simulator's input files
    pub simulation_folder: PathBuf,
    /// Folder in which working files and results are created
    pub calibration_folder: PathBuf,
    /// The simulator being calibrated
    pub simulation: Simulator,
    /// Command which runs the simulator. `{calibration_folder}` is replaced with the run folder.
    pub execute: String,
    /// The parameters to calibrate
    pub parameters: Vec<Parameter>,
    /// The observation files to calibrate against
    pub observations: Vec<ObservationSource>,
    /// Which calibration strategy to use
    pub calibration_framework: Framework,
    /// Options for the calibration strategy
    pub calibration_options: CalibrationOptions,
    /// Whether to write log files to the calibration folder
    #[serde(default)]
    pub log: bool,
}

/// Supported simulators
#[derive(Debug, DeserializeLabeledStringEnum, Clone, Copy, PartialEq)]
pub enum Simulator {
    /// The one-dimensional Simstrat lake model
    #[string = "simstrat"]
    Simstrat,
}

/// Supported calibration strategies
#[derive(Debug, DeserializeLabeledStringEnum, Clone, Copy, PartialEq)]
pub enum Framework {
    /// A derivative-free optimiser running one simulation per evaluation
    #[string = "scipy"]
    LocalOptimiser,
    /// The PEST_HP parameter estimation engine with a pool of local workers
    #[string = "PEST"]
    BatchEngine,
}

/// How the estimation engine limits changes to a parameter between iterations
#[derive(Debug, DeserializeLabeledStringEnum, Clone, Copy, PartialEq, Default)]
pub enum ChangeLimit {
    /// Changes are limited to a factor of the current value
    #[default]
    #[string = "factor"]
    Factor,
    /// Changes are limited relative to the current value
    #[string = "relative"]
    Relative,
}

impl ChangeLimit {
    /// The keyword used in the control file
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Factor => "factor",
            Self::Relative => "relative",
        }
    }
}

/// How the estimation engine transforms a parameter before estimating it
#[derive(Debug, DeserializeLabeledStringEnum, Clone, Copy, PartialEq, Default)]
pub enum Transform {
    /// Estimate the parameter as is
    #[default]
    #[string = "none"]
    None,
    /// Estimate the logarithm of the parameter
    #[string = "log"]
    Log,
}

impl Transform {
    /// The keyword used in the control file
    pub fn keyword(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Log => "log",
        }
    }
}

/// A model parameter to calibrate
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Parameter {
    /// Key of the parameter in the `ModelParameters` group
    pub name: String,
    /// Starting value
    pub initial: f64,
    /// Lower bound
    pub min: f64,
    /// Upper bound
    pub max: f64,
    /// How the estimation engine limits changes between iterations
    #[serde(default, rename = "adjust")]
    pub change_limit: ChangeLimit,
    /// How the estimation engine transforms the parameter
    #[serde(default)]
    pub transform: Transform,
}

/// A file of observations for one objective variable
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ObservationSource {
    /// The objective variable the file provides (e.g. "temperature")
    pub parameter: String,
    /// Path to the CSV file
    pub file: PathBuf,
    /// Observations before this time are ignored
    #[serde(deserialize_with = "deserialise_timestamp")]
    pub start: DateTime<Utc>,
    /// Observations after this time are ignored
    #[serde(deserialize_with = "deserialise_timestamp")]
    pub end: DateTime<Utc>,
}

/// The objective function to minimise
#[derive(Debug, DeserializeLabeledStringEnum, Clone, Copy, PartialEq, Default)]
pub enum ObjectiveFunction {
    /// Weighted root-mean-square error
    #[default]
    #[string = "rms"]
    Rms,
}

/// Options controlling the calibration strategy
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CalibrationOptions {
    /// The physical quantities being calibrated
    pub objective_variables: Vec<String>,
    /// Relative weight of each objective variable. Defaults to 1 for every variable.
    #[serde(default)]
    pub objective_weights: Vec<f64>,
    /// The objective function to minimise
    #[serde(default)]
    pub objective_function: ObjectiveFunction,
    /// Length of the initial period excluded from the error. Defaults to one year.
    #[serde(default, deserialize_with = "deserialise_optional_non_negative")]
    pub burn_in_days: Option<f64>,
    /// The optimisation method (local optimiser only)
    #[serde(default)]
    pub method: Option<String>,
    /// Maximum number of optimiser iterations (local optimiser only)
    #[serde(default = "default_max_iterations", alias = "maxfev")]
    pub max_iterations: u64,
    /// Tolerance on the objective value for convergence (local optimiser only)
    #[serde(default = "default_fatol")]
    pub fatol: f64,
    /// Tolerance on the parameter values for convergence (local optimiser only)
    #[serde(default)]
    pub xatol: Option<f64>,
    /// Whether the optimiser should report progress (local optimiser only)
    #[serde(default)]
    pub disp: bool,
    /// How simulated times are matched to observations (local optimiser only)
    #[serde(default)]
    pub time_interpolation: Option<String>,
    /// How simulated depths are matched to observations (local optimiser only)
    #[serde(default)]
    pub depth_interpolation: Option<String>,
    /// Number of worker processes (batch engine only)
    #[serde(default = "default_agents")]
    pub agents: usize,
    /// Port for the master process (batch engine only)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Host the workers connect to (batch engine only)
    #[serde(default = "default_host")]
    pub host: String,
    /// Whether to forward the engine's console output (batch engine only)
    #[serde(default)]
    pub debug: bool,
    /// Command which starts the master. `{port}` is substituted. (batch engine only)
    #[serde(default = "default_master_command")]
    pub master_command: String,
    /// Command which starts a worker. `{host}` and `{port}` are substituted. (batch engine only)
    #[serde(default = "default_worker_command")]
    pub worker_command: String,
}

fn deserialise_optional_non_negative<'de, D>(deserialiser: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    deserialise_non_negative(deserialiser).map(Some)
}

/// Replace the folder placeholder in an execute command
pub fn substitute_calibration_folder(execute: &str, folder: &str) -> String {
    execute.replace(CALIBRATION_FOLDER_PLACEHOLDER, folder)
}

impl CalibrationOptions {
    /// The weight of each objective variable, in the same order as `objective_variables`
    pub fn objective_weights(&self) -> Vec<f64> {
        if self.objective_weights.is_empty() {
            vec![1.0; self.objective_variables.len()]
        } else {
            self.objective_weights.clone()
        }
    }

    /// The master command line with placeholders filled in
    pub fn master_command_line(&self) -> String {
        self.master_command
            .replace("{port}", &self.port.to_string())
            .replace("{host}", &self.host)
    }

    /// The worker command line with placeholders filled in
    pub fn worker_command_line(&self) -> String {
        self.worker_command
            .replace("{port}", &self.port.to_string())
            .replace("{host}", &self.host)
    }
}

impl CalibrationSpec {
    /// Read and check an argument file
    pub fn from_path(file_path: &Path) -> Result<CalibrationSpec> {
        let spec: CalibrationSpec = read_json(file_path)?;
        spec.validate()
            .with_context(|| format!("Invalid arguments in {}", file_path.display()))?;
        Ok(spec)
    }

    /// Check that the arguments are consistent.
    ///
    /// Detects the configuration errors that can be found before any file is touched.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.simulation_folder.is_dir(),
            configuration_error!(
                "Simulation folder {} does not exist",
                self.simulation_folder.display()
            )
        );

        ensure!(
            self.execute.contains(WORKING_PAR_FILE_NAME),
            configuration_error!(
                "Execute command should contain \"{WORKING_PAR_FILE_NAME}\", NOT the name of your par file"
            )
        );

        ensure!(
            !self.parameters.is_empty(),
            configuration_error!("No parameters to calibrate")
        );
        for parameter in &self.parameters {
            ensure!(
                parameter.min <= parameter.initial && parameter.initial <= parameter.max,
                configuration_error!(
                    "Initial value of parameter {} must lie between its min and max",
                    parameter.name
                )
            );
        }

        let options = &self.calibration_options;
        ensure!(
            !options.objective_variables.is_empty(),
            configuration_error!("No objective variables specified")
        );
        for variable in &options.objective_variables {
            output_file_name(variable)?;
        }
        ensure!(
            options.objective_weights.is_empty()
                || options.objective_weights.len() == options.objective_variables.len(),
            configuration_error!(
                "{} objective weights given for {} objective variables",
                options.objective_weights.len(),
                options.objective_variables.len()
            )
        );

        if self.calibration_framework == Framework::BatchEngine {
            ensure!(
                options.agents > 0,
                configuration_error!("At least one agent is required")
            );
        }

        Ok(())
    }

    /// Create the calibration folder if needed
    pub fn create_calibration_folder(&self) -> Result<()> {
        fs::create_dir_all(&self.calibration_folder).with_context(|| {
            format!(
                "Failed to create folder {}",
                self.calibration_folder.display()
            )
        })
    }

    /// The execute command for a simulation run in `folder`
    pub fn execute_command(&self, folder: &Path) -> String {
        substitute_calibration_folder(&self.execute, &folder.display().to_string())
    }

    /// The names of the parameters being calibrated, in declaration order
    pub fn parameter_names(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.name.clone()).collect()
    }
}
