//! The command line interface for lakecal.
use crate::arguments::CalibrationSpec;
use crate::calibrate::{CalibrationReport, Collaborators, run_calibration};
use crate::log;
use crate::model_config::ModelConfig;
use crate::observation::{check_source_exists, load_observations};
use crate::settings::Settings;
use ::log::info;
use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};

pub mod settings;
use settings::SettingsSubcommands;

/// The file, in the calibration folder, to which the calibration report is written
pub const REPORT_FILE_NAME: &str = "calibration_report.json";

/// The command line interface for lakecal.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// The available commands.
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Options for the run command
#[derive(Args, Default)]
pub struct RunOpts {
    /// Show the output of the simulator and the estimation engine
    #[arg(long)]
    pub debug: bool,
    /// Write log files to the calibration folder
    #[arg(long)]
    pub log_to_file: bool,
}

/// The available commands.
#[derive(Subcommand)]
enum Commands {
    /// Calibrate a lake model.
    Run {
        /// Path to the argument file.
        arg_file: PathBuf,
        /// Other run options
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Check an argument file and the files it refers to without running anything.
    Validate {
        /// Path to the argument file.
        arg_file: PathBuf,
    },
    /// Manage program settings.
    Settings {
        /// The available subcommands for managing program settings.
        #[command(subcommand)]
        subcommand: SettingsSubcommands,
    },
}

impl Commands {
    /// Execute the supplied CLI command
    fn execute(self) -> Result<()> {
        match self {
            Self::Run { arg_file, opts } => handle_run_command(&arg_file, &opts, None).map(|_| ()),
            Self::Validate { arg_file } => handle_validate_command(&arg_file, None),
            Self::Settings { subcommand } => subcommand.execute(),
        }
    }
}

/// Parse CLI arguments and start lakecal
pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        let help_str = Cli::command().render_long_help().to_string();
        println!("{help_str}");
        return Ok(());
    };

    command.execute()
}

/// Load program settings, if not provided
fn settings_or_load(settings: Option<Settings>) -> Result<Settings> {
    match settings {
        Some(settings) => Ok(settings),
        None => Settings::load().context("Failed to load settings."),
    }
}

/// Handle the `run` command.
pub fn handle_run_command(
    arg_file: &Path,
    opts: &RunOpts,
    settings: Option<Settings>,
) -> Result<CalibrationReport> {
    let settings = settings_or_load(settings)?;
    let mut spec = CalibrationSpec::from_path(arg_file).context("Failed to load arguments.")?;

    // These settings can be overridden by command-line arguments
    if opts.debug || settings.debug {
        spec.calibration_options.debug = true;
    }
    let log_to_file = spec.log || opts.log_to_file || settings.log_to_file;

    spec.create_calibration_folder()?;
    settings
        .log_level_filter()
        .and_then(|level| {
            log::init(level, log_to_file.then_some(spec.calibration_folder.as_path()))
        })
        .context("Failed to initialise logging.")?;

    info!("Loaded arguments from {}", arg_file.display());
    info!("Simulation folder: {}", spec.simulation_folder.display());
    info!("Calibration folder: {}", spec.calibration_folder.display());
    info!(
        "Calibrating {} parameters against {}",
        spec.parameters.len(),
        spec.calibration_options.objective_variables.join(", ")
    );

    let report = run_calibration(&spec)?;
    report.log_summary();

    let report_path = spec.calibration_folder.join(REPORT_FILE_NAME);
    fs::write(&report_path, serde_json::to_string_pretty(&report)?)
        .with_context(|| format!("Failed to write {}", report_path.display()))?;
    info!("Calibration complete! Results written to {}", report_path.display());

    Ok(report)
}

/// Handle the `validate` command.
pub fn handle_validate_command(arg_file: &Path, settings: Option<Settings>) -> Result<()> {
    let settings = settings_or_load(settings)?;

    // Initialise program logger (we won't save log files when running the validate command)
    settings
        .log_level_filter()
        .and_then(|level| log::init(level, None))
        .context("Failed to initialise logging.")?;

    let spec = CalibrationSpec::from_path(arg_file).context("Failed to load arguments.")?;
    Collaborators::from_spec(&spec).context("Invalid calibration options.")?;
    let config = ModelConfig::load_source(&spec.simulation_folder)
        .context("Failed to load the simulator's parameter file.")?;
    config.reference_year()?;
    for source in &spec.observations {
        check_source_exists(source)?;
    }
    let records = load_observations(
        &spec.calibration_options.objective_variables,
        &spec.observations,
    )
    .context("Failed to load observations.")?;
    for record in &records {
        info!(
            "{} {} observations between {} and {}",
            record.rows.len(),
            record.variable,
            record.start,
            record.end
        );
    }
    info!("Validation successful!");

    Ok(())
}
