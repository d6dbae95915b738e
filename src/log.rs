//! Logging for calibration runs.
//!
//! Progress messages go to standard output and warnings and errors to standard error. A run can
//! also keep a record in the calibration folder: [`LOG_INFO_FILE_NAME`] holds every message of
//! the run in order and [`LOG_ERROR_FILE_NAME`] only the warnings and errors. Calibrations can run
//! for days, so the files carry the date as well as the time.
use anyhow::{Context, Result, bail, ensure};
use chrono::Local;
use fern::colors::{Color, ColoredLevelConfig};
use fern::{Dispatch, FormatCallback};
use log::{Level, LevelFilter, Record, info};
use std::fmt::{Arguments, Display};
use std::fs::{File, OpenOptions};
use std::io::IsTerminal;
use std::path::Path;
use std::sync::OnceLock;

/// A flag indicating whether the logger has been initialised
static LOGGER_INIT: OnceLock<()> = OnceLock::new();

/// The log level used when neither the environment nor the settings file names one
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// The environment variable which overrides the log level in the settings file
pub const LOG_LEVEL_ENV_VAR: &str = "LAKECAL_LOG_LEVEL";

/// The log file, in the calibration folder, with every message of the run
pub const LOG_INFO_FILE_NAME: &str = "lakecal_info.log";

/// The log file, in the calibration folder, with warnings and errors only
pub const LOG_ERROR_FILE_NAME: &str = "lakecal_error.log";

/// Timestamp format on the terminal
const TERMINAL_TIME_FORMAT: &str = "%H:%M:%S";

/// Timestamp format in log files
const FILE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Whether the program logger has been initialised
pub fn is_logger_initialised() -> bool {
    LOGGER_INIT.get().is_some()
}

/// Convert a log level name (`off`, `error`, `warn`, `info`, `debug` or `trace`) to a
/// [`LevelFilter`]
pub fn parse_log_level(log_level: &str) -> Result<LevelFilter> {
    Ok(match log_level.to_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        unknown => bail!("Unknown log level: {unknown}"),
    })
}

/// Start logging at `level`. If `log_folder` is given, log files are (re)created there.
///
/// Can only be called once per process.
pub fn init(level: LevelFilter, log_folder: Option<&Path>) -> Result<()> {
    ensure!(!is_logger_initialised(), "Logger already initialised");

    let mut dispatch = Dispatch::new()
        .chain(terminal_dispatch(level, false))
        .chain(terminal_dispatch(level, true));

    if let Some(folder) = log_folder {
        dispatch = dispatch
            .chain(
                Dispatch::new()
                    .format(write_file_entry)
                    .level(level.max(LevelFilter::Info))
                    .chain(create_log_file(folder, LOG_INFO_FILE_NAME)?),
            )
            .chain(
                Dispatch::new()
                    .format(write_file_entry)
                    .level(LevelFilter::Warn)
                    .chain(create_log_file(folder, LOG_ERROR_FILE_NAME)?),
            );
    }

    dispatch.apply().context("Logger already initialised")?;
    let _ = LOGGER_INIT.set(());
    if let Some(folder) = log_folder {
        info!("Writing log files to {}", folder.display());
    }

    Ok(())
}

/// Messages for standard error (warnings and errors) or standard output (everything else)
fn terminal_dispatch(level: LevelFilter, to_stderr: bool) -> Dispatch {
    let use_colour = if to_stderr {
        std::io::stderr().is_terminal()
    } else {
        std::io::stdout().is_terminal()
    };
    let colours = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Blue)
        .trace(Color::Magenta);

    let dispatch = Dispatch::new().format(move |out, message, record| {
        if use_colour {
            let level = colours.color(record.level());
            write_entry(out, TERMINAL_TIME_FORMAT, level, record, message);
        } else {
            write_entry(out, TERMINAL_TIME_FORMAT, record.level(), record, message);
        }
    });

    if to_stderr {
        dispatch
            .level(level.min(LevelFilter::Warn))
            .chain(std::io::stderr())
    } else {
        dispatch
            .filter(|metadata| metadata.level() > Level::Warn)
            .level(level)
            .chain(std::io::stdout())
    }
}

/// Truncate or create a log file
fn create_log_file(folder: &Path, file_name: &str) -> Result<File> {
    let file_path = folder.join(file_name);
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&file_path)
        .with_context(|| format!("Failed to create log file {}", file_path.display()))
}

/// The module a message came from, if it is outside lakecal
fn foreign_target(target: &str) -> Option<&str> {
    (target.split("::").next() != Some(env!("CARGO_CRATE_NAME"))).then_some(target)
}

/// Write one log entry, naming its source only when it is another crate
fn write_entry<L: Display>(
    out: FormatCallback,
    time_format: &str,
    level: L,
    record: &Record,
    message: &Arguments,
) {
    let timestamp = Local::now().format(time_format);
    match foreign_target(record.target()) {
        Some(target) => out.finish(format_args!("[{timestamp} {level} {target}] {message}")),
        None => out.finish(format_args!("[{timestamp} {level}] {message}")),
    }
}

/// Write one log entry to a file
fn write_file_entry(out: FormatCallback, message: &Arguments, record: &Record) {
    write_entry(out, FILE_TIME_FORMAT, record.level(), record, message);
}

/// Logs the numbered stages of a calibration as they start and finish
#[derive(Debug, Default)]
pub struct StageLogger {
    current: usize,
}

impl StageLogger {
    /// Log the start of the next stage
    pub fn begin(&mut self, description: &str) {
        self.current += 1;
        info!("Stage {}: {description}", self.current);
    }

    /// Log that the current stage has finished
    pub fn complete(&self) {
        info!("Stage {}: Completed.", self.current);
    }

    /// The number of the current stage, or zero before the first
    pub fn current(&self) -> usize {
        self.current
    }
}
