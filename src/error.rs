//! Classification of the failures that abort a calibration.
//!
//! Functions in this crate return [`anyhow::Result`] and attach context as errors propagate. When a
//! failure belongs to one of the categories below, the root cause is a [`CalibrationError`], which
//! callers can recover with [`anyhow::Error::downcast_ref`].
use thiserror::Error;

/// The kinds of fatal error a calibration can end with
#[derive(Error, Debug, PartialEq)]
pub enum CalibrationError {
    /// A required file is missing or ambiguous, or an option has an unsupported value
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A generated control artifact breaks a size or syntax rule of the estimation engine
    #[error("Format error: {0}")]
    Format(String),

    /// The simulator or the estimation engine exited unsuccessfully
    #[error("Command `{command}` failed ({status})\nStandard Error: {stderr}")]
    ExternalProcess {
        /// The command line that was run
        command: String,
        /// Exit status, as reported by the OS
        status: String,
        /// Captured standard error
        stderr: String,
    },

    /// Simulated and observed values have no rows in common
    #[error("Alignment error: {0}")]
    Alignment(String),
}

/// Build a [`CalibrationError::Configuration`] from a format string
macro_rules! configuration_error {
    ($($arg:tt)*) => {
        $crate::error::CalibrationError::Configuration(format!($($arg)*))
    };
}
pub(crate) use configuration_error;

/// Build a [`CalibrationError::Format`] from a format string
macro_rules! format_error {
    ($($arg:tt)*) => {
        $crate::error::CalibrationError::Format(format!($($arg)*))
    };
}
pub(crate) use format_error;

/// Get the [`CalibrationError`] at the root of an error chain, if there is one
pub fn classify(err: &anyhow::Error) -> Option<&CalibrationError> {
    err.chain().find_map(|cause| cause.downcast_ref::<CalibrationError>())
}
