//! Calibration of one-dimensional lake models against observed profiles.
//!
//! A calibration is described by a JSON argument file ([`arguments::CalibrationSpec`]) and run with
//! [`calibrate::run_calibration`], either by a local optimiser or by an external estimation engine.
#![warn(missing_docs)]
use std::path::PathBuf;

pub mod arguments;
pub mod calibrate;
pub mod cli;
pub mod error;
pub mod grid;
pub mod input;
pub mod log;
pub mod metrics;
pub mod model_config;
pub mod observation;
pub mod optimiser;
pub mod output;
pub mod pest;
pub mod process;
pub mod settings;
pub mod time;

#[cfg(test)]
mod fixture;

/// Get the folder in which lakecal's program settings are stored
pub fn get_lakecal_config_dir() -> PathBuf {
    let mut dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    dir.push("lakecal");
    dir
}
