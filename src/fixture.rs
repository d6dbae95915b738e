//! Fixtures for tests

use crate::arguments::{
    CalibrationOptions, CalibrationSpec, ChangeLimit, Framework, ObjectiveFunction,
    ObservationSource, Parameter, Simulator, Transform,
};
use crate::model_config::ModelConfig;
use crate::observation::Observation;
use chrono::{DateTime, TimeZone, Utc};
use rstest::fixture;
use serde_json::{Value, json};
use std::path::PathBuf;

/// Assert that an error with the given message occurs
macro_rules! assert_error {
    ($result:expr, $msg:expr) => {
        assert_eq!(
            $result.unwrap_err().chain().next().unwrap().to_string(),
            $msg
        );
    };
}
pub(crate) use assert_error;

/// Midnight UTC on the given date
pub fn utc(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

/// An observation with unit weight
pub fn observation(time: DateTime<Utc>, depth: f64, value: f64) -> Observation {
    Observation {
        time,
        depth,
        value,
        weight: 1.0,
    }
}

#[fixture]
pub fn parameter() -> Parameter {
    Parameter {
        name: "f_wind".into(),
        initial: 1.0,
        min: 0.5,
        max: 2.0,
        change_limit: ChangeLimit::Factor,
        transform: Transform::None,
    }
}

#[fixture]
pub fn calibration_spec(parameter: Parameter) -> CalibrationSpec {
    CalibrationSpec {
        simulation_folder: std::env::temp_dir(),
        calibration_folder: std::env::temp_dir().join("lakecal-calibration"),
        simulation: Simulator::Simstrat,
        execute: "simstrat Calibration.par".into(),
        parameters: vec![parameter],
        observations: vec![ObservationSource {
            parameter: "temperature".into(),
            file: PathBuf::from("temperature.csv"),
            start: utc(2019, 1, 1),
            end: utc(2021, 1, 1),
        }],
        calibration_framework: Framework::LocalOptimiser,
        calibration_options: CalibrationOptions {
            objective_variables: vec!["temperature".into()],
            objective_weights: Vec::new(),
            objective_function: ObjectiveFunction::Rms,
            burn_in_days: None,
            method: None,
            max_iterations: 1000,
            fatol: 1e-4,
            xatol: None,
            disp: false,
            time_interpolation: None,
            depth_interpolation: None,
            agents: 1,
            port: 4005,
            host: "localhost".into(),
            debug: false,
            master_command: "pest_hp pest.pst /h :{port}".into(),
            worker_command: "agent_hp pest.pst /h {host}:{port}".into(),
        },
        log: false,
    }
}

/// A small Simstrat parameter document
#[fixture]
pub fn model_document() -> Value {
    json!({
        "Input": {
            "Morphology": "Morphology.dat",
            "Initial conditions": "Initial_conditions.dat",
            "Forcing": "Forcing.dat"
        },
        "Output": {
            "Path": "Output",
            "Depths": 0.5,
            "Times": 24,
            "All": true
        },
        "ModelConfig": {
            "MaxLengthWaterColumn": 1000,
            "TurbulenceModel": 1
        },
        "Simulation": {
            "Timestep s": 300,
            "Reference year": 2020,
            "Start d": 0.0,
            "End d": 365.0,
            "DisplaySimulation": 1,
            "Continue from last snapshot": true,
            "Show progress bar": true,
            "Save text restart": false,
            "Use text restart": false
        },
        "ModelParameters": {
            "lat": 46.5,
            "p_air": 990.0,
            "a_seiche": 0.001,
            "f_wind": 1.0
        }
    })
}

#[fixture]
pub fn model_config(model_document: Value) -> ModelConfig {
    ModelConfig::from_value(model_document).unwrap()
}
