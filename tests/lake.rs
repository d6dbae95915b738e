//! Common code for building a small lake model to calibrate.
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};

/// Observed temperature at every observed time and depth
pub const OBSERVED_TEMPERATURE: f64 = 10.0;

/// A stand-in simulator which reads the output requests and writes a constant temperature profile
pub const CONSTANT_SIMULATOR: &str = r#"#!/bin/sh
set -e
{
    printf 'Datetime'
    tail -n +2 z_out.dat | while read -r z; do printf ',%s' "$z"; done
    printf '\n'
    tail -n +2 t_out.dat | while read -r t; do
        printf '%s' "$t"
        tail -n +2 z_out.dat | while read -r z; do printf ',10.0'; done
        printf '\n'
    done
} > Results/T_out.dat
"#;

// These helpers give spurious warnings about being unused because each test file declares
// `mod lake` separately, so we suppress the warnings manually

/// Write a lake model and its observations into `dir` and return the path of the argument file.
///
/// The simulation runs from the start of 2019 for 800 days. Temperature is observed at 1, 5 and
/// 10 m on three days in spring 2019, along with rows which calibration must ignore.
#[allow(dead_code)]
pub fn write_lake(dir: &Path, framework: &str) -> PathBuf {
    let model = dir.join("model");
    fs::create_dir_all(model.join("Results")).unwrap();
    fs::write(model.join("Results").join("T_out.dat"), "stale").unwrap();

    let parameters = json!({
        "Input": {
            "Morphology": "Morphology.dat",
            "Forcing": "Forcing.dat"
        },
        "Output": {
            "Path": "Output",
            "Depths": 1,
            "Times": 1,
            "All": true
        },
        "Simulation": {
            "Timestep s": 300,
            "Reference year": 2019,
            "Start d": 0.0,
            "End d": 800.0,
            "DisplaySimulation": 1,
            "Continue from last snapshot": false,
            "Show progress bar": true,
            "Save text restart": false,
            "Use text restart": false
        },
        "ModelParameters": {
            "lat": 46.5,
            "f_wind": 1.0
        }
    });
    fs::write(
        model.join("Lake.par"),
        serde_json::to_string_pretty(&parameters).unwrap(),
    )
    .unwrap();
    fs::write(
        model.join("Morphology.dat"),
        "Depth [m]    Area [m2]\n0    1000\n-10    500\n-20    0\n",
    )
    .unwrap();
    fs::write(model.join("Forcing.dat"), "t u v Tair\n").unwrap();
    fs::write(model.join("simulate.sh"), CONSTANT_SIMULATOR).unwrap();

    let observations = dir.join("temperature.csv");
    let mut rows = String::from("time,depth,value\n");
    for date in ["2019-03-01", "2019-04-01", "2019-05-01"] {
        for depth in [1.0, 5.0, 10.0] {
            rows.push_str(&format!("{date},{depth},{OBSERVED_TEMPERATURE}\n"));
        }
    }
    // During the burn-in period
    rows.push_str("2019-01-10,1.0,4.0\n");
    // Deeper than the lake
    rows.push_str("2019-03-01,30.0,4.0\n");
    // No depth
    rows.push_str("2019-03-01,,4.0\n");
    fs::write(&observations, rows).unwrap();

    let arguments = json!({
        "simulation_folder": model,
        "calibration_folder": dir.join("calibration"),
        "simulation": "simstrat",
        "execute": "sh simulate.sh Calibration.par",
        "parameters": [
            {"name": "f_wind", "initial": 1.0, "min": 0.5, "max": 2.0}
        ],
        "observations": [
            {
                "parameter": "temperature",
                "file": observations,
                "start": "2019-01-01",
                "end": "2020-12-31"
            }
        ],
        "calibration_framework": framework,
        "calibration_options": {
            "objective_variables": ["temperature"],
            "burn_in_days": 30,
            "fatol": 1e-6,
            "maxfev": 200,
            "agents": 2
        }
    });
    let arg_file = dir.join("arguments.json");
    fs::write(&arg_file, serde_json::to_string_pretty(&arguments).unwrap()).unwrap();

    arg_file
}

/// The names of the entries in `folder`, sorted
#[allow(dead_code)]
pub fn folder_entries(folder: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(folder)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
