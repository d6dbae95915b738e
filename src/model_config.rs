//! Reading, editing and writing the simulator's JSON parameter document.
use crate::arguments::WORKING_PAR_FILE_NAME;
use crate::error::configuration_error;
use crate::grid::{DEPTHS_FILE_NAME, TIMES_FILE_NAME};
use crate::input::{input_err_msg, read_json};
use crate::time::datetime_from_days;
use anyhow::{Context, Result, ensure};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// The folder, relative to the parameter file, into which the simulator writes results
pub const RESULTS_FOLDER_NAME: &str = "Results";

/// Top-level groups every parameter document must have
const REQUIRED_GROUPS: [&str; 4] = ["Input", "Output", "Simulation", "ModelParameters"];

/// `Simulation` flags which must be off for unattended runs
const DISABLED_SIMULATION_FLAGS: [&str; 4] = [
    "Continue from last snapshot",
    "Show progress bar",
    "Save text restart",
    "Use text restart",
];

/// How [`ModelConfig::apply`] treats the `Output` and `Simulation` groups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditMode {
    /// Force the output settings calibration relies on and silence interactive features
    Initial,
    /// Only change parameters, checking the output settings were set up already
    Update,
}

/// The value written for a model parameter
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    /// A literal number
    Value(f64),
    /// A token standing in for the value, to be replaced when writing a template
    Placeholder,
}

/// The token written in place of a parameter's value by [`ParameterValue::Placeholder`]
pub fn placeholder_token(name: &str) -> String {
    format!("$${name}$$")
}

/// The simulator's parameter document, with key order preserved
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    document: Value,
}

impl ModelConfig {
    /// Load the user's parameter file from the simulation folder.
    ///
    /// The folder must contain exactly one `.par` file, which must not use the name reserved for
    /// the working copy.
    pub fn load_source(folder: &Path) -> Result<ModelConfig> {
        let file_path = source_par_file(folder)?;
        ModelConfig::from_path(&file_path)
    }

    /// Load the working copy of the parameter file from `folder`
    pub fn load_working(folder: &Path) -> Result<ModelConfig> {
        ModelConfig::from_path(&folder.join(WORKING_PAR_FILE_NAME))
    }

    /// Read and check a parameter document
    pub fn from_path(file_path: &Path) -> Result<ModelConfig> {
        let document: Value = read_json(file_path)?;
        ModelConfig::from_value(document).with_context(|| input_err_msg(file_path))
    }

    /// Check that a JSON value has the shape of a parameter document
    pub fn from_value(document: Value) -> Result<ModelConfig> {
        let root = document
            .as_object()
            .ok_or_else(|| configuration_error!("Parameter file must contain a JSON object"))?;
        for group in REQUIRED_GROUPS {
            ensure!(
                root.get(group).is_some_and(Value::is_object),
                configuration_error!("Parameter file is missing the \"{group}\" group")
            );
        }

        Ok(ModelConfig { document })
    }

    /// The year from which the simulator counts days
    pub fn reference_year(&self) -> Result<i32> {
        let year = self
            .get("Simulation", "Reference year")?
            .as_i64()
            .context("\"Reference year\" must be an integer")?;
        i32::try_from(year).context("\"Reference year\" is out of range")
    }

    /// First simulated day, counted from the reference year
    pub fn start_day(&self) -> Result<f64> {
        self.get_f64("Simulation", "Start d")
    }

    /// Last simulated day, counted from the reference year
    pub fn end_day(&self) -> Result<f64> {
        self.get_f64("Simulation", "End d")
    }

    /// Start of the simulation as a timestamp
    pub fn start_time(&self) -> Result<DateTime<Utc>> {
        datetime_from_days(self.start_day()?, self.reference_year()?)
    }

    /// End of the simulation as a timestamp
    pub fn end_time(&self) -> Result<DateTime<Utc>> {
        datetime_from_days(self.end_day()?, self.reference_year()?)
    }

    /// The bathymetry file, relative to the simulation folder
    pub fn morphology_file(&self) -> Result<PathBuf> {
        let file = self
            .get("Input", "Morphology")?
            .as_str()
            .context("\"Morphology\" must be a path")?;
        Ok(PathBuf::from(file))
    }

    /// The value of a model parameter, if it is set
    pub fn model_parameter(&self, name: &str) -> Option<&Value> {
        self.group("ModelParameters")?.get(name)
    }

    /// Set model parameters to literal values or placeholders.
    ///
    /// In [`EditMode::Initial`] the output settings are forced to the request files and the
    /// interactive simulation features are switched off. In [`EditMode::Update`] the output settings
    /// must already have those values.
    pub fn apply(
        &mut self,
        overrides: &IndexMap<String, ParameterValue>,
        mode: EditMode,
    ) -> Result<()> {
        match mode {
            EditMode::Initial => self.force_output_settings()?,
            EditMode::Update => self.check_output_settings()?,
        }

        let parameters = self.group_mut("ModelParameters")?;
        for (name, value) in overrides {
            let value = match value {
                ParameterValue::Value(value) => Value::from(
                    serde_json::Number::from_f64(*value)
                        .with_context(|| format!("Invalid value for parameter {name}: {value}"))?,
                ),
                ParameterValue::Placeholder => Value::String(placeholder_token(name)),
            };
            parameters.insert(name.clone(), value);
        }

        Ok(())
    }

    /// Change the last simulated day
    pub fn set_end_day(&mut self, day: f64) -> Result<()> {
        let number = serde_json::Number::from_f64(day)
            .with_context(|| format!("Invalid end day: {day}"))?;
        self.group_mut("Simulation")?
            .insert("End d".into(), Value::from(number));
        Ok(())
    }

    /// Serialise the document with four-space indentation
    pub fn to_pretty_string(&self) -> Result<String> {
        let mut buf = Vec::new();
        let formatter = PrettyFormatter::with_indent(b"    ");
        let mut serialiser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.document.serialize(&mut serialiser)?;
        Ok(String::from_utf8(buf)?)
    }

    /// Write the document to `folder` as the working parameter file
    pub fn save(&self, folder: &Path) -> Result<PathBuf> {
        let file_path = folder.join(WORKING_PAR_FILE_NAME);
        fs::write(&file_path, self.to_pretty_string()?)
            .with_context(|| format!("Failed to write {}", file_path.display()))?;
        Ok(file_path)
    }

    fn force_output_settings(&mut self) -> Result<()> {
        let output = self.group_mut("Output")?;
        output.insert("Depths".into(), DEPTHS_FILE_NAME.into());
        output.insert("Times".into(), TIMES_FILE_NAME.into());
        output.insert("Path".into(), RESULTS_FOLDER_NAME.into());
        output.insert("All".into(), false.into());

        let simulation = self.group_mut("Simulation")?;
        simulation.insert("DisplaySimulation".into(), 0.into());
        for flag in DISABLED_SIMULATION_FLAGS {
            simulation.insert(flag.into(), false.into());
        }

        Ok(())
    }

    fn check_output_settings(&self) -> Result<()> {
        let expected = [
            ("Depths", Value::from(DEPTHS_FILE_NAME)),
            ("Times", Value::from(TIMES_FILE_NAME)),
            ("Path", Value::from(RESULTS_FOLDER_NAME)),
            ("All", Value::from(false)),
        ];
        for (key, value) in expected {
            let actual = self.group("Output").and_then(|output| output.get(key));
            ensure!(
                actual == Some(&value),
                configuration_error!(
                    "Output setting \"{key}\" must be {value} for calibration (found {})",
                    actual.map_or_else(|| "nothing".to_string(), Value::to_string)
                )
            );
        }

        Ok(())
    }

    fn group(&self, group: &str) -> Option<&Map<String, Value>> {
        self.document.get(group)?.as_object()
    }

    fn group_mut(&mut self, group: &str) -> Result<&mut Map<String, Value>> {
        self.document
            .get_mut(group)
            .and_then(Value::as_object_mut)
            .ok_or_else(|| configuration_error!("Parameter file is missing the \"{group}\" group"))
            .map_err(Into::into)
    }

    fn get(&self, group: &str, key: &str) -> Result<&Value> {
        self.group(group)
            .and_then(|values| values.get(key))
            .with_context(|| format!("Parameter file has no \"{group}.{key}\" entry"))
    }

    fn get_f64(&self, group: &str, key: &str) -> Result<f64> {
        self.get(group, key)?
            .as_f64()
            .with_context(|| format!("\"{group}.{key}\" must be a number"))
    }
}

/// Whether a path names a parameter file
fn is_par_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "par")
}

/// Find the user's parameter file in the simulation folder
pub fn source_par_file(folder: &Path) -> Result<PathBuf> {
    let mut par_files = Vec::new();
    for entry in fs::read_dir(folder).with_context(|| input_err_msg(folder))? {
        let path = entry?.path();
        if path.is_file() && is_par_file(&path) {
            par_files.push(path);
        }
    }

    ensure!(
        par_files.len() == 1,
        configuration_error!(
            "Only 1 PAR file permitted in simulation folder ({} detected)",
            par_files.len()
        )
    );
    let file_path = par_files.remove(0);
    ensure!(
        file_path.file_name().is_none_or(|name| name != WORKING_PAR_FILE_NAME),
        configuration_error!("PAR file must not be called {WORKING_PAR_FILE_NAME}")
    );

    Ok(file_path)
}

/// Recreate `dst` as a working copy of the simulation folder.
///
/// The parameter file is copied under the working name. Other parameter files and the results
/// folder are left behind.
pub fn stage_simulation_inputs(src: &Path, dst: &Path) -> Result<()> {
    let par_file = source_par_file(src)?;
    if dst.exists() {
        fs::remove_dir_all(dst)
            .with_context(|| format!("Failed to remove {}", dst.display()))?;
    }
    fs::create_dir_all(dst).with_context(|| format!("Failed to create {}", dst.display()))?;
    fs::copy(&par_file, dst.join(WORKING_PAR_FILE_NAME))
        .with_context(|| format!("Failed to copy {}", par_file.display()))?;

    copy_folder_contents(src, dst, |path| {
        !(is_par_file(path) || is_results_folder(path))
    })
}

/// Copy the simulation folder's contents into `dst`, except for the results folder
pub fn copy_model_inputs(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).with_context(|| format!("Failed to create {}", dst.display()))?;
    copy_folder_contents(src, dst, |path| !is_results_folder(path))
}

fn is_results_folder(path: &Path) -> bool {
    path.is_dir() && path.file_name().is_some_and(|name| name == RESULTS_FOLDER_NAME)
}

/// Copy the top-level entries of `src` accepted by `keep` into `dst`, recursing into folders
fn copy_folder_contents<F>(src: &Path, dst: &Path, keep: F) -> Result<()>
where
    F: Fn(&Path) -> bool,
{
    for entry in fs::read_dir(src).with_context(|| input_err_msg(src))? {
        let path = entry?.path();
        if !keep(&path) {
            continue;
        }

        let Some(name) = path.file_name() else {
            continue;
        };
        copy_recursive(&path, &dst.join(name))?;
    }

    Ok(())
}

/// Copy a file, or a folder and everything in it
pub fn copy_recursive(src: &Path, dst: &Path) -> Result<()> {
    if src.is_dir() {
        fs::create_dir_all(dst).with_context(|| format!("Failed to create {}", dst.display()))?;
        for entry in fs::read_dir(src).with_context(|| input_err_msg(src))? {
            let entry = entry?;
            copy_recursive(&entry.path(), &dst.join(entry.file_name()))?;
        }
    } else {
        fs::copy(src, dst).with_context(|| {
            format!("Failed to copy {} to {}", src.display(), dst.display())
        })?;
    }

    Ok(())
}
