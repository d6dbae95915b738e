//! Program settings, read from `settings.toml` in the user's lakecal config folder.
use crate::get_lakecal_config_dir;
use crate::input::read_toml;
use crate::log::{DEFAULT_LOG_LEVEL, LOG_LEVEL_ENV_VAR, parse_log_level};
use anyhow::{Context, Result};
use documented::DocumentedFields;
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::Write;
use std::path::{Path, PathBuf};

const SETTINGS_FILE_NAME: &str = "settings.toml";

const DEFAULT_SETTINGS_FILE_HEADER: &str = "# lakecal program settings
#
# Every setting is shown with its default value. Remove the leading `# ` from a setting to change
# it. Options given on the command line or in an argument file take precedence.
";

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

/// Get the path to where the settings file will be read from
pub fn get_settings_file_path() -> PathBuf {
    get_lakecal_config_dir().join(SETTINGS_FILE_NAME)
}

/// Program settings from config file
#[derive(Debug, DocumentedFields, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// The log level (error, warn, info, debug or trace). The LAKECAL_LOG_LEVEL environment
    /// variable takes precedence.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Whether to write log files to the calibration folder for every calibration
    #[serde(default)]
    pub log_to_file: bool,
    /// Whether to show the output of the simulator and the estimation engine
    #[serde(default)]
    pub debug: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            log_level: default_log_level(),
            log_to_file: false,
            debug: false,
        }
    }
}

impl Settings {
    /// Read the program settings from the user's config folder, using the defaults if there is
    /// no settings file
    pub fn load() -> Result<Settings> {
        Self::load_from_path(&get_settings_file_path())
    }

    fn load_from_path(file_path: &Path) -> Result<Settings> {
        if !file_path.is_file() {
            return Ok(Settings::default());
        }

        let settings: Settings = read_toml(file_path)?;
        parse_log_level(&settings.log_level)
            .with_context(|| format!("Invalid log_level in {}", file_path.display()))?;

        Ok(settings)
    }

    /// The level to log at: the environment variable if set, otherwise the configured level
    pub fn log_level_filter(&self) -> Result<LevelFilter> {
        match env::var(LOG_LEVEL_ENV_VAR) {
            Ok(level) => parse_log_level(&level)
                .with_context(|| format!("Invalid {LOG_LEVEL_ENV_VAR} environment variable")),
            Err(_) => parse_log_level(&self.log_level),
        }
    }

    /// The contents of a settings file listing every setting, commented out, with its
    /// description and default value
    pub fn default_file_contents() -> String {
        let mut out = DEFAULT_SETTINGS_FILE_HEADER.to_string();
        let Ok(table) = toml::Table::try_from(Settings::default()) else {
            return out;
        };

        for field in Settings::FIELD_NAMES {
            let Some(value) = table.get(*field) else {
                continue;
            };

            out.push('\n');
            if let Ok(docs) = Settings::get_field_docs(field) {
                for line in docs.lines() {
                    writeln!(&mut out, "## {}", line.trim()).unwrap();
                }
            }
            writeln!(&mut out, "# {field} = {value}").unwrap();
        }

        out
    }
}
