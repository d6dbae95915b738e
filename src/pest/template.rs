//! The template from which the estimation engine writes each run's parameter file.
use crate::arguments::Parameter;
use crate::error::format_error;
use crate::model_config::{EditMode, ModelConfig, ParameterValue, placeholder_token};
use anyhow::{Result, ensure};
use indexmap::IndexMap;

/// Characters which may delimit parameter spaces, in order of preference
const MARKER_CANDIDATES: [char; 7] = ['#', '@', '~', '%', '^', '|', '!'];

/// Width of a parameter space, excluding markers
const PARAMETER_SPACE_WIDTH: usize = 10;

/// Render the template file for `config`, with a parameter space in place of each parameter's
/// value.
///
/// Parameter spaces are not quoted, so the parameter file the engine writes holds numbers.
pub fn render_template(config: &ModelConfig, parameters: &[Parameter]) -> Result<String> {
    let mut config = config.clone();
    let overrides: IndexMap<_, _> = parameters
        .iter()
        .map(|parameter| (parameter.name.clone(), ParameterValue::Placeholder))
        .collect();
    config.apply(&overrides, EditMode::Initial)?;

    let mut text = config.to_pretty_string()?;
    let marker = choose_marker(&text, parameters)?;
    for parameter in parameters {
        let token = format!("\"{}\"", placeholder_token(&parameter.name));
        let count = text.matches(&token).count();
        ensure!(
            count == 1,
            format_error!(
                "Placeholder for parameter {} found {count} times in the template, expected once",
                parameter.name
            )
        );

        let space = format!(
            "{marker}{:>width$}{marker}",
            parameter.name,
            width = PARAMETER_SPACE_WIDTH
        );
        text = text.replacen(&token, &space, 1);
    }

    Ok(format!("ptf {marker}\n{text}\n"))
}

/// Pick the first marker which appears neither in the document nor in any parameter name
fn choose_marker(text: &str, parameters: &[Parameter]) -> Result<char> {
    MARKER_CANDIDATES
        .into_iter()
        .find(|marker| {
            !text.contains(*marker)
                && parameters
                    .iter()
                    .all(|parameter| !parameter.name.contains(*marker))
        })
        .ok_or_else(|| {
            format_error!(
                "Every candidate template marker ({}) appears in the parameter file",
                MARKER_CANDIDATES.iter().collect::<String>()
            )
            .into()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CalibrationError, classify};
    use crate::fixture::{model_config, parameter};
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    fn test_render_template(model_config: ModelConfig, parameter: Parameter) {
        let template = render_template(&model_config, &[parameter]).unwrap();
        assert!(template.starts_with("ptf #\n{\n"));
        assert!(template.contains("\n        \"f_wind\": #    f_wind#"));
        assert!(template.contains("\"Depths\": \"z_out.dat\""));
        assert!(!template.contains("$$"));

        // The source document is unchanged
        assert_eq!(
            model_config.model_parameter("f_wind"),
            Some(&serde_json::Value::from(1.0))
        );
    }

    #[rstest]
    fn test_render_template_marker_in_use(parameter: Parameter) {
        let config = ModelConfig::from_value(json!({
            "Input": {"Morphology": "Morphology#1.dat", "Forcing": "~forcing@.dat"},
            "Output": {},
            "Simulation": {},
            "ModelParameters": {}
        }))
        .unwrap();
        let template = render_template(&config, &[parameter]).unwrap();
        assert!(template.starts_with("ptf %\n"));
        assert!(template.contains("%    f_wind%"));
    }

    #[rstest]
    fn test_render_template_no_marker(parameter: Parameter) {
        let config = ModelConfig::from_value(json!({
            "Input": {"Morphology": "#@~%^|!"},
            "Output": {},
            "Simulation": {},
            "ModelParameters": {}
        }))
        .unwrap();
        let err = render_template(&config, &[parameter]).unwrap_err();
        assert!(matches!(classify(&err), Some(CalibrationError::Format(_))));
    }

    #[rstest]
    fn test_render_template_placeholder_collision(parameter: Parameter) {
        // A string elsewhere in the document looks exactly like the placeholder
        let config = ModelConfig::from_value(json!({
            "Input": {"Note": "$$f_wind$$"},
            "Output": {},
            "Simulation": {},
            "ModelParameters": {}
        }))
        .unwrap();
        let err = render_template(&config, &[parameter]).unwrap_err();
        assert!(matches!(classify(&err), Some(CalibrationError::Format(_))));
    }
}
