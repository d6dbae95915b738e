//! The control file, which describes the whole estimation problem to the engine.
use super::format::scientific_padded;
use super::observations::CombinedObservations;
use super::{RUN_SCRIPT_NAME, TEMPLATE_FILE_NAME};
use crate::arguments::{Parameter, WORKING_PAR_FILE_NAME};
use crate::error::format_error;
use crate::model_config::RESULTS_FOLDER_NAME;
use crate::output::output_file_name;
use anyhow::{Result, ensure};
use std::fmt::Write;

/// Longest parameter name the estimation engine accepts
pub const MAX_PARAMETER_NAME_LENGTH: usize = 12;

/// Settings of the control data section after the problem dimensions
const CONTROL_DATA_SETTINGS: &str = "5.0 2.0 0.3 0.01 10 run_abandon_fac=1.5
5.0 5.0 0.001
0.1
20 0.005 4 3 0.01 3
0 0 0
";

/// The single parameter group all parameters belong to
const PARAMETER_GROUP: &str = " fit\trelative\t0.01\t0.00001\tswitch\t2.0\tparabolic";

/// Render the control file
pub fn render_control(
    parameters: &[Parameter],
    objective_variables: &[String],
    observations: &CombinedObservations,
) -> Result<String> {
    for parameter in parameters {
        ensure!(
            parameter.name.len() <= MAX_PARAMETER_NAME_LENGTH,
            format_error!(
                "Parameter name {} is longer than {MAX_PARAMETER_NAME_LENGTH} characters",
                parameter.name
            )
        );
    }

    let n_groups = objective_variables.len();
    let mut out = String::new();
    out.push_str("pcf\n* control data\nnorestart estimation\n");
    writeln!(
        &mut out,
        "{} {} 1 0 {n_groups}",
        parameters.len(),
        observations.len()
    )
    .unwrap();
    writeln!(&mut out, "1 {n_groups} single nopoint 1 0 0").unwrap();
    out.push_str(CONTROL_DATA_SETTINGS);

    out.push_str("* parameter groups\n");
    out.push_str(PARAMETER_GROUP);
    out.push('\n');

    out.push_str("* parameter data\n");
    for parameter in parameters {
        writeln!(
            &mut out,
            "{:>6}\t{}\t{}\t{}\t{}\t{}\t fit\t1.0\t0.0\t1",
            parameter.name,
            parameter.transform.keyword(),
            parameter.change_limit.keyword(),
            scientific_padded(parameter.initial, 10, 4),
            scientific_padded(parameter.min, 10, 4),
            scientific_padded(parameter.max, 10, 4),
        )
        .unwrap();
    }

    out.push_str("* observation groups\n");
    for variable in objective_variables {
        writeln!(&mut out, "{variable}").unwrap();
    }

    out.push_str("* observation data\n");
    for obs in observations.iter() {
        writeln!(
            &mut out,
            "{:<20}\t{}\t{:.6}\t{}",
            obs.id,
            scientific_padded(obs.value, 12, 4),
            obs.weight,
            obs.variable
        )
        .unwrap();
    }

    out.push_str("* model command line\n");
    writeln!(&mut out, "./{RUN_SCRIPT_NAME}").unwrap();

    out.push_str("* model input/output\n");
    writeln!(&mut out, "{TEMPLATE_FILE_NAME}\t{WORKING_PAR_FILE_NAME}").unwrap();
    for variable in objective_variables {
        let output_file = output_file_name(variable)?;
        writeln!(
            &mut out,
            "{variable}.ins\t{RESULTS_FOLDER_NAME}/{output_file}"
        )
        .unwrap();
    }

    out.push_str("* prior information\n");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CalibrationError, classify};
    use crate::fixture::{observation, parameter, utc};
    use crate::grid::CanonicalGrid;
    use crate::observation::ObservationRecord;
    use rstest::rstest;

    fn observations() -> CombinedObservations {
        let records = [ObservationRecord::from_rows(
            "temperature",
            vec![
                observation(utc(2020, 1, 1), 1.0, 5.0),
                observation(utc(2020, 1, 1), 5.0, 4.25),
            ],
        )];
        let grid = CanonicalGrid::from_records(&records).unwrap();
        CombinedObservations::build(&grid, &records, &[2.0]).unwrap()
    }

    #[rstest]
    fn test_render_control(parameter: Parameter) {
        let control =
            render_control(&[parameter], &["temperature".into()], &observations()).unwrap();
        assert_eq!(
            control,
            "pcf
* control data
norestart estimation
1 2 1 0 1
1 1 single nopoint 1 0 0
5.0 2.0 0.3 0.01 10 run_abandon_fac=1.5
5.0 5.0 0.001
0.1
20 0.005 4 3 0.01 3
0 0 0
* parameter groups
 fit\trelative\t0.01\t0.00001\tswitch\t2.0\tparabolic
* parameter data
f_wind\tnone\tfactor\t1.0000e+00\t5.0000e-01\t2.0000e+00\t fit\t1.0\t0.0\t1
* observation groups
temperature
* observation data
temperature_0_0     \t  4.2500e+00\t2.000000\ttemperature
temperature_0_1     \t  5.0000e+00\t2.000000\ttemperature
* model command line
./run.sh
* model input/output
pest.tpl\tCalibration.par
temperature.ins\tResults/T_out.dat
* prior information
"
        );
    }

    #[rstest]
    fn test_render_control_long_parameter_name(mut parameter: Parameter) {
        parameter.name = "seiche_energy_factor".into();
        let err =
            render_control(&[parameter], &["temperature".into()], &observations()).unwrap_err();
        assert!(matches!(classify(&err), Some(CalibrationError::Format(_))));
    }

    #[rstest]
    fn test_render_control_unknown_variable(parameter: Parameter) {
        let err = render_control(&[parameter], &["chlorophyll".into()], &observations())
            .unwrap_err();
        assert!(matches!(
            classify(&err),
            Some(CalibrationError::Configuration(_))
        ));
    }
}
