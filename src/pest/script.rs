//! The script each worker runs to perform one simulation.
use crate::arguments::substitute_calibration_folder;
use crate::model_config::RESULTS_FOLDER_NAME;
use std::path::Path;

/// Render the run script.
///
/// The script copies the shared inputs next to itself and then runs `execute` there, with the
/// script's folder as the calibration folder.
pub fn render_run_script(execute: &str, inputs_folder: &Path) -> String {
    let inputs = inputs_folder.display().to_string().replace('"', "\\\"");
    format!(
        "#!/bin/bash
dir=\"$(dirname \"$(realpath \"$0\")\")\"
cp -r \"{inputs}\"/* \"$dir\"/
mkdir -p \"$dir/{RESULTS_FOLDER_NAME}\"
cd \"$dir\"
{}
",
        substitute_calibration_folder(execute, "$dir")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_run_script() {
        let script = render_run_script(
            "simstrat {calibration_folder}/Calibration.par",
            Path::new("/data/calibration/inputs"),
        );
        assert_eq!(
            script,
            "#!/bin/bash
dir=\"$(dirname \"$(realpath \"$0\")\")\"
cp -r \"/data/calibration/inputs\"/* \"$dir\"/
mkdir -p \"$dir/Results\"
cd \"$dir\"
simstrat $dir/Calibration.par
"
        );
    }
}
