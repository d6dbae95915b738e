//! Instruction files, which tell the estimation engine where to read each observation's simulated
//! value in the simulator's output.
use super::observations::CombinedObservations;
use crate::error::format_error;
use crate::grid::CanonicalGrid;
use anyhow::{Result, ensure};
use itertools::Itertools;
use std::fmt::Write;

/// Longest line the estimation engine accepts in an instruction file
pub const MAX_LINE_LENGTH: usize = 2000;

/// The marker delimiting secondary search strings
const MARKER: char = '@';

/// Render the instruction file for one objective variable.
///
/// The output file has a header line followed by one row per grid time, with a leading time
/// column and then one column per grid depth (deepest first). Rows without any observation of
/// `variable` are skipped over.
pub fn render_instructions(
    variable: &str,
    grid: &CanonicalGrid,
    observations: &CombinedObservations,
) -> Result<String> {
    let n_depths = grid.depths().len();
    let by_time = observations
        .for_variable(variable)
        .into_group_map_by(|obs| obs.time_index);

    let mut out = format!("pif {MARKER}\n");

    // Skip the header
    out.push_str("l1\n");
    let mut current_line = 1;

    for time_index in by_time.keys().copied().sorted() {
        let target_line = time_index + 2;
        let mut line = format!("l{}", target_line - current_line);
        current_line = target_line;

        let row = &by_time[&time_index];
        for depth_index in 0..n_depths {
            write!(&mut line, " {MARKER},{MARKER}").unwrap();
            if let Some(obs) = row.iter().find(|obs| obs.depth_index == depth_index) {
                write!(&mut line, " !{}!", obs.id).unwrap();
            }
        }

        ensure!(
            line.len() <= MAX_LINE_LENGTH,
            format_error!(
                "Instruction file line for {variable} is {} characters long, more than the \
                {MAX_LINE_LENGTH} allowed. Reduce the number of output depths.",
                line.len()
            )
        );
        out.push_str(&line);
        out.push('\n');
    }

    Ok(out)
}
