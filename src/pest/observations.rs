//! The table of observations shared by the instruction and control files.
use crate::error::format_error;
use crate::grid::CanonicalGrid;
use crate::observation::ObservationRecord;
use anyhow::{Context, Result, ensure};
use log::debug;
use std::collections::HashSet;

/// Longest observation identifier the estimation engine accepts
pub const MAX_IDENTIFIER_LENGTH: usize = 20;

/// One observation as the estimation engine sees it
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedObservation {
    /// Identifier of the form `<variable>_<time index>_<depth index>`
    pub id: String,
    /// The objective variable, which is also the observation group
    pub variable: String,
    /// Index into the grid's ascending times
    pub time_index: usize,
    /// Index into the grid's descending depths
    pub depth_index: usize,
    /// Observed value
    pub value: f64,
    /// Observation weight multiplied by the objective weight
    pub weight: f64,
}

/// Build the identifier for an observation
pub fn observation_id(variable: &str, time_index: usize, depth_index: usize) -> String {
    format!("{variable}_{time_index}_{depth_index}")
}

/// Split an identifier into its variable, time index and depth index
pub fn parse_observation_id(id: &str) -> Result<(&str, usize, usize)> {
    let mut parts = id.rsplitn(3, '_');
    let (Some(depth_index), Some(time_index), Some(variable)) =
        (parts.next(), parts.next(), parts.next())
    else {
        anyhow::bail!("Invalid observation identifier: {id}");
    };
    let time_index = time_index
        .parse::<usize>()
        .with_context(|| format!("Invalid time index in observation identifier: {id}"))?;
    let depth_index = depth_index
        .parse::<usize>()
        .with_context(|| format!("Invalid depth index in observation identifier: {id}"))?;

    Ok((variable, time_index, depth_index))
}

/// Every observation lying on the grid, ordered by variable, then time, then depth (descending)
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedObservations(Vec<CombinedObservation>);

impl CombinedObservations {
    /// Build the table from the grid and one record per objective variable.
    ///
    /// Where a record has several rows with the same time and depth, only the first is used.
    pub fn build(
        grid: &CanonicalGrid,
        records: &[ObservationRecord],
        objective_weights: &[f64],
    ) -> Result<CombinedObservations> {
        let mut observations = Vec::new();
        for (record, objective_weight) in records.iter().zip(objective_weights) {
            let mut rows = Vec::with_capacity(record.rows.len());
            let mut seen = HashSet::new();
            for row in &record.rows {
                let (Some(time_index), Some(depth_index)) = (
                    grid.time_index(row.time),
                    grid.descending_depth_index(row.depth),
                ) else {
                    continue;
                };

                if !seen.insert((time_index, depth_index)) {
                    debug!(
                        "Ignoring duplicate {} observation at {} ({} m)",
                        record.variable, row.time, row.depth
                    );
                    continue;
                }

                let id = observation_id(&record.variable, time_index, depth_index);
                ensure!(
                    id.len() <= MAX_IDENTIFIER_LENGTH,
                    format_error!(
                        "Observation identifier {id} is longer than {MAX_IDENTIFIER_LENGTH} \
                        characters. Use a shorter objective variable name or fewer observations."
                    )
                );
                rows.push(CombinedObservation {
                    id,
                    variable: record.variable.clone(),
                    time_index,
                    depth_index,
                    value: row.value,
                    weight: row.weight * objective_weight,
                });
            }

            rows.sort_by_key(|obs| (obs.time_index, obs.depth_index));
            observations.extend(rows);
        }

        Ok(CombinedObservations(observations))
    }

    /// Iterate over all observations
    pub fn iter(&self) -> impl Iterator<Item = &CombinedObservation> {
        self.0.iter()
    }

    /// The observations of one variable, in file order
    pub fn for_variable<'a>(
        &'a self,
        variable: &'a str,
    ) -> impl Iterator<Item = &'a CombinedObservation> + 'a {
        self.0.iter().filter(move |obs| obs.variable == variable)
    }

    /// Number of observations
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no observations
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
