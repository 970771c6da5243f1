use std::cmp::Ordering;

use indexmap::IndexMap;

use super::types::{NormalizedRun, StepOutcome};

pub(crate) fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

/// One measured duration of a step.
#[derive(Debug, Clone, PartialEq)]
pub struct DurationSample {
    pub run_id: String,
    pub seconds: f64,
}

/// Historical durations of one step, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct DurationDistribution {
    pub step_name: String,
    pub samples: Vec<DurationSample>,
}

impl DurationDistribution {
    /// Durations of every sample not taken from `run_id`.
    pub fn history_excluding(&self, run_id: &str) -> Vec<f64> {
        self.samples
            .iter()
            .filter(|s| s.run_id != run_id)
            .map(|s| s.seconds)
            .collect()
    }
}

/// Builds per-step duration distributions across runs.
///
/// `runs` must already be in chronological order; samples keep that order.
/// Only successful steps with a measured duration contribute: a step that
/// failed fast is not fast, and a step missing from a run is not imputed.
/// Steps appear in the map in order of first appearance.
pub fn aggregate_durations(runs: &[NormalizedRun]) -> IndexMap<String, DurationDistribution> {
    let mut distributions: IndexMap<String, DurationDistribution> = IndexMap::new();

    for run in runs {
        for step in &run.steps {
            let Some(seconds) = step.duration else {
                continue;
            };
            if step.outcome != StepOutcome::Success {
                continue;
            }

            distributions
                .entry(step.name.clone())
                .or_insert_with(|| DurationDistribution {
                    step_name: step.name.clone(),
                    samples: Vec::new(),
                })
                .samples
                .push(DurationSample {
                    run_id: run.metadata.run_id.clone(),
                    seconds,
                });
        }
    }

    distributions
}

/// Nearest-rank percentile: the smallest value with at least `percentile`%
/// of the data at or below it.
pub fn nearest_rank(values: &[f64], percentile: usize) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| cmp_f64(*a, *b));

    let len = sorted.len();
    let rank = (percentile * len).div_ceil(100).clamp(1, len);
    Some(sorted[rank - 1])
}
