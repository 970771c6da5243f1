use indexmap::IndexMap;
use log::debug;

use super::step_stats::{cmp_f64, nearest_rank, DurationDistribution};
use super::types::NormalizedRun;
use crate::config::AnalysisConfig;
use crate::report::{InsufficientHistory, SlowStep};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlowStepAnalysis {
    pub slow: Vec<SlowStep>,
    pub insufficient_history: Vec<InsufficientHistory>,
}

/// Judges every measured step of `current` against its own history.
///
/// History is the step's distribution minus the current run's sample. A step
/// with fewer than `min_history_samples` historical samples is reported as
/// insufficient history and never classified.
pub fn detect_slow_steps(
    distributions: &IndexMap<String, DurationDistribution>,
    current: &NormalizedRun,
    config: &AnalysisConfig,
) -> SlowStepAnalysis {
    let mut analysis = SlowStepAnalysis::default();
    let run_id = current.metadata.run_id.as_str();

    for step in &current.steps {
        let Some(observed) = step.duration else {
            continue;
        };

        let history = distributions
            .get(&step.name)
            .map(|d| d.history_excluding(run_id))
            .unwrap_or_default();

        if history.len() < config.min_history_samples {
            debug!(
                "Step '{}' has {} historical samples, {} required",
                step.name,
                history.len(),
                config.min_history_samples
            );
            analysis.insufficient_history.push(InsufficientHistory {
                step_name: step.name.clone(),
                samples: history.len(),
                required: config.min_history_samples,
            });
            continue;
        }

        let (Some(median), Some(p90)) = (nearest_rank(&history, 50), nearest_rank(&history, 90))
        else {
            continue;
        };

        if observed > p90 * config.slow_step_multiplier && observed > config.slow_step_floor_seconds {
            let ratio = (median > 0.0).then(|| observed / median);
            analysis.slow.push(SlowStep {
                step_name: step.name.clone(),
                observed_seconds: observed,
                baseline_median_seconds: median,
                baseline_p90_seconds: p90,
                ratio,
            });
        }
    }

    analysis.slow.sort_by(|a, b| {
        cmp_f64(b.rank_ratio(), a.rank_ratio()).then_with(|| a.step_name.cmp(&b.step_name))
    });
    analysis
        .insufficient_history
        .sort_by(|a, b| a.step_name.cmp(&b.step_name));

    analysis
}
