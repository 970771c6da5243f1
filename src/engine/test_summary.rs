use indexmap::IndexMap;

use super::step_stats::cmp_f64;
use super::test_outcomes::TrackedRun;
use super::types::{TestOutcome, TestStatus};
use crate::report::{TestCounts, TestTiming};

pub fn count_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a TestOutcome>) -> TestCounts {
    let mut counts = TestCounts::default();
    for outcome in outcomes {
        counts.total += 1;
        match outcome.status {
            TestStatus::Pass => counts.passed += 1,
            TestStatus::Fail => counts.failed += 1,
            TestStatus::Error => counts.errors += 1,
            TestStatus::Skipped => counts.skipped += 1,
        }
    }
    counts
}

/// Test counts for one run.
///
/// Each step is counted from its per-test results, unless the runner's own
/// totals cover more tests than were listed individually (a quiet pytest run
/// prints only `..F` and a closing line).
pub fn run_counts(tracked: &TrackedRun) -> TestCounts {
    let mut per_step: IndexMap<&str, TestCounts> = IndexMap::new();
    for outcome in &tracked.outcomes {
        *per_step.entry(outcome.step_name.as_str()).or_default() +=
            count_outcomes(std::iter::once(outcome));
    }

    for reported in &tracked.reported {
        let counted = per_step.entry(reported.step_name.as_str()).or_default();
        if reported.totals.counts.total > counted.total {
            *counted = reported.totals.counts;
        }
    }

    let mut counts = TestCounts::default();
    for step_counts in per_step.into_values() {
        counts += step_counts;
    }
    counts
}

/// Total test time the runners printed for a run, if any did.
pub fn reported_duration(tracked: &TrackedRun) -> Option<f64> {
    tracked
        .reported
        .iter()
        .filter_map(|step| step.totals.duration)
        .reduce(|total, seconds| total + seconds)
}

/// Every timed test, slowest first.
pub fn test_durations<'a>(outcomes: impl IntoIterator<Item = &'a TestOutcome>) -> Vec<TestTiming> {
    let mut timings: Vec<TestTiming> = outcomes
        .into_iter()
        .filter_map(|outcome| {
            Some(TestTiming {
                test_id: outcome.test_id.clone(),
                step_name: outcome.step_name.clone(),
                duration_seconds: outcome.duration?,
            })
        })
        .collect();

    timings.sort_by(|a, b| {
        cmp_f64(b.duration_seconds, a.duration_seconds)
            .then_with(|| a.test_id.cmp(&b.test_id))
            .then_with(|| a.step_name.cmp(&b.step_name))
    });
    timings
}

/// Tests slower than `threshold_seconds`, slowest first.
pub fn slow_tests<'a>(
    outcomes: impl IntoIterator<Item = &'a TestOutcome>,
    threshold_seconds: f64,
) -> Vec<TestTiming> {
    test_durations(outcomes)
        .into_iter()
        .filter(|timing| timing.duration_seconds > threshold_seconds)
        .collect()
}
