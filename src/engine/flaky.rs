use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use super::types::{TestOutcome, TestStatus};
use crate::report::FlakyTest;

/// Outcomes of one test grouped by revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlakinessRecord {
    pub test_id: String,
    pub outcomes_by_revision: BTreeMap<String, BTreeSet<TestStatus>>,
}

impl FlakinessRecord {
    /// Revisions on which the test both passed and failed.
    pub fn flipping_revisions(&self) -> Vec<String> {
        self.outcomes_by_revision
            .iter()
            .filter(|(_, statuses)| {
                statuses.contains(&TestStatus::Pass) && statuses.iter().any(|s| s.is_failing())
            })
            .map(|(revision, _)| revision.clone())
            .collect()
    }
}

/// A test's collapsed outcome within one run.
#[derive(Debug, Clone)]
struct Observation {
    run_id: String,
    revision: String,
    started_at: DateTime<Utc>,
    status: TestStatus,
}

impl Observation {
    fn failing(&self) -> bool {
        self.status.is_failing()
    }
}

/// Collapses outcomes to one observation per (test, run), chronologically
/// ordered per test. A run where the test failed anywhere counts as failing;
/// skipped results are ignored.
fn collapse(outcomes: &[TestOutcome]) -> BTreeMap<String, Vec<Observation>> {
    let mut per_run: IndexMap<(String, String), Observation> = IndexMap::new();

    for outcome in outcomes.iter().filter(|o| o.status != TestStatus::Skipped) {
        let key = (outcome.test_id.clone(), outcome.run_id.clone());
        per_run
            .entry(key)
            .and_modify(|existing| {
                if outcome.status.is_failing() && !existing.failing() {
                    existing.status = outcome.status;
                }
            })
            .or_insert_with(|| Observation {
                run_id: outcome.run_id.clone(),
                revision: outcome.revision.clone(),
                started_at: outcome.run_started_at,
                status: outcome.status,
            });
    }

    let mut by_test: BTreeMap<String, Vec<Observation>> = BTreeMap::new();
    for ((test_id, _), observation) in per_run {
        by_test.entry(test_id).or_default().push(observation);
    }
    for observations in by_test.values_mut() {
        observations.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.run_id.cmp(&b.run_id))
        });
    }
    by_test
}

fn record_for(test_id: &str, observations: &[Observation]) -> FlakinessRecord {
    let mut outcomes_by_revision: BTreeMap<String, BTreeSet<TestStatus>> = BTreeMap::new();
    for observation in observations {
        outcomes_by_revision
            .entry(observation.revision.clone())
            .or_default()
            .insert(observation.status);
    }
    FlakinessRecord {
        test_id: test_id.to_string(),
        outcomes_by_revision,
    }
}

/// Builds one flakiness record per test id, sorted by id.
pub fn build_flakiness_records(outcomes: &[TestOutcome]) -> Vec<FlakinessRecord> {
    collapse(outcomes)
        .iter()
        .map(|(test_id, observations)| record_for(test_id, observations))
        .collect()
}

fn count_flips(observations: &[Observation]) -> usize {
    observations
        .windows(2)
        .filter(|pair| pair[0].failing() != pair[1].failing())
        .count()
}

fn first_run(observations: &[&Observation], failing: bool) -> Option<String> {
    observations
        .iter()
        .find(|o| o.failing() == failing)
        .map(|o| o.run_id.clone())
}

/// Flags tests whose outcome is inconsistent on a fixed revision or flips
/// at least `flip_threshold` times over their last `window` observations.
///
/// Ordered with revision flips first, then by flip count descending, then by
/// test id.
pub fn detect_flaky_tests(
    outcomes: &[TestOutcome],
    window: usize,
    flip_threshold: usize,
) -> Vec<FlakyTest> {
    let mut flaky = Vec::new();

    for (test_id, observations) in collapse(outcomes) {
        let record = record_for(&test_id, &observations);
        let revisions_affected: Vec<String> = record
            .flipping_revisions()
            .into_iter()
            .filter(|revision| {
                observations
                    .iter()
                    .filter(|o| &o.revision == revision)
                    .count()
                    >= 2
            })
            .collect();

        let recent = &observations[observations.len().saturating_sub(window)..];
        let flip_count = count_flips(recent);

        let revision_flip = !revisions_affected.is_empty();
        let window_flip = flip_count >= flip_threshold;
        if !revision_flip && !window_flip {
            continue;
        }

        let examples: Vec<&Observation> = match revisions_affected.first() {
            Some(revision) => observations
                .iter()
                .filter(|o| &o.revision == revision)
                .collect(),
            None => recent.iter().collect(),
        };

        flaky.push(FlakyTest {
            test_id,
            flip_count,
            example_pass_run: first_run(&examples, false),
            example_fail_run: first_run(&examples, true),
            revisions_affected,
            revision_flip,
            window_flip,
            observations: observations.len(),
        });
    }

    flaky.sort_by(|a, b| {
        b.revision_flip
            .cmp(&a.revision_flip)
            .then_with(|| b.flip_count.cmp(&a.flip_count))
            .then_with(|| a.test_id.cmp(&b.test_id))
    });
    flaky
}
