use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, info, warn};
use tokio::sync::Semaphore;
use tokio::time::Instant;

use super::clustering::{step_failure_excerpt, FailureClusterer, FailureInput, SignatureNormalizer};
use super::flaky::detect_flaky_tests;
use super::normalizer::LogNormalizer;
use super::recommendations::synthesize;
use super::slow_steps::detect_slow_steps;
use super::step_stats::aggregate_durations;
use super::test_outcomes::{TestOutcomeTracker, TrackedRun};
use super::test_summary::{reported_duration, run_counts, slow_tests, test_durations};
use super::types::{NormalizedRun, RawRun, RunMetadata, StepOutcome, TestOutcome};
use crate::config::Config;
use crate::error::{CilogError, Result};
use crate::report::{
    AnalysisReport, AnalysisStatus, FailureSource, RunWarning, TestCounts, TestSummary, TimeRange,
};

const NORMALIZATION_PANICKED: &str = "log normalization panicked; run has no steps";

/// Runs normalized before the deadline, plus the ids of those that were not.
#[derive(Debug)]
pub struct NormalizationBatch {
    pub runs: Vec<NormalizedRun>,
    pub pending: Vec<String>,
}

/// The analysis pipeline: normalization, then every detector, then
/// recommendations.
///
/// Holds no state between invocations; all cross-run structures are rebuilt
/// from the input each time.
pub struct Analyzer {
    config: Config,
    normalizer: Arc<LogNormalizer>,
    tracker: TestOutcomeTracker,
    clusterer: FailureClusterer,
}

fn chronological(a: &RunMetadata, b: &RunMetadata) -> std::cmp::Ordering {
    a.started_at
        .cmp(&b.started_at)
        .then_with(|| a.run_id.cmp(&b.run_id))
}

fn degraded_run(metadata: RunMetadata, reason: &str) -> NormalizedRun {
    warn!("Run {}: {reason}", metadata.run_id);
    let warning = RunWarning::parse_degraded(&metadata.run_id, reason);
    NormalizedRun {
        metadata,
        steps: Vec::new(),
        warnings: vec![warning],
    }
}

impl Analyzer {
    /// Validates `config` and builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationInvalid` before any run is processed if a
    /// threshold or normalization rule is unusable.
    pub fn new(config: Config) -> Result<Self> {
        config.analysis.validate()?;
        config.tests.validate()?;
        let clusterer = FailureClusterer::new(SignatureNormalizer::from_config(&config.clustering)?);
        let tracker =
            TestOutcomeTracker::with_keywords(&config.tests.step_keywords, config.tests.scan_all_steps);

        Ok(Self {
            config,
            normalizer: Arc::new(LogNormalizer::default()),
            tracker,
            clusterer,
        })
    }

    /// Replaces the log normalizer, e.g. to add a dialect.
    #[must_use]
    pub fn with_normalizer(mut self, normalizer: LogNormalizer) -> Self {
        self.normalizer = Arc::new(normalizer);
        self
    }

    /// Replaces the test outcome tracker, e.g. to add a report format.
    #[must_use]
    pub fn with_tracker(mut self, tracker: TestOutcomeTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Normalizes every run on the calling thread.
    ///
    /// A run whose normalization panics yields an empty, degraded run, the
    /// same as on the concurrent path.
    pub fn normalize(&self, runs: &[RawRun]) -> Vec<NormalizedRun> {
        runs.iter()
            .map(|run| {
                catch_unwind(AssertUnwindSafe(|| self.normalizer.normalize(run)))
                    .unwrap_or_else(|_| degraded_run(run.metadata.clone(), NORMALIZATION_PANICKED))
            })
            .collect()
    }

    /// Normalizes runs in parallel on the blocking pool.
    ///
    /// Stops waiting at `deadline`; runs not finished by then are reported as
    /// pending. A task that panics yields an empty, degraded run instead of
    /// failing the batch.
    pub async fn normalize_concurrent(
        &self,
        runs: Vec<RawRun>,
        deadline: Option<Instant>,
    ) -> NormalizationBatch {
        let mut submitted: Vec<RunMetadata> = runs.iter().map(|r| r.metadata.clone()).collect();
        submitted.sort_by(chronological);

        let limiter = self
            .config
            .analysis
            .max_parallel_runs
            .map(|permits| Arc::new(Semaphore::new(permits)));

        let mut tasks: FuturesUnordered<_> = runs
            .into_iter()
            .map(|run| {
                let normalizer = Arc::clone(&self.normalizer);
                let limiter = limiter.clone();
                async move {
                    let metadata = run.metadata.clone();
                    let _permit = match limiter {
                        Some(semaphore) => semaphore.acquire_owned().await.ok(),
                        None => None,
                    };
                    let result = tokio::task::spawn_blocking(move || normalizer.normalize(&run)).await;
                    (metadata, result)
                }
            })
            .collect();

        let mut normalized = Vec::with_capacity(submitted.len());
        loop {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, tasks.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(
                            "Normalization deadline reached with {} run(s) outstanding",
                            tasks.len()
                        );
                        break;
                    }
                },
                None => tasks.next().await,
            };

            let Some((metadata, result)) = next else {
                break;
            };

            match result {
                Ok(run) => normalized.push(run),
                Err(e) if e.is_panic() => {
                    normalized.push(degraded_run(metadata, NORMALIZATION_PANICKED));
                }
                Err(e) => {
                    normalized.push(degraded_run(
                        metadata,
                        &format!("log normalization did not complete: {e}"),
                    ));
                }
            }
        }

        let finished: HashSet<&str> = normalized.iter().map(|r| r.metadata.run_id.as_str()).collect();
        let pending = submitted
            .iter()
            .filter(|m| !finished.contains(m.run_id.as_str()))
            .map(|m| m.run_id.clone())
            .collect();

        NormalizationBatch {
            runs: normalized,
            pending,
        }
    }

    /// Runs every detector over normalized runs and assembles the report.
    ///
    /// Input order does not matter: runs are re-sorted by start time, then id.
    /// A non-empty `pending` marks the report incomplete.
    pub fn build_report(&self, mut runs: Vec<NormalizedRun>, pending: Vec<String>) -> AnalysisReport {
        runs.sort_by(|a, b| chronological(&a.metadata, &b.metadata));

        let status = if pending.is_empty() {
            AnalysisStatus::Complete
        } else {
            AnalysisStatus::Incomplete {
                pending_runs: pending,
            }
        };

        let (Some(first), Some(current)) = (runs.first(), runs.last()) else {
            return AnalysisReport {
                run_count: 0,
                time_range: None,
                current_run: None,
                status,
                slow_steps: Vec::new(),
                insufficient_history: Vec::new(),
                flaky_tests: Vec::new(),
                failure_clusters: Vec::new(),
                recommendations: Vec::new(),
                test_summary: TestSummary::default(),
                slow_tests: Vec::new(),
                test_durations: Vec::new(),
                warnings: Vec::new(),
            };
        };

        info!(
            "Analyzing {} run(s), current run {}",
            runs.len(),
            current.metadata.run_id
        );
        let analysis = &self.config.analysis;

        let distributions = aggregate_durations(&runs);
        let slow = detect_slow_steps(&distributions, current, analysis);
        debug!(
            "{} step(s) tracked, {} slow, {} without enough history",
            distributions.len(),
            slow.slow.len(),
            slow.insufficient_history.len()
        );

        let tracked: Vec<TrackedRun> = runs.iter().map(|run| self.tracker.track_run(run)).collect();
        let all_outcomes: Vec<TestOutcome> = tracked
            .iter()
            .flat_map(|t| t.outcomes.iter().cloned())
            .collect();
        let current_tracked = tracked.last();
        let current_outcomes = current_tracked.map(|t| t.outcomes.as_slice()).unwrap_or_default();
        let mut window_counts = TestCounts::default();
        for run_tracked in &tracked {
            window_counts += run_counts(run_tracked);
        }

        let flaky_tests =
            detect_flaky_tests(&all_outcomes, analysis.flake_window, analysis.flake_flip_threshold);

        let failures = runs
            .iter()
            .zip(&tracked)
            .flat_map(|(run, run_tracked)| self.collect_failures(run, &run_tracked.outcomes))
            .collect();
        let failure_clusters = self.clusterer.cluster(failures);

        let recommendations = synthesize(&slow.slow, &flaky_tests, &failure_clusters, analysis);

        info!(
            "Found {} slow step(s), {} flaky test(s), {} failure cluster(s)",
            slow.slow.len(),
            flaky_tests.len(),
            failure_clusters.len()
        );

        AnalysisReport {
            run_count: runs.len(),
            time_range: Some(TimeRange {
                start: first.metadata.started_at,
                end: current.metadata.started_at,
            }),
            current_run: Some(current.metadata.run_id.clone()),
            status,
            slow_steps: slow.slow,
            insufficient_history: slow.insufficient_history,
            flaky_tests,
            failure_clusters,
            recommendations,
            test_summary: TestSummary {
                current_run: current_tracked.map(run_counts).unwrap_or_default(),
                window: window_counts,
                current_run_duration_seconds: current_tracked.and_then(reported_duration),
            },
            slow_tests: slow_tests(current_outcomes, self.config.tests.slow_test_threshold_seconds),
            test_durations: test_durations(current_outcomes),
            warnings: runs.iter().flat_map(|r| r.warnings.iter().cloned()).collect(),
        }
    }

    /// Sequential analysis; needs no async runtime.
    pub fn analyze(&self, runs: &[RawRun]) -> AnalysisReport {
        self.build_report(self.normalize(runs), Vec::new())
    }

    /// Concurrent analysis with an optional time budget for normalization.
    ///
    /// Produces the same report as [`Analyzer::analyze`] when every run
    /// finishes in time.
    ///
    /// # Errors
    ///
    /// Returns `TimeoutExceeded` carrying the incomplete report and the
    /// pending run ids when the budget runs out.
    pub async fn analyze_concurrent(
        &self,
        runs: Vec<RawRun>,
        timeout: Option<Duration>,
    ) -> Result<AnalysisReport> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let batch = self.normalize_concurrent(runs, deadline).await;

        if batch.pending.is_empty() {
            return Ok(self.build_report(batch.runs, Vec::new()));
        }

        let pending_runs = batch.pending.clone();
        let report = self.build_report(batch.runs, batch.pending);
        Err(CilogError::TimeoutExceeded {
            report: Box::new(report),
            pending_runs,
        })
    }

    /// Failures of one run: failing tests with their message, and failed steps
    /// that no failing test explains, as an output excerpt.
    fn collect_failures(&self, run: &NormalizedRun, outcomes: &[TestOutcome]) -> Vec<FailureInput> {
        let run_id = &run.metadata.run_id;
        let step_start = |name: &str| {
            run.step(name)
                .and_then(|s| s.started_at)
                .unwrap_or(run.metadata.started_at)
        };

        let mut failures: Vec<FailureInput> = outcomes
            .iter()
            .filter(|o| o.status.is_failing())
            .map(|o| FailureInput {
                run_id: run_id.clone(),
                source: FailureSource::Test {
                    id: o.test_id.clone(),
                    step: o.step_name.clone(),
                },
                occurred_at: step_start(&o.step_name),
                message: o
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("{} failed", o.test_id)),
            })
            .collect();

        let explained: HashSet<&str> = outcomes
            .iter()
            .filter(|o| o.status.is_failing())
            .map(|o| o.step_name.as_str())
            .collect();

        for step in &run.steps {
            if step.outcome != StepOutcome::Failure || explained.contains(step.name.as_str()) {
                continue;
            }
            let output: String = step
                .output_text()
                .lines()
                .filter(|line| !self.normalizer.is_boundary(line))
                .map(|line| format!("{line}\n"))
                .collect();
            let excerpt = step_failure_excerpt(&output);
            if excerpt.trim().is_empty() {
                continue;
            }
            failures.push(FailureInput {
                run_id: run_id.clone(),
                source: FailureSource::Step {
                    name: step.name.clone(),
                },
                occurred_at: step.started_at.unwrap_or(run.metadata.started_at),
                message: excerpt,
            });
        }

        failures
    }
}
