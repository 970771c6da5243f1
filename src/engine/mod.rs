//! The log analysis engine.
//!
//! Takes already-downloaded run logs plus metadata and returns an immutable
//! [`AnalysisReport`](crate::report::AnalysisReport). Performs no network or
//! file I/O.

mod analyzer;
mod clustering;
mod dialects;
mod flaky;
mod normalizer;
mod recommendations;
mod slow_steps;
mod step_stats;
mod test_outcomes;
mod test_summary;
mod timestamps;
mod types;

pub use analyzer::{Analyzer, NormalizationBatch};
pub use clustering::{
    default_rules, step_failure_excerpt, FailureClusterer, FailureInput, NormalizationRule,
    SignatureNormalizer,
};
pub use dialects::{default_dialects, BracketMarkers, Boundary, GitHubActions, GitLabSections, LogDialect, Stamp};
pub use flaky::{build_flakiness_records, detect_flaky_tests, FlakinessRecord};
pub use normalizer::{LogNormalizer, PREAMBLE_STEP, UNKNOWN_STEP};
pub use recommendations::{compare_recommendations, synthesize};
pub use slow_steps::{detect_slow_steps, SlowStepAnalysis};
pub use step_stats::{aggregate_durations, nearest_rank, DurationDistribution, DurationSample};
pub use test_outcomes::{
    default_formats, GoTest, JUnitXml, KeywordStepMatcher, Libtest, Pytest, ReportedTotals,
    StepMatcher, StepTotals, TestOutcomeTracker, TestReportFormat, TrackedRun,
};
pub use test_summary::{count_outcomes, reported_duration, run_counts, slow_tests, test_durations};
pub use timestamps::parse_timestamp;
pub use types::{
    NormalizedRun, RawRun, RunMetadata, RunOutcome, StepOutcome, StepRecord, TestOutcome,
    TestResult, TestStatus,
};
