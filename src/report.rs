use std::fmt;
use std::ops::AddAssign;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// The result of one analysis invocation.
///
/// Built once by the analyzer and never mutated afterwards. Field order and
/// the order of every collection are deterministic for identical input, so
/// serializing the same analysis twice yields byte-identical documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub run_count: usize,
    pub time_range: Option<TimeRange>,
    /// The chronologically last run, judged against the rest of the window
    pub current_run: Option<String>,
    pub status: AnalysisStatus,
    pub slow_steps: Vec<SlowStep>,
    pub insufficient_history: Vec<InsufficientHistory>,
    pub flaky_tests: Vec<FlakyTest>,
    pub failure_clusters: Vec<FailureCluster>,
    pub recommendations: Vec<Recommendation>,
    pub test_summary: TestSummary,
    /// Timed tests of the current run above the slow-test threshold
    pub slow_tests: Vec<TestTiming>,
    /// Every timed test of the current run, slowest first
    pub test_durations: Vec<TestTiming>,
    pub warnings: Vec<RunWarning>,
}

impl AnalysisReport {
    pub fn is_complete(&self) -> bool {
        matches!(self.status, AnalysisStatus::Complete)
    }

    /// Serializes the report to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self, pretty: bool) -> Result<String> {
        let json = if pretty {
            serde_json::to_string_pretty(self)?
        } else {
            serde_json::to_string(self)?
        };
        Ok(json)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum AnalysisStatus {
    Complete,
    /// The caller's time budget ran out before every run was normalized.
    Incomplete { pending_runs: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlowStep {
    pub step_name: String,
    pub observed_seconds: f64,
    pub baseline_median_seconds: f64,
    pub baseline_p90_seconds: f64,
    /// Observed duration over the baseline median; `None` when the median is zero
    pub ratio: Option<f64>,
}

impl SlowStep {
    /// The ratio for ranking, with a zero median ranking above everything.
    pub fn rank_ratio(&self) -> f64 {
        self.ratio.unwrap_or(f64::INFINITY)
    }
}

/// A step whose history is too short to judge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsufficientHistory {
    pub step_name: String,
    pub samples: usize,
    pub required: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlakyTest {
    pub test_id: String,
    pub flip_count: usize,
    pub revisions_affected: Vec<String>,
    pub example_pass_run: Option<String>,
    pub example_fail_run: Option<String>,
    /// Passed and failed on the same revision
    pub revision_flip: bool,
    /// Flipped at least the configured number of times in the recent window
    pub window_flip: bool,
    pub observations: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCluster {
    pub signature: String,
    /// Shortest member message
    pub representative: String,
    pub first_seen: DateTime<Utc>,
    pub members: Vec<ClusterMember>,
}

impl FailureCluster {
    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMember {
    pub run_id: String,
    pub source: FailureSource,
    pub occurred_at: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FailureSource {
    Step { name: String },
    Test { id: String, step: String },
}

impl FailureSource {
    /// The step or test this failure is attributed to.
    pub fn subject(&self) -> &str {
        match self {
            Self::Step { name } => name,
            Self::Test { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecommendationCategory {
    SlowStep,
    FlakyTest,
    RecurringFailure,
}

impl fmt::Display for RecommendationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::SlowStep => "slow-step",
            Self::FlakyTest => "flaky-test",
            Self::RecurringFailure => "recurring-failure",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub category: RecommendationCategory,
    pub severity: Severity,
    pub subject: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestSummary {
    pub current_run: TestCounts,
    pub window: TestCounts,
    /// Total test time the runners reported for the current run
    pub current_run_duration_seconds: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCounts {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub skipped: usize,
}

impl AddAssign for TestCounts {
    fn add_assign(&mut self, other: Self) {
        self.total += other.total;
        self.passed += other.passed;
        self.failed += other.failed;
        self.errors += other.errors;
        self.skipped += other.skipped;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestTiming {
    pub test_id: String,
    pub step_name: String,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WarningKind {
    /// A log or a section of it could not be parsed structurally.
    ParseDegraded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunWarning {
    pub run_id: String,
    pub kind: WarningKind,
    pub message: String,
}

impl RunWarning {
    pub fn parse_degraded(run_id: &str, message: impl Into<String>) -> Self {
        Self {
            run_id: run_id.to_string(),
            kind: WarningKind::ParseDegraded,
            message: message.into(),
        }
    }
}
