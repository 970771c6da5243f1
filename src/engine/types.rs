use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::report::RunWarning;

/// Final status of a CI run as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Success,
    Failure,
    Cancelled,
}

/// Identifies one CI execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Opaque, unique run identifier
    pub run_id: String,
    /// Code revision; retries of one revision share this value
    pub revision: String,
    pub started_at: DateTime<Utc>,
    pub outcome: RunOutcome,
}

/// A run log as handed over by the artifact collaborator.
#[derive(Debug, Clone)]
pub struct RawRun {
    pub metadata: RunMetadata,
    /// Raw log bytes, not necessarily valid UTF-8
    pub log: Vec<u8>,
}

impl RawRun {
    pub fn new(metadata: RunMetadata, log: impl Into<Vec<u8>>) -> Self {
        Self {
            metadata,
            log: log.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    Success,
    Failure,
    Skipped,
}

/// A named step within one run.
#[derive(Debug, Clone)]
pub struct StepRecord {
    /// Unique within its run
    pub name: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Seconds between start and end; `None` when either side is unknown
    pub duration: Option<f64>,
    pub output: Vec<u8>,
    pub outcome: StepOutcome,
}

impl StepRecord {
    pub fn output_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.output)
    }
}

/// One run after normalization.
#[derive(Debug, Clone)]
pub struct NormalizedRun {
    pub metadata: RunMetadata,
    pub steps: Vec<StepRecord>,
    pub warnings: Vec<RunWarning>,
}

impl NormalizedRun {
    pub fn step(&self, name: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pass,
    Fail,
    Error,
    Skipped,
}

impl TestStatus {
    pub fn is_failing(self) -> bool {
        matches!(self, Self::Fail | Self::Error)
    }
}

/// A single test result as printed by a test runner, before it is tied to a run.
#[derive(Debug, Clone, PartialEq)]
pub struct TestResult {
    pub test_id: String,
    pub status: TestStatus,
    pub duration: Option<f64>,
    pub message: Option<String>,
}

/// A test result together with the run and step it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct TestOutcome {
    pub test_id: String,
    pub status: TestStatus,
    pub duration: Option<f64>,
    pub message: Option<String>,
    pub run_id: String,
    pub revision: String,
    pub run_started_at: DateTime<Utc>,
    pub step_name: String,
}
