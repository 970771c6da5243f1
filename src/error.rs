use thiserror::Error;

use crate::report::AnalysisReport;

#[derive(Error, Debug)]
pub enum CilogError {
    #[error("Invalid configuration: {0}")]
    ConfigurationInvalid(String),

    #[error(
        "Analysis timed out with {} run(s) not yet processed",
        pending_runs.len()
    )]
    TimeoutExceeded {
        /// Report built from the runs that finished normalizing in time.
        report: Box<AnalysisReport>,
        pending_runs: Vec<String>,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CilogError {
    /// The partial report carried by a timeout, if any.
    pub fn partial_report(&self) -> Option<&AnalysisReport> {
        match self {
            Self::TimeoutExceeded { report, .. } => Some(report),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CilogError>;
