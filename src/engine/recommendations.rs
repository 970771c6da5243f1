use std::cmp::Ordering;

use crate::config::AnalysisConfig;
use crate::report::{
    FailureCluster, FlakyTest, Recommendation, RecommendationCategory, Severity, SlowStep,
};

const MAX_EXAMPLE_CHARS: usize = 200;

fn slow_step_severity(ratio: f64) -> Severity {
    if ratio >= 3.0 {
        Severity::High
    } else if ratio >= 2.0 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn cluster_severity(members: usize, minimum: usize) -> Severity {
    if members >= minimum * 3 {
        Severity::High
    } else if members >= minimum * 2 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

fn slow_step_recommendation(step: &SlowStep) -> Recommendation {
    let versus_median = match step.ratio {
        Some(ratio) => format!("{ratio:.1}x its median of {:.1}s", step.baseline_median_seconds),
        None => format!("against a median of {:.1}s", step.baseline_median_seconds),
    };
    Recommendation {
        category: RecommendationCategory::SlowStep,
        severity: slow_step_severity(step.rank_ratio()),
        subject: step.step_name.clone(),
        message: format!(
            "Step '{}' took {:.1}s, {versus_median} (p90 {:.1}s). \
             Look for cache misses, new dependencies or resource contention.",
            step.step_name, step.observed_seconds, step.baseline_p90_seconds
        ),
    }
}

fn flaky_test_recommendation(test: &FlakyTest) -> Recommendation {
    let (severity, message) = if test.revision_flip {
        (
            Severity::High,
            format!(
                "Test '{}' both passed and failed on revision {}. \
                 Quarantine it and fix the nondeterminism.",
                test.test_id,
                test.revisions_affected.join(", ")
            ),
        )
    } else {
        (
            Severity::Medium,
            format!(
                "Test '{}' flipped between pass and fail {} times across {} observations. \
                 Check for order dependence or shared state.",
                test.test_id, test.flip_count, test.observations
            ),
        )
    };

    Recommendation {
        category: RecommendationCategory::FlakyTest,
        severity,
        subject: test.test_id.clone(),
        message,
    }
}

fn cluster_recommendation(cluster: &FailureCluster, minimum: usize) -> Recommendation {
    Recommendation {
        category: RecommendationCategory::RecurringFailure,
        severity: cluster_severity(cluster.member_count(), minimum),
        subject: cluster.signature.clone(),
        message: format!(
            "{} failures share one root cause, first seen {}. Example: {}",
            cluster.member_count(),
            cluster.first_seen.format("%Y-%m-%d %H:%M:%S UTC"),
            truncate(&cluster.representative, MAX_EXAMPLE_CHARS)
        ),
    }
}

/// Severity descending, then subject, category and message.
pub fn compare_recommendations(a: &Recommendation, b: &Recommendation) -> Ordering {
    b.severity
        .cmp(&a.severity)
        .then_with(|| a.subject.cmp(&b.subject))
        .then_with(|| a.category.cmp(&b.category))
        .then_with(|| a.message.cmp(&b.message))
}

/// Maps detected conditions to ranked recommendations.
///
/// Clusters smaller than `cluster_min_members` produce nothing.
pub fn synthesize(
    slow_steps: &[SlowStep],
    flaky_tests: &[FlakyTest],
    clusters: &[FailureCluster],
    config: &AnalysisConfig,
) -> Vec<Recommendation> {
    let mut recommendations: Vec<Recommendation> = slow_steps
        .iter()
        .map(slow_step_recommendation)
        .chain(flaky_tests.iter().map(flaky_test_recommendation))
        .chain(
            clusters
                .iter()
                .filter(|c| c.member_count() >= config.cluster_min_members)
                .map(|c| cluster_recommendation(c, config.cluster_min_members)),
        )
        .collect();

    recommendations.sort_by(compare_recommendations);
    recommendations
}
