use std::fmt::Write;

use comfy_table::Cell;

use crate::report::{AnalysisReport, AnalysisStatus, FailureSource, TestCounts};

use super::styling::{bright, bright_green, bright_red, bright_yellow, cyan, dim};
use super::tables::{
    color_coded_count_cell, color_coded_ratio_cell, color_coded_seconds_cell, create_cyan_header,
    create_table, format_seconds, severity_cell, truncate,
};

const TOP_N: usize = 10;
const MAX_MESSAGE_CHARS: usize = 80;

/// Prints a human-readable summary of an analysis report to stdout.
///
/// Sections are skipped when they have nothing to show, so a clean window
/// prints only the overview and a short all-clear.
pub fn print_summary(report: &AnalysisReport) {
    println!("{}", render_summary(report));
}

fn add_section_header(output: &mut String, emoji: &str, title: &str) {
    let _ = writeln!(output, "{} {}", bright(emoji), bright(title).underlined());
}

fn format_counts(counts: &TestCounts) -> String {
    format!(
        "{} total, {} passed, {} failed, {} errors, {} skipped",
        counts.total, counts.passed, counts.failed, counts.errors, counts.skipped
    )
}

fn failure_source_label(source: &FailureSource) -> String {
    match source {
        FailureSource::Step { name } => format!("step {name}"),
        FailureSource::Test { id, step } => format!("{id} ({step})"),
    }
}

#[allow(clippy::too_many_lines, clippy::format_push_string)]
pub fn render_summary(report: &AnalysisReport) -> String {
    let mut output = String::new();

    add_section_header(&mut output, "📊", "Overview");

    let time_range = report.time_range.map_or_else(
        || "n/a".to_string(),
        |range| {
            format!(
                "{} to {}",
                range.start.format("%Y-%m-%d %H:%M:%S"),
                range.end.format("%Y-%m-%d %H:%M:%S")
            )
        },
    );
    let status = match &report.status {
        AnalysisStatus::Complete => bright_green("complete"),
        AnalysisStatus::Incomplete { pending_runs } => {
            bright_red(format!("incomplete ({} run(s) pending)", pending_runs.len()))
        }
    };
    let failing = report.test_summary.current_run.failed + report.test_summary.current_run.errors;
    let current_tests = if failing == 0 {
        bright_green(format_counts(&report.test_summary.current_run))
    } else {
        bright_red(format_counts(&report.test_summary.current_run))
    };

    output.push_str(&format!(
        "  {} {}\n  {} {}\n  {} {}\n  {} {}\n  {} {}\n  {} {}\n",
        dim("Runs analyzed:"),
        bright_yellow(report.run_count),
        dim("Time range:"),
        cyan(time_range),
        dim("Current run:"),
        cyan(report.current_run.as_deref().unwrap_or("n/a")),
        dim("Status:"),
        status,
        dim("Tests (current run):"),
        current_tests,
        dim("Tests (window):"),
        format_counts(&report.test_summary.window),
    ));
    if let Some(seconds) = report.test_summary.current_run_duration_seconds {
        output.push_str(&format!(
            "  {} {}\n",
            dim("Test time (current run):"),
            cyan(format_seconds(seconds))
        ));
    }
    output.push('\n');

    if !report.slow_steps.is_empty() {
        add_section_header(&mut output, "🐢", "Slow Steps (current run)");
        let mut table = create_table();
        table.set_header(create_cyan_header(&[
            "#", "Step", "Observed", "Median", "P90", "Ratio",
        ]));
        for (idx, step) in report.slow_steps.iter().enumerate() {
            table.add_row(vec![
                Cell::new(idx + 1),
                Cell::new(&step.step_name),
                color_coded_seconds_cell(step.observed_seconds),
                Cell::new(format_seconds(step.baseline_median_seconds)),
                Cell::new(format_seconds(step.baseline_p90_seconds)),
                color_coded_ratio_cell(step.ratio),
            ]);
        }
        output.push_str(&format!("{table}\n\n"));
    }

    if !report.insufficient_history.is_empty() {
        add_section_header(&mut output, "⏳", "Insufficient History");
        for entry in &report.insufficient_history {
            output.push_str(&format!(
                "  {} {}\n",
                cyan(&entry.step_name),
                dim(format!("{} of {} samples", entry.samples, entry.required)),
            ));
        }
        output.push('\n');
    }

    if !report.flaky_tests.is_empty() {
        add_section_header(&mut output, "🎲", "Flaky Tests");
        let mut table = create_table();
        table.set_header(create_cyan_header(&[
            "#", "Test", "Flips", "Revisions", "Pass Run", "Fail Run",
        ]));
        for (idx, test) in report.flaky_tests.iter().take(TOP_N).enumerate() {
            let revisions = if test.revisions_affected.is_empty() {
                "-".to_string()
            } else {
                test.revisions_affected.join("\n")
            };
            table.add_row(vec![
                Cell::new(idx + 1),
                Cell::new(&test.test_id),
                color_coded_count_cell(test.flip_count, 2, 4),
                Cell::new(revisions),
                Cell::new(test.example_pass_run.as_deref().unwrap_or("-")),
                Cell::new(test.example_fail_run.as_deref().unwrap_or("-")),
            ]);
        }
        output.push_str(&format!("{table}\n\n"));
    }

    if !report.failure_clusters.is_empty() {
        add_section_header(&mut output, "🧩", "Failure Clusters");
        let mut table = create_table();
        table.set_header(create_cyan_header(&[
            "#", "Count", "First Seen", "Sources", "Representative",
        ]));
        for (idx, cluster) in report.failure_clusters.iter().take(TOP_N).enumerate() {
            let mut sources: Vec<String> = cluster
                .members
                .iter()
                .map(|m| failure_source_label(&m.source))
                .collect();
            sources.dedup();
            table.add_row(vec![
                Cell::new(idx + 1),
                color_coded_count_cell(cluster.member_count(), 3, 6),
                Cell::new(cluster.first_seen.format("%Y-%m-%d %H:%M")),
                Cell::new(sources.join("\n")),
                Cell::new(truncate(&cluster.representative, MAX_MESSAGE_CHARS)),
            ]);
        }
        output.push_str(&format!("{table}\n\n"));
    }

    if !report.slow_tests.is_empty() {
        add_section_header(&mut output, "⏱️", "Slowest Tests (current run)");
        let mut table = create_table();
        table.set_header(create_cyan_header(&["#", "Test", "Step", "Duration"]));
        for (idx, test) in report.slow_tests.iter().take(TOP_N).enumerate() {
            table.add_row(vec![
                Cell::new(idx + 1),
                Cell::new(&test.test_id),
                Cell::new(&test.step_name),
                color_coded_seconds_cell(test.duration_seconds),
            ]);
        }
        output.push_str(&format!("{table}\n\n"));
    }

    add_section_header(&mut output, "💡", "Recommendations");
    if report.recommendations.is_empty() {
        output.push_str(&format!(
            "  {}\n\n",
            bright_green("Nothing stands out in this window ✓")
        ));
    } else {
        let mut table = create_table();
        table.set_header(create_cyan_header(&["Severity", "Category", "Subject", "Advice"]));
        for rec in &report.recommendations {
            table.add_row(vec![
                severity_cell(rec.severity),
                Cell::new(rec.category),
                Cell::new(truncate(&rec.subject, MAX_MESSAGE_CHARS)),
                Cell::new(&rec.message),
            ]);
        }
        output.push_str(&format!("{table}\n\n"));
    }

    if !report.warnings.is_empty() {
        add_section_header(&mut output, "⚠️", "Warnings");
        for warning in report.warnings.iter().take(TOP_N) {
            output.push_str(&format!(
                "  {} {}\n",
                bright_yellow(&warning.run_id),
                dim(&warning.message),
            ));
        }
        if report.warnings.len() > TOP_N {
            output.push_str(&format!(
                "  {}\n",
                dim(format!("... and {} more", report.warnings.len() - TOP_N))
            ));
        }
        output.push('\n');
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{
        ClusterMember, FailureCluster, FlakyTest, InsufficientHistory, Recommendation,
        RecommendationCategory, RunWarning, Severity, SlowStep, TestTiming, TestSummary, TimeRange,
    };
    use chrono::{DateTime, Utc};

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn empty_report() -> AnalysisReport {
        AnalysisReport {
            run_count: 0,
            time_range: None,
            current_run: None,
            status: AnalysisStatus::Complete,
            slow_steps: Vec::new(),
            insufficient_history: Vec::new(),
            flaky_tests: Vec::new(),
            failure_clusters: Vec::new(),
            recommendations: Vec::new(),
            test_summary: TestSummary::default(),
            slow_tests: Vec::new(),
            test_durations: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn busy_report() -> AnalysisReport {
        AnalysisReport {
            run_count: 11,
            time_range: Some(TimeRange {
                start: at("2024-01-01T00:00:00Z"),
                end: at("2024-01-11T00:00:00Z"),
            }),
            current_run: Some("run-10".to_string()),
            status: AnalysisStatus::Incomplete {
                pending_runs: vec!["run-11".to_string()],
            },
            slow_steps: vec![SlowStep {
                step_name: "build".to_string(),
                observed_seconds: 95.0,
                baseline_median_seconds: 30.0,
                baseline_p90_seconds: 31.0,
                ratio: Some(95.0 / 30.0),
            }],
            insufficient_history: vec![InsufficientHistory {
                step_name: "package".to_string(),
                samples: 2,
                required: 5,
            }],
            flaky_tests: vec![FlakyTest {
                test_id: "tests/test_api.py::test_login".to_string(),
                flip_count: 2,
                revisions_affected: vec!["abc123".to_string()],
                example_pass_run: Some("run-8".to_string()),
                example_fail_run: Some("run-9".to_string()),
                revision_flip: true,
                window_flip: true,
                observations: 3,
            }],
            failure_clusters: vec![FailureCluster {
                signature: "connection refused to host <ip>".to_string(),
                representative: "connection refused to host 10.0.0.1".to_string(),
                first_seen: at("2024-01-02T00:00:00Z"),
                members: vec![ClusterMember {
                    run_id: "run-2".to_string(),
                    source: FailureSource::Step {
                        name: "deploy".to_string(),
                    },
                    occurred_at: at("2024-01-02T00:00:00Z"),
                    message: "connection refused to host 10.0.0.1".to_string(),
                }],
            }],
            recommendations: vec![Recommendation {
                category: RecommendationCategory::SlowStep,
                severity: Severity::High,
                subject: "build".to_string(),
                message: "Step 'build' took 95.0s".to_string(),
            }],
            test_summary: TestSummary {
                current_run_duration_seconds: Some(12.5),
                ..TestSummary::default()
            },
            slow_tests: vec![TestTiming {
                test_id: "tests/test_api.py::test_upload".to_string(),
                step_name: "test".to_string(),
                duration_seconds: 2.5,
            }],
            test_durations: vec![TestTiming {
                test_id: "tests/test_api.py::test_upload".to_string(),
                step_name: "test".to_string(),
                duration_seconds: 2.5,
            }],
            warnings: vec![RunWarning::parse_degraded(
                "run-3",
                "no step boundaries recognized",
            )],
        }
    }

    #[test]
    fn test_render_summary_empty_report() {
        let output = render_summary(&empty_report());

        assert!(output.contains("Overview"));
        assert!(output.contains("Runs analyzed:"));
        assert!(output.contains("n/a"));
        assert!(output.contains("Nothing stands out"));
        assert!(!output.contains("Slow Steps"));
        assert!(!output.contains("Flaky Tests"));
        assert!(!output.contains("Warnings"));
        assert!(!output.contains("Test time"));
    }

    #[test]
    fn test_render_summary_shows_every_section() {
        let output = render_summary(&busy_report());

        assert!(output.contains("Slow Steps (current run)"));
        assert!(output.contains("build"));
        assert!(output.contains("3.2x"));
        assert!(output.contains("Insufficient History"));
        assert!(output.contains("2 of 5 samples"));
        assert!(output.contains("Flaky Tests"));
        assert!(output.contains("test_login"));
        assert!(output.contains("Failure Clusters"));
        assert!(output.contains("step deploy"));
        assert!(output.contains("Test time (current run):"));
        assert!(output.contains("12.5s"));
        assert!(output.contains("Slowest Tests (current run)"));
        assert!(output.contains("test_upload"));
        assert!(output.contains("HIGH"));
        assert!(output.contains("Warnings"));
        assert!(output.contains("no step boundaries recognized"));
    }

    #[test]
    fn test_render_summary_flags_incomplete_status() {
        let output = render_summary(&busy_report());
        assert!(output.contains("incomplete (1 run(s) pending)"));
    }
}
