use anyhow::Result;
use std::io::Write;

use crate::config::OutputFormat;
use crate::report::{AnalysisReport, AnalysisStatus, FailureSource};

use super::summary::render_summary;
use super::tables::format_seconds;

/// Writes an analysis report in the requested format.
///
/// - Summary: the terminal rendering, colors included when the console allows them
/// - JSON: the serialized report, for programmatic access
/// - Markdown: a document suitable for CI job summaries and PR comments
pub fn export_report(
    report: &AnalysisReport,
    format: OutputFormat,
    pretty: bool,
    output: &mut dyn Write,
) -> Result<()> {
    match format {
        OutputFormat::Summary => {
            writeln!(output, "{}", render_summary(report))?;
            Ok(())
        }
        OutputFormat::Json => export_json(report, pretty, output),
        OutputFormat::Markdown => export_markdown(report, output),
    }
}

fn export_json(report: &AnalysisReport, pretty: bool, output: &mut dyn Write) -> Result<()> {
    let json = report.to_json(pretty)?;
    writeln!(output, "{json}")?;
    Ok(())
}

/// Keeps free-form text from breaking out of a table cell.
fn md_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', "<br>")
}

fn md_source(source: &FailureSource) -> String {
    match source {
        FailureSource::Step { name } => format!("step `{name}`"),
        FailureSource::Test { id, step } => format!("`{id}` in `{step}`"),
    }
}

#[allow(clippy::too_many_lines)]
fn export_markdown(report: &AnalysisReport, output: &mut dyn Write) -> Result<()> {
    writeln!(output, "# 📊 CI Log Analysis Report")?;
    writeln!(output)?;

    writeln!(output, "## Summary")?;
    writeln!(output)?;
    writeln!(output, "- **Runs analyzed:** {}", report.run_count)?;
    if let Some(range) = report.time_range {
        writeln!(
            output,
            "- **Time range:** {} to {}",
            range.start.format("%Y-%m-%d %H:%M:%S UTC"),
            range.end.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
    }
    if let Some(current) = &report.current_run {
        writeln!(output, "- **Current run:** `{current}`")?;
    }
    match &report.status {
        AnalysisStatus::Complete => writeln!(output, "- **Status:** complete")?,
        AnalysisStatus::Incomplete { pending_runs } => writeln!(
            output,
            "- **Status:** ⚠️ incomplete, {} run(s) not analyzed: {}",
            pending_runs.len(),
            pending_runs.join(", ")
        )?,
    }
    if let Some(seconds) = report.test_summary.current_run_duration_seconds {
        writeln!(output, "- **Test time (current run):** {seconds:.2}s")?;
    }
    writeln!(output)?;

    let current = &report.test_summary.current_run;
    let window = &report.test_summary.window;
    writeln!(output, "| Tests | Total | ✅ Passed | ❌ Failed | 🔥 Errors | ⚠️ Skipped |")?;
    writeln!(output, "|---|---:|---:|---:|---:|---:|")?;
    for (label, counts) in [("Current run", current), ("Window", window)] {
        writeln!(
            output,
            "| {label} | {} | {} | {} | {} | {} |",
            counts.total, counts.passed, counts.failed, counts.errors, counts.skipped
        )?;
    }
    writeln!(output)?;

    writeln!(output, "## Recommendations")?;
    writeln!(output)?;
    if report.recommendations.is_empty() {
        writeln!(output, "Nothing stands out in this window.")?;
    } else {
        for rec in &report.recommendations {
            writeln!(
                output,
                "- **[{}] {}:** {}",
                rec.severity.to_string().to_uppercase(),
                rec.category,
                rec.message
            )?;
        }
    }
    writeln!(output)?;

    writeln!(output, "## Slow steps")?;
    writeln!(output)?;
    if report.slow_steps.is_empty() {
        writeln!(output, "No slow steps detected.")?;
    } else {
        writeln!(output, "| Step | Observed | Median | P90 | Ratio |")?;
        writeln!(output, "|---|---:|---:|---:|---:|")?;
        for step in &report.slow_steps {
            writeln!(
                output,
                "| `{}` | {} | {} | {} | {} |",
                md_cell(&step.step_name),
                format_seconds(step.observed_seconds),
                format_seconds(step.baseline_median_seconds),
                format_seconds(step.baseline_p90_seconds),
                step.ratio.map_or_else(|| "n/a".to_string(), |r| format!("{r:.2}x"))
            )?;
        }
    }
    if !report.insufficient_history.is_empty() {
        writeln!(output)?;
        writeln!(output, "Not enough history to judge:")?;
        for entry in &report.insufficient_history {
            writeln!(
                output,
                "- `{}` ({} of {} samples)",
                entry.step_name, entry.samples, entry.required
            )?;
        }
    }
    writeln!(output)?;

    writeln!(output, "## Flaky tests")?;
    writeln!(output)?;
    if report.flaky_tests.is_empty() {
        writeln!(output, "No flaky tests detected.")?;
    } else {
        writeln!(output, "| Test | Flips | Same-revision | Revisions | Pass run | Fail run |")?;
        writeln!(output, "|---|---:|:---:|---|---|---|")?;
        for test in &report.flaky_tests {
            writeln!(
                output,
                "| `{}` | {} | {} | {} | {} | {} |",
                md_cell(&test.test_id),
                test.flip_count,
                if test.revision_flip { "yes" } else { "no" },
                md_cell(&test.revisions_affected.join(", ")),
                test.example_pass_run.as_deref().unwrap_or("-"),
                test.example_fail_run.as_deref().unwrap_or("-")
            )?;
        }
    }
    writeln!(output)?;

    writeln!(output, "## Failure clusters")?;
    writeln!(output)?;
    if report.failure_clusters.is_empty() {
        writeln!(output, "No failures recorded.")?;
    } else {
        for cluster in &report.failure_clusters {
            writeln!(
                output,
                "### {} occurrence(s), first seen {}",
                cluster.member_count(),
                cluster.first_seen.format("%Y-%m-%d %H:%M:%S UTC")
            )?;
            writeln!(output)?;
            writeln!(output, "```")?;
            writeln!(output, "{}", cluster.representative)?;
            writeln!(output, "```")?;
            writeln!(output)?;
            for member in &cluster.members {
                writeln!(
                    output,
                    "- `{}`: {}",
                    member.run_id,
                    md_source(&member.source)
                )?;
            }
            writeln!(output)?;
        }
    }

    writeln!(output, "## Slow tests (current run)")?;
    writeln!(output)?;
    if report.slow_tests.is_empty() {
        writeln!(output, "No slow tests detected.")?;
    } else {
        writeln!(output, "| Test | Step | Duration (s) |")?;
        writeln!(output, "|---|---|---:|")?;
        for test in &report.slow_tests {
            writeln!(
                output,
                "| `{}` | `{}` | {:.3} |",
                md_cell(&test.test_id),
                md_cell(&test.step_name),
                test.duration_seconds
            )?;
        }
    }

    if !report.test_durations.is_empty() {
        writeln!(output)?;
        writeln!(output, "## Per-test durations (current run)")?;
        writeln!(output)?;
        writeln!(output, "| # | Test | Step | Duration (s) |")?;
        writeln!(output, "|---:|---|---|---:|")?;
        for (idx, test) in report.test_durations.iter().enumerate() {
            writeln!(
                output,
                "| {} | `{}` | `{}` | {:.3} |",
                idx + 1,
                md_cell(&test.test_id),
                md_cell(&test.step_name),
                test.duration_seconds
            )?;
        }
    }

    if !report.warnings.is_empty() {
        writeln!(output)?;
        writeln!(output, "## Warnings")?;
        writeln!(output)?;
        for warning in &report.warnings {
            writeln!(output, "- `{}`: {}", warning.run_id, warning.message)?;
        }
    }

    Ok(())
}
