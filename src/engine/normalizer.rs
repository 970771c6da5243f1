use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use regex::Regex;

use super::dialects::{default_dialects, Boundary, LogDialect, Stamp};
use super::timestamps::{parse_timestamp, span_seconds, split_leading_timestamp};
use super::types::{NormalizedRun, RawRun, RunOutcome, StepOutcome, StepRecord};
use crate::report::RunWarning;

pub const PREAMBLE_STEP: &str = "preamble";
pub const UNKNOWN_STEP: &str = "unknown";

static FAILURE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"##\[error\]|ERROR: Job failed|Process completed with exit code [1-9]")
        .expect("failure marker regex is valid")
});

/// Splits raw run logs into step records.
///
/// Normalization is total: it accepts arbitrary bytes, never fails, and
/// assigns every byte of the log to exactly one step, so concatenating the
/// outputs of the returned steps reproduces the input.
pub struct LogNormalizer {
    dialects: Vec<Box<dyn LogDialect>>,
}

impl Default for LogNormalizer {
    fn default() -> Self {
        Self::new(default_dialects())
    }
}

impl LogNormalizer {
    pub fn new(dialects: Vec<Box<dyn LogDialect>>) -> Self {
        Self { dialects }
    }

    pub fn normalize(&self, run: &RawRun) -> NormalizedRun {
        let lines = split_lines(&run.log);
        let run_id = run.metadata.run_id.as_str();

        let Some(dialect) = self.detect_dialect(&lines) else {
            debug!("Run {run_id}: no step boundaries recognized");
            return Self::normalize_unstructured(run, &lines);
        };

        debug!("Run {run_id}: parsing with {} dialect", dialect.name());
        let mut parser = StepParser::new(dialect, run);
        for line in &lines {
            parser.feed(line);
        }
        parser.finish()
    }

    /// Whether any dialect reads `line` as a step boundary.
    pub fn is_boundary(&self, line: &str) -> bool {
        self.dialects.iter().any(|dialect| dialect.boundary(line).is_some())
    }

    fn detect_dialect(&self, lines: &[Line<'_>]) -> Option<&dyn LogDialect> {
        self.dialects
            .iter()
            .find(|dialect| {
                lines.iter().any(|line| {
                    matches!(dialect.boundary(&line.text), Some(Boundary::Start { .. }))
                })
            })
            .map(|dialect| &**dialect)
    }

    fn normalize_unstructured(run: &RawRun, lines: &[Line<'_>]) -> NormalizedRun {
        let stamps: Vec<DateTime<Utc>> = lines
            .iter()
            .filter_map(|line| split_leading_timestamp(&line.text))
            .filter_map(|(raw, _)| parse_timestamp(raw))
            .collect();
        let started_at = stamps.first().copied();
        let finished_at = stamps.last().copied();
        let duration = started_at
            .zip(finished_at)
            .and_then(|(start, end)| span_seconds(start, end));

        let outcome = match run.metadata.outcome {
            RunOutcome::Success => StepOutcome::Success,
            RunOutcome::Failure => StepOutcome::Failure,
            RunOutcome::Cancelled => StepOutcome::Skipped,
        };

        let message = "no step boundaries recognized; log kept as a single 'unknown' step";
        warn!("Run {}: {message}", run.metadata.run_id);

        NormalizedRun {
            metadata: run.metadata.clone(),
            steps: vec![StepRecord {
                name: UNKNOWN_STEP.to_string(),
                started_at,
                finished_at,
                duration,
                output: run.log.clone(),
                outcome,
            }],
            warnings: vec![RunWarning::parse_degraded(&run.metadata.run_id, message)],
        }
    }
}

struct Line<'a> {
    bytes: &'a [u8],
    /// Lossy UTF-8 text without the line terminator
    text: String,
}

fn split_lines(log: &[u8]) -> Vec<Line<'_>> {
    log.split_inclusive(|&b| b == b'\n')
        .map(|bytes| {
            let text = String::from_utf8_lossy(bytes);
            Line {
                bytes,
                text: text.trim_end_matches(&['\n', '\r'][..]).to_string(),
            }
        })
        .collect()
}

struct StepBuilder {
    /// Name as written in the log, used to match end markers
    raw_name: String,
    start: Stamp,
    end: Stamp,
    first_line_at: Option<DateTime<Utc>>,
    last_line_at: Option<DateTime<Utc>>,
    outcome: Option<StepOutcome>,
    output: Vec<u8>,
    open: bool,
    synthetic: bool,
}

impl StepBuilder {
    fn new(raw_name: String, start: Stamp, synthetic: bool) -> Self {
        Self {
            raw_name,
            start,
            end: Stamp::Missing,
            first_line_at: None,
            last_line_at: None,
            outcome: None,
            output: Vec::new(),
            open: !synthetic,
            synthetic,
        }
    }

    fn observe_line_time(&mut self, at: Option<DateTime<Utc>>) {
        if let Some(at) = at {
            self.first_line_at.get_or_insert(at);
            self.last_line_at = Some(at);
        }
    }
}

struct StepParser<'a> {
    dialect: &'a dyn LogDialect,
    run: &'a RawRun,
    steps: Vec<StepBuilder>,
}

impl<'a> StepParser<'a> {
    fn new(dialect: &'a dyn LogDialect, run: &'a RawRun) -> Self {
        Self {
            dialect,
            run,
            steps: Vec::new(),
        }
    }

    fn feed(&mut self, line: &Line<'_>) {
        let line_at = self.dialect.line_timestamp(&line.text);

        match self.dialect.boundary(&line.text) {
            Some(Boundary::Start { name, stamp }) => {
                self.close_open_step(stamp.at());
                let mut step = StepBuilder::new(name, stamp, false);
                step.observe_line_time(line_at);
                step.output.extend_from_slice(line.bytes);
                self.steps.push(step);
            }
            Some(Boundary::End {
                name,
                stamp,
                outcome,
            }) if self.end_matches_open_step(name.as_deref()) => {
                if let Some(step) = self.steps.last_mut() {
                    step.output.extend_from_slice(line.bytes);
                    step.observe_line_time(line_at);
                    step.end = stamp;
                    step.outcome = outcome;
                    step.open = false;
                }
            }
            _ => {
                if self.steps.is_empty() {
                    self.steps.push(StepBuilder::new(
                        PREAMBLE_STEP.to_string(),
                        Stamp::Missing,
                        true,
                    ));
                }
                if let Some(step) = self.steps.last_mut() {
                    step.output.extend_from_slice(line.bytes);
                    if step.open || step.synthetic {
                        step.observe_line_time(line_at);
                    }
                }
            }
        }
    }

    fn end_matches_open_step(&self, name: Option<&str>) -> bool {
        match self.steps.last() {
            Some(step) if step.open => name.is_none_or(|name| name == step.raw_name),
            _ => false,
        }
    }

    /// Closes the open step because another one started.
    fn close_open_step(&mut self, next_start: Option<DateTime<Utc>>) {
        let implicit = self.dialect.closes_implicitly();
        if let Some(step) = self.steps.last_mut().filter(|s| s.open) {
            let end = if implicit {
                step.last_line_at
            } else {
                next_start.or(step.last_line_at)
            };
            step.end = end.map_or(Stamp::Missing, Stamp::At);
            step.open = false;
        }
    }

    fn finish(mut self) -> NormalizedRun {
        let run_id = self.run.metadata.run_id.clone();
        let cancelled = self.run.metadata.outcome == RunOutcome::Cancelled;
        let mut warnings = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();

        if self.dialect.closes_implicitly() {
            self.close_open_step(None);
        }

        let steps = self
            .steps
            .into_iter()
            .map(|builder| {
                let name = unique_name(&builder.raw_name, &mut seen);
                let unterminated = builder.open;
                let (started_at, finished_at) = if builder.synthetic {
                    (builder.first_line_at, builder.last_line_at)
                } else {
                    (builder.start.at(), builder.end.at())
                };

                if let Stamp::Unparsable(raw) = &builder.start {
                    warnings.push(degraded(&run_id, format!(
                        "step '{name}' has an unparsable start timestamp '{raw}'"
                    )));
                }
                if let Stamp::Unparsable(raw) = &builder.end {
                    warnings.push(degraded(&run_id, format!(
                        "step '{name}' has an unparsable end timestamp '{raw}'"
                    )));
                }
                if unterminated {
                    warnings.push(degraded(&run_id, format!(
                        "step '{name}' has no end marker"
                    )));
                }

                let duration = if unterminated {
                    None
                } else {
                    match started_at.zip(finished_at) {
                        Some((start, end)) => {
                            let span = span_seconds(start, end);
                            if span.is_none() {
                                warnings.push(degraded(&run_id, format!(
                                    "step '{name}' ends before it starts"
                                )));
                            }
                            span
                        }
                        None => None,
                    }
                };

                let outcome = match builder.outcome {
                    Some(outcome) => outcome,
                    None if unterminated && cancelled => StepOutcome::Skipped,
                    None => infer_outcome(&builder.output),
                };

                StepRecord {
                    name,
                    started_at,
                    finished_at,
                    duration,
                    output: builder.output,
                    outcome,
                }
            })
            .collect();

        NormalizedRun {
            metadata: self.run.metadata.clone(),
            steps,
            warnings,
        }
    }
}

fn degraded(run_id: &str, message: String) -> RunWarning {
    warn!("Run {run_id}: {message}");
    RunWarning::parse_degraded(run_id, message)
}

fn unique_name(raw: &str, seen: &mut HashMap<String, usize>) -> String {
    let base = if raw.is_empty() { "unnamed" } else { raw };
    let count = seen.entry(base.to_string()).or_insert(0);
    *count += 1;
    if *count == 1 {
        base.to_string()
    } else {
        format!("{base} ({count})")
    }
}

fn infer_outcome(output: &[u8]) -> StepOutcome {
    if FAILURE_MARKER.is_match(&String::from_utf8_lossy(output)) {
        StepOutcome::Failure
    } else {
        StepOutcome::Success
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::engine::types::RunMetadata;
    use crate::report::WarningKind;

    fn create_run(outcome: RunOutcome, log: &[u8]) -> RawRun {
        RawRun::new(
            RunMetadata {
                run_id: "run-1".to_string(),
                revision: "abc123".to_string(),
                started_at: DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
                    .unwrap()
                    .with_timezone(&Utc),
                outcome,
            },
            log,
        )
    }

    fn concat_outputs(run: &NormalizedRun) -> Vec<u8> {
        run.steps.iter().flat_map(|s| s.output.clone()).collect()
    }

    fn names(run: &NormalizedRun) -> Vec<&str> {
        run.steps.iter().map(|s| s.name.as_str()).collect()
    }

    mod github_logs {
        use super::*;

        const LOG: &str = "2024-01-01T00:00:00.0000000Z Current runner version: '2.300.0'\n\
2024-01-01T00:00:01.0000000Z ##[group]Run actions/checkout@v4\n\
2024-01-01T00:00:01.5000000Z with:\n\
2024-01-01T00:00:01.5000000Z ##[endgroup]\n\
2024-01-01T00:00:04.0000000Z Fetching the repository\n\
2024-01-01T00:00:05.0000000Z ##[group]Run cargo test\n\
2024-01-01T00:00:35.0000000Z test result: FAILED. 1 passed; 1 failed\n\
2024-01-01T00:00:35.0000000Z ##[error]Process completed with exit code 101.\n";

        #[test]
        fn splits_steps_at_group_markers() {
            let run = LogNormalizer::default().normalize(&create_run(RunOutcome::Failure, LOG.as_bytes()));

            assert_eq!(
                names(&run),
                vec![PREAMBLE_STEP, "Run actions/checkout@v4", "Run cargo test"]
            );
            assert!(run.warnings.is_empty(), "Well-formed log should not degrade");
        }

        #[test]
        fn measures_steps_until_their_last_timestamp() {
            let run = LogNormalizer::default().normalize(&create_run(RunOutcome::Failure, LOG.as_bytes()));

            assert_eq!(run.steps[1].duration, Some(3.0));
            assert_eq!(run.steps[2].duration, Some(30.0));
        }

        #[test]
        fn marks_error_annotations_as_failures() {
            let run = LogNormalizer::default().normalize(&create_run(RunOutcome::Failure, LOG.as_bytes()));

            assert_eq!(run.steps[1].outcome, StepOutcome::Success);
            assert_eq!(run.steps[2].outcome, StepOutcome::Failure);
        }

        #[test]
        fn keeps_every_byte() {
            let run = LogNormalizer::default().normalize(&create_run(RunOutcome::Failure, LOG.as_bytes()));
            assert_eq!(concat_outputs(&run), LOG.as_bytes());
        }
    }

    mod gitlab_logs {
        use super::*;

        #[test]
        fn reads_section_times() {
            let log = "Running with gitlab-runner 16.0\n\
section_start:1704067200:prepare_script\r\u{1b}[0KPreparing environment\n\
Running on runner-1\n\
section_end:1704067210:prepare_script\r\u{1b}[0K\n\
section_start:1704067210:step_script\r\u{1b}[0KExecuting step script\n\
$ make build\n\
section_end:1704067290:step_script\r\u{1b}[0K\n\
Job succeeded\n";
            let run = LogNormalizer::default().normalize(&create_run(RunOutcome::Success, log.as_bytes()));

            assert_eq!(names(&run), vec![PREAMBLE_STEP, "prepare_script", "step_script"]);
            assert_eq!(run.steps[1].duration, Some(10.0));
            assert_eq!(run.steps[2].duration, Some(80.0));
            assert!(
                run.steps[2].output_text().ends_with("Job succeeded\n"),
                "Trailing lines belong to the step that just closed"
            );
            assert_eq!(concat_outputs(&run), log.as_bytes());
        }

        #[test]
        fn unterminated_section_has_no_duration() {
            let log = "section_start:1704067200:step_script\r\u{1b}[0K\n$ make\n";
            let run = LogNormalizer::default().normalize(&create_run(RunOutcome::Success, log.as_bytes()));

            assert_eq!(run.steps.len(), 1);
            assert_eq!(run.steps[0].duration, None);
            assert_eq!(run.warnings.len(), 1);
            assert_eq!(run.warnings[0].kind, WarningKind::ParseDegraded);
        }

        #[test]
        fn unterminated_section_of_cancelled_run_is_skipped() {
            let log = "section_start:1704067200:step_script\r\u{1b}[0K\n$ make\n";
            let run = LogNormalizer::default().normalize(&create_run(RunOutcome::Cancelled, log.as_bytes()));

            assert_eq!(run.steps[0].outcome, StepOutcome::Skipped);
        }
    }

    mod bracket_logs {
        use super::*;

        #[test]
        fn uses_explicit_outcomes() {
            let log = "[2024-01-01 00:00:00] ==> build\ncompiling\n[2024-01-01 00:00:30] <== build (success)\n\
[2024-01-01 00:00:30] ==> test\n[2024-01-01 00:00:45] <== test (failed)\n";
            let run = LogNormalizer::default().normalize(&create_run(RunOutcome::Failure, log.as_bytes()));

            assert_eq!(names(&run), vec!["build", "test"]);
            assert_eq!(run.steps[0].duration, Some(30.0));
            assert_eq!(run.steps[0].outcome, StepOutcome::Success);
            assert_eq!(run.steps[1].duration, Some(15.0));
            assert_eq!(run.steps[1].outcome, StepOutcome::Failure);
        }

        #[test]
        fn unparsable_timestamp_degrades_only_that_step() {
            let log = "[garbage] ==> build\n[2024-01-01 00:00:30] <== build (success)\n\
[2024-01-01 00:00:30] ==> lint\n[2024-01-01 00:00:40] <== lint (success)\n";
            let run = LogNormalizer::default().normalize(&create_run(RunOutcome::Success, log.as_bytes()));

            assert_eq!(run.steps[0].duration, None);
            assert_eq!(run.steps[1].duration, Some(10.0));
            assert_eq!(run.warnings.len(), 1);
            assert!(run.warnings[0].message.contains("garbage"));
        }

        #[test]
        fn negative_span_has_no_duration() {
            let log = "[2024-01-01 00:01:00] ==> build\n[2024-01-01 00:00:00] <== build (success)\n";
            let run = LogNormalizer::default().normalize(&create_run(RunOutcome::Success, log.as_bytes()));

            assert_eq!(run.steps[0].duration, None);
            assert_eq!(run.warnings.len(), 1);
        }

        #[test]
        fn repeated_names_are_made_unique() {
            let log = "[2024-01-01 00:00:00] ==> build\n[2024-01-01 00:00:10] <== build (success)\n\
[2024-01-01 00:00:10] ==> build\n[2024-01-01 00:00:20] <== build (success)\n";
            let run = LogNormalizer::default().normalize(&create_run(RunOutcome::Success, log.as_bytes()));

            assert_eq!(names(&run), vec!["build", "build (2)"]);
        }

        #[test]
        fn new_start_closes_open_step() {
            let log = "[2024-01-01 00:00:00] ==> build\n[2024-01-01 00:00:12] ==> test\n\
[2024-01-01 00:00:20] <== test (success)\n";
            let run = LogNormalizer::default().normalize(&create_run(RunOutcome::Success, log.as_bytes()));

            assert_eq!(run.steps[0].duration, Some(12.0));
            assert_eq!(run.steps[1].duration, Some(8.0));
            assert!(run.warnings.is_empty());
        }
    }

    mod unstructured_logs {
        use super::*;

        #[test]
        fn whole_log_becomes_unknown_step() {
            let log = "============ 3 passed in 0.01s ============\n";
            let run = LogNormalizer::default().normalize(&create_run(RunOutcome::Success, log.as_bytes()));

            assert_eq!(names(&run), vec![UNKNOWN_STEP]);
            assert_eq!(run.steps[0].output, log.as_bytes());
            assert_eq!(run.steps[0].duration, None);
            assert_eq!(run.steps[0].outcome, StepOutcome::Success);
            assert_eq!(run.warnings.len(), 1);
        }

        #[test]
        fn unknown_step_spans_first_to_last_timestamp() {
            let log = "2024-01-01 00:00:00 start\nnoise\n2024-01-01 00:00:42 done\n";
            let run = LogNormalizer::default().normalize(&create_run(RunOutcome::Failure, log.as_bytes()));

            assert_eq!(run.steps[0].duration, Some(42.0));
            assert_eq!(run.steps[0].outcome, StepOutcome::Failure);
        }

        #[test]
        fn accepts_empty_logs() {
            let run = LogNormalizer::default().normalize(&create_run(RunOutcome::Cancelled, b""));

            assert_eq!(run.steps.len(), 1);
            assert!(run.steps[0].output.is_empty());
            assert_eq!(run.steps[0].outcome, StepOutcome::Skipped);
        }

        #[test]
        fn accepts_invalid_utf8_without_losing_bytes() {
            let log: Vec<u8> = vec![0xff, 0xfe, b'\n', b'[', 0x80, b']', b'\r', b'\n', 0x00];
            let run = LogNormalizer::default().normalize(&create_run(RunOutcome::Success, &log));

            assert_eq!(concat_outputs(&run), log);
        }
    }

    #[test]
    fn every_byte_lands_in_some_step_for_mixed_input() {
        let inputs: Vec<Vec<u8>> = vec![
            b"no newline at end".to_vec(),
            b"\n\n\n".to_vec(),
            b"junk\n[2024-01-01 00:00:00] ==> a\r\nx\n[bad] <== a (success)\ntrailer".to_vec(),
            b"##[group]one\n##[group]two\n".to_vec(),
            (0u8..=255).collect(),
        ];

        for input in inputs {
            let run = LogNormalizer::default().normalize(&create_run(RunOutcome::Success, &input));
            assert_eq!(concat_outputs(&run), input, "Normalization must not drop bytes");
            assert!(!run.steps.is_empty(), "Every run yields at least one step");
        }
    }
}
