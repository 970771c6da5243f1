use std::sync::LazyLock;

use indexmap::IndexMap;
use log::debug;
use regex::Regex;

use super::timestamps::split_leading_timestamp;
use super::types::{NormalizedRun, StepRecord, TestOutcome, TestResult, TestStatus};
use crate::report::TestCounts;

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").expect("ansi regex is valid"));

static PYTEST_VERBOSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\S+::\S+)\s+(PASSED|FAILED|ERROR|SKIPPED|XFAIL|XPASS)\b")
        .expect("pytest verbose regex is valid")
});

static PYTEST_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:\[gw\d+\]\s+\[\s*\d+%\]\s+)?(PASSED|FAILED|ERROR|SKIPPED|XFAIL|XPASS)\s+(\S+::\S+)(?:\s+-\s+(.*))?$",
    )
    .expect("pytest summary regex is valid")
});

static PYTEST_PHASE_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]*\.?[0-9]+)s\s+(call|setup|teardown)\s+(\S+::\S+)")
        .expect("pytest duration regex is valid")
});

static PYTEST_TRAILING_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\S+::\S+)\s+([0-9]*\.?[0-9]+)s$").expect("pytest trailing duration regex is valid")
});

/// Pytest's closing line, e.g. `==== 1 failed, 2 passed in 0.50s ====`.
static PYTEST_TOTALS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^=*\s*(\d+ (?:passed|failed|errors?|skipped|xfailed|xpassed|deselected|warnings?|rerun)(?:, \d+ [a-z]+)*) in ([0-9]*\.?[0-9]+)s(?:\s+\([0-9:]+\))?\s*=*$",
    )
    .expect("pytest totals regex is valid")
});

static PYTEST_TOTALS_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) ([a-z]+)").expect("pytest totals item regex is valid"));

static LIBTEST_TOTALS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^test result: \w+\. (\d+) passed; (\d+) failed; (\d+) ignored;.*?(?:finished in ([0-9.]+)s)?$")
        .expect("libtest totals regex is valid")
});

static LIBTEST_RESULT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^test (\S+) \.\.\. (ok|FAILED|ignored)\b.*?(?:<([0-9.]+)s>)?\s*$")
        .expect("libtest result regex is valid")
});

static LIBTEST_RUNNING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^running \d+ tests?$").expect("libtest running regex is valid"));

static LIBTEST_OUTPUT_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^---- (\S+) std(?:out|err) ----$").expect("libtest header regex is valid")
});

static GO_RESULT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*)--- (PASS|FAIL|SKIP): (\S+) \(([0-9.]+)s\)").expect("go result regex is valid")
});

static JUNIT_TESTCASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<testcase\b([^>]*?)(?:/>|>(.*?)</testcase>)").expect("junit testcase regex is valid")
});

static XML_ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_][A-Za-z0-9_.:\-]*)\s*=\s*"([^"]*)""#).expect("xml attribute regex is valid")
});

static JUNIT_PROBLEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(failure|error|skipped)\b([^>]*?)(?:/>|>(.*?)</(?:failure|error|skipped)>)")
        .expect("junit child regex is valid")
});

/// Strips ANSI escapes, a leading log timestamp and the line terminator.
fn clean_line(line: &str) -> String {
    let line = line.trim_end_matches(&['\n', '\r'][..]);
    let line = ANSI_ESCAPE.replace_all(line, "");
    match split_leading_timestamp(&line) {
        Some((_, rest)) => rest.strip_prefix(' ').unwrap_or(rest).to_string(),
        None => line.into_owned(),
    }
}

/// Step output split into cleaned lines.
pub(crate) fn clean_lines(text: &str) -> Vec<String> {
    text.lines().map(clean_line).collect()
}

fn status_rank(status: TestStatus) -> u8 {
    match status {
        TestStatus::Skipped => 0,
        TestStatus::Pass => 1,
        TestStatus::Fail => 2,
        TestStatus::Error => 3,
    }
}

/// Results of one step keyed by test id, in order of first appearance.
#[derive(Debug, Default)]
struct ResultSet {
    results: IndexMap<String, TestResult>,
}

impl ResultSet {
    /// Adds a result, merging with an earlier one for the same id. A failing
    /// status always wins over pass or skip.
    fn record(&mut self, result: TestResult) {
        match self.results.get_mut(&result.test_id) {
            Some(existing) => {
                if status_rank(result.status) > status_rank(existing.status) {
                    existing.status = result.status;
                }
                if existing.duration.is_none() {
                    existing.duration = result.duration;
                }
                if existing.message.is_none() {
                    existing.message = result.message;
                }
            }
            None => {
                self.results.insert(result.test_id.clone(), result);
            }
        }
    }

    fn get_mut(&mut self, test_id: &str) -> Option<&mut TestResult> {
        self.results.get_mut(test_id)
    }

    fn into_results(self) -> Vec<TestResult> {
        self.results.into_values().collect()
    }
}

fn result(test_id: &str, status: TestStatus) -> TestResult {
    TestResult {
        test_id: test_id.to_string(),
        status,
        duration: None,
        message: None,
    }
}

fn non_empty(message: String) -> Option<String> {
    let trimmed = message.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Totals a runner printed about itself, independent of per-test lines.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReportedTotals {
    pub counts: TestCounts,
    pub duration: Option<f64>,
}

/// One test runner's way of reporting results.
pub trait TestReportFormat: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the cleaned output looks like this runner's report.
    fn recognizes(&self, lines: &[String]) -> bool;

    /// Extracts results in order of first appearance, merged per test id.
    fn extract(&self, lines: &[String]) -> Vec<TestResult>;

    /// The runner's own closing totals, when it prints any.
    fn totals(&self, _lines: &[String]) -> Option<ReportedTotals> {
        None
    }
}

pub struct Pytest;

impl Pytest {
    fn parse_status(raw: &str) -> TestStatus {
        match raw {
            "PASSED" | "XPASS" => TestStatus::Pass,
            "FAILED" => TestStatus::Fail,
            "ERROR" => TestStatus::Error,
            _ => TestStatus::Skipped,
        }
    }
}

impl TestReportFormat for Pytest {
    fn name(&self) -> &'static str {
        "pytest"
    }

    fn recognizes(&self, lines: &[String]) -> bool {
        lines.iter().any(|line| {
            line.contains("test session starts")
                || PYTEST_VERBOSE.is_match(line)
                || PYTEST_SUMMARY.is_match(line)
                || PYTEST_PHASE_DURATION.is_match(line.trim_start())
                || PYTEST_TOTALS.is_match(line.trim())
        })
    }

    /// Reads the last closing line. Expected failures count as skipped and
    /// unexpected passes as passed; warnings and deselections are not tests.
    fn totals(&self, lines: &[String]) -> Option<ReportedTotals> {
        let caps = lines
            .iter()
            .rev()
            .find_map(|line| PYTEST_TOTALS.captures(line.trim()))?;

        let mut counts = TestCounts::default();
        for item in PYTEST_TOTALS_ITEM.captures_iter(&caps[1]) {
            let Ok(n) = item[1].parse::<usize>() else {
                continue;
            };
            let slot = match &item[2] {
                "passed" | "xpassed" => &mut counts.passed,
                "failed" => &mut counts.failed,
                "error" | "errors" => &mut counts.errors,
                "skipped" | "xfailed" => &mut counts.skipped,
                _ => continue,
            };
            *slot += n;
            counts.total += n;
        }

        Some(ReportedTotals {
            counts,
            duration: caps[2].parse().ok(),
        })
    }

    fn extract(&self, lines: &[String]) -> Vec<TestResult> {
        let mut set = ResultSet::default();
        // (test id, seconds, counts as executed)
        let mut durations: Vec<(String, f64, bool)> = Vec::new();

        for line in lines {
            let trimmed = line.trim();

            if let Some(caps) = PYTEST_VERBOSE.captures(trimmed) {
                set.record(result(&caps[1], Self::parse_status(&caps[2])));
            } else if let Some(caps) = PYTEST_SUMMARY.captures(trimmed) {
                let mut entry = result(&caps[2], Self::parse_status(&caps[1]));
                entry.message = caps.get(3).and_then(|m| non_empty(m.as_str().to_string()));
                set.record(entry);
            } else if let Some(caps) = PYTEST_PHASE_DURATION.captures(trimmed) {
                if let Ok(seconds) = caps[1].parse::<f64>() {
                    durations.push((caps[3].to_string(), seconds, &caps[2] == "call"));
                }
            } else if let Some(caps) = PYTEST_TRAILING_DURATION.captures(trimmed) {
                if let Ok(seconds) = caps[2].parse::<f64>() {
                    durations.push((caps[1].to_string(), seconds, true));
                }
            }
        }

        for (test_id, seconds, executed) in durations {
            if let Some(existing) = set.get_mut(&test_id) {
                if executed && existing.duration.is_none() {
                    existing.duration = Some(seconds);
                }
            } else if executed {
                let mut entry = result(&test_id, TestStatus::Pass);
                entry.duration = Some(seconds);
                set.record(entry);
            }
        }

        set.into_results()
    }
}

/// Rust's built-in test harness (`cargo test`).
pub struct Libtest;

impl Libtest {
    /// Collects `---- name stdout ----` sections printed under `failures:`.
    fn failure_sections(lines: &[String]) -> IndexMap<String, String> {
        let mut sections = IndexMap::new();
        let mut current: Option<(String, Vec<&str>)> = None;

        for line in lines {
            let trimmed = line.trim_end();
            if let Some(caps) = LIBTEST_OUTPUT_HEADER.captures(trimmed) {
                if let Some((name, body)) = current.take() {
                    sections.insert(name, body.join("\n"));
                }
                current = Some((caps[1].to_string(), Vec::new()));
                continue;
            }

            let ends_section = trimmed == "failures:"
                || trimmed.starts_with("test result:")
                || LIBTEST_RESULT.is_match(trimmed);
            if ends_section {
                if let Some((name, body)) = current.take() {
                    sections.insert(name, body.join("\n"));
                }
                continue;
            }

            if let Some((_, body)) = current.as_mut() {
                if !trimmed.trim().is_empty() && !trimmed.starts_with("note: run with `RUST_BACKTRACE") {
                    body.push(trimmed.trim());
                }
            }
        }

        if let Some((name, body)) = current {
            sections.insert(name, body.join("\n"));
        }
        sections
    }
}

impl TestReportFormat for Libtest {
    fn name(&self) -> &'static str {
        "libtest"
    }

    fn recognizes(&self, lines: &[String]) -> bool {
        lines.iter().any(|line| {
            let trimmed = line.trim();
            LIBTEST_RUNNING.is_match(trimmed) || LIBTEST_RESULT.is_match(trimmed)
        })
    }

    /// Sums every `test result:` line; one is printed per test binary.
    fn totals(&self, lines: &[String]) -> Option<ReportedTotals> {
        let mut totals: Option<ReportedTotals> = None;

        for caps in lines.iter().filter_map(|line| LIBTEST_TOTALS.captures(line.trim())) {
            let count = |i: usize| caps[i].parse::<usize>().unwrap_or(0);
            let (passed, failed, ignored) = (count(1), count(2), count(3));
            let entry = totals.get_or_insert_with(ReportedTotals::default);
            entry.counts += TestCounts {
                total: passed + failed + ignored,
                passed,
                failed,
                errors: 0,
                skipped: ignored,
            };
            if let Some(seconds) = caps.get(4).and_then(|m| m.as_str().parse::<f64>().ok()) {
                entry.duration = Some(entry.duration.unwrap_or(0.0) + seconds);
            }
        }

        totals
    }

    fn extract(&self, lines: &[String]) -> Vec<TestResult> {
        let mut set = ResultSet::default();

        for line in lines {
            let Some(caps) = LIBTEST_RESULT.captures(line.trim()) else {
                continue;
            };
            let status = match &caps[2] {
                "ok" => TestStatus::Pass,
                "FAILED" => TestStatus::Fail,
                _ => TestStatus::Skipped,
            };
            let mut entry = result(&caps[1], status);
            entry.duration = caps.get(3).and_then(|m| m.as_str().parse().ok());
            set.record(entry);
        }

        for (test_id, body) in Self::failure_sections(lines) {
            if let Some(existing) = set.get_mut(&test_id) {
                if existing.status.is_failing() && existing.message.is_none() {
                    existing.message = non_empty(body);
                }
            }
        }

        set.into_results()
    }
}

/// `go test -v` output.
pub struct GoTest;

impl TestReportFormat for GoTest {
    fn name(&self) -> &'static str {
        "go-test"
    }

    fn recognizes(&self, lines: &[String]) -> bool {
        lines
            .iter()
            .any(|line| line.starts_with("=== RUN") || GO_RESULT.is_match(line))
    }

    fn extract(&self, lines: &[String]) -> Vec<TestResult> {
        let mut set = ResultSet::default();

        let mut index = 0;
        while index < lines.len() {
            let Some(caps) = GO_RESULT.captures(&lines[index]) else {
                index += 1;
                continue;
            };

            let indent = caps[1].len();
            let status = match &caps[2] {
                "PASS" => TestStatus::Pass,
                "FAIL" => TestStatus::Fail,
                _ => TestStatus::Skipped,
            };
            let mut entry = result(&caps[3], status);
            entry.duration = caps[4].parse().ok();

            // Failure output follows the result line, indented deeper.
            let mut detail = Vec::new();
            index += 1;
            while index < lines.len() {
                let line = &lines[index];
                let line_indent = line.len() - line.trim_start().len();
                if line.trim().is_empty() || line_indent <= indent || GO_RESULT.is_match(line) {
                    break;
                }
                detail.push(line.trim().to_string());
                index += 1;
            }

            if status == TestStatus::Fail {
                entry.message = non_empty(detail.join("\n"));
            }
            set.record(entry);
        }

        set.into_results()
    }
}

/// JUnit XML reports printed into the log.
pub struct JUnitXml;

impl JUnitXml {
    fn attributes(raw: &str) -> IndexMap<String, String> {
        XML_ATTRIBUTE
            .captures_iter(raw)
            .map(|caps| (caps[1].to_string(), unescape_xml(&caps[2])))
            .collect()
    }
}

fn unescape_xml(raw: &str) -> String {
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

impl TestReportFormat for JUnitXml {
    fn name(&self) -> &'static str {
        "junit-xml"
    }

    fn recognizes(&self, lines: &[String]) -> bool {
        lines.iter().any(|line| line.contains("<testcase"))
    }

    fn extract(&self, lines: &[String]) -> Vec<TestResult> {
        let document = lines.join("\n");
        let mut set = ResultSet::default();

        for caps in JUNIT_TESTCASE.captures_iter(&document) {
            let attributes = Self::attributes(&caps[1]);
            let Some(name) = attributes.get("name") else {
                continue;
            };
            let test_id = match attributes.get("classname") {
                Some(class) if !class.is_empty() => format!("{class}.{name}"),
                _ => name.clone(),
            };

            let mut entry = result(&test_id, TestStatus::Pass);
            entry.duration = attributes.get("time").and_then(|t| t.parse().ok());

            if let Some(body) = caps.get(2) {
                if let Some(problem) = JUNIT_PROBLEM.captures(body.as_str()) {
                    entry.status = match &problem[1] {
                        "failure" => TestStatus::Fail,
                        "error" => TestStatus::Error,
                        _ => TestStatus::Skipped,
                    };
                    if entry.status.is_failing() {
                        let message = Self::attributes(&problem[2]).shift_remove("message");
                        let text = problem.get(3).map(|m| unescape_xml(m.as_str()));
                        entry.message = message
                            .and_then(non_empty)
                            .or_else(|| text.and_then(non_empty));
                    }
                }
            }

            set.record(entry);
        }

        set.into_results()
    }
}

/// Report formats tried by default, most specific first.
pub fn default_formats() -> Vec<Box<dyn TestReportFormat>> {
    vec![
        Box::new(JUnitXml),
        Box::new(Pytest),
        Box::new(Libtest),
        Box::new(GoTest),
    ]
}

/// Decides which steps are worth scanning for test results.
pub trait StepMatcher: Send + Sync {
    fn is_test_step(&self, step: &StepRecord) -> bool;
}

/// Matches steps whose name contains one of the keywords, case-insensitively.
pub struct KeywordStepMatcher {
    keywords: Vec<String>,
}

impl KeywordStepMatcher {
    pub fn new(keywords: &[String]) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }
}

impl StepMatcher for KeywordStepMatcher {
    fn is_test_step(&self, step: &StepRecord) -> bool {
        let name = step.name.to_lowercase();
        self.keywords.iter().any(|keyword| name.contains(keyword.as_str()))
    }
}

/// Runner totals printed by one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepTotals {
    pub step_name: String,
    pub totals: ReportedTotals,
}

/// Everything the tracker read from one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackedRun {
    pub outcomes: Vec<TestOutcome>,
    pub reported: Vec<StepTotals>,
}

/// Extracts per-test outcomes from the steps of a run.
///
/// A step is scanned when the matcher selects it or, with `scan_unmatched`
/// set, when any report format recognizes its output. The first format that
/// recognizes the output wins. Unrecognized output yields no outcomes.
pub struct TestOutcomeTracker {
    matcher: Box<dyn StepMatcher>,
    formats: Vec<Box<dyn TestReportFormat>>,
    scan_unmatched: bool,
}

impl TestOutcomeTracker {
    pub fn new(
        matcher: Box<dyn StepMatcher>,
        formats: Vec<Box<dyn TestReportFormat>>,
        scan_unmatched: bool,
    ) -> Self {
        Self {
            matcher,
            formats,
            scan_unmatched,
        }
    }

    pub fn with_keywords(keywords: &[String], scan_unmatched: bool) -> Self {
        Self::new(
            Box::new(KeywordStepMatcher::new(keywords)),
            default_formats(),
            scan_unmatched,
        )
    }

    pub fn track(&self, run: &NormalizedRun) -> Vec<TestOutcome> {
        self.track_run(run).outcomes
    }

    /// Per-test outcomes plus any totals the runners printed.
    pub fn track_run(&self, run: &NormalizedRun) -> TrackedRun {
        let mut tracked = TrackedRun::default();

        for step in &run.steps {
            let selected = self.matcher.is_test_step(step);
            if !selected && !self.scan_unmatched {
                continue;
            }

            let lines = clean_lines(&step.output_text());
            let Some(format) = self.formats.iter().find(|f| f.recognizes(&lines)) else {
                if selected {
                    debug!(
                        "Run {}: test step '{}' has no recognizable test report",
                        run.metadata.run_id, step.name
                    );
                }
                continue;
            };

            debug!(
                "Run {}: reading step '{}' as {} output",
                run.metadata.run_id,
                step.name,
                format.name()
            );

            if let Some(totals) = format.totals(&lines) {
                tracked.reported.push(StepTotals {
                    step_name: step.name.clone(),
                    totals,
                });
            }

            tracked.outcomes.extend(format.extract(&lines).into_iter().map(|r| TestOutcome {
                test_id: r.test_id,
                status: r.status,
                duration: r.duration,
                message: r.message,
                run_id: run.metadata.run_id.clone(),
                revision: run.metadata.revision.clone(),
                run_started_at: run.metadata.started_at,
                step_name: step.name.clone(),
            }));
        }

        tracked
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::engine::types::{RunMetadata, RunOutcome, StepOutcome};
    use chrono::{DateTime, Utc};

    fn lines(text: &str) -> Vec<String> {
        clean_lines(text)
    }

    fn create_step(name: &str, output: &str) -> StepRecord {
        StepRecord {
            name: name.to_string(),
            started_at: None,
            finished_at: None,
            duration: None,
            output: output.as_bytes().to_vec(),
            outcome: StepOutcome::Success,
        }
    }

    fn create_run(steps: Vec<StepRecord>) -> NormalizedRun {
        NormalizedRun {
            metadata: RunMetadata {
                run_id: "run-1".to_string(),
                revision: "abc123".to_string(),
                started_at: DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
                    .unwrap()
                    .with_timezone(&Utc),
                outcome: RunOutcome::Failure,
            },
            steps,
            warnings: Vec::new(),
        }
    }

    fn default_tracker() -> TestOutcomeTracker {
        let keywords: Vec<String> = ["test", "spec", "check"].iter().map(|s| s.to_string()).collect();
        TestOutcomeTracker::with_keywords(&keywords, true)
    }

    mod pytest {
        use super::*;

        const VERBOSE: &str = "\
============================= test session starts ==============================
collected 3 items

tests/test_api.py::test_login PASSED                                     [ 33%]
tests/test_api.py::test_logout FAILED                                    [ 66%]
tests/test_db.py::test_connect ERROR                                     [100%]

=========================== short test summary info ============================
FAILED tests/test_api.py::test_logout - AssertionError: expected 200, got 500
ERROR tests/test_db.py::test_connect - ConnectionRefusedError: [Errno 111]
";

        #[test]
        fn reads_verbose_results_and_summary_messages() {
            let results = Pytest.extract(&lines(VERBOSE));

            assert_eq!(results.len(), 3, "Summary lines merge into verbose entries");
            assert_eq!(results[0].test_id, "tests/test_api.py::test_login");
            assert_eq!(results[0].status, TestStatus::Pass);
            assert_eq!(results[1].status, TestStatus::Fail);
            assert_eq!(
                results[1].message.as_deref(),
                Some("AssertionError: expected 200, got 500")
            );
            assert_eq!(results[2].status, TestStatus::Error);
        }

        #[test]
        fn durations_only_tests_count_as_passes() {
            let output = "\
..F
================ slowest durations ================
1.20s call     tests/test_a.py::test_slow
0.30s setup    tests/test_a.py::test_fixture_only
0.10s call     tests/test_a.py::test_broken
=========================== short test summary info ============================
FAILED tests/test_a.py::test_broken - ValueError
";
            let results = Pytest.extract(&lines(output));

            let ids: Vec<&str> = results.iter().map(|r| r.test_id.as_str()).collect();
            assert_eq!(ids, vec!["tests/test_a.py::test_broken", "tests/test_a.py::test_slow"]);
            assert_eq!(results[0].status, TestStatus::Fail);
            assert_eq!(results[0].duration, Some(0.10));
            assert_eq!(results[1].status, TestStatus::Pass);
            assert_eq!(results[1].duration, Some(1.20));
        }

        #[test]
        fn reads_closing_totals_from_a_quiet_run() {
            let output = "\
============================= test session starts ==============================
collected 3 items

tests/test_sample.py ..F                                                 [100%]

1 failed, 2 passed in 0.50s
";
            let lines = lines(output);

            assert!(Pytest.recognizes(&lines));
            assert!(Pytest.extract(&lines).is_empty());

            let totals = Pytest.totals(&lines).unwrap();
            assert_eq!(
                totals.counts,
                TestCounts {
                    total: 3,
                    passed: 2,
                    failed: 1,
                    errors: 0,
                    skipped: 0,
                }
            );
            assert_eq!(totals.duration, Some(0.5));
        }

        #[test]
        fn closing_totals_skip_warnings_and_fold_expected_failures() {
            let output = "==== 1 failed, 2 passed, 1 skipped, 1 xfailed, 3 warnings in 2.33s (0:00:02) ====\n";

            let totals = Pytest.totals(&lines(output)).unwrap();

            assert_eq!(totals.counts.total, 5);
            assert_eq!(totals.counts.skipped, 2);
            assert_eq!(totals.counts.failed, 1);
            assert_eq!(totals.duration, Some(2.33));
        }

        #[test]
        fn ordinary_lines_are_not_totals() {
            assert!(Pytest.totals(&lines("copied 3 files in 0.2s\n")).is_none());
        }

        #[test]
        fn recognizes_output_behind_github_timestamps() {
            let output = "2024-01-01T00:00:01.0000000Z tests/test_a.py::test_x PASSED [100%]\n";
            assert!(Pytest.recognizes(&lines(output)));
            assert_eq!(Pytest.extract(&lines(output))[0].test_id, "tests/test_a.py::test_x");
        }
    }

    mod libtest {
        use super::*;

        const OUTPUT: &str = "\
running 3 tests
test parser::tests::parses_empty ... ok
test parser::tests::parses_nested ... FAILED
test net::tests::needs_network ... ignored

failures:

---- parser::tests::parses_nested stdout ----
thread 'parser::tests::parses_nested' panicked at src/parser.rs:42:9:
assertion `left == right` failed
note: run with `RUST_BACKTRACE=1` environment variable to display a backtrace

failures:
    parser::tests::parses_nested

test result: FAILED. 1 passed; 1 failed; 1 ignored; 0 measured; 0 filtered out
";

        #[test]
        fn reads_results_and_failure_output() {
            let results = Libtest.extract(&lines(OUTPUT));

            assert_eq!(results.len(), 3);
            assert_eq!(results[0].status, TestStatus::Pass);
            assert_eq!(results[1].test_id, "parser::tests::parses_nested");
            assert_eq!(results[1].status, TestStatus::Fail);
            let message = results[1].message.as_deref().unwrap();
            assert!(message.contains("panicked at src/parser.rs:42:9"));
            assert!(!message.contains("RUST_BACKTRACE"));
            assert_eq!(results[2].status, TestStatus::Skipped);
        }

        #[test]
        fn sums_totals_across_test_binaries() {
            let output = "\
test result: ok. 4 passed; 0 failed; 1 ignored; 0 measured; 0 filtered out; finished in 0.25s
test result: FAILED. 2 passed; 1 failed; 0 ignored; 0 measured; 0 filtered out; finished in 1.00s
";

            let totals = Libtest.totals(&lines(output)).unwrap();

            assert_eq!(totals.counts.total, 8);
            assert_eq!(totals.counts.passed, 6);
            assert_eq!(totals.counts.failed, 1);
            assert_eq!(totals.counts.skipped, 1);
            assert_eq!(totals.duration, Some(1.25));
        }

        #[test]
        fn totals_without_timing_have_no_duration() {
            let totals = Libtest.totals(&lines(OUTPUT)).unwrap();
            assert_eq!(totals.counts.total, 3);
            assert_eq!(totals.duration, None);
        }

        #[test]
        fn reads_report_time() {
            let results = Libtest.extract(&lines("test slow_one ... ok <1.250s>\n"));
            assert_eq!(results[0].duration, Some(1.25));
        }
    }

    mod go_test {
        use super::*;

        #[test]
        fn reads_results_with_indented_failure_lines() {
            let output = "\
=== RUN   TestAdd
--- PASS: TestAdd (0.00s)
=== RUN   TestDial
--- FAIL: TestDial (1.52s)
    dial_test.go:14: dial tcp 10.0.0.5:443: connect: connection refused
FAIL
";
            let results = GoTest.extract(&lines(output));

            assert_eq!(results.len(), 2);
            assert_eq!(results[0].status, TestStatus::Pass);
            assert_eq!(results[1].status, TestStatus::Fail);
            assert_eq!(results[1].duration, Some(1.52));
            assert_eq!(
                results[1].message.as_deref(),
                Some("dial_test.go:14: dial tcp 10.0.0.5:443: connect: connection refused")
            );
        }

        #[test]
        fn subtest_failures_do_not_swallow_siblings() {
            let output = "\
--- FAIL: TestSuite (0.01s)
    --- FAIL: TestSuite/case_a (0.00s)
        suite_test.go:9: boom
    --- PASS: TestSuite/case_b (0.00s)
";
            let results = GoTest.extract(&lines(output));

            let ids: Vec<&str> = results.iter().map(|r| r.test_id.as_str()).collect();
            assert_eq!(ids, vec!["TestSuite", "TestSuite/case_a", "TestSuite/case_b"]);
            assert_eq!(results[1].message.as_deref(), Some("suite_test.go:9: boom"));
            assert_eq!(results[2].status, TestStatus::Pass);
        }
    }

    mod junit_xml {
        use super::*;

        #[test]
        fn reads_testcases_and_children() {
            let output = r#"<testsuite name="unit" tests="3">
  <testcase classname="com.acme.UserTest" name="creates" time="0.05"/>
  <testcase classname="com.acme.UserTest" name="deletes" time="0.75">
    <failure message="expected &lt;1&gt; but was &lt;2&gt;">stack</failure>
  </testcase>
  <testcase classname="com.acme.UserTest" name="skipped">
    <skipped/>
  </testcase>
</testsuite>
"#;
            let results = JUnitXml.extract(&lines(output));

            assert_eq!(results.len(), 3);
            assert_eq!(results[0].test_id, "com.acme.UserTest.creates");
            assert_eq!(results[0].status, TestStatus::Pass);
            assert_eq!(results[1].status, TestStatus::Fail);
            assert_eq!(results[1].duration, Some(0.75));
            assert_eq!(results[1].message.as_deref(), Some("expected <1> but was <2>"));
            assert_eq!(results[2].status, TestStatus::Skipped);
        }
    }

    mod tracker {
        use super::*;

        #[test]
        fn unrecognized_output_yields_nothing() {
            let run = create_run(vec![create_step("test", "random noise\nmore noise\n")]);
            assert!(default_tracker().track(&run).is_empty());
        }

        #[test]
        fn attaches_provenance_in_step_order() {
            let run = create_run(vec![
                create_step("unit tests", "test a ... ok\ntest b ... FAILED\n"),
                create_step("build", "Compiling cilog\n"),
                create_step("integration", "--- FAIL: TestX (0.10s)\n"),
            ]);

            let outcomes = default_tracker().track(&run);

            let ids: Vec<(&str, &str)> = outcomes
                .iter()
                .map(|o| (o.step_name.as_str(), o.test_id.as_str()))
                .collect();
            assert_eq!(
                ids,
                vec![("unit tests", "a"), ("unit tests", "b"), ("integration", "TestX")]
            );
            assert!(outcomes.iter().all(|o| o.run_id == "run-1" && o.revision == "abc123"));
        }

        #[test]
        fn merges_duplicates_within_a_step_with_failure_winning() {
            let run = create_run(vec![create_step(
                "test",
                "test flaky ... ok\ntest flaky ... FAILED\ntest flaky ... ok\n",
            )]);

            let outcomes = default_tracker().track(&run);

            assert_eq!(outcomes.len(), 1);
            assert_eq!(outcomes[0].status, TestStatus::Fail);
        }

        #[test]
        fn unmatched_steps_are_skipped_when_scanning_is_restricted() {
            let keywords = vec!["pytest".to_string()];
            let tracker = TestOutcomeTracker::with_keywords(&keywords, false);
            let run = create_run(vec![
                create_step("build", "test codegen ... ok\n"),
                create_step("pytest", "tests/test_a.py::test_x PASSED\n"),
            ]);

            let outcomes = tracker.track(&run);

            assert_eq!(outcomes.len(), 1);
            assert_eq!(outcomes[0].step_name, "pytest");
        }

        #[test]
        fn track_run_keeps_runner_totals_per_step() {
            let run = create_run(vec![
                create_step("build", "Compiling cilog\n"),
                create_step("pytest", "tests/test_a.py ..F [100%]\n1 failed, 2 passed in 0.50s\n"),
            ]);

            let tracked = default_tracker().track_run(&run);

            assert!(tracked.outcomes.is_empty());
            assert_eq!(tracked.reported.len(), 1);
            assert_eq!(tracked.reported[0].step_name, "pytest");
            assert_eq!(tracked.reported[0].totals.counts.total, 3);
        }

        #[test]
        fn keyword_matcher_is_case_insensitive() {
            let matcher = KeywordStepMatcher::new(&["test".to_string()]);
            assert!(matcher.is_test_step(&create_step("Run Unit TESTS", "")));
            assert!(!matcher.is_test_step(&create_step("deploy", "")));
        }
    }
}
