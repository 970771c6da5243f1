use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use super::timestamps::{parse_timestamp, split_leading_timestamp};
use super::types::StepOutcome;

static GITHUB_GROUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*##\[group\](.*)$").expect("github group regex is valid"));

static GITLAB_SECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"section_(start|end):([0-9.]+):([A-Za-z0-9_.\-]+)")
        .expect("gitlab section regex is valid")
});

static BRACKET_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*\[([^\]]*)\]\s*(==>|<==)\s*(.*?)\s*(?:\(((?i:success|succeeded|passed|failure|failed|skipped))\))?\s*$",
    )
    .expect("bracket marker regex is valid")
});

/// A timestamp as it appeared on a boundary line.
#[derive(Debug, Clone, PartialEq)]
pub enum Stamp {
    Missing,
    Unparsable(String),
    At(DateTime<Utc>),
}

impl Stamp {
    pub fn from_raw(raw: &str) -> Self {
        match parse_timestamp(raw) {
            Some(at) => Self::At(at),
            None => Self::Unparsable(raw.trim().to_string()),
        }
    }

    pub fn at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::At(at) => Some(*at),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Boundary {
    Start {
        name: String,
        stamp: Stamp,
    },
    /// `name` is `None` when the marker closes whatever step is open.
    End {
        name: Option<String>,
        stamp: Stamp,
        outcome: Option<StepOutcome>,
    },
}

/// One provider's way of marking step boundaries in a log.
///
/// Dialects are tried in order against a whole log; the first one that finds
/// a step start is used for every line of that log.
pub trait LogDialect: Send + Sync {
    fn name(&self) -> &'static str;

    /// Recognizes a step boundary on a single line (terminator stripped).
    fn boundary(&self, line: &str) -> Option<Boundary>;

    /// Timestamp carried by an ordinary output line, if the dialect prefixes them.
    fn line_timestamp(&self, _line: &str) -> Option<DateTime<Utc>> {
        None
    }

    /// Whether a step ends only where the next one starts (no end markers).
    fn closes_implicitly(&self) -> bool {
        false
    }
}

/// GitHub Actions logs: every line starts with a timestamp and each step
/// opens with a `##[group]` line.
pub struct GitHubActions;

impl LogDialect for GitHubActions {
    fn name(&self) -> &'static str {
        "github-actions"
    }

    fn boundary(&self, line: &str) -> Option<Boundary> {
        let (stamp, rest) = match split_leading_timestamp(line) {
            Some((raw, rest)) => (Stamp::from_raw(raw), rest),
            None => (Stamp::Missing, line),
        };
        let captures = GITHUB_GROUP.captures(rest)?;
        Some(Boundary::Start {
            name: captures[1].trim().to_string(),
            stamp,
        })
    }

    fn line_timestamp(&self, line: &str) -> Option<DateTime<Utc>> {
        split_leading_timestamp(line).and_then(|(raw, _)| parse_timestamp(raw))
    }

    fn closes_implicitly(&self) -> bool {
        true
    }
}

/// GitLab job traces: `section_start:<unix>:<name>` / `section_end:<unix>:<name>`,
/// usually wrapped in ANSI escapes.
pub struct GitLabSections;

impl LogDialect for GitLabSections {
    fn name(&self) -> &'static str {
        "gitlab"
    }

    fn boundary(&self, line: &str) -> Option<Boundary> {
        let captures = GITLAB_SECTION.captures(line)?;
        let stamp = Stamp::from_raw(&captures[2]);
        let name = captures[3].to_string();
        match &captures[1] {
            "start" => Some(Boundary::Start { name, stamp }),
            _ => Some(Boundary::End {
                name: Some(name),
                stamp,
                outcome: None,
            }),
        }
    }
}

/// Plain logs with explicit markers:
/// `[<ts>] ==> build` opens a step, `[<ts>] <== build (success)` closes it.
pub struct BracketMarkers;

impl LogDialect for BracketMarkers {
    fn name(&self) -> &'static str {
        "bracket-markers"
    }

    fn boundary(&self, line: &str) -> Option<Boundary> {
        let captures = BRACKET_MARKER.captures(line)?;
        let stamp = Stamp::from_raw(&captures[1]);
        let name = captures[3].trim().to_string();

        if &captures[2] == "==>" {
            if name.is_empty() {
                return None;
            }
            return Some(Boundary::Start { name, stamp });
        }

        let outcome = captures
            .get(4)
            .map(|m| parse_outcome(m.as_str()));
        Some(Boundary::End {
            name: (!name.is_empty()).then_some(name),
            stamp,
            outcome,
        })
    }

    fn line_timestamp(&self, line: &str) -> Option<DateTime<Utc>> {
        split_leading_timestamp(line).and_then(|(raw, _)| parse_timestamp(raw))
    }
}

fn parse_outcome(raw: &str) -> StepOutcome {
    match raw.to_ascii_lowercase().as_str() {
        "failure" | "failed" => StepOutcome::Failure,
        "skipped" => StepOutcome::Skipped,
        _ => StepOutcome::Success,
    }
}

/// The dialects tried by default, in priority order.
pub fn default_dialects() -> Vec<Box<dyn LogDialect>> {
    vec![
        Box::new(GitHubActions),
        Box::new(GitLabSections),
        Box::new(BracketMarkers),
    ]
}
