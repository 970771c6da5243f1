use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::test_outcomes::clean_lines;
use crate::config::ClusteringConfig;
use crate::error::{CilogError, Result};
use crate::report::{ClusterMember, FailureCluster, FailureSource};

static ERROR_LIKE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(##\[error\]|\berror\b|\bfailed\b|\bfailure\b|\bfatal\b|\bexception\b|\bpanic(?:ked)?\b|\btraceback\b|\brefused\b|\bdenied\b|\btimed out\b|exit code [1-9])",
    )
    .expect("error line regex is valid")
});

const EXCERPT_ERROR_LINES: usize = 5;
const EXCERPT_TAIL_LINES: usize = 3;

/// A regex rewrite applied to failure text before grouping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationRule {
    pub name: String,
    pub pattern: String,
    pub replacement: String,
}

impl NormalizationRule {
    pub fn new(name: &str, pattern: &str, replacement: &str) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.to_string(),
            replacement: replacement.to_string(),
        }
    }
}

/// Rules that strip volatile tokens, applied in this order.
pub fn default_rules() -> Vec<NormalizationRule> {
    vec![
        NormalizationRule::new("ansi", r"\x1b\[[0-9;?]*[A-Za-z]", ""),
        NormalizationRule::new(
            "iso-timestamp",
            r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:[.,]\d+)?(?:Z|[+-]\d{2}:?\d{2})?",
            "<ts>",
        ),
        NormalizationRule::new("unix-timestamp", r"\b1\d{9}(?:\.\d+)?\b", "<ts>"),
        NormalizationRule::new(
            "uuid",
            r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b",
            "<uuid>",
        ),
        NormalizationRule::new("address", r"\b0x[0-9a-fA-F]+\b", "<addr>"),
        NormalizationRule::new("ipv4", r"\b\d{1,3}(?:\.\d{1,3}){3}(?::\d{1,5})?\b", "<ip>"),
        NormalizationRule::new("integer", r"\b\d+(?:\.\d+)?\b", "<n>"),
        NormalizationRule::new("hash", r"(?i)\b[0-9a-f]{8,}\b", "<hash>"),
        NormalizationRule::new("temp-dir", r"(?:/private)?(?:/tmp|/var/folders)/[^\s'\x22:]*", "<tmp>"),
        NormalizationRule::new("number", r"\d+(?:\.\d+)?", "<n>"),
        NormalizationRule::new("whitespace", r"\s+", " "),
    ]
}

/// Compiled normalization rules.
pub struct SignatureNormalizer {
    rules: Vec<(Regex, String)>,
}

impl SignatureNormalizer {
    /// Compiles `rules` in order.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationInvalid` if a pattern is empty or not a valid regex.
    pub fn new(rules: &[NormalizationRule]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                if rule.pattern.is_empty() {
                    return Err(CilogError::ConfigurationInvalid(format!(
                        "normalization rule '{}' has an empty pattern",
                        rule.name
                    )));
                }
                let regex = Regex::new(&rule.pattern).map_err(|e| {
                    CilogError::ConfigurationInvalid(format!(
                        "normalization rule '{}' is not a valid regex: {e}",
                        rule.name
                    ))
                })?;
                Ok((regex, rule.replacement.clone()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Default rules (unless disabled) followed by the configured extras.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationInvalid` if any rule fails to compile.
    pub fn from_config(config: &ClusteringConfig) -> Result<Self> {
        let mut rules = if config.use_default_rules {
            default_rules()
        } else {
            Vec::new()
        };
        rules.extend(config.extra_rules.iter().cloned());
        Self::new(&rules)
    }

    pub fn signature(&self, message: &str) -> String {
        let mut text = message.to_string();
        for (regex, replacement) in &self.rules {
            text = regex.replace_all(&text, replacement.as_str()).into_owned();
        }
        text.trim().to_string()
    }
}

/// A failure to be clustered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureInput {
    pub run_id: String,
    pub source: FailureSource,
    pub occurred_at: DateTime<Utc>,
    pub message: String,
}

/// Groups failures whose normalized text is identical.
pub struct FailureClusterer {
    normalizer: SignatureNormalizer,
}

impl FailureClusterer {
    pub fn new(normalizer: SignatureNormalizer) -> Self {
        Self { normalizer }
    }

    /// Partitions `failures` by signature. Blank messages are dropped; every
    /// other failure lands in exactly one cluster.
    ///
    /// Clusters are ordered by size descending, then first occurrence, then
    /// signature. Members are chronological.
    pub fn cluster(&self, mut failures: Vec<FailureInput>) -> Vec<FailureCluster> {
        failures.retain(|f| !f.message.trim().is_empty());
        failures.sort_by(|a, b| {
            a.occurred_at
                .cmp(&b.occurred_at)
                .then_with(|| a.run_id.cmp(&b.run_id))
                .then_with(|| a.source.subject().cmp(b.source.subject()))
        });

        let mut groups: IndexMap<String, Vec<ClusterMember>> = IndexMap::new();
        for failure in failures {
            let mut signature = self.normalizer.signature(&failure.message);
            if signature.is_empty() {
                signature = failure.message.trim().to_string();
            }
            groups.entry(signature).or_default().push(ClusterMember {
                run_id: failure.run_id,
                source: failure.source,
                occurred_at: failure.occurred_at,
                message: failure.message,
            });
        }

        let mut clusters: Vec<FailureCluster> = groups
            .into_iter()
            .filter_map(|(signature, members)| {
                let first_seen = members.first()?.occurred_at;
                let representative = members
                    .iter()
                    .min_by_key(|m| m.message.chars().count())?
                    .message
                    .clone();
                Some(FailureCluster {
                    signature,
                    representative,
                    first_seen,
                    members,
                })
            })
            .collect();

        clusters.sort_by(|a, b| {
            b.member_count()
                .cmp(&a.member_count())
                .then_with(|| a.first_seen.cmp(&b.first_seen))
                .then_with(|| a.signature.cmp(&b.signature))
        });
        clusters
    }
}

/// The part of a failed step's output worth clustering: up to five lines
/// that look like errors, otherwise the last three non-blank lines.
pub fn step_failure_excerpt(output: &str) -> String {
    let lines: Vec<String> = clean_lines(output)
        .into_iter()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect();

    let error_lines: Vec<&str> = lines
        .iter()
        .filter(|line| ERROR_LIKE.is_match(line))
        .take(EXCERPT_ERROR_LINES)
        .map(String::as_str)
        .collect();
    if !error_lines.is_empty() {
        return error_lines.join("\n");
    }

    let tail = lines.len().saturating_sub(EXCERPT_TAIL_LINES);
    lines[tail..].join("\n")
}
