use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::engine::NormalizationRule;
use crate::error::CilogError;

/// Configuration file structure for cilog.
///
/// Every threshold the analyzer uses lives here so it can be tuned per
/// repository. Configuration files are loaded from the current directory or
/// a specified path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Slow-step, flakiness and clustering thresholds
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Test step detection
    #[serde(default)]
    pub tests: TestsConfig,

    /// Failure signature normalization
    #[serde(default)]
    pub clustering: ClusteringConfig,

    /// Output format preferences
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AnalysisConfig {
    /// Historical samples a step needs before it is judged
    #[serde(default = "default_min_history_samples", alias = "min_history_samples")]
    pub min_history_samples: usize,

    /// A step is slow above this multiple of its p90
    #[serde(default = "default_slow_step_multiplier", alias = "slow_step_multiplier")]
    pub slow_step_multiplier: f64,

    /// Steps at or below this many seconds are never slow
    #[serde(default = "default_slow_step_floor_seconds", alias = "slow_step_floor_seconds")]
    pub slow_step_floor_seconds: f64,

    /// Recent observations considered for outcome flips
    #[serde(default = "default_flake_window", alias = "flake_window")]
    pub flake_window: usize,

    /// Flips within the window that mark a test flaky
    #[serde(default = "default_flake_flip_threshold", alias = "flake_flip_threshold")]
    pub flake_flip_threshold: usize,

    /// Smallest failure cluster that earns a recommendation
    #[serde(default = "default_cluster_min_members", alias = "cluster_min_members")]
    pub cluster_min_members: usize,

    /// Upper bound on runs normalized at once (unbounded when unset)
    #[serde(default, alias = "max_parallel_runs")]
    pub max_parallel_runs: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestsConfig {
    /// Step name fragments that mark a step as running tests
    #[serde(default = "default_step_keywords", alias = "step_keywords")]
    pub step_keywords: Vec<String>,

    /// Also read test results from steps whose name matches no keyword
    #[serde(default = "default_true", alias = "scan_all_steps")]
    pub scan_all_steps: bool,

    /// Tests slower than this are listed for the current run
    #[serde(
        default = "default_slow_test_threshold_seconds",
        alias = "slow_test_threshold_seconds"
    )]
    pub slow_test_threshold_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusteringConfig {
    /// Apply the built-in volatile token rules before any extra rules
    #[serde(default = "default_true", alias = "use_default_rules")]
    pub use_default_rules: bool,

    /// Additional rules, applied in order after the defaults
    #[serde(default, alias = "extra_rules")]
    pub extra_rules: Vec<NormalizationRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Default output format
    #[serde(default)]
    pub format: OutputFormat,

    /// Pretty-print JSON output
    #[serde(default)]
    pub pretty: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Summary,
    Json,
    Markdown,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_history_samples: default_min_history_samples(),
            slow_step_multiplier: default_slow_step_multiplier(),
            slow_step_floor_seconds: default_slow_step_floor_seconds(),
            flake_window: default_flake_window(),
            flake_flip_threshold: default_flake_flip_threshold(),
            cluster_min_members: default_cluster_min_members(),
            max_parallel_runs: None,
        }
    }
}

impl Default for TestsConfig {
    fn default() -> Self {
        Self {
            step_keywords: default_step_keywords(),
            scan_all_steps: true,
            slow_test_threshold_seconds: default_slow_test_threshold_seconds(),
        }
    }
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            use_default_rules: true,
            extra_rules: Vec::new(),
        }
    }
}

fn default_min_history_samples() -> usize {
    5
}

fn default_slow_step_multiplier() -> f64 {
    1.5
}

fn default_slow_step_floor_seconds() -> f64 {
    10.0
}

fn default_flake_window() -> usize {
    10
}

fn default_flake_flip_threshold() -> usize {
    2
}

fn default_cluster_min_members() -> usize {
    3
}

fn default_step_keywords() -> Vec<String> {
    ["test", "spec", "check", "pytest", "jest", "junit"]
        .iter()
        .map(ToString::to_string)
        .collect()
}

fn default_slow_test_threshold_seconds() -> f64 {
    0.5
}

fn default_true() -> bool {
    true
}

fn invalid(message: impl Into<String>) -> CilogError {
    CilogError::ConfigurationInvalid(message.into())
}

impl AnalysisConfig {
    /// Rejects thresholds that would make detection meaningless.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationInvalid` naming the first offending option.
    pub fn validate(&self) -> crate::error::Result<()> {
        if !self.slow_step_multiplier.is_finite() || self.slow_step_multiplier <= 0.0 {
            return Err(invalid(format!(
                "slow_step_multiplier must be a positive number, got {}",
                self.slow_step_multiplier
            )));
        }
        if !self.slow_step_floor_seconds.is_finite() || self.slow_step_floor_seconds < 0.0 {
            return Err(invalid(format!(
                "slow_step_floor_seconds must not be negative, got {}",
                self.slow_step_floor_seconds
            )));
        }
        if self.min_history_samples == 0 {
            return Err(invalid("min_history_samples must be at least 1"));
        }
        if self.flake_window < 2 {
            return Err(invalid(format!(
                "flake_window must be at least 2, got {}",
                self.flake_window
            )));
        }
        if self.flake_flip_threshold == 0 {
            return Err(invalid("flake_flip_threshold must be at least 1"));
        }
        if self.cluster_min_members == 0 {
            return Err(invalid("cluster_min_members must be at least 1"));
        }
        if self.max_parallel_runs == Some(0) {
            return Err(invalid("max_parallel_runs must be at least 1 when set"));
        }
        Ok(())
    }
}

impl TestsConfig {
    /// # Errors
    ///
    /// Returns `ConfigurationInvalid` for a negative or non-finite threshold
    /// or an empty keyword.
    pub fn validate(&self) -> crate::error::Result<()> {
        if !self.slow_test_threshold_seconds.is_finite() || self.slow_test_threshold_seconds < 0.0 {
            return Err(invalid(format!(
                "slow_test_threshold_seconds must not be negative, got {}",
                self.slow_test_threshold_seconds
            )));
        }
        if self.step_keywords.iter().any(|k| k.trim().is_empty()) {
            return Err(invalid("step_keywords must not contain empty entries"));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./cilog.toml
    /// 3. ./cilog.json
    /// 4. ./cilog.yaml
    /// 5. ./cilog.yml
    ///
    /// Returns default configuration if no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        let candidates = ["cilog.toml", "cilog.json", "cilog.yaml", "cilog.yml"];

        for candidate in &candidates {
            let path = Path::new(candidate);
            if path.exists() {
                return Self::load_from_path(path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file path.
    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => {
                // Try TOML first, then JSON, then YAML
                toml::from_str(&contents)
                    .or_else(|_| serde_json::from_str(&contents))
                    .or_else(|_| serde_yaml::from_str(&contents))
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))
            }
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)?,
            Some("yaml" | "yml") => serde_yaml::to_string(self)?,
            _ => toml::to_string_pretty(self)?,
        };

        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.analysis.min_history_samples, 5);
        assert_eq!(config.analysis.slow_step_multiplier, 1.5);
        assert_eq!(config.analysis.slow_step_floor_seconds, 10.0);
        assert_eq!(config.analysis.flake_window, 10);
        assert_eq!(config.analysis.flake_flip_threshold, 2);
        assert_eq!(config.analysis.cluster_min_members, 3);
        assert_eq!(config.tests.slow_test_threshold_seconds, 0.5);
        assert!(config.tests.step_keywords.contains(&"pytest".to_string()));
        assert!(config.clustering.use_default_rules);
        assert_eq!(config.output.format, OutputFormat::Summary);
    }

    #[test]
    fn test_load_toml_config() {
        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        let toml_content = r#"
[analysis]
min-history-samples = 8
slow-step-multiplier = 2.0

[tests]
step-keywords = ["verify"]

[[clustering.extra-rules]]
name = "pid"
pattern = "pid \\d+"
replacement = "pid <pid>"

[output]
format = "markdown"
"#;
        write!(temp_file, "{}", toml_content).unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.analysis.min_history_samples, 8);
        assert_eq!(config.analysis.slow_step_multiplier, 2.0);
        assert_eq!(config.analysis.flake_window, 10, "Unset keys keep defaults");
        assert_eq!(config.tests.step_keywords, vec!["verify".to_string()]);
        assert_eq!(config.clustering.extra_rules.len(), 1);
        assert_eq!(config.clustering.extra_rules[0].replacement, "pid <pid>");
        assert_eq!(config.output.format, OutputFormat::Markdown);
    }

    #[test]
    fn test_load_json_config_with_snake_case_keys() {
        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        let json_content = r#"{
  "analysis": {
    "flake_window": 20,
    "cluster_min_members": 4
  },
  "output": {
    "format": "json",
    "pretty": true
  }
}"#;
        write!(temp_file, "{}", json_content).unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.analysis.flake_window, 20);
        assert_eq!(config.analysis.cluster_min_members, 4);
        assert_eq!(config.output.format, OutputFormat::Json);
        assert!(config.output.pretty);
    }

    #[test]
    fn test_load_yaml_config() {
        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        let yaml_content = "analysis:\n  slow-step-floor-seconds: 30.0\ntests:\n  slow-test-threshold-seconds: 2.5\n";
        write!(temp_file, "{}", yaml_content).unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.analysis.slow_step_floor_seconds, 30.0);
        assert_eq!(config.tests.slow_test_threshold_seconds, 2.5);
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let result = Config::load(Some(Path::new("definitely-missing-cilog.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("cilog.yaml");

        let mut config = Config::default();
        config.analysis.flake_window = 15;
        config.clustering.extra_rules.push(NormalizationRule::new("job", r"job-\d+", "job-<n>"));
        config.save(&path).unwrap();

        let reloaded = Config::load(Some(path.as_path())).unwrap();
        assert_eq!(reloaded, config);
    }

    mod validate {
        use super::*;

        #[test]
        fn accepts_defaults() {
            assert!(AnalysisConfig::default().validate().is_ok());
            assert!(TestsConfig::default().validate().is_ok());
        }

        #[test]
        fn rejects_bad_multipliers() {
            for multiplier in [0.0, -1.0, f64::NAN, f64::INFINITY] {
                let config = AnalysisConfig {
                    slow_step_multiplier: multiplier,
                    ..AnalysisConfig::default()
                };
                assert!(
                    matches!(config.validate(), Err(CilogError::ConfigurationInvalid(_))),
                    "multiplier {multiplier} should be rejected"
                );
            }
        }

        #[test]
        fn rejects_degenerate_counts() {
            let cases = [
                AnalysisConfig {
                    min_history_samples: 0,
                    ..AnalysisConfig::default()
                },
                AnalysisConfig {
                    flake_window: 1,
                    ..AnalysisConfig::default()
                },
                AnalysisConfig {
                    flake_flip_threshold: 0,
                    ..AnalysisConfig::default()
                },
                AnalysisConfig {
                    cluster_min_members: 0,
                    ..AnalysisConfig::default()
                },
                AnalysisConfig {
                    slow_step_floor_seconds: -1.0,
                    ..AnalysisConfig::default()
                },
                AnalysisConfig {
                    max_parallel_runs: Some(0),
                    ..AnalysisConfig::default()
                },
            ];
            for config in cases {
                assert!(config.validate().is_err(), "{config:?} should be rejected");
            }
        }

        #[test]
        fn rejects_negative_slow_test_threshold() {
            let config = TestsConfig {
                slow_test_threshold_seconds: -0.1,
                ..TestsConfig::default()
            };
            assert!(config.validate().is_err());
        }
    }
}
