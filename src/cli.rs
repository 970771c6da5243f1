use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;

use cilog::artifacts::load_runs;
use cilog::config::{Config, OutputFormat};
use cilog::engine::Analyzer;
use cilog::output::{export_report, print_summary, PhaseProgress};
use cilog::report::AnalysisStatus;

#[derive(Parser)]
#[command(name = "cilog")]
#[command(author, version, about = "CI Log Analyzer", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[arg(short, long, global = true, default_value_t = false)]
    pretty: bool,

    /// Config file; defaults to cilog.{toml,json,yaml,yml} in the working directory
    #[arg(short, long, global = true, env = "CILOG_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze the run logs stored in a directory
    Analyze {
        dir: PathBuf,

        /// Run manifest; defaults to runs.{toml,json,yaml,yml} inside DIR
        #[arg(short, long)]
        manifest: Option<PathBuf>,

        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,

        /// Seconds to wait for log normalization before reporting partial results
        #[arg(short, long)]
        timeout: Option<u64>,

        #[command(flatten)]
        overrides: ThresholdOverrides,
    },
}

#[derive(Args, Default)]
struct ThresholdOverrides {
    #[arg(long)]
    min_history_samples: Option<usize>,

    #[arg(long)]
    slow_step_multiplier: Option<f64>,

    #[arg(long)]
    slow_step_floor: Option<f64>,

    #[arg(long)]
    flake_window: Option<usize>,

    #[arg(long)]
    flake_flip_threshold: Option<usize>,

    #[arg(long)]
    cluster_min_members: Option<usize>,

    #[arg(long)]
    slow_test_threshold: Option<f64>,

    #[arg(long)]
    max_parallel_runs: Option<usize>,
}

impl ThresholdOverrides {
    fn apply(&self, config: &mut Config) {
        let analysis = &mut config.analysis;
        if let Some(value) = self.min_history_samples {
            analysis.min_history_samples = value;
        }
        if let Some(value) = self.slow_step_multiplier {
            analysis.slow_step_multiplier = value;
        }
        if let Some(value) = self.slow_step_floor {
            analysis.slow_step_floor_seconds = value;
        }
        if let Some(value) = self.flake_window {
            analysis.flake_window = value;
        }
        if let Some(value) = self.flake_flip_threshold {
            analysis.flake_flip_threshold = value;
        }
        if let Some(value) = self.cluster_min_members {
            analysis.cluster_min_members = value;
        }
        if let Some(value) = self.max_parallel_runs {
            analysis.max_parallel_runs = Some(value);
        }
        if let Some(value) = self.slow_test_threshold {
            config.tests.slow_test_threshold_seconds = value;
        }
    }
}

impl Cli {
    async fn execute_analyze(
        &self,
        dir: &Path,
        manifest: Option<&Path>,
        format: Option<OutputFormat>,
        timeout: Option<u64>,
        overrides: &ThresholdOverrides,
    ) -> Result<()> {
        info!("Analyzing run logs in: {}", dir.display());

        let mut config = Config::load(self.config.as_deref())?;
        overrides.apply(&mut config);
        let format = format.unwrap_or(config.output.format);
        let pretty = self.pretty || config.output.pretty;

        let analyzer = Analyzer::new(config)?;

        let progress = PhaseProgress::start_loading();
        let runs = load_runs(dir, manifest)?;
        let progress = progress.finish_loading_start_analyzing(runs.len());

        let report = match analyzer
            .analyze_concurrent(runs, timeout.map(Duration::from_secs))
            .await
        {
            Ok(report) => report,
            Err(err) => {
                let Some(partial) = err.partial_report() else {
                    return Err(err.into());
                };
                warn!("{err}; the report is partial");
                partial.clone()
            }
        };
        let pending = match &report.status {
            AnalysisStatus::Incomplete { pending_runs } => pending_runs.len(),
            AnalysisStatus::Complete => 0,
        };
        progress.finish_analyzing(pending);

        match (&self.output, format) {
            (None, OutputFormat::Summary) => print_summary(&report),
            (None, format) => {
                let stdout = std::io::stdout();
                export_report(&report, format, pretty, &mut stdout.lock())?;
            }
            (Some(output_path), format) => {
                if format == OutputFormat::Summary {
                    console::set_colors_enabled(false);
                }
                let mut file = std::fs::File::create(output_path).with_context(|| {
                    format!("Failed to create output file: {}", output_path.display())
                })?;
                export_report(&report, format, pretty, &mut file)?;
                info!("Report written to: {}", output_path.display());
            }
        }

        Ok(())
    }

    pub async fn execute(&self) -> Result<()> {
        match &self.command {
            Commands::Analyze {
                dir,
                manifest,
                format,
                timeout,
                overrides,
            } => {
                self.execute_analyze(dir, manifest.as_deref(), *format, *timeout, overrides)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_analyze_with_overrides() {
        let cli = Cli::try_parse_from([
            "cilog",
            "analyze",
            "logs",
            "--format",
            "markdown",
            "--slow-step-multiplier",
            "2.0",
            "--flake-window",
            "5",
            "--timeout",
            "30",
        ])
        .unwrap();

        let Commands::Analyze {
            dir,
            format,
            timeout,
            overrides,
            ..
        } = &cli.command;
        assert_eq!(dir, &PathBuf::from("logs"));
        assert_eq!(*format, Some(OutputFormat::Markdown));
        assert_eq!(*timeout, Some(30));

        let mut config = Config::default();
        overrides.apply(&mut config);
        assert_eq!(config.analysis.slow_step_multiplier, 2.0);
        assert_eq!(config.analysis.flake_window, 5);
        assert_eq!(config.analysis.min_history_samples, 5);
    }

    #[test]
    fn test_overrides_leave_config_untouched_when_absent() {
        let mut config = Config::default();
        ThresholdOverrides::default().apply(&mut config);
        assert_eq!(config, Config::default());
    }
}
