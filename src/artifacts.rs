use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::engine::{parse_timestamp, RawRun, RunMetadata, RunOutcome};

const MANIFEST_CANDIDATES: [&str; 4] = ["runs.toml", "runs.json", "runs.yaml", "runs.yml"];

/// Describes the runs stored in an artifact directory.
///
/// ```toml
/// [[runs]]
/// id = "run-1"
/// revision = "abc123"
/// started_at = "2024-01-01T12:00:00Z"
/// outcome = "success"
/// log = "logs/run-1.log"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunManifest {
    #[serde(default)]
    pub runs: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: String,
    pub revision: String,
    /// Any timestamp form the log normalizer understands
    pub started_at: String,
    #[serde(default = "default_outcome")]
    pub outcome: RunOutcome,
    /// Log path, relative to the manifest's directory
    pub log: PathBuf,
}

fn default_outcome() -> RunOutcome {
    RunOutcome::Success
}

impl RunManifest {
    fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read run manifest: {}", path.display()))?;

        match path.extension().and_then(|ext| ext.to_str()).unwrap_or("") {
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON manifest: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML manifest: {}", path.display())),
            _ => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML manifest: {}", path.display())),
        }
    }
}

/// Loads every run described by `manifest`, or by the first `runs.*`
/// manifest found in `dir`.
///
/// Without a manifest each `*.log` file in `dir` is one run: the file stem is
/// both its id and its revision, and its modification time is its start.
///
/// # Errors
///
/// Returns an error if the directory, the manifest or a referenced log cannot
/// be read, if a manifest timestamp is unparseable, or if run ids repeat.
pub fn load_runs(dir: &Path, manifest: Option<&Path>) -> Result<Vec<RawRun>> {
    let manifest = manifest.map(Path::to_path_buf).or_else(|| {
        MANIFEST_CANDIDATES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.exists())
    });

    let runs = match manifest {
        Some(path) => load_from_manifest(&path)?,
        None => load_log_files(dir)?,
    };

    let mut seen = std::collections::HashSet::new();
    for run in &runs {
        if !seen.insert(run.metadata.run_id.as_str()) {
            bail!("Run id '{}' appears more than once", run.metadata.run_id);
        }
    }

    info!("Loaded {} run log(s) from {}", runs.len(), dir.display());
    Ok(runs)
}

fn load_from_manifest(path: &Path) -> Result<Vec<RawRun>> {
    debug!("Reading run manifest {}", path.display());
    let manifest = RunManifest::load(path)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));

    manifest
        .runs
        .into_iter()
        .map(|entry| {
            let started_at = parse_timestamp(&entry.started_at).with_context(|| {
                format!(
                    "Run '{}' has an unrecognized start time: {}",
                    entry.id, entry.started_at
                )
            })?;
            let log_path = base.join(&entry.log);
            let log = std::fs::read(&log_path)
                .with_context(|| format!("Failed to read log: {}", log_path.display()))?;

            Ok(RawRun::new(
                RunMetadata {
                    run_id: entry.id,
                    revision: entry.revision,
                    started_at,
                    outcome: entry.outcome,
                },
                log,
            ))
        })
        .collect()
}

fn load_log_files(dir: &Path) -> Result<Vec<RawRun>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "log"))
        .collect();
    paths.sort();

    paths
        .into_iter()
        .map(|path| {
            let id = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .with_context(|| format!("Log file name is not valid UTF-8: {}", path.display()))?
                .to_string();
            let modified = std::fs::metadata(&path)
                .and_then(|meta| meta.modified())
                .with_context(|| format!("Failed to read modification time: {}", path.display()))?;
            let log = std::fs::read(&path)
                .with_context(|| format!("Failed to read log: {}", path.display()))?;

            Ok(RawRun::new(
                RunMetadata {
                    revision: id.clone(),
                    run_id: id,
                    started_at: DateTime::<Utc>::from(modified),
                    outcome: RunOutcome::Success,
                },
                log,
            ))
        })
        .collect()
}
