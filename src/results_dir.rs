//! Results directory management for routing-bench
//!
//! Each local run gets its own directory containing:
//! - `results.jsonl`: every metric and message as it was recorded
//! - `metrics.tsv` / `summary.tsv`: tabular exports
//! - `config.yaml`: copy of the config file, when one was given
//! - `metadata.json`: run parameters, host and timing
//!
//! Directory format: routing-bench-{YYYYMMDD}-{HHMM}-{test_name}/

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::RunParams;
use crate::constants::{RESULTS_DIR_PREFIX, RESULTS_JSONL_FILE};

/// Metadata about a run
#[derive(Debug, Serialize, Deserialize)]
pub struct RunMetadata {
    pub version: String,
    pub test_name: String,
    pub run_id: String,
    pub config_path: Option<String>,
    pub params: RunParams,
    pub instances: usize,
    pub start_time: String,
    pub end_time: Option<String>,
    pub duration_secs: Option<f64>,
    pub failed_instances: Option<usize>,
    pub command_line: Vec<String>,
    pub hostname: String,
}

impl RunMetadata {
    pub fn new(test_name: String, run_id: String, params: RunParams, instances: usize) -> Self {
        let hostname = hostname::get()
            .unwrap_or_else(|_| "unknown".into())
            .to_string_lossy()
            .to_string();

        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            test_name,
            run_id,
            config_path: None,
            params,
            instances,
            start_time: Local::now().to_rfc3339(),
            end_time: None,
            duration_secs: None,
            failed_instances: None,
            command_line: std::env::args().collect(),
            hostname,
        }
    }

    pub fn finalize(&mut self, duration_secs: f64, failed_instances: usize) {
        self.end_time = Some(Local::now().to_rfc3339());
        self.duration_secs = Some(duration_secs);
        self.failed_instances = Some(failed_instances);
    }
}

/// Results directory manager
pub struct ResultsDir {
    path: PathBuf,
    metadata: RunMetadata,
}

impl ResultsDir {
    /// Create a new results directory
    ///
    /// The test name defaults to the config file stem, or `local` without a config.
    pub fn create(
        config_path: Option<&Path>,
        custom_name: Option<&str>,
        base_dir: Option<&Path>,
        metadata: RunMetadata,
    ) -> Result<Self> {
        let test_name = match (custom_name, config_path) {
            (Some(name), _) => name.to_string(),
            (None, Some(path)) => path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("local")
                .to_string(),
            (None, None) => "local".to_string(),
        };

        let dir_name = format!(
            "{}-{}-{}",
            RESULTS_DIR_PREFIX,
            Local::now().format("%Y%m%d-%H%M"),
            test_name
        );
        let base = base_dir.unwrap_or_else(|| Path::new("."));
        let dir_path = base.join(&dir_name);

        fs::create_dir_all(&dir_path)
            .with_context(|| format!("Failed to create results directory: {}", dir_path.display()))?;

        let mut metadata = RunMetadata { test_name, ..metadata };
        if let Some(config_path) = config_path {
            fs::copy(config_path, dir_path.join("config.yaml"))
                .with_context(|| format!("Failed to copy {} to results directory", config_path.display()))?;
            metadata.config_path = Some(config_path.to_string_lossy().to_string());
        }

        tracing::info!("Created results directory: {}", dir_path.display());
        Ok(Self {
            path: dir_path,
            metadata,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &RunMetadata {
        &self.metadata
    }

    pub fn jsonl_path(&self) -> PathBuf {
        self.path.join(RESULTS_JSONL_FILE)
    }

    /// Write metadata to metadata.json
    pub fn write_metadata(&self) -> Result<()> {
        let metadata_path = self.path.join("metadata.json");
        let json = serde_json::to_string_pretty(&self.metadata)
            .context("Failed to serialize metadata")?;
        fs::write(&metadata_path, json).context("Failed to write metadata.json")?;
        Ok(())
    }

    /// Record timing and failures, then rewrite metadata.json
    pub fn finalize(&mut self, duration_secs: f64, failed_instances: usize) -> Result<()> {
        self.metadata.finalize(duration_secs, failed_instances);
        self.write_metadata()?;
        tracing::info!("Results saved to: {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn metadata() -> RunMetadata {
        RunMetadata::new("ignored".to_string(), "run-1".to_string(), RunParams::default(), 4)
    }

    #[test]
    fn test_results_dir_with_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("three_providers.yaml");
        fs::write(&config_path, "nodes_providing: 3\n").unwrap();

        let results_dir = ResultsDir::create(Some(&config_path), None, Some(temp_dir.path()), metadata()).unwrap();

        assert!(results_dir.path().exists());
        assert!(results_dir.path().join("config.yaml").exists());
        assert_eq!(results_dir.metadata().test_name, "three_providers");
        let dir_name = results_dir.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(dir_name.starts_with("routing-bench-"));
        assert!(dir_name.ends_with("-three_providers"));
    }

    #[test]
    fn test_results_dir_without_config() {
        let temp_dir = TempDir::new().unwrap();
        let mut results_dir = ResultsDir::create(None, Some("smoke"), Some(temp_dir.path()), metadata()).unwrap();
        assert!(!results_dir.path().join("config.yaml").exists());

        results_dir.finalize(1.5, 1).unwrap();
        let json = fs::read_to_string(results_dir.path().join("metadata.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["test_name"], "smoke");
        assert_eq!(parsed["run_id"], "run-1");
        assert_eq!(parsed["instances"], 4);
        assert_eq!(parsed["failed_instances"], 1);
        assert_eq!(parsed["params"]["record_count"], 5);
    }
}
