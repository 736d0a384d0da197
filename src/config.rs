// src/config.rs
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{PARAMS_ENV_VAR, PARAM_SEPARATOR};

/// Parameters of one find-providers run
///
/// Resolution order (later wins): built-in defaults, YAML config file,
/// `TEST_INSTANCE_PARAMS` environment string, `--param key=value` flags.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RunParams {
    /// Overall run deadline in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Warm the routing table with a random walk before executing
    #[serde(default = "default_random_walk")]
    pub random_walk: bool,

    /// Number of bootstrap peers (<= 0 means every peer bootstraps every other)
    #[serde(default = "default_n_bootstrap")]
    pub n_bootstrap: i64,

    /// Extra peer lookups performed after bootstrapping
    #[serde(default = "default_n_find_peers")]
    pub n_find_peers: i64,

    /// Routing bucket size; caps the holders returned per lookup
    #[serde(default = "default_bucket_size")]
    pub bucket_size: usize,

    /// Backend refreshes its routing table by itself
    /// When false the scenario triggers an explicit refresh after bootstrapping
    #[serde(default = "default_auto_refresh")]
    pub auto_refresh: bool,

    /// Provider cohort size K: workers with seq <= K provide, the rest seek
    #[serde(default = "default_nodes_providing")]
    pub nodes_providing: i64,

    /// Number of content identifiers in the shared workload
    #[serde(default = "default_record_count")]
    pub record_count: usize,
}

fn default_timeout_secs() -> u64 {
    crate::constants::DEFAULT_TIMEOUT_SECS
}

fn default_random_walk() -> bool {
    crate::constants::DEFAULT_RANDOM_WALK
}

fn default_n_bootstrap() -> i64 {
    crate::constants::DEFAULT_N_BOOTSTRAP
}

fn default_n_find_peers() -> i64 {
    crate::constants::DEFAULT_N_FIND_PEERS
}

fn default_bucket_size() -> usize {
    crate::constants::DEFAULT_BUCKET_SIZE
}

fn default_auto_refresh() -> bool {
    crate::constants::DEFAULT_AUTO_REFRESH
}

fn default_nodes_providing() -> i64 {
    crate::constants::DEFAULT_NODES_PROVIDING
}

fn default_record_count() -> usize {
    crate::constants::DEFAULT_RECORD_COUNT
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            random_walk: default_random_walk(),
            n_bootstrap: default_n_bootstrap(),
            n_find_peers: default_n_find_peers(),
            bucket_size: default_bucket_size(),
            auto_refresh: default_auto_refresh(),
            nodes_providing: default_nodes_providing(),
            record_count: default_record_count(),
        }
    }
}

impl RunParams {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        // An empty document means "all defaults"
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).context("parse run parameters")
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let buf = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        Self::from_yaml_str(&buf).with_context(|| format!("parse {}", path.display()))
    }

    /// Apply a single `key` / `value` override
    pub fn apply_param(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key.trim() {
            "timeout_secs" => self.timeout_secs = parse_value(key, value)?,
            "random_walk" => self.random_walk = parse_bool(key, value)?,
            "n_bootstrap" => self.n_bootstrap = parse_value(key, value)?,
            "n_find_peers" => self.n_find_peers = parse_value(key, value)?,
            "bucket_size" => self.bucket_size = parse_value(key, value)?,
            "auto_refresh" => self.auto_refresh = parse_bool(key, value)?,
            "nodes_providing" => self.nodes_providing = parse_value(key, value)?,
            "record_count" => self.record_count = parse_value(key, value)?,
            other => bail!("unknown run parameter '{}'", other),
        }
        Ok(())
    }

    /// Apply one `key=value` pair
    pub fn apply_assignment(&mut self, assignment: &str) -> Result<()> {
        let (key, value) = assignment
            .split_once('=')
            .with_context(|| format!("run parameter '{}' is not key=value", assignment))?;
        self.apply_param(key, value)
    }

    /// Apply a `key=value|key=value` parameter string (empty segments are ignored)
    pub fn apply_param_string(&mut self, params: &str) -> Result<()> {
        for part in params.split(PARAM_SEPARATOR) {
            if part.trim().is_empty() {
                continue;
            }
            self.apply_assignment(part)?;
        }
        Ok(())
    }

    /// Apply overrides from `TEST_INSTANCE_PARAMS`, if set
    pub fn apply_env(&mut self) -> Result<()> {
        match std::env::var(PARAMS_ENV_VAR) {
            Ok(params) => {
                debug!("Applying {} overrides: {}", PARAMS_ENV_VAR, params);
                self.apply_param_string(&params)
                    .with_context(|| format!("invalid {}", PARAMS_ENV_VAR))
            }
            Err(_) => Ok(()),
        }
    }

    /// Reject parameter combinations no run can honour
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            bail!("timeout_secs must be greater than zero");
        }
        if self.bucket_size == 0 {
            bail!("bucket_size must be greater than zero");
        }
        if self.n_find_peers < 0 {
            bail!("n_find_peers must not be negative (got {})", self.n_find_peers);
        }
        Ok(())
    }
}

/// Resolve parameters from every source and validate them
pub fn resolve(config_path: Option<&Path>, overrides: &[String]) -> Result<RunParams> {
    let mut params = match config_path {
        Some(path) => RunParams::from_yaml_file(path)?,
        None => RunParams::default(),
    };
    params.apply_env()?;
    for assignment in overrides {
        params.apply_assignment(assignment)?;
    }
    params.validate()?;
    Ok(params)
}

fn parse_value<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse::<T>()
        .with_context(|| format!("invalid value '{}' for run parameter '{}'", value, key))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => bail!("invalid boolean '{}' for run parameter '{}'", value, key),
    }
}
