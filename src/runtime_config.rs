// =============================================================================
// Runtime Configuration — model, warehouse and job settings with atomic save
// =============================================================================
//
// Every tunable of the nightly posterior job lives here. The model section is
// handed to the aggregator as an immutable value so the core stays a pure
// function of its inputs.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
//
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bayes::posterior::Prior;
use crate::bayes::sampler::DEFAULT_SAMPLE_COUNT;
use crate::errors::PosteriorError;
use crate::types::RolePolicy;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_prior_shape() -> f64 {
    2.0
}

fn default_prior_rate() -> f64 {
    0.25
}

fn default_champion_threshold() -> f64 {
    8.0
}

fn default_backup_threshold() -> f64 {
    6.0
}

fn default_sample_count() -> usize {
    DEFAULT_SAMPLE_COUNT
}

fn default_dataset() -> String {
    "puttout_analytics".to_string()
}

fn default_source_table() -> String {
    "abo_portfolio_performance".to_string()
}

fn default_dest_table() -> String {
    "abo_bayesian_posteriors".to_string()
}

fn default_retention_days() -> u32 {
    90
}

fn default_request_timeout_secs() -> u64 {
    30
}

// =============================================================================
// ModelConfig
// =============================================================================

/// Parameters of the Bayesian model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Gamma prior shape.
    #[serde(default = "default_prior_shape")]
    pub prior_shape: f64,

    /// Gamma prior rate. shape/rate is the prior ROAS expectation.
    #[serde(default = "default_prior_rate")]
    pub prior_rate: f64,

    /// ROAS bar for the champion ad set.
    #[serde(default = "default_champion_threshold")]
    pub champion_threshold: f64,

    /// ROAS bar for every other ad set.
    #[serde(default = "default_backup_threshold")]
    pub backup_threshold: f64,

    /// Monte Carlo trials per ad set.
    #[serde(default = "default_sample_count")]
    pub sample_count: usize,

    /// Seed for the Monte Carlo RNG. `None` draws from OS entropy.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Handling of role tags other than champion/backup.
    #[serde(default)]
    pub role_policy: RolePolicy,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            prior_shape: default_prior_shape(),
            prior_rate: default_prior_rate(),
            champion_threshold: default_champion_threshold(),
            backup_threshold: default_backup_threshold(),
            sample_count: default_sample_count(),
            seed: None,
            role_policy: RolePolicy::default(),
        }
    }
}

impl ModelConfig {
    pub fn prior(&self) -> Result<Prior, PosteriorError> {
        Prior::new(self.prior_shape, self.prior_rate)
    }

    /// Reject configurations the model cannot run with.
    pub fn validate(&self) -> Result<(), PosteriorError> {
        self.prior()?;
        for (name, value) in [
            ("champion_threshold", self.champion_threshold),
            ("backup_threshold", self.backup_threshold),
        ] {
            if !value.is_finite() {
                return Err(PosteriorError::InvalidConfig(format!(
                    "{name} must be finite, got {value}"
                )));
            }
        }
        if self.sample_count == 0 {
            return Err(PosteriorError::InvalidConfig(
                "sample_count must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// WarehouseConfig
// =============================================================================

/// BigQuery location of the input view and the result table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// GCP project. Overridden by `GOOGLE_CLOUD_PROJECT_ID`; falls back to the
    /// service-account file's `project_id`.
    #[serde(default)]
    pub project_id: Option<String>,

    #[serde(default = "default_dataset")]
    pub dataset: String,

    /// View holding per-ad-set revenue/spend per evaluation window.
    #[serde(default = "default_source_table")]
    pub source_table: String,

    /// Append-only table receiving one row per ad set per run.
    #[serde(default = "default_dest_table")]
    pub dest_table: String,

    /// Rows older than this are deleted after each successful write.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            dataset: default_dataset(),
            source_table: default_source_table(),
            dest_table: default_dest_table(),
            retention_days: default_retention_days(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

// =============================================================================
// JobConfig
// =============================================================================

/// How the binary drives the job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Seconds between runs. 0 runs once and exits.
    #[serde(default)]
    pub run_interval_secs: u64,

    /// Local JSON array of observations. Together with `output_path` this
    /// replaces the warehouse with files.
    #[serde(default)]
    pub input_path: Option<PathBuf>,

    /// Local JSON-lines file that receives result rows.
    #[serde(default)]
    pub output_path: Option<PathBuf>,
}

impl JobConfig {
    /// Both local paths, when the job should bypass the warehouse.
    pub fn local_paths(&self) -> Option<(&Path, &Path)> {
        match (&self.input_path, &self.output_path) {
            (Some(i), Some(o)) => Some((i.as_path(), o.as_path())),
            _ => None,
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level configuration for the posterior job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub warehouse: WarehouseConfig,

    #[serde(default)]
    pub job: JobConfig,
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            prior_shape = config.model.prior_shape,
            prior_rate = config.model.prior_rate,
            sample_count = config.model.sample_count,
            role_policy = %config.model.role_policy,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Apply environment overrides on top of the file values.
    pub fn apply_env(&mut self) {
        if let Ok(project) = std::env::var("GOOGLE_CLOUD_PROJECT_ID") {
            let project = project.trim();
            if !project.is_empty() {
                self.warehouse.project_id = Some(project.to_string());
            }
        }
        if let Some(secs) = std::env::var("ABO_RUN_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.trim().parse().ok())
        {
            self.job.run_interval_secs = secs;
        }
        if let Some(seed) = std::env::var("ABO_SEED")
            .ok()
            .and_then(|s| s.trim().parse().ok())
        {
            self.model.seed = Some(seed);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert!((cfg.model.prior_shape - 2.0).abs() < f64::EPSILON);
        assert!((cfg.model.prior_rate - 0.25).abs() < f64::EPSILON);
        assert!((cfg.model.champion_threshold - 8.0).abs() < f64::EPSILON);
        assert!((cfg.model.backup_threshold - 6.0).abs() < f64::EPSILON);
        assert_eq!(cfg.model.sample_count, 10_000);
        assert_eq!(cfg.model.seed, None);
        assert_eq!(cfg.model.role_policy, RolePolicy::DefaultToBackup);
        assert_eq!(cfg.warehouse.dataset, "puttout_analytics");
        assert_eq!(cfg.warehouse.source_table, "abo_portfolio_performance");
        assert_eq!(cfg.warehouse.dest_table, "abo_bayesian_posteriors");
        assert_eq!(cfg.warehouse.retention_days, 90);
        assert_eq!(cfg.job.run_interval_secs, 0);
        assert!(cfg.job.local_paths().is_none());
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, RuntimeConfig::default());
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{
            "model": { "sample_count": 500, "role_policy": "reject", "seed": 9 },
            "warehouse": { "project_id": "my-proj" }
        }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.model.sample_count, 500);
        assert_eq!(cfg.model.seed, Some(9));
        assert_eq!(cfg.model.role_policy, RolePolicy::Reject);
        assert!((cfg.model.prior_shape - 2.0).abs() < f64::EPSILON);
        assert_eq!(cfg.warehouse.project_id.as_deref(), Some("my-proj"));
        assert_eq!(cfg.warehouse.retention_days, 90);
    }

    #[test]
    fn validate_rejects_bad_model() {
        let mut m = ModelConfig::default();
        assert!(m.validate().is_ok());

        m.prior_rate = 0.0;
        assert!(matches!(m.validate(), Err(PosteriorError::InvalidPrior { .. })));

        let mut m = ModelConfig::default();
        m.sample_count = 0;
        assert!(matches!(m.validate(), Err(PosteriorError::InvalidConfig(_))));

        let mut m = ModelConfig::default();
        m.champion_threshold = f64::NAN;
        assert!(m.validate().is_err());
    }

    #[test]
    fn save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("posterior_config.json");
        let mut cfg = RuntimeConfig::default();
        cfg.model.seed = Some(1234);
        cfg.job.run_interval_secs = 86_400;
        cfg.save(&path).unwrap();
        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn load_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RuntimeConfig::load(dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn local_paths_require_both() {
        let mut job = JobConfig::default();
        job.input_path = Some(PathBuf::from("in.json"));
        assert!(job.local_paths().is_none());
        job.output_path = Some(PathBuf::from("out.jsonl"));
        let (i, o) = job.local_paths().unwrap();
        assert_eq!(i, Path::new("in.json"));
        assert_eq!(o, Path::new("out.jsonl"));
    }
}
