// =============================================================================
// Local File Adapters — JSON input, JSON-lines output
// =============================================================================
//
// Input is a JSON array of observations using the warehouse column names.
// Output appends one JSON object per line; retention rewrites the file via
// tmp + rename so a crash mid-cleanup never truncates history.
// =============================================================================

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::{ObservationSource, ResultSink};
use crate::types::{Observation, ResultRecord};

/// Reads observations from a JSON array file.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ObservationSource for JsonFileSource {
    async fn fetch_observations(&self) -> Result<Vec<Observation>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read observations from {}", self.path.display()))?;
        let observations: Vec<Observation> = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse observations from {}", self.path.display()))?;
        info!(path = %self.path.display(), ad_sets = observations.len(), "observations loaded");
        Ok(observations)
    }
}

/// Appends result records to a JSON-lines file.
#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    path: PathBuf,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read every stored record back.
    pub async fn read_all(&self) -> Result<Vec<ResultRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read {}", self.path.display()))
            }
        };
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .enumerate()
            .map(|(i, line)| {
                serde_json::from_str(line).with_context(|| {
                    format!("{}: malformed record on line {}", self.path.display(), i + 1)
                })
            })
            .collect()
    }
}

impl ResultSink for JsonLinesSink {
    async fn ensure_ready(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        Ok(())
    }

    async fn write_results(&self, records: &[ResultRecord]) -> Result<usize> {
        let mut buf = String::new();
        for record in records {
            buf.push_str(&serde_json::to_string(record).context("failed to serialise record")?);
            buf.push('\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        file.write_all(buf.as_bytes())
            .await
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        file.flush().await?;

        info!(path = %self.path.display(), rows = records.len(), "results appended");
        Ok(records.len())
    }

    async fn cleanup(&self, retention_days: u32) -> Result<()> {
        let cutoff = Utc::now() - Duration::days(i64::from(retention_days));
        let records = self.read_all().await?;
        let before = records.len();
        let kept: Vec<&ResultRecord> = records
            .iter()
            .filter(|r| r.calculated_at >= cutoff)
            .collect();

        if kept.len() == before {
            debug!(rows = before, "nothing to clean up");
            return Ok(());
        }

        let mut buf = String::new();
        for record in &kept {
            buf.push_str(&serde_json::to_string(record)?);
            buf.push('\n');
        }

        let tmp_path = self.path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp_path, buf)
            .await
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .with_context(|| format!("failed to rename {}", tmp_path.display()))?;

        info!(removed = before - kept.len(), kept = kept.len(), "old results cleaned up");
        Ok(())
    }
}
