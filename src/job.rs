// =============================================================================
// Nightly Posterior Job — fetch, compute, persist, clean up
// =============================================================================
//
// One run reads the latest observation window, recomputes every posterior
// from scratch and appends the results. Nothing carries over between runs.
// Any failure aborts the run before anything is written; the sink never
// receives a partial result set.
// =============================================================================

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::bayes::process_all_campaigns;
use crate::runtime_config::RuntimeConfig;
use crate::warehouse::{ObservationSource, ResultSink};

// ---------------------------------------------------------------------------
// Result type
// ---------------------------------------------------------------------------

/// Summary of a single job run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub run_id: String,
    /// Distinct campaigns evaluated.
    pub campaigns: usize,
    /// Observations received from the source.
    pub ad_sets: usize,
    pub rows_written: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Public entry point
// ---------------------------------------------------------------------------

/// Run one job cycle.
///
/// 1. Fetch observations from `source`.
/// 2. Compute posteriors for every campaign.
/// 3. Ensure the sink exists, append the results, apply retention.
pub async fn run_once<S, K>(source: &S, sink: &K, config: &RuntimeConfig) -> Result<JobSummary>
where
    S: ObservationSource,
    K: ResultSink,
{
    let run_id = Uuid::new_v4().to_string();
    let span = info_span!("posterior_job", run_id = %run_id);
    run_inner(run_id, source, sink, config).instrument(span).await
}

async fn run_inner<S, K>(
    run_id: String,
    source: &S,
    sink: &K,
    config: &RuntimeConfig,
) -> Result<JobSummary>
where
    S: ObservationSource,
    K: ResultSink,
{
    let started_at = Utc::now();
    info!(started_at = %started_at, "posterior job started");

    config.model.validate().context("invalid model configuration")?;

    // -----------------------------------------------------------------
    // 1. Fetch
    // -----------------------------------------------------------------
    let observations = source
        .fetch_observations()
        .await
        .context("failed to fetch observations")?;

    let mut summary = JobSummary {
        run_id,
        campaigns: 0,
        ad_sets: observations.len(),
        rows_written: 0,
        started_at,
        finished_at: started_at,
    };

    if observations.is_empty() {
        warn!("no observations found; exiting without calculations");
        summary.finished_at = Utc::now();
        return Ok(summary);
    }

    // -----------------------------------------------------------------
    // 2. Compute
    // -----------------------------------------------------------------
    let mut rng = match config.model.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let records = process_all_campaigns(&observations, &config.model, &mut rng, Utc::now())
        .context("posterior calculation failed")?;

    summary.campaigns = records
        .iter()
        .map(|r| r.campaign_id.as_str())
        .collect::<std::collections::HashSet<_>>()
        .len();

    if records.is_empty() {
        warn!("no results generated");
        summary.finished_at = Utc::now();
        return Ok(summary);
    }

    // -----------------------------------------------------------------
    // 3. Persist
    // -----------------------------------------------------------------
    sink.ensure_ready().await.context("failed to prepare result sink")?;
    summary.rows_written = sink
        .write_results(&records)
        .await
        .context("failed to write results")?;
    sink.cleanup(config.warehouse.retention_days)
        .await
        .context("retention cleanup failed")?;

    summary.finished_at = Utc::now();
    info!(
        campaigns = summary.campaigns,
        ad_sets = summary.ad_sets,
        rows_written = summary.rows_written,
        elapsed_ms = (summary.finished_at - summary.started_at).num_milliseconds(),
        "posterior job completed"
    );

    Ok(summary)
}
