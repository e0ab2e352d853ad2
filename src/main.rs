// =============================================================================
// ABO Posteriors — Main Entry Point
// =============================================================================
//
// Runs the posterior job once, or on a fixed interval when
// `job.run_interval_secs` > 0. A one-shot run that fails exits non-zero so
// the scheduler can alert; the interval loop logs the failure and waits for
// the next tick.
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use abo_posteriors::job::run_once;
use abo_posteriors::runtime_config::RuntimeConfig;
use abo_posteriors::warehouse::{
    BigQueryClient, Credentials, JsonFileSource, JsonLinesSink, ObservationSource, ResultSink,
};

const DEFAULT_CONFIG_PATH: &str = "posterior_config.json";

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        ABO Bayesian Posteriors — Starting Up             ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path =
        std::env::var("ABO_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let mut config = RuntimeConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        let defaults = RuntimeConfig::default();
        // Leave a template behind on first start; never clobber a broken file.
        if !Path::new(&config_path).exists() {
            if let Err(e) = defaults.save(&config_path) {
                warn!(error = %e, "Failed to write default config");
            }
        }
        defaults
    });
    config.apply_env();
    config
        .model
        .validate()
        .context("refusing to start with an invalid model configuration")?;

    info!(
        prior_shape = config.model.prior_shape,
        prior_rate = config.model.prior_rate,
        champion_threshold = config.model.champion_threshold,
        backup_threshold = config.model.backup_threshold,
        sample_count = config.model.sample_count,
        seeded = config.model.seed.is_some(),
        role_policy = %config.model.role_policy,
        "Model configured"
    );

    // ── 2. Wire source and sink ──────────────────────────────────────────
    if let Some((input, output)) = config.job.local_paths() {
        info!(input = %input.display(), output = %output.display(), "Using local files");
        let source = JsonFileSource::new(input);
        let sink = JsonLinesSink::new(output);
        return drive(&source, &sink, &config).await;
    }

    let credentials = Credentials::from_env().context("failed to resolve warehouse credentials")?;
    let client = BigQueryClient::new(config.warehouse.clone(), credentials)?;
    info!(project_id = %client.project_id(), "Connected to BigQuery");
    drive(&client, &client, &config).await
}

/// Run once, or loop on the configured interval until Ctrl+C.
async fn drive<S, K>(source: &S, sink: &K, config: &RuntimeConfig) -> Result<()>
where
    S: ObservationSource,
    K: ResultSink,
{
    if config.job.run_interval_secs == 0 {
        let summary = run_once(source, sink, config).await.map_err(|e| {
            error!(error = %format!("{e:#}"), "Posterior job failed");
            e
        })?;
        info!(
            run_id = %summary.run_id,
            rows = summary.rows_written,
            campaigns = summary.campaigns,
            "Job completed successfully"
        );
        return Ok(());
    }

    let period = Duration::from_secs(config.job.run_interval_secs);
    info!(interval_secs = period.as_secs(), "Scheduler loop starting");
    let mut interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match run_once(source, sink, config).await {
                    Ok(summary) => info!(
                        run_id = %summary.run_id,
                        rows = summary.rows_written,
                        campaigns = summary.campaigns,
                        "Scheduled run completed"
                    ),
                    Err(e) => error!(error = %format!("{e:#}"), "Scheduled run failed — retrying next tick"),
                }
            }
            res = tokio::signal::ctrl_c() => {
                res?;
                warn!("Shutdown signal received — stopping");
                break;
            }
        }
    }

    info!("ABO Posteriors shut down complete.");
    Ok(())
}
