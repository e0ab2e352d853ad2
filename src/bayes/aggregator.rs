// =============================================================================
// Campaign Aggregator — per-ad-set metrics against campaign siblings
// =============================================================================
//
// For every ad set in a campaign:
//   1. fit the Gamma posterior from the shared prior,
//   2. collect the posteriors of every other ad set in the same campaign,
//   3. pick the champion or backup threshold from the role tag,
//   4. evaluate P(ROAS > threshold), P(best) and expected loss.
//
// Any invalid record fails the whole call. A partial result set is never
// returned.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, info};

use super::posterior::{Posterior, Prior};
use super::sampler::compare;
use super::threshold::prob_above_threshold;
use crate::errors::PosteriorError;
use crate::runtime_config::ModelConfig;
use crate::types::{AdRole, Observation, ResultRecord, RolePolicy};

/// Resolve the threshold for a role tag under the configured policy.
pub fn threshold_for(
    obs: &Observation,
    config: &ModelConfig,
) -> Result<f64, PosteriorError> {
    let role = obs.role_tag.as_deref().and_then(AdRole::from_tag);
    match (role, config.role_policy) {
        (Some(AdRole::Champion), _) => Ok(config.champion_threshold),
        (Some(AdRole::Backup), _) | (None, RolePolicy::DefaultToBackup) => {
            Ok(config.backup_threshold)
        }
        (None, RolePolicy::Reject) => Err(PosteriorError::UnknownRole {
            ad_set_id: obs.ad_set_id.clone(),
            tag: obs.role_tag.clone(),
        }),
    }
}

fn validate_observation(obs: &Observation) -> Result<(), PosteriorError> {
    if obs.campaign_id.trim().is_empty() {
        return Err(PosteriorError::invalid(
            &obs.campaign_id,
            &obs.ad_set_id,
            "empty campaign id",
        ));
    }
    if obs.ad_set_id.trim().is_empty() {
        return Err(PosteriorError::invalid(
            &obs.campaign_id,
            &obs.ad_set_id,
            "empty ad set id",
        ));
    }
    if !obs.spend.is_finite() || obs.spend <= 0.0 {
        return Err(PosteriorError::invalid(
            &obs.campaign_id,
            &obs.ad_set_id,
            format!("spend must be > 0, got {}", obs.spend),
        ));
    }
    if !obs.revenue.is_finite() || obs.revenue < 0.0 {
        return Err(PosteriorError::invalid(
            &obs.campaign_id,
            &obs.ad_set_id,
            format!("revenue must be >= 0, got {}", obs.revenue),
        ));
    }
    Ok(())
}

/// Check campaign-level invariants: one campaign id, unique ad set ids and a
/// single evaluation window.
fn validate_campaign(observations: &[Observation]) -> Result<(), PosteriorError> {
    let Some(first) = observations.first() else {
        return Ok(());
    };

    let mut seen: HashSet<&str> = HashSet::with_capacity(observations.len());
    for obs in observations {
        validate_observation(obs)?;
        if obs.campaign_id != first.campaign_id {
            return Err(PosteriorError::invalid(
                &obs.campaign_id,
                &obs.ad_set_id,
                format!("grouped with campaign {}", first.campaign_id),
            ));
        }
        if !seen.insert(obs.ad_set_id.as_str()) {
            return Err(PosteriorError::DuplicateAdSet {
                campaign_id: obs.campaign_id.clone(),
                ad_set_id: obs.ad_set_id.clone(),
            });
        }
        if obs.window_start != first.window_start || obs.window_end != first.window_end {
            return Err(PosteriorError::MixedWindow {
                campaign_id: obs.campaign_id.clone(),
                ad_set_id: obs.ad_set_id.clone(),
                expected_start: first.window_start,
                expected_end: first.window_end,
                found_start: obs.window_start,
                found_end: obs.window_end,
            });
        }
    }
    Ok(())
}

/// Extreme but valid inputs can overflow; such values never reach a row.
fn ensure_finite(
    obs: &Observation,
    quantity: &'static str,
    value: f64,
) -> Result<(), PosteriorError> {
    if value.is_finite() {
        return Ok(());
    }
    Err(PosteriorError::NonFinite {
        campaign_id: obs.campaign_id.clone(),
        ad_set_id: obs.ad_set_id.clone(),
        quantity,
        value,
    })
}

/// Evaluate every ad set of one campaign.
///
/// Returns one record per observation in input order. An empty slice yields
/// an empty result. Campaign name and window are taken from the first
/// observation.
pub fn process_campaign<R: Rng + ?Sized>(
    observations: &[Observation],
    config: &ModelConfig,
    rng: &mut R,
    calculated_at: DateTime<Utc>,
) -> Result<Vec<ResultRecord>, PosteriorError> {
    config.validate()?;
    validate_campaign(observations)?;
    let Some(first) = observations.first() else {
        return Ok(Vec::new());
    };
    let prior: Prior = config.prior()?;

    let posteriors: Vec<Posterior> = observations
        .iter()
        .map(|obs| {
            let posterior = prior.fit(obs.revenue, obs.spend)?;
            ensure_finite(obs, "observed ROAS", obs.observed_roas())?;
            ensure_finite(obs, "posterior mean", posterior.mean())?;
            ensure_finite(obs, "posterior std", posterior.std_dev())?;
            Ok(posterior)
        })
        .collect::<Result<_, PosteriorError>>()?;

    let mut records = Vec::with_capacity(observations.len());
    let mut others: Vec<Posterior> = Vec::with_capacity(observations.len().saturating_sub(1));

    for (i, obs) in observations.iter().enumerate() {
        let posterior = posteriors[i];

        // Ad set ids are unique, so excluding by index is excluding by id.
        others.clear();
        others.extend(
            posteriors
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, p)| *p),
        );

        let threshold = threshold_for(obs, config)?;
        let prob_above = prob_above_threshold(&posterior, threshold);
        let comparison = compare(&posterior, &others, config.sample_count, rng)?;
        ensure_finite(obs, "P(best)", comparison.prob_best)?;
        ensure_finite(obs, "expected loss", comparison.expected_loss)?;

        debug!(
            campaign_id = %obs.campaign_id,
            ad_set_id = %obs.ad_set_id,
            competitors = others.len(),
            posterior_mean = posterior.mean(),
            threshold,
            prob_above,
            prob_best = comparison.prob_best,
            expected_loss = comparison.expected_loss,
            "ad set evaluated"
        );

        records.push(ResultRecord {
            campaign_id: obs.campaign_id.clone(),
            campaign_name: first.campaign_name.clone(),
            ad_set_id: obs.ad_set_id.clone(),
            ad_set_name: obs.ad_set_name.clone(),
            ad_type: obs.role_tag.clone(),
            revenue: obs.revenue,
            spend: obs.spend,
            observed_roas: obs.observed_roas(),
            prob_is_best: comparison.prob_best,
            prob_above_threshold: prob_above,
            threshold_used: threshold,
            expected_loss: comparison.expected_loss,
            posterior_mean_roas: posterior.mean(),
            posterior_std_roas: posterior.std_dev(),
            posterior_alpha: posterior.shape,
            posterior_beta: posterior.rate,
            window_start: first.window_start,
            window_end: first.window_end,
            calculated_at,
        });
    }

    Ok(records)
}

/// Group the portfolio by campaign id and evaluate each campaign.
///
/// Campaigns are processed in ascending id order; ad sets keep their input
/// order inside a campaign. Empty input yields an empty result.
pub fn process_all_campaigns<R: Rng + ?Sized>(
    observations: &[Observation],
    config: &ModelConfig,
    rng: &mut R,
    calculated_at: DateTime<Utc>,
) -> Result<Vec<ResultRecord>, PosteriorError> {
    let mut campaigns: BTreeMap<&str, Vec<Observation>> = BTreeMap::new();
    for obs in observations {
        campaigns
            .entry(obs.campaign_id.as_str())
            .or_default()
            .push(obs.clone());
    }

    let mut all = Vec::with_capacity(observations.len());
    for (campaign_id, campaign) in &campaigns {
        info!(
            campaign_id = %campaign_id,
            campaign_name = %campaign[0].campaign_name,
            ad_sets = campaign.len(),
            "processing campaign"
        );
        all.extend(process_campaign(campaign, config, rng, calculated_at)?);
    }

    Ok(all)
}
