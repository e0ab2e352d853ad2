// =============================================================================
// Posterior engine errors
// =============================================================================
//
// Every variant fails the whole run. A partial result set is never emitted
// because downstream budget decisions depend on completeness.
// =============================================================================

use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PosteriorError {
    #[error("invalid prior (shape={shape}, rate={rate}): both must be finite and > 0")]
    InvalidPrior { shape: f64, rate: f64 },

    #[error("cannot fit posterior to revenue={revenue}, spend={spend}: revenue must be >= 0 and spend > 0")]
    InvalidFitInput { revenue: f64, spend: f64 },

    #[error("ad set {ad_set_id} in campaign {campaign_id}: {reason}")]
    InvalidObservation {
        campaign_id: String,
        ad_set_id: String,
        reason: String,
    },

    #[error("duplicate ad set {ad_set_id} in campaign {campaign_id}")]
    DuplicateAdSet {
        campaign_id: String,
        ad_set_id: String,
    },

    #[error(
        "campaign {campaign_id} mixes evaluation windows: \
         {expected_start}..{expected_end} vs {found_start}..{found_end} (ad set {ad_set_id})"
    )]
    MixedWindow {
        campaign_id: String,
        ad_set_id: String,
        expected_start: NaiveDate,
        expected_end: NaiveDate,
        found_start: NaiveDate,
        found_end: NaiveDate,
    },

    #[error("ad set {ad_set_id} has unrecognised role tag {tag:?}")]
    UnknownRole { ad_set_id: String, tag: Option<String> },

    #[error("ad set {ad_set_id} in campaign {campaign_id}: {quantity} is not finite ({value})")]
    NonFinite {
        campaign_id: String,
        ad_set_id: String,
        quantity: &'static str,
        value: f64,
    },

    #[error("invalid model config: {0}")]
    InvalidConfig(String),

    #[error("distribution error: {0}")]
    Distribution(String),
}

impl PosteriorError {
    pub(crate) fn invalid(
        campaign_id: &str,
        ad_set_id: &str,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidObservation {
            campaign_id: campaign_id.to_string(),
            ad_set_id: ad_set_id.to_string(),
            reason: reason.into(),
        }
    }
}
