// =============================================================================
// Shared types used across the ABO posterior engine
// =============================================================================

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One ad set's cumulative revenue and spend over the evaluation window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub campaign_id: String,
    pub campaign_name: String,
    pub ad_set_id: String,
    pub ad_set_name: String,
    pub revenue: f64,
    pub spend: f64,
    /// Raw role tag as supplied by the warehouse ("champion", "backup", ...).
    #[serde(default, rename = "ad_type")]
    pub role_tag: Option<String>,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
}

impl Observation {
    /// Revenue divided by spend. Callers guarantee `spend > 0`.
    pub fn observed_roas(&self) -> f64 {
        self.revenue / self.spend
    }
}

/// Which exceedance threshold applies to an ad set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdRole {
    Champion,
    Backup,
}

impl AdRole {
    /// Parse a known role tag. Matching is case-insensitive and ignores
    /// surrounding whitespace; anything else yields `None`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "champion" => Some(Self::Champion),
            "backup" => Some(Self::Backup),
            _ => None,
        }
    }
}

impl std::fmt::Display for AdRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Champion => write!(f, "champion"),
            Self::Backup => write!(f, "backup"),
        }
    }
}

/// What to do with a role tag that is neither "champion" nor "backup".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolePolicy {
    /// Unknown or missing tags are evaluated against the backup threshold.
    DefaultToBackup,
    /// Unknown or missing tags fail the run.
    Reject,
}

impl Default for RolePolicy {
    fn default() -> Self {
        Self::DefaultToBackup
    }
}

impl std::fmt::Display for RolePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DefaultToBackup => write!(f, "default_to_backup"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

/// One output row per observation. Column names follow the result table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub campaign_id: String,
    pub campaign_name: String,
    pub ad_set_id: String,
    pub ad_set_name: String,
    pub ad_type: Option<String>,
    pub revenue: f64,
    pub spend: f64,
    pub observed_roas: f64,
    pub prob_is_best: f64,
    pub prob_above_threshold: f64,
    pub threshold_used: f64,
    pub expected_loss: f64,
    pub posterior_mean_roas: f64,
    pub posterior_std_roas: f64,
    pub posterior_alpha: f64,
    pub posterior_beta: f64,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub calculated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_tag_parsing_is_case_insensitive() {
        assert_eq!(AdRole::from_tag("champion"), Some(AdRole::Champion));
        assert_eq!(AdRole::from_tag(" Champion "), Some(AdRole::Champion));
        assert_eq!(AdRole::from_tag("BACKUP"), Some(AdRole::Backup));
        assert_eq!(AdRole::from_tag("testing"), None);
        assert_eq!(AdRole::from_tag(""), None);
    }

    #[test]
    fn observation_deserialises_with_missing_role() {
        let json = r#"{
            "campaign_id": "c1", "campaign_name": "Camp", "ad_set_id": "a1",
            "ad_set_name": "Ad", "revenue": 100.0, "spend": 20.0,
            "window_start": "2025-01-01", "window_end": "2025-01-14"
        }"#;
        let obs: Observation = serde_json::from_str(json).unwrap();
        assert!(obs.role_tag.is_none());
        assert!((obs.observed_roas() - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn role_policy_serialises_snake_case() {
        let s = serde_json::to_string(&RolePolicy::DefaultToBackup).unwrap();
        assert_eq!(s, "\"default_to_backup\"");
        let p: RolePolicy = serde_json::from_str("\"reject\"").unwrap();
        assert_eq!(p, RolePolicy::Reject);
    }
}
