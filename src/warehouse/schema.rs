// =============================================================================
// Warehouse Schema — SQL, result-table layout and row codecs
// =============================================================================
//
// Input rows come from the portfolio performance view; output rows go to an
// append-only posterior table with one row per ad set per run. BigQuery
// returns every scalar as a JSON string, so numeric fields accept either a
// string or a number.
// =============================================================================

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::types::{Observation, ResultRecord};

/// Columns read from the source view, in query order.
pub const SOURCE_COLUMNS: [&str; 9] = [
    "campaign_id",
    "campaign_name",
    "ad_set_id",
    "ad_set_name",
    "revenue",
    "spend",
    "ad_type",
    "window_start",
    "window_end",
];

/// (name, type, mode) for each column of the result table.
pub const RESULT_COLUMNS: [(&str, &str, &str); 19] = [
    ("campaign_id", "STRING", "REQUIRED"),
    ("campaign_name", "STRING", "REQUIRED"),
    ("ad_set_id", "STRING", "REQUIRED"),
    ("ad_set_name", "STRING", "REQUIRED"),
    ("ad_type", "STRING", "NULLABLE"),
    ("revenue", "FLOAT", "REQUIRED"),
    ("spend", "FLOAT", "REQUIRED"),
    ("observed_roas", "FLOAT", "REQUIRED"),
    ("prob_is_best", "FLOAT", "REQUIRED"),
    ("prob_above_threshold", "FLOAT", "REQUIRED"),
    ("threshold_used", "FLOAT", "REQUIRED"),
    ("expected_loss", "FLOAT", "REQUIRED"),
    ("posterior_mean_roas", "FLOAT", "REQUIRED"),
    ("posterior_std_roas", "FLOAT", "REQUIRED"),
    ("posterior_alpha", "FLOAT", "REQUIRED"),
    ("posterior_beta", "FLOAT", "REQUIRED"),
    ("window_start", "DATE", "REQUIRED"),
    ("window_end", "DATE", "REQUIRED"),
    ("calculated_at", "TIMESTAMP", "REQUIRED"),
];

// -----------------------------------------------------------------------------
// Identifiers and SQL
// -----------------------------------------------------------------------------

/// Reject identifiers that could break out of a backtick-quoted table path.
pub fn validate_identifier(kind: &str, ident: &str) -> Result<()> {
    let ok = !ident.is_empty()
        && ident
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !ok {
        anyhow::bail!("invalid BigQuery {kind} identifier: {ident:?}");
    }
    Ok(())
}

/// Fully-qualified `project.dataset.table` path.
pub fn table_path(project: &str, dataset: &str, table: &str) -> Result<String> {
    validate_identifier("project", project)?;
    validate_identifier("dataset", dataset)?;
    validate_identifier("table", table)?;
    Ok(format!("{project}.{dataset}.{table}"))
}

/// Latest evaluation window only, ad sets with spend, ordered for grouping.
pub fn latest_window_query(table_path: &str) -> String {
    format!(
        "SELECT {cols}\n\
         FROM `{table_path}`\n\
         WHERE window_end = (SELECT MAX(window_end) FROM `{table_path}`)\n\
         AND spend > 0\n\
         ORDER BY campaign_id, ad_set_id",
        cols = SOURCE_COLUMNS.join(", "),
    )
}

/// Delete result rows older than the retention horizon.
pub fn retention_query(table_path: &str, days_to_keep: u32) -> String {
    format!(
        "DELETE FROM `{table_path}`\n\
         WHERE calculated_at < TIMESTAMP_SUB(CURRENT_TIMESTAMP(), INTERVAL {days_to_keep} DAY)"
    )
}

/// `schema` object for a tables.insert request.
pub fn result_table_schema() -> Value {
    let fields: Vec<Value> = RESULT_COLUMNS
        .iter()
        .map(|(name, ty, mode)| json!({ "name": name, "type": ty, "mode": mode }))
        .collect();
    json!({ "fields": fields })
}

// -----------------------------------------------------------------------------
// Row decoding
// -----------------------------------------------------------------------------

fn str_field(row: &Map<String, Value>, name: &str) -> Result<String> {
    match row.get(name) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        other => anyhow::bail!("column {name}: expected string, got {other:?}"),
    }
}

fn opt_str_field(row: &Map<String, Value>, name: &str) -> Option<String> {
    match row.get(name) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Parse a JSON value that may be either a string or a number into `f64`.
fn f64_field(row: &Map<String, Value>, name: &str) -> Result<f64> {
    match row.get(name) {
        Some(Value::String(s)) => s
            .parse::<f64>()
            .with_context(|| format!("column {name}: failed to parse '{s}' as f64")),
        Some(Value::Number(n)) => n
            .as_f64()
            .with_context(|| format!("column {name}: number out of range")),
        other => anyhow::bail!("column {name}: expected number, got {other:?}"),
    }
}

fn date_field(row: &Map<String, Value>, name: &str) -> Result<NaiveDate> {
    let raw = str_field(row, name)?;
    // DATE columns arrive as YYYY-MM-DD; tolerate a TIMESTAMP-ish suffix.
    let day = raw.get(..10).unwrap_or(&raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .with_context(|| format!("column {name}: failed to parse '{raw}' as date"))
}

/// Decode one source row (column name → value) into an observation.
pub fn observation_from_row(row: &Map<String, Value>) -> Result<Observation> {
    Ok(Observation {
        campaign_id: str_field(row, "campaign_id")?,
        campaign_name: str_field(row, "campaign_name")?,
        ad_set_id: str_field(row, "ad_set_id")?,
        ad_set_name: str_field(row, "ad_set_name")?,
        revenue: f64_field(row, "revenue")?,
        spend: f64_field(row, "spend")?,
        role_tag: opt_str_field(row, "ad_type"),
        window_start: date_field(row, "window_start")?,
        window_end: date_field(row, "window_end")?,
    })
}

// -----------------------------------------------------------------------------
// Row encoding
// -----------------------------------------------------------------------------

/// Encode a record as a result-table row.
pub fn record_to_row(record: &ResultRecord) -> Result<Value> {
    let mut row = serde_json::to_value(record).context("failed to serialise result record")?;
    // BigQuery TIMESTAMP carries microseconds at most.
    row["calculated_at"] = Value::String(
        record
            .calculated_at
            .format("%Y-%m-%d %H:%M:%S%.6f UTC")
            .to_string(),
    );
    Ok(row)
}

/// Encode records as newline-delimited JSON, the load-job upload format.
pub fn records_to_ndjson(records: &[ResultRecord]) -> Result<String> {
    let mut out = String::new();
    for record in records {
        out.push_str(&serde_json::to_string(&record_to_row(record)?)?);
        out.push('\n');
    }
    Ok(out)
}

/// Deterministic load-job id for a batch of results. Resubmitting the same
/// batch reuses the id and BigQuery rejects the duplicate job.
pub fn load_job_id(records: &[ResultRecord]) -> String {
    let mut hasher = Sha256::new();
    for record in records {
        hasher.update(record.campaign_id.as_bytes());
        hasher.update(b"|");
        hasher.update(record.ad_set_id.as_bytes());
        hasher.update(b"|");
        hasher.update(record.window_end.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(record.calculated_at.to_rfc3339().as_bytes());
        hasher.update(b"\n");
    }
    format!("abo_posteriors_{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample_record() -> ResultRecord {
        ResultRecord {
            campaign_id: "camp_1".into(),
            campaign_name: "Test Campaign".into(),
            ad_set_id: "ad_1".into(),
            ad_set_name: "Champion Ad".into(),
            ad_type: Some("champion".into()),
            revenue: 8000.0,
            spend: 1000.0,
            observed_roas: 8.0,
            prob_is_best: 0.97,
            prob_above_threshold: 0.49,
            threshold_used: 8.0,
            expected_loss: 0.01,
            posterior_mean_roas: 8002.0 / 1000.25,
            posterior_std_roas: 8002.0_f64.sqrt() / 1000.25,
            posterior_alpha: 8002.0,
            posterior_beta: 1000.25,
            window_start: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            window_end: NaiveDate::from_ymd_opt(2025, 1, 14).unwrap(),
            calculated_at: Utc.with_ymd_and_hms(2025, 1, 15, 3, 0, 0).unwrap(),
        }
    }

    #[test]
    fn schema_lists_every_record_field() {
        let row = record_to_row(&sample_record()).unwrap();
        let obj = row.as_object().unwrap();
        assert_eq!(obj.len(), RESULT_COLUMNS.len());
        for (name, _, _) in RESULT_COLUMNS {
            assert!(obj.contains_key(name), "row missing column {name}");
        }
        let schema = result_table_schema();
        assert_eq!(schema["fields"].as_array().unwrap().len(), 19);
        assert_eq!(schema["fields"][4]["mode"], "NULLABLE");
    }

    #[test]
    fn row_formats_dates_and_timestamp() {
        let row = record_to_row(&sample_record()).unwrap();
        assert_eq!(row["window_start"], "2025-01-01");
        assert_eq!(row["window_end"], "2025-01-14");
        assert_eq!(row["calculated_at"], "2025-01-15 03:00:00.000000 UTC");
        assert_eq!(row["ad_type"], "champion");
    }

    #[test]
    fn decodes_string_encoded_row() {
        let row: Map<String, Value> = serde_json::from_str(
            r#"{
                "campaign_id": "camp_1", "campaign_name": "Test Campaign",
                "ad_set_id": "ad_2", "ad_set_name": "Backup Ad 1",
                "revenue": "3000.0", "spend": "500", "ad_type": null,
                "window_start": "2025-01-01", "window_end": "2025-01-14"
            }"#,
        )
        .unwrap();
        let obs = observation_from_row(&row).unwrap();
        assert_eq!(obs.ad_set_id, "ad_2");
        assert!((obs.revenue - 3000.0).abs() < f64::EPSILON);
        assert!((obs.spend - 500.0).abs() < f64::EPSILON);
        assert!(obs.role_tag.is_none());
        assert_eq!(obs.window_end, NaiveDate::from_ymd_opt(2025, 1, 14).unwrap());
    }

    #[test]
    fn decode_rejects_garbage_numbers() {
        let row: Map<String, Value> = serde_json::from_str(
            r#"{
                "campaign_id": "c", "campaign_name": "n", "ad_set_id": "a",
                "ad_set_name": "n", "revenue": "lots", "spend": "1",
                "window_start": "2025-01-01", "window_end": "2025-01-14"
            }"#,
        )
        .unwrap();
        let err = observation_from_row(&row).unwrap_err();
        assert!(err.to_string().contains("revenue"));
    }

    #[test]
    fn table_path_rejects_injection() {
        assert_eq!(
            table_path("proj-1", "puttout_analytics", "abo_bayesian_posteriors").unwrap(),
            "proj-1.puttout_analytics.abo_bayesian_posteriors"
        );
        assert!(table_path("proj", "ds", "t`; DROP TABLE x; --").is_err());
        assert!(table_path("", "ds", "t").is_err());
    }

    #[test]
    fn queries_reference_table_and_filters() {
        let q = latest_window_query("p.d.src");
        assert!(q.contains("FROM `p.d.src`"));
        assert!(q.contains("MAX(window_end)"));
        assert!(q.contains("spend > 0"));
        assert!(q.contains("ORDER BY campaign_id, ad_set_id"));

        let d = retention_query("p.d.dst", 90);
        assert!(d.starts_with("DELETE FROM `p.d.dst`"));
        assert!(d.contains("INTERVAL 90 DAY"));
    }

    #[test]
    fn load_job_id_is_stable_and_distinct() {
        let a = sample_record();
        let mut b = sample_record();
        assert_eq!(load_job_id(&[a.clone()]), load_job_id(&[b.clone()]));
        assert!(load_job_id(&[a.clone()]).starts_with("abo_posteriors_"));
        b.ad_set_id = "ad_2".into();
        assert_ne!(load_job_id(&[a.clone()]), load_job_id(&[b.clone()]));
        assert_ne!(load_job_id(&[a.clone(), b.clone()]), load_job_id(&[b, a]));
    }

    #[test]
    fn ndjson_has_one_row_per_line() {
        let mut second = sample_record();
        second.ad_set_id = "ad_2".into();
        let body = records_to_ndjson(&[sample_record(), second]).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        let row: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(row["ad_set_id"], "ad_2");
        assert_eq!(row["calculated_at"], "2025-01-15 03:00:00.000000 UTC");
    }
}
