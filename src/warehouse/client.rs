// =============================================================================
// BigQuery REST Client — queries, table management and load jobs
// =============================================================================
//
// Thin wrapper over the BigQuery v2 REST API. Every call carries a bearer
// token from `Credentials`; non-2xx responses are turned into errors that
// include the status and the response body. Results are appended with a
// single load job, which BigQuery commits atomically: a failed run leaves no
// rows behind. The client never retries: the nightly job fails and the next
// scheduled run starts from scratch.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument, warn};

use super::credentials::Credentials;
use super::schema::{
    latest_window_query, load_job_id, observation_from_row, records_to_ndjson,
    result_table_schema, retention_query, table_path,
};
use super::{ObservationSource, ResultSink};
use crate::runtime_config::WarehouseConfig;
use crate::types::{Observation, ResultRecord};

const ROOT_URL: &str = "https://bigquery.googleapis.com";

/// Delay between jobs.get polls while a load job is running.
const LOAD_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Server-side wait per jobs.query / getQueryResults call (milliseconds).
const QUERY_TIMEOUT_MS: u64 = 30_000;

/// BigQuery client bound to one project and one warehouse layout.
pub struct BigQueryClient {
    http: reqwest::Client,
    credentials: Credentials,
    project_id: String,
    config: WarehouseConfig,
    api_url: String,
    upload_url: String,
}

impl BigQueryClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a client. The project comes from the config, else from the
    /// service account file.
    pub fn new(config: WarehouseConfig, credentials: Credentials) -> Result<Self> {
        Self::with_base_url(config, credentials, ROOT_URL)
    }

    /// Create a client against another endpoint root, e.g. an emulator.
    pub fn with_base_url(
        config: WarehouseConfig,
        credentials: Credentials,
        root: &str,
    ) -> Result<Self> {
        let project_id = config
            .project_id
            .clone()
            .or_else(|| credentials.project_id().map(str::to_string))
            .context("no BigQuery project configured (set GOOGLE_CLOUD_PROJECT_ID)")?;

        // Validate every identifier up front so SQL building cannot fail later.
        table_path(&project_id, &config.dataset, &config.source_table)?;
        table_path(&project_id, &config.dataset, &config.dest_table)?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        debug!(project_id = %project_id, dataset = %config.dataset, "BigQueryClient initialised");

        Ok(Self {
            http,
            credentials,
            project_id,
            config,
            api_url: format!("{root}/bigquery/v2"),
            upload_url: format!("{root}/upload/bigquery/v2"),
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    fn source_path(&self) -> String {
        format!(
            "{}.{}.{}",
            self.project_id, self.config.dataset, self.config.source_table
        )
    }

    fn dest_path(&self) -> String {
        format!(
            "{}.{}.{}",
            self.project_id, self.config.dataset, self.config.dest_table
        )
    }

    fn table_url(&self, table: &str) -> String {
        format!(
            "{}/projects/{}/datasets/{}/tables/{}",
            self.api_url, self.project_id, self.config.dataset, table
        )
    }

    // -------------------------------------------------------------------------
    // Transport
    // -------------------------------------------------------------------------

    /// Send a request with auth and parse the JSON body, failing on non-2xx.
    async fn send_json(&self, req: reqwest::RequestBuilder, what: &str) -> Result<Value> {
        let token = self.credentials.access_token(&self.http).await?;
        let resp = req
            .bearer_auth(token)
            .send()
            .await
            .with_context(|| format!("{what} request failed"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("BigQuery {} returned {}: {}", what, status, body);
        }
        resp.json()
            .await
            .with_context(|| format!("failed to parse {what} response"))
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Run a standard-SQL query and return every result row keyed by column.
    #[instrument(skip(self, sql), name = "bigquery::query")]
    pub async fn query(&self, sql: &str) -> Result<Vec<Map<String, Value>>> {
        let url = format!("{}/projects/{}/queries", self.api_url, self.project_id);
        let body = json!({
            "query": sql,
            "useLegacySql": false,
            "timeoutMs": QUERY_TIMEOUT_MS,
        });
        let mut page = self
            .send_json(self.http.post(&url).json(&body), "jobs.query")
            .await?;

        let job_id = page["jobReference"]["jobId"].as_str().map(str::to_string);
        let location = page["jobReference"]["location"].as_str().map(str::to_string);
        let mut rows = Vec::new();

        loop {
            let complete = page["jobComplete"].as_bool().unwrap_or(true);
            if complete {
                rows.extend(decode_rows(&page)?);
            }

            let page_token = page["pageToken"].as_str().map(str::to_string);
            if complete && page_token.is_none() {
                break;
            }

            let job_id = job_id
                .as_deref()
                .context("query response has no jobReference.jobId")?;
            let mut req = self
                .http
                .get(format!(
                    "{}/projects/{}/queries/{}",
                    self.api_url, self.project_id, job_id
                ))
                .query(&[("timeoutMs", QUERY_TIMEOUT_MS.to_string())]);
            if let Some(loc) = &location {
                req = req.query(&[("location", loc)]);
            }
            if complete {
                if let Some(token) = &page_token {
                    req = req.query(&[("pageToken", token)]);
                }
            } else {
                debug!(job_id, "query still running; polling");
            }
            page = self.send_json(req, "jobs.getQueryResults").await?;
        }

        debug!(rows = rows.len(), "query complete");
        Ok(rows)
    }

    // -------------------------------------------------------------------------
    // Tables
    // -------------------------------------------------------------------------

    /// Whether `table` exists in the configured dataset.
    #[instrument(skip(self), name = "bigquery::table_exists")]
    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let token = self.credentials.access_token(&self.http).await?;
        let resp = self
            .http
            .get(self.table_url(table))
            .bearer_auth(token)
            .send()
            .await
            .context("tables.get request failed")?;

        match resp.status() {
            s if s.is_success() => Ok(true),
            reqwest::StatusCode::NOT_FOUND => Ok(false),
            s => {
                let body = resp.text().await.unwrap_or_default();
                anyhow::bail!("BigQuery tables.get returned {}: {}", s, body)
            }
        }
    }

    /// Create `table` with the given schema.
    #[instrument(skip(self, schema), name = "bigquery::create_table")]
    pub async fn create_table(&self, table: &str, schema: Value) -> Result<()> {
        let url = format!(
            "{}/projects/{}/datasets/{}/tables",
            self.api_url, self.project_id, self.config.dataset
        );
        let body = json!({
            "tableReference": {
                "projectId": self.project_id,
                "datasetId": self.config.dataset,
                "tableId": table,
            },
            "schema": schema,
        });
        self.send_json(self.http.post(&url).json(&body), "tables.insert")
            .await?;
        info!(table = %table, "table created");
        Ok(())
    }

    /// Append newline-delimited JSON rows to `table` with one load job and
    /// wait for it to finish. The job either commits every row or none.
    #[instrument(skip(self, ndjson), fields(bytes = ndjson.len()), name = "bigquery::load")]
    pub async fn load_ndjson(&self, table: &str, job_id: &str, ndjson: &str) -> Result<()> {
        let url = format!("{}/projects/{}/jobs", self.upload_url, self.project_id);
        let metadata = json!({
            "jobReference": {
                "projectId": self.project_id,
                "jobId": job_id,
            },
            "configuration": {
                "load": {
                    "destinationTable": {
                        "projectId": self.project_id,
                        "datasetId": self.config.dataset,
                        "tableId": table,
                    },
                    "sourceFormat": "NEWLINE_DELIMITED_JSON",
                    "writeDisposition": "WRITE_APPEND",
                    "createDisposition": "CREATE_NEVER",
                },
            },
        });

        let boundary = format!("abo_{}", uuid::Uuid::new_v4().simple());
        let req = self
            .http
            .post(&url)
            .query(&[("uploadType", "multipart")])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(multipart_related(&boundary, &metadata, ndjson));
        let mut job = self.send_json(req, "jobs.insert").await?;

        loop {
            let state = job["status"]["state"].as_str().unwrap_or("PENDING");
            if state == "DONE" {
                let error = &job["status"]["errorResult"];
                if !error.is_null() {
                    warn!(job_id, error = %error, "load job failed");
                    anyhow::bail!(
                        "BigQuery load job {} failed: {} (details: {})",
                        job_id,
                        error,
                        job["status"]["errors"]
                    );
                }
                debug!(job_id, "load job done");
                return Ok(());
            }

            debug!(job_id, state, "load job running; polling");
            tokio::time::sleep(LOAD_POLL_INTERVAL).await;
            let mut req = self.http.get(format!(
                "{}/projects/{}/jobs/{}",
                self.api_url, self.project_id, job_id
            ));
            if let Some(loc) = job["jobReference"]["location"].as_str() {
                req = req.query(&[("location", loc)]);
            }
            job = self.send_json(req, "jobs.get").await?;
        }
    }
}

/// Build a multipart/related body: job metadata first, then the data.
fn multipart_related(boundary: &str, metadata: &Value, data: &str) -> String {
    format!(
        "--{boundary}\r\n\
         Content-Type: application/json; charset=UTF-8\r\n\r\n\
         {metadata}\r\n\
         --{boundary}\r\n\
         Content-Type: application/octet-stream\r\n\r\n\
         {data}\r\n\
         --{boundary}--\r\n"
    )
}

/// Turn a jobs.query / getQueryResults page into column-keyed maps.
fn decode_rows(page: &Value) -> Result<Vec<Map<String, Value>>> {
    let Some(raw_rows) = page["rows"].as_array() else {
        return Ok(Vec::new());
    };
    let fields = page["schema"]["fields"]
        .as_array()
        .context("query response missing schema.fields")?;
    let names: Vec<&str> = fields
        .iter()
        .map(|f| f["name"].as_str().unwrap_or_default())
        .collect();

    raw_rows
        .iter()
        .map(|row| -> Result<Map<String, Value>> {
            let cells = row["f"].as_array().context("query row missing 'f' array")?;
            Ok(names
                .iter()
                .zip(cells)
                .map(|(name, cell)| (name.to_string(), cell["v"].clone()))
                .collect())
        })
        .collect()
}

impl std::fmt::Debug for BigQueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BigQueryClient")
            .field("credentials", &self.credentials)
            .field("project_id", &self.project_id)
            .field("dataset", &self.config.dataset)
            .finish()
    }
}

// =============================================================================
// Source / sink adapters
// =============================================================================

impl ObservationSource for BigQueryClient {
    async fn fetch_observations(&self) -> Result<Vec<Observation>> {
        let source = self.source_path();
        info!(table = %source, "fetching latest observation window");

        let rows = self.query(&latest_window_query(&source)).await?;
        let observations = rows
            .iter()
            .map(observation_from_row)
            .collect::<Result<Vec<_>>>()
            .context("failed to decode portfolio rows")?;

        info!(ad_sets = observations.len(), "observations fetched");
        Ok(observations)
    }
}

impl ResultSink for BigQueryClient {
    async fn ensure_ready(&self) -> Result<()> {
        let table = self.config.dest_table.clone();
        if self.table_exists(&table).await? {
            debug!(table = %self.dest_path(), "result table already exists");
            return Ok(());
        }
        info!(table = %self.dest_path(), "creating result table");
        self.create_table(&table, result_table_schema()).await
    }

    async fn write_results(&self, records: &[ResultRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let job_id = load_job_id(records);
        let ndjson = records_to_ndjson(records)?;
        self.load_ndjson(&self.config.dest_table, &job_id, &ndjson)
            .await?;
        info!(rows = records.len(), table = %self.dest_path(), job_id = %job_id, "results written");
        Ok(records.len())
    }

    async fn cleanup(&self, retention_days: u32) -> Result<()> {
        info!(retention_days, "cleaning up old posterior rows");
        self.query(&retention_query(&self.dest_path(), retention_days))
            .await?;
        Ok(())
    }
}
