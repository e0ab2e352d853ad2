// =============================================================================
// Warehouse Module
// =============================================================================
//
// Where observations come from and where result rows go. The posterior core
// never sees these types; the job wires a source and a sink around it.
//
// - BigQuery REST client (production)
// - Local JSON / JSON-lines files (offline runs and tests)

pub mod client;
pub mod credentials;
pub mod local;
pub mod schema;

pub use client::BigQueryClient;
pub use credentials::Credentials;
pub use local::{JsonFileSource, JsonLinesSink};

use anyhow::Result;

use crate::types::{Observation, ResultRecord};

/// Supplies one evaluation window of per-ad-set observations.
#[allow(async_fn_in_trait)]
pub trait ObservationSource {
    async fn fetch_observations(&self) -> Result<Vec<Observation>>;
}

/// Persists result rows.
#[allow(async_fn_in_trait)]
pub trait ResultSink {
    /// Create the destination if it does not exist yet.
    async fn ensure_ready(&self) -> Result<()>;

    /// Append `records`, returning the number of rows written.
    async fn write_results(&self, records: &[ResultRecord]) -> Result<usize>;

    /// Drop rows computed more than `retention_days` ago.
    async fn cleanup(&self, retention_days: u32) -> Result<()>;
}
