// =============================================================================
// Warehouse Credentials — OAuth access tokens for BigQuery
// =============================================================================
//
// SECURITY: tokens and private keys are never logged or serialised. `Debug`
// redacts them.
//
// Resolution order:
//   1. GOOGLE_OAUTH_ACCESS_TOKEN (e.g. `gcloud auth print-access-token`).
//   2. The service account key named by GOOGLE_APPLICATION_CREDENTIALS: an
//      RS256-signed assertion is exchanged at the key's token_uri.
//   3. The GCE / Cloud Run metadata server for the attached service account.
//
// GOOGLE_APPLICATION_CREDENTIALS, when set, must name an existing key file.
// Its `project_id` is used when no project is configured.
// =============================================================================

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// OAuth scope requested for service account tokens.
pub const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";

const JWT_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Google caps assertion lifetime at one hour.
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Refresh this long before a cached token actually expires.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Where access tokens come from.
#[derive(Clone, PartialEq, Eq)]
pub enum TokenSource {
    Static(String),
    /// Signed assertions from the loaded service account key.
    ServiceAccount,
    MetadataServer,
}

impl std::fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(_) => write!(f, "Static(<redacted>)"),
            Self::ServiceAccount => write!(f, "ServiceAccount"),
            Self::MetadataServer => write!(f, "MetadataServer"),
        }
    }
}

/// Fields of a service account key file we care about.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountInfo {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub client_email: Option<String>,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl std::fmt::Debug for ServiceAccountInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountInfo")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

/// JWT claims of the token-exchange assertion.
#[derive(Debug, Serialize, Deserialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

impl ServiceAccountInfo {
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("credentials file not found: {}", path.display());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read credentials file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse credentials file {}", path.display()))
    }

    /// Whether the key carries what is needed to sign assertions.
    pub fn can_sign(&self) -> bool {
        self.client_email.is_some() && self.private_key.is_some()
    }

    pub fn token_uri(&self) -> &str {
        self.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI)
    }

    /// Sign the RS256 assertion that the token endpoint exchanges for an
    /// access token.
    pub fn assertion(&self, issued_at: i64) -> Result<String> {
        let email = self
            .client_email
            .as_deref()
            .context("service account key has no client_email")?;
        let pem = self
            .private_key
            .as_deref()
            .context("service account key has no private_key")?;
        let key = EncodingKey::from_rsa_pem(pem.as_bytes())
            .context("service account private_key is not a valid RSA PEM")?;

        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.private_key_id.clone();
        let claims = AssertionClaims {
            iss: email.to_string(),
            scope: BIGQUERY_SCOPE.to_string(),
            aud: self.token_uri().to_string(),
            iat: issued_at,
            exp: issued_at + ASSERTION_LIFETIME_SECS,
        };
        jsonwebtoken::encode(&header, &claims, &key).context("failed to sign token assertion")
    }
}

/// Token endpoint / metadata server response.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Token provider with a small in-memory cache for minted tokens.
pub struct Credentials {
    source: TokenSource,
    service_account: Option<ServiceAccountInfo>,
    cached: Mutex<Option<CachedToken>>,
}

impl Credentials {
    pub fn new(source: TokenSource, service_account: Option<ServiceAccountInfo>) -> Self {
        Self {
            source,
            service_account,
            cached: Mutex::new(None),
        }
    }

    /// Resolve credentials from the process environment.
    pub fn from_env() -> Result<Self> {
        let service_account = match std::env::var_os("GOOGLE_APPLICATION_CREDENTIALS") {
            Some(path) => {
                let path = PathBuf::from(path);
                let info = ServiceAccountInfo::from_file(&path)?;
                info!(
                    path = %path.display(),
                    client_email = info.client_email.as_deref().unwrap_or("<unknown>"),
                    "service account file found"
                );
                Some(info)
            }
            None => None,
        };

        let source = match std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN") {
            Ok(token) if !token.trim().is_empty() => TokenSource::Static(token.trim().to_string()),
            _ if service_account.as_ref().is_some_and(ServiceAccountInfo::can_sign) => {
                TokenSource::ServiceAccount
            }
            _ => TokenSource::MetadataServer,
        };

        debug!(source = ?source, "warehouse credentials resolved");
        Ok(Self::new(source, service_account))
    }

    /// Project id from the service account file, if any.
    pub fn project_id(&self) -> Option<&str> {
        self.service_account
            .as_ref()
            .and_then(|sa| sa.project_id.as_deref())
    }

    fn cached_token(&self) -> Option<String> {
        self.cached
            .lock()
            .as_ref()
            .filter(|c| c.expires_at > Instant::now())
            .map(|c| c.token.clone())
    }

    fn store(&self, fetched: TokenResponse) -> String {
        let lifetime = Duration::from_secs(fetched.expires_in).saturating_sub(EXPIRY_MARGIN);
        *self.cached.lock() = Some(CachedToken {
            token: fetched.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        debug!(expires_in = fetched.expires_in, "access token refreshed");
        fetched.access_token
    }

    /// Return a bearer token, minting a new one when the cache is stale.
    #[instrument(skip(self, http), name = "credentials::access_token")]
    pub async fn access_token(&self, http: &reqwest::Client) -> Result<String> {
        match &self.source {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::ServiceAccount => {
                if let Some(token) = self.cached_token() {
                    return Ok(token);
                }
                let key = self
                    .service_account
                    .as_ref()
                    .context("no service account key loaded")?;
                let fetched = exchange_assertion(http, key).await?;
                Ok(self.store(fetched))
            }
            TokenSource::MetadataServer => {
                if let Some(token) = self.cached_token() {
                    return Ok(token);
                }
                let fetched = fetch_metadata_token(http).await?;
                Ok(self.store(fetched))
            }
        }
    }
}

async fn exchange_assertion(
    http: &reqwest::Client,
    key: &ServiceAccountInfo,
) -> Result<TokenResponse> {
    let assertion = key.assertion(Utc::now().timestamp())?;
    let resp = http
        .post(key.token_uri())
        .form(&[("grant_type", JWT_GRANT_TYPE), ("assertion", assertion.as_str())])
        .send()
        .await
        .context("token exchange request failed")?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("token endpoint returned {}: {}", status, body);
    }
    resp.json()
        .await
        .context("failed to parse token endpoint response")
}

async fn fetch_metadata_token(http: &reqwest::Client) -> Result<TokenResponse> {
    let resp = http
        .get(METADATA_TOKEN_URL)
        .header("Metadata-Flavor", "Google")
        .send()
        .await
        .context("metadata server token request failed")?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("metadata server returned {}: {}", status, body);
    }
    resp.json()
        .await
        .context("failed to parse metadata token response")
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("source", &self.source)
            .field("project_id", &self.project_id())
            .finish()
    }
}
