// Langfuse public API client
// GET /api/public/datasets/{name}/runs/{run} and GET /api/public/traces/{id}
// Basic auth: public key as username, secret key as password

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Default Langfuse host when LANGFUSE_HOST is not set.
pub const DEFAULT_HOST: &str = "https://cloud.langfuse.com";

const REQUEST_TIMEOUT_SECS: u64 = 30;
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Errors from the Langfuse API.
///
/// `NotFound` and `Unauthorized` are split out because callers recover from
/// them differently; everything else is a transport or server failure.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The requested resource does not exist (HTTP 404).
    #[error("not found")]
    NotFound,

    /// Credentials were rejected (HTTP 401).
    #[error("unauthorized")]
    Unauthorized,

    /// Transport-level failure (connect, timeout, decode).
    #[error("{0}")]
    Http(#[from] reqwest::Error),

    /// Any other non-success response from the API.
    #[error("Langfuse API error ({status}): {message}")]
    Api { status: StatusCode, message: String },
}

/// One item of a dataset run.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetRunItem {
    pub id: String,
    pub trace_id: String,
}

/// A dataset run as returned by the runs endpoint.
///
/// `dataset_run_items` is `None` when the API omits the collection, which is
/// not the same thing as a run with zero items.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetRun {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub dataset_run_items: Option<Vec<DatasetRunItem>>,
}

/// Trace detail for one run item: cost, latency, attached scores.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    pub id: String,
    #[serde(default)]
    pub total_cost: Option<f64>,
    #[serde(default)]
    pub latency: Option<f64>,
    #[serde(default)]
    pub scores: Vec<TraceScore>,
}

/// A score attached to a trace. `value` is null for categorical scores.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceScore {
    pub name: String,
    #[serde(default)]
    pub value: Option<f64>,
}

/// Read side of the Langfuse API used by report generation.
/// Kept small so tests can swap in fakes.
#[async_trait]
pub trait LangfuseApi: Send + Sync {
    async fn get_dataset_run(
        &self,
        dataset_name: &str,
        run_name: &str,
    ) -> Result<DatasetRun, ApiError>;

    /// `Ok(None)` when the trace does not exist.
    async fn fetch_trace(&self, trace_id: &str) -> Result<Option<Trace>, ApiError>;
}

pub struct LangfuseClient {
    client: Client,
    host: Url,
    public_key: String,
    secret_key: String,
}

impl LangfuseClient {
    /// Reads LANGFUSE_PUBLIC_KEY, LANGFUSE_SECRET_KEY and LANGFUSE_HOST
    /// (defaults to the cloud host).
    pub fn from_env() -> anyhow::Result<Self> {
        let public_key = std::env::var("LANGFUSE_PUBLIC_KEY")
            .context("LANGFUSE_PUBLIC_KEY env var not set")?;
        let secret_key = std::env::var("LANGFUSE_SECRET_KEY")
            .context("LANGFUSE_SECRET_KEY env var not set")?;
        let host = std::env::var("LANGFUSE_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
        Self::new(&host, public_key, secret_key)
    }

    pub fn new(host: &str, public_key: String, secret_key: String) -> anyhow::Result<Self> {
        // reqwest is built with rustls-no-provider, so install the ring
        // provider before the first TLS handshake. Already-installed is fine.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let host =
            Url::parse(host).with_context(|| format!("invalid Langfuse host: {}", host))?;
        anyhow::ensure!(
            matches!(host.scheme(), "http" | "https"),
            "Langfuse host must be http(s): {}",
            host
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .user_agent(concat!("langfuse-junit/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            host,
            public_key,
            secret_key,
        })
    }

    /// Appends percent-encoded path segments to the host URL. Keeps any path
    /// prefix a self-hosted instance carries.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.host.clone();
        // new() only accepts http(s) hosts, which always take path segments
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        debug!(url = %url, "GET");
        let resp = self
            .client
            .get(url)
            .basic_auth(&self.public_key, Some(&self.secret_key))
            .send()
            .await?;

        let status = resp.status();
        debug!(status = %status, "response");
        match status {
            StatusCode::NOT_FOUND => Err(ApiError::NotFound),
            StatusCode::UNAUTHORIZED => Err(ApiError::Unauthorized),
            s if !s.is_success() => {
                let body = resp.text().await.unwrap_or_default();
                Err(ApiError::Api {
                    status: s,
                    message: error_message(&body),
                })
            }
            _ => Ok(resp.json().await?),
        }
    }
}

#[async_trait]
impl LangfuseApi for LangfuseClient {
    async fn get_dataset_run(
        &self,
        dataset_name: &str,
        run_name: &str,
    ) -> Result<DatasetRun, ApiError> {
        let url = self.endpoint(&["api", "public", "datasets", dataset_name, "runs", run_name]);
        self.get_json(url).await
    }

    async fn fetch_trace(&self, trace_id: &str) -> Result<Option<Trace>, ApiError> {
        let url = self.endpoint(&["api", "public", "traces", trace_id]);
        match self.get_json(url).await {
            Ok(trace) => Ok(Some(trace)),
            Err(ApiError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// Langfuse error bodies carry {"message": ...} or {"error": ...}; fall back
// to the raw body when neither parses.
fn error_message(body: &str) -> String {
    let parsed: serde_json::Value = serde_json::from_str(body).unwrap_or_default();
    parsed["message"]
        .as_str()
        .or_else(|| parsed["error"].as_str())
        .unwrap_or(body)
        .to_string()
}
