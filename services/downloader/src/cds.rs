//! Client for the Copernicus Climate Data Store retrieve API.
//!
//! A retrieval is a job: submit the request, poll the job until it finishes,
//! then stream the result asset to disk.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

use crate::request::RetrievalRequest;

pub const DEFAULT_CDS_URL: &str = "https://cds.climate.copernicus.eu/api";

/// Failures of a single retrieval. All of them are retried by the orchestrator.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned {status}: {body}")]
    Status {
        url: String,
        status: StatusCode,
        body: String,
    },

    #[error("job {job_id} ended with status '{status}'")]
    JobFailed { job_id: String, status: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unexpected response: {0}")]
    Protocol(String),
}

/// Fetches one request into a local file.
#[async_trait]
pub trait RetrievalClient: Send + Sync {
    async fn retrieve(
        &self,
        product: &str,
        request: &RetrievalRequest,
        destination: &Path,
    ) -> Result<(), RetrievalError>;
}

/// Endpoint and API key.
#[derive(Clone, PartialEq, Eq)]
pub struct CdsConfig {
    pub url: String,
    pub key: String,
}

impl std::fmt::Debug for CdsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdsConfig")
            .field("url", &self.url)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl CdsConfig {
    /// Parse the `url:` and `key:` lines of a `.cdsapirc` file.
    pub fn parse_rc(content: &str) -> Result<Self, RetrievalError> {
        let mut url = None;
        let mut key = None;

        for line in content.lines() {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            match name.trim() {
                "url" => url = Some(value.trim().to_string()),
                "key" => key = Some(value.trim().to_string()),
                _ => {}
            }
        }

        let key = key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| RetrievalError::Config("no 'key' entry".to_string()))?;
        Ok(Self {
            url: url
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| DEFAULT_CDS_URL.to_string()),
            key,
        })
    }

    /// `CDSAPI_URL`/`CDSAPI_KEY` when the key is set.
    pub fn from_env() -> Option<Self> {
        let key = std::env::var("CDSAPI_KEY").ok().filter(|k| !k.is_empty())?;
        let url = std::env::var("CDSAPI_URL")
            .ok()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_CDS_URL.to_string());
        Some(Self { url, key })
    }

    /// Location of the `.cdsapirc` file: `CDSAPI_RC` or the home directory.
    pub fn rc_path() -> Option<PathBuf> {
        std::env::var_os("CDSAPI_RC")
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|home| home.join(".cdsapirc")))
    }

    /// Environment first, then the `.cdsapirc` file.
    pub fn load() -> Result<Self, RetrievalError> {
        if let Some(config) = Self::from_env() {
            debug!(url = %config.url, "Using CDS credentials from environment");
            return Ok(config);
        }

        let path = Self::rc_path()
            .ok_or_else(|| RetrievalError::Config("cannot locate home directory".to_string()))?;
        let content = std::fs::read_to_string(&path).map_err(|e| {
            RetrievalError::Config(format!(
                "no CDSAPI_KEY set and {} unreadable: {}",
                path.display(),
                e
            ))
        })?;
        debug!(path = %path.display(), "Using CDS credentials from rc file");
        Self::parse_rc(&content)
    }
}

#[derive(Debug, Deserialize)]
struct JobStatus {
    #[serde(rename = "jobID")]
    job_id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct JobResults {
    asset: Asset,
}

#[derive(Debug, Deserialize)]
struct Asset {
    value: AssetValue,
}

#[derive(Debug, Deserialize)]
struct AssetValue {
    href: String,
}

/// [`RetrievalClient`] for the CDS retrieve API v1.
pub struct CdsClient {
    http: Client,
    config: CdsConfig,
    poll_interval: Duration,
}

impl CdsClient {
    pub fn new(config: CdsConfig) -> Result<Self, RetrievalError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()?;

        Ok(Self {
            http,
            config,
            poll_interval: Duration::from_secs(5),
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/retrieve/v1/{}", self.config.url.trim_end_matches('/'), path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, RetrievalError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let url = response.url().to_string();
        let body = response.text().await.unwrap_or_default();
        Err(RetrievalError::Status { url, status, body })
    }

    async fn submit(&self, product: &str, request: &RetrievalRequest) -> Result<JobStatus, RetrievalError> {
        let response = self
            .http
            .post(self.endpoint(&format!("processes/{}/execution", product)))
            .header("PRIVATE-TOKEN", &self.config.key)
            .json(&json!({ "inputs": request }))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn wait_for(&self, job_id: &str) -> Result<(), RetrievalError> {
        loop {
            let response = self
                .http
                .get(self.endpoint(&format!("jobs/{}", job_id)))
                .header("PRIVATE-TOKEN", &self.config.key)
                .send()
                .await?;
            let job: JobStatus = Self::check(response).await?.json().await?;

            match job.status.as_str() {
                "successful" => return Ok(()),
                "failed" | "rejected" | "dismissed" => {
                    return Err(RetrievalError::JobFailed {
                        job_id: job.job_id,
                        status: job.status,
                    })
                }
                other => {
                    debug!(job_id = %job_id, status = %other, "Job not finished");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    async fn result_href(&self, job_id: &str) -> Result<String, RetrievalError> {
        let response = self
            .http
            .get(self.endpoint(&format!("jobs/{}/results", job_id)))
            .header("PRIVATE-TOKEN", &self.config.key)
            .send()
            .await?;
        let results: JobResults = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| RetrievalError::Protocol(format!("job {} results: {}", job_id, e)))?;
        Ok(results.asset.value.href)
    }

    async fn stream_to_file(&self, href: &str, destination: &Path) -> Result<u64, RetrievalError> {
        let response = Self::check(self.http.get(href).send().await?).await?;

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = File::create(destination).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}

#[async_trait]
impl RetrievalClient for CdsClient {
    #[instrument(skip(self, request), fields(destination = %destination.display()))]
    async fn retrieve(
        &self,
        product: &str,
        request: &RetrievalRequest,
        destination: &Path,
    ) -> Result<(), RetrievalError> {
        let job = self.submit(product, request).await?;
        info!(job_id = %job.job_id, status = %job.status, "Submitted retrieval job");

        self.wait_for(&job.job_id).await?;
        let href = self.result_href(&job.job_id).await?;
        let bytes = self.stream_to_file(&href, destination).await?;

        info!(job_id = %job.job_id, bytes = bytes, "Retrieval completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rc() {
        let config = CdsConfig::parse_rc(
            "url: https://cds.example.org/api\nkey: 0000-abcd\n# comment\n",
        )
        .unwrap();
        assert_eq!(config.url, "https://cds.example.org/api");
        assert_eq!(config.key, "0000-abcd");
    }

    #[test]
    fn test_parse_rc_defaults_url() {
        let config = CdsConfig::parse_rc("key: secret").unwrap();
        assert_eq!(config.url, DEFAULT_CDS_URL);
    }

    #[test]
    fn test_parse_rc_requires_key() {
        let err = CdsConfig::parse_rc("url: https://cds.example.org/api").unwrap_err();
        assert!(matches!(err, RetrievalError::Config(_)));
    }

    #[test]
    fn test_debug_hides_key() {
        let config = CdsConfig::parse_rc("key: secret").unwrap();
        assert!(!format!("{:?}", config).contains("secret"));
    }

    #[test]
    fn test_endpoints() {
        let client = CdsClient::new(CdsConfig {
            url: "https://cds.example.org/api/".to_string(),
            key: "k".to_string(),
        })
        .unwrap();
        assert_eq!(
            client.endpoint("jobs/42/results"),
            "https://cds.example.org/api/retrieve/v1/jobs/42/results"
        );
    }
}
