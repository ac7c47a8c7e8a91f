//! Liveness, traces and result upload.

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use super::SandboxError;

#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn heartbeat(&self, moon: i64) -> Result<(), SandboxError>;

    async fn report_trace(&self, moon: i64, trace: &str) -> Result<(), SandboxError>;

    async fn upload_result(&self, path: &Path) -> Result<(), SandboxError>;
}

/// Does nothing; for debugging the cloud flow without a control plane.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopControlPlane;

#[async_trait]
impl ControlPlane for NoopControlPlane {
    async fn heartbeat(&self, _moon: i64) -> Result<(), SandboxError> {
        Ok(())
    }

    async fn report_trace(&self, _moon: i64, _trace: &str) -> Result<(), SandboxError> {
        Ok(())
    }

    async fn upload_result(&self, _path: &Path) -> Result<(), SandboxError> {
        Ok(())
    }
}

/// Control plane reached over the API: `/v1/runs/{run_id}/{heartbeat,trace,result}`.
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
    run_id: String,
    max_retries: u32,
    retry_delay: Duration,
}

impl HttpControlPlane {
    pub fn new(base_url: &str, run_id: impl Into<String>) -> Result<Self, SandboxError> {
        let base_url = Url::parse(base_url).map_err(|e| SandboxError::ControlPlane {
            message: format!("invalid base url {base_url}: {e}"),
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| SandboxError::ControlPlane {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url,
            api_key: None,
            run_id: run_id.into(),
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
        })
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Upload retries: `max_retries` extra attempts, waiting `attempt × delay`.
    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    fn endpoint(&self, name: &str) -> Result<Url, SandboxError> {
        self.base_url
            .join(&format!("v1/runs/{}/{}", self.run_id, name))
            .map_err(|e| SandboxError::ControlPlane {
                message: e.to_string(),
            })
    }

    fn post(&self, url: Url) -> reqwest::RequestBuilder {
        let request = self.client.post(url);
        match &self.api_key {
            Some(key) => request.header(AUTHORIZATION, format!("API-Key {key}")),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<(), SandboxError> {
        let response = request.send().await.map_err(|e| SandboxError::ControlPlane {
            message: e.to_string(),
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(SandboxError::ControlPlane {
            message: format!("HTTP {}: {}", status.as_u16(), body),
        })
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn heartbeat(&self, moon: i64) -> Result<(), SandboxError> {
        let url = self.endpoint("heartbeat")?;
        self.send(self.post(url).json(&json!({ "moon": moon }))).await
    }

    async fn report_trace(&self, moon: i64, trace: &str) -> Result<(), SandboxError> {
        let url = self.endpoint("trace")?;
        self.send(self.post(url).json(&json!({ "moon": moon, "content": trace })))
            .await
    }

    async fn upload_result(&self, path: &Path) -> Result<(), SandboxError> {
        let url = self.endpoint("result")?;
        let mut file = std::fs::File::open(path).map_err(|e| SandboxError::io(path, e))?;

        let mut attempt = 0;
        loop {
            file.seek(SeekFrom::Start(0))
                .map_err(|e| SandboxError::io(path, e))?;
            let mut body = Vec::new();
            file.read_to_end(&mut body)
                .map_err(|e| SandboxError::io(path, e))?;

            let request = self
                .post(url.clone())
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(body);

            match self.send(request).await {
                Ok(()) => {
                    debug!(path = %path.display(), attempt, "result uploaded");
                    return Ok(());
                }
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    let backoff = self.retry_delay * attempt;
                    warn!(
                        error = %e,
                        retry = attempt,
                        max_retries = self.max_retries,
                        backoff_ms = backoff.as_millis(),
                        "retrying upload"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
