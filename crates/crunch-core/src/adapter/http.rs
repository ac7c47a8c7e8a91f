//! HTTP layer: status mapping and retry.
//!
//! This is the only place that interprets status codes.

use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use super::types::{AdapterConfig, ApiErrorBody};
use super::{AdapterError, AdapterResult};

/// What an API call is about, for error reporting.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ApiContext<'a> {
    pub competition: Option<&'a str>,
    pub round: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub(crate) struct HttpBackend {
    client: reqwest::Client,
    /// Staging transfers: idle timeout only, bodies may take arbitrarily long.
    transfer_client: reqwest::Client,
    base_url: Url,
    config: AdapterConfig,
}

impl HttpBackend {
    pub(crate) fn new(config: AdapterConfig) -> AdapterResult<Self> {
        let base_url = Url::parse(&config.url).map_err(|e| AdapterError::InvalidUrl {
            url: config.url.clone(),
            message: e.to_string(),
        })?;

        let timeout = Duration::from_secs(config.timeout_secs);
        let client = build_client(reqwest::Client::builder().timeout(timeout))?;
        let transfer_client = build_client(
            reqwest::Client::builder()
                .connect_timeout(timeout)
                .read_timeout(timeout),
        )?;

        Ok(Self {
            client,
            transfer_client,
            base_url,
            config,
        })
    }

    pub(crate) fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// API URL for `path`, with the push token attached when no API key is set.
    pub(crate) fn api_url(&self, path: &str, query: &[(&str, &str)]) -> AdapterResult<Url> {
        let mut url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| AdapterError::InvalidUrl {
                url: path.to_string(),
                message: e.to_string(),
            })?;

        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
            if self.config.api_key.is_none() {
                if let Some(token) = &self.config.push_token {
                    pairs.append_pair("pushToken", token);
                }
            }
        }

        if url.query() == Some("") {
            url.set_query(None);
        }

        Ok(url)
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        url: &Url,
        context: ApiContext<'_>,
    ) -> AdapterResult<T> {
        let response = self.request(&self.client, url, true, context).await?;
        let body = response.bytes().await.map_err(|e| AdapterError::Network {
            status: None,
            message: format!("failed to read response body: {}", e),
        })?;

        serde_json::from_slice(&body).map_err(|e| AdapterError::InvalidResponse {
            message: e.to_string(),
        })
    }

    /// GET a staging file. Unauthenticated: the URL carries its own signature.
    pub(crate) async fn fetch_file(&self, url: &Url) -> AdapterResult<reqwest::Response> {
        self.request(&self.transfer_client, url, false, ApiContext::default())
            .await
    }

    /// Send a GET, retrying transient failures with exponential backoff.
    async fn request(
        &self,
        client: &reqwest::Client,
        url: &Url,
        authenticated: bool,
        context: ApiContext<'_>,
    ) -> AdapterResult<reqwest::Response> {
        use rand::Rng;

        let mut retries = 0;
        let max_retries = self.config.max_retries;

        loop {
            match self.request_once(client, url, authenticated, context).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && retries < max_retries => {
                    retries += 1;

                    let backoff = match &e {
                        AdapterError::RateLimited {
                            retry_after: Some(retry_after),
                        } => (*retry_after).min(Duration::from_secs(30)),
                        _ => {
                            let base = self.config.retry_base_delay * (1 << retries.min(5));
                            let base = base.min(Duration::from_secs(30));
                            let jittered_ms =
                                rand::thread_rng().gen_range(0..=base.as_millis() as u64);
                            Duration::from_millis(jittered_ms.max(10))
                        }
                    };

                    warn!(
                        error = %e,
                        retry = retries,
                        max_retries = max_retries,
                        backoff_ms = backoff.as_millis(),
                        "retrying request"
                    );

                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn request_once(
        &self,
        client: &reqwest::Client,
        url: &Url,
        authenticated: bool,
        context: ApiContext<'_>,
    ) -> AdapterResult<reqwest::Response> {
        let mut request = client.get(url.clone());

        if authenticated {
            if let Some(api_key) = &self.config.api_key {
                request = request.header(AUTHORIZATION, format!("API-Key {}", api_key));
            }
        }

        let response = request.send().await?;
        let status = response.status();
        debug!(url = %redact(url), status = status.as_u16(), "response");

        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);

            return Err(AdapterError::RateLimited { retry_after });
        }

        let text = response.text().await.unwrap_or_default();
        let body: Option<ApiErrorBody> = serde_json::from_str(&text).ok();
        let message = body
            .as_ref()
            .and_then(|b| b.message.clone())
            .unwrap_or_else(|| if text.is_empty() { status.to_string() } else { text.clone() });

        match body.as_ref().and_then(|b| b.code.as_deref()) {
            Some("ROUND_NOT_FOUND") => {
                return Err(AdapterError::RoundNotFound {
                    round: context.round.unwrap_or("?").to_string(),
                })
            }
            Some("CRUNCH_NOT_FOUND") => return Err(AdapterError::CrunchNotFound { message }),
            Some("COMPETITION_NOT_FOUND") => {
                return Err(AdapterError::CompetitionNotFound {
                    competition: context.competition.unwrap_or("?").to_string(),
                })
            }
            _ => {}
        }

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(AdapterError::Unauthorized { message })
            }
            _ => Err(AdapterError::Network {
                status: Some(status.as_u16()),
                message: format!("HTTP {}: {}", status.as_u16(), message),
            }),
        }
    }
}

fn build_client(builder: reqwest::ClientBuilder) -> AdapterResult<reqwest::Client> {
    builder
        .user_agent(concat!("crunch-runner/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| AdapterError::Network {
            status: None,
            message: format!("failed to build HTTP client: {}", e),
        })
}

/// URL without its query string, for logs.
pub(crate) fn redact(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}
