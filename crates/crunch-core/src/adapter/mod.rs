//! Data acquisition.
//!
//! Resolves the submission-phase data release of a round and stages its
//! files locally.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::info;

use crate::checks::Check;
use crate::model::{DataFiles, Metric, ModelError};

mod download;
mod http;
mod types;

pub use download::{file_name, legacy_name};
pub use types::{AdapterConfig, DataRelease, RoundId};

use http::{ApiContext, HttpBackend};
use types::DataReleaseRecord;

/// Adapter errors.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("round not found: {round}")]
    RoundNotFound { round: String },

    #[error("crunch not found: {message}")]
    CrunchNotFound { message: String },

    #[error("competition not found: {competition}")]
    CompetitionNotFound { competition: String },

    #[error("invalid round: {value}")]
    InvalidRound { value: String },

    /// Authentication failed or token invalid.
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("rate limited: retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    /// Transport failure (no status) or unexpected status.
    #[error("network error: {message}")]
    Network { status: Option<u16>, message: String },

    #[error("invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("invalid data release: {0}")]
    InvalidRelease(#[from] ModelError),

    #[error("invalid url {url}: {message}")]
    InvalidUrl { url: String, message: String },

    /// A file of known size has a URL that requires authentication.
    #[error("file {role} has an unsigned url")]
    UnsignedUrl { role: String },

    #[error("file {role} size mismatch: expected {expected}, got {actual}")]
    SizeMismatch {
        role: String,
        expected: i64,
        actual: u64,
    },

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl AdapterError {
    /// Whether the error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Network { status, .. } => status.map_or(true, |status| status >= 500),
            _ => false,
        }
    }

    pub(crate) fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

/// Result type for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Client for one competition.
#[derive(Debug, Clone)]
pub struct DataAdapter {
    backend: HttpBackend,
    competition: String,
}

impl DataAdapter {
    pub fn new(config: AdapterConfig, competition: impl Into<String>) -> AdapterResult<Self> {
        Ok(Self {
            backend: HttpBackend::new(config)?,
            competition: competition.into(),
        })
    }

    pub fn competition(&self) -> &str {
        &self.competition
    }

    /// Fetch the submission-phase data release of `round`.
    pub async fn resolve(&self, round: RoundId) -> AdapterResult<DataRelease> {
        let round_name = round.to_string();
        let url = self.backend.api_url(
            &format!(
                "v1/competitions/{}/rounds/{}/phases/submission/data-release",
                self.competition, round_name
            ),
            &[("sizeVariant", self.backend.config().size_variant.as_str())],
        )?;

        let context = ApiContext {
            competition: Some(&self.competition),
            round: Some(&round_name),
        };
        let record: DataReleaseRecord = self.backend.get_json(&url, context).await?;
        let release = DataRelease::from(record);

        crate::model::test_keys(&release.splits, Default::default())?;

        info!(
            competition = %self.competition,
            round = %round_name,
            embargo = release.embargo,
            number_of_features = release.number_of_features,
            splits = release.splits.len(),
            files = release.data_files.len(),
            "resolved data release"
        );

        Ok(release)
    }

    /// Fetch the competition's prediction checks.
    pub async fn checks(&self) -> AdapterResult<Vec<Check>> {
        let url = self
            .backend
            .api_url(&format!("v1/competitions/{}/checks", self.competition), &[])?;
        let context = ApiContext {
            competition: Some(&self.competition),
            round: None,
        };

        self.backend.get_json(&url, context).await
    }

    /// Fetch the competition's scoring metrics.
    pub async fn metrics(&self) -> AdapterResult<Vec<Metric>> {
        let url = self
            .backend
            .api_url(&format!("v1/competitions/{}/metrics", self.competition), &[])?;
        let context = ApiContext {
            competition: Some(&self.competition),
            round: None,
        };

        self.backend.get_json(&url, context).await
    }

    /// Stage `data_files` into `directory`, returning role → local path.
    pub async fn download(
        &self,
        data_files: &DataFiles,
        directory: &Path,
        force: bool,
    ) -> AdapterResult<BTreeMap<String, PathBuf>> {
        download::download_all(&self.backend, data_files, directory, force).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(AdapterError::RateLimited { retry_after: None }.is_retryable());
        assert!(AdapterError::Network {
            status: None,
            message: "connection refused".into()
        }
        .is_retryable());
        assert!(AdapterError::Network {
            status: Some(503),
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(!AdapterError::Network {
            status: Some(400),
            message: "bad request".into()
        }
        .is_retryable());
        assert!(!AdapterError::UnsignedUrl { role: "x".into() }.is_retryable());
    }
}
