//! Wire types of the data-release API.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::config::{DataSizeVariant, Environment};
use crate::model::{
    ColumnNames, DataFiles, DataReleaseSplit, Features, ReleaseFeature, DEFAULT_FEATURE_GROUP,
};

use super::AdapterError;

/// Round selector: a round number or a sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoundId {
    Number(i64),
    #[default]
    Current,
    Last,
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(number) => write!(f, "{number}"),
            Self::Current => f.write_str("@current"),
            Self::Last => f.write_str("@last"),
        }
    }
}

impl FromStr for RoundId {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "@current" => Ok(Self::Current),
            "@last" => Ok(Self::Last),
            other => other
                .parse()
                .map(Self::Number)
                .map_err(|_| AdapterError::InvalidRound {
                    value: s.to_string(),
                }),
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// API base URL.
    pub url: String,

    /// API key, sent as `Authorization: API-Key <key>`.
    pub api_key: Option<String>,

    /// Push token, sent as the `pushToken` query parameter when no API key is set.
    pub push_token: Option<String>,

    pub size_variant: DataSizeVariant,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Maximum retries for transient failures.
    pub max_retries: u32,

    /// First retry delay; doubles on every attempt.
    pub retry_base_delay: Duration,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            url: crate::config::DEFAULT_API_BASE_URL.to_string(),
            api_key: None,
            push_token: None,
            size_variant: DataSizeVariant::Default,
            timeout_secs: 30,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

impl AdapterConfig {
    pub fn from_environment(environment: &Environment) -> Self {
        Self {
            url: environment.api_base_url.clone(),
            api_key: environment.api_key.clone(),
            ..Self::default()
        }
    }

    /// Set the base URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the push token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.push_token = Some(token.into());
        self
    }

    pub fn with_size_variant(mut self, size_variant: DataSizeVariant) -> Self {
        self.size_variant = size_variant;
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay = base_delay;
        self
    }
}

/// Resolved submission-phase data release.
#[derive(Debug, Clone)]
pub struct DataRelease {
    pub embargo: i64,
    pub number_of_features: i64,
    pub column_names: ColumnNames,
    pub splits: Vec<DataReleaseSplit>,
    pub features: Features,
    pub default_feature_group: String,
    pub data_files: DataFiles,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DataReleaseRecord {
    pub embargo: i64,
    pub number_of_features: i64,
    pub column_names: ColumnNames,
    #[serde(default)]
    pub splits: Vec<DataReleaseSplit>,
    #[serde(default)]
    pub features: Vec<ReleaseFeature>,
    #[serde(default)]
    pub default_feature_group: Option<String>,
    pub data_files: DataFiles,
}

impl From<DataReleaseRecord> for DataRelease {
    fn from(record: DataReleaseRecord) -> Self {
        let default_feature_group = record
            .default_feature_group
            .unwrap_or_else(|| DEFAULT_FEATURE_GROUP.to_string());

        Self {
            embargo: record.embargo,
            number_of_features: record.number_of_features,
            column_names: record.column_names,
            splits: record.splits,
            features: Features::from_release(&record.features, default_feature_group.clone()),
            default_feature_group,
            data_files: record.data_files,
        }
    }
}

/// Error body returned by the API.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub code: Option<String>,
    pub message: Option<String>,
}
