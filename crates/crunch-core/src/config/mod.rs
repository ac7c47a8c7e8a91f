//! Environment and project configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const DEFAULT_API_BASE_URL: &str = "https://api.hub.crunchdao.com/";
pub const DEFAULT_WEB_BASE_URL: &str = "https://hub.crunchdao.com/";
pub const DEFAULT_COMPETITIONS_REPOSITORY: &str = "crunchdao/competitions";
pub const DEFAULT_COMPETITIONS_BRANCH: &str = "master";

/// Directory holding project metadata, relative to the project root.
pub const DOT_DIRECTORY: &str = ".crunchdao";
pub const PROJECT_FILE: &str = "project";
pub const TOKEN_FILE: &str = "token";
/// Staging directory, relative to the project root.
pub const DATA_DIRECTORY: &str = "data";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The directory is not a project (no metadata file).
    #[error("no project found at {path}")]
    NotAProject { path: String },

    #[error("invalid project file {path}: {source}")]
    InvalidProject {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("token file {path} is empty")]
    EmptyToken { path: String },

    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Process environment read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub debug: bool,
    pub api_base_url: String,
    pub web_base_url: String,
    pub api_key: Option<String>,
    pub competitions_repository: String,
    pub competitions_branch: String,
    pub competitions_directory_path: Option<PathBuf>,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            debug: false,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            web_base_url: DEFAULT_WEB_BASE_URL.to_string(),
            api_key: None,
            competitions_repository: DEFAULT_COMPETITIONS_REPOSITORY.to_string(),
            competitions_branch: DEFAULT_COMPETITIONS_BRANCH.to_string(),
            competitions_directory_path: None,
        }
    }
}

impl Environment {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `DEBUG` | Debug logging (`1`, `true`, `yes`) |
    /// | `API_BASE_URL` | API base URL |
    /// | `WEB_BASE_URL` | Web base URL |
    /// | `API_KEY` | API key |
    /// | `COMPETITIONS_REPOSITORY` | Repository hosting competition resources |
    /// | `COMPETITIONS_BRANCH` | Branch of that repository |
    /// | `COMPETITIONS_DIRECTORY_PATH` | Local checkout overriding the repository |
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`Environment::from_env`] but reading through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        Self {
            debug: non_empty("DEBUG").map(|v| is_truthy(&v)).unwrap_or(false),
            api_base_url: non_empty("API_BASE_URL")
                .map(|v| with_trailing_slash(&v))
                .unwrap_or(defaults.api_base_url),
            web_base_url: non_empty("WEB_BASE_URL")
                .map(|v| with_trailing_slash(&v))
                .unwrap_or(defaults.web_base_url),
            api_key: non_empty("API_KEY"),
            competitions_repository: non_empty("COMPETITIONS_REPOSITORY")
                .unwrap_or(defaults.competitions_repository),
            competitions_branch: non_empty("COMPETITIONS_BRANCH")
                .unwrap_or(defaults.competitions_branch),
            competitions_directory_path: non_empty("COMPETITIONS_DIRECTORY_PATH").map(PathBuf::from),
        }
    }
}

pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn with_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}

/// Size of the data release to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataSizeVariant {
    #[default]
    Default,
    Large,
}

impl DataSizeVariant {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "DEFAULT",
            Self::Large => "LARGE",
        }
    }
}

impl std::str::FromStr for DataSizeVariant {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEFAULT" => Ok(Self::Default),
            "LARGE" => Ok(Self::Large),
            _ => Err(ConfigError::InvalidValue {
                name: "dataSizeVariant".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Contents of `.crunchdao/project`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInfo {
    pub competition_name: String,
    pub user_id: String,
    pub project_name: String,
    #[serde(default)]
    pub data_size_variant: DataSizeVariant,
}

impl ProjectInfo {
    pub fn path(project_directory: &Path) -> PathBuf {
        project_directory.join(DOT_DIRECTORY).join(PROJECT_FILE)
    }

    pub fn load(project_directory: &Path) -> ConfigResult<Self> {
        let path = Self::path(project_directory);
        let content = read_project_file(&path)?;

        serde_json::from_str(&content).map_err(|source| ConfigError::InvalidProject {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Read the push token from `.crunchdao/token`.
pub fn load_token(project_directory: &Path) -> ConfigResult<String> {
    let path = project_directory.join(DOT_DIRECTORY).join(TOKEN_FILE);
    let token = read_project_file(&path)?.trim().to_string();

    if token.is_empty() {
        return Err(ConfigError::EmptyToken {
            path: path.display().to_string(),
        });
    }

    Ok(token)
}

fn read_project_file(path: &Path) -> ConfigResult<String> {
    std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ConfigError::NotAProject {
                path: path.display().to_string(),
            }
        } else {
            ConfigError::Io {
                path: path.display().to_string(),
                source,
            }
        }
    })
}
