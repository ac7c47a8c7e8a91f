//! Top-level error type.
//!
//! Every component owns a `thiserror` enum; they all convert into
//! [`RunnerError`], which carries the process exit code.

use crate::adapter::AdapterError;
use crate::binder::BindError;
use crate::checks::CheckError;
use crate::collector::CollectorError;
use crate::config::ConfigError;
use crate::loader::{LoadError, UserCodeError};
use crate::model::ModelError;
use crate::sandbox::SandboxError;
use crate::table::TableError;

/// Exit code constants shared with the binary.
pub mod exit {
    pub const SUCCESS: i32 = 0;
    pub const USER_FAILURE: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
    pub const ADAPTER_ERROR: i32 = 3;
    pub const LOAD_ERROR: i32 = 4;
    pub const ESCAPE: i32 = 5;
    pub const INTERNAL: i32 = 6;
}

/// Runner errors.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid data release: {0}")]
    Model(#[from] ModelError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error(transparent)]
    UserCode(#[from] UserCodeError),

    /// `infer` returned something that is not a usable prediction.
    #[error("invalid prediction at moon {moon}: {message}")]
    InvalidPrediction { moon: i64, message: String },

    #[error(transparent)]
    Check(#[from] CheckError),

    #[error(transparent)]
    Collector(#[from] CollectorError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl RunnerError {
    /// Exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            // Participant-side failures
            Self::UserCode(_) => exit::USER_FAILURE,
            Self::InvalidPrediction { .. } => exit::USER_FAILURE,
            Self::Check(_) => exit::USER_FAILURE,

            Self::Config(_) => exit::CONFIG_ERROR,
            Self::Model(_) => exit::CONFIG_ERROR,

            Self::Adapter(_) => exit::ADAPTER_ERROR,

            Self::Load(_) => exit::LOAD_ERROR,
            Self::Bind(_) => exit::LOAD_ERROR,

            Self::Sandbox(e) => e.exit_code(),

            Self::Collector(_) => exit::INTERNAL,
            Self::Table(_) => exit::INTERNAL,
            Self::Io { .. } => exit::INTERNAL,
            Self::Internal { .. } => exit::INTERNAL,
        }
    }

    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Result type for runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            RunnerError::from(UserCodeError::Visible("bad input".into())).exit_code(),
            exit::USER_FAILURE
        );
        assert_eq!(
            RunnerError::from(ModelError::NoTarget).exit_code(),
            exit::CONFIG_ERROR
        );
        assert_eq!(
            RunnerError::from(AdapterError::RoundNotFound {
                round: "@current".into()
            })
            .exit_code(),
            exit::ADAPTER_ERROR
        );
        assert_eq!(
            RunnerError::from(SandboxError::NetworkEscape {
                url: "https://example.com".into()
            })
            .exit_code(),
            exit::ESCAPE
        );
        assert_eq!(RunnerError::internal("boom").exit_code(), exit::INTERNAL);
    }
}
