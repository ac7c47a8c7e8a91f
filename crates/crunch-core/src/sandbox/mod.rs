//! Sandboxed execution for hosted runs.
//!
//! The parent ([`CloudExecutor`]) runs every iteration in a child process
//! started through an external launcher. Parent and child only share files:
//! the [`StateFile`], hard-linked data, and the prediction and trace paths
//! named on the child's command line ([`SandboxCommand`]).

use std::fmt;

use crate::errors::exit;

mod child;
mod command;
mod control_plane;
mod executor;
mod state;

pub use child::{ping, run_child, trip_fuse, write_trace, FuseOptions};
pub use command::{CompetitionFormat, SandboxCommand, TargetSpec, DEFAULT_PING_URLS};
pub use control_plane::{ControlPlane, HttpControlPlane, NoopControlPlane};
pub use executor::{CloudConfig, CloudExecutor, Launcher};
pub use state::StateFile;

/// Sandbox errors.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// A liveness URL answered from inside the sandbox.
    #[error("network escape detected: {url} is reachable")]
    NetworkEscape { url: String },

    #[error("fuse failed: {message}")]
    FuseFailed { message: String },

    #[error("failed to start launcher {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The child exited non-zero.
    #[error("child failed at moon {moon} (exit code {code:?}):\n{trace}")]
    ChildFailed {
        moon: i64,
        code: Option<i32>,
        trace: String,
    },

    #[error("unreadable prediction {path}: {message}")]
    UnreadablePrediction { path: String, message: String },

    #[error("invalid state file {path}: {message}")]
    State { path: String, message: String },

    #[error("illegal transition from {from} to {to}")]
    IllegalTransition {
        from: IterationState,
        to: IterationState,
    },

    #[error("control plane error: {message}")]
    ControlPlane { message: String },

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl SandboxError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NetworkEscape { .. } | Self::FuseFailed { .. } => exit::ESCAPE,

            // The child's own code already classifies the failure.
            Self::ChildFailed { code, .. } => match code {
                Some(code) if (exit::USER_FAILURE..=exit::INTERNAL).contains(code) => *code,
                _ => exit::USER_FAILURE,
            },

            Self::UnreadablePrediction { .. } => exit::USER_FAILURE,
            Self::ControlPlane { .. } => exit::ADAPTER_ERROR,
            Self::State { .. } => exit::CONFIG_ERROR,

            Self::Launch { .. } | Self::IllegalTransition { .. } | Self::Io { .. } => exit::INTERNAL,
        }
    }

    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

/// Lifecycle of one sandboxed iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationState {
    Ready,
    Linking,
    ChildSpawned,
    ChildRunning,
    ChildSucceeded,
    ChildFailed,
    Cleaned,
}

impl fmt::Display for IterationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ready => "READY",
            Self::Linking => "LINKING",
            Self::ChildSpawned => "CHILD_SPAWNED",
            Self::ChildRunning => "CHILD_RUNNING",
            Self::ChildSucceeded => "CHILD_SUCCEEDED",
            Self::ChildFailed => "CHILD_FAILED",
            Self::Cleaned => "CLEANED",
        };
        f.write_str(name)
    }
}

impl IterationState {
    /// Move to `next`, rejecting transitions outside the lifecycle.
    pub fn advance(self, next: IterationState) -> Result<IterationState, SandboxError> {
        use IterationState::*;

        let allowed = matches!(
            (self, next),
            (Ready, Linking)
                | (Linking, ChildSpawned)
                | (Linking, Cleaned)
                | (ChildSpawned, ChildRunning)
                | (ChildRunning, ChildSucceeded)
                | (ChildRunning, ChildFailed)
                | (ChildSucceeded, Cleaned)
                | (ChildFailed, Cleaned)
        );

        if allowed {
            Ok(next)
        } else {
            Err(SandboxError::IllegalTransition {
                from: self,
                to: next,
            })
        }
    }
}
