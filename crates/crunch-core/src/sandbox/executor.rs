//! Parent side of a sandboxed iteration.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::command::{CompetitionFormat, SandboxCommand};
use super::control_plane::ControlPlane;
use super::{IterationState, SandboxError};
use crate::driver::{Iteration, IterationExecutor};
use crate::errors::RunnerResult;
use crate::model::ColumnNames;
use crate::table::{read_table, Table, TableFormat};

/// Program wrapping the child, e.g. a sandboxing tool followed by the
/// runner binary and its `child` subcommand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launcher {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

/// Static configuration of the cloud run.
#[derive(Debug, Clone)]
pub struct CloudConfig {
    pub launcher: Launcher,
    pub competition_name: String,
    pub competition_format: CompetitionFormat,
    pub x: PathBuf,
    pub y: PathBuf,
    pub y_raw: Option<PathBuf>,
    /// Root under which every iteration gets its own scratch directory.
    pub scratch_directory: PathBuf,
    pub code_directory: PathBuf,
    pub main_file: PathBuf,
    pub model_directory: PathBuf,
    pub state_file: PathBuf,
    pub ping_urls: Vec<String>,
    pub embargo: i64,
    pub number_of_features: i64,
    pub gpu: bool,
    pub column_names: Arc<ColumnNames>,
    pub fuse_pid: Option<u32>,
    pub fuse_signal_number: Option<i32>,
    pub interpreter: Option<PathBuf>,
    /// Format of the child's prediction file.
    pub prediction_format: TableFormat,
}

pub struct CloudExecutor {
    config: CloudConfig,
    control_plane: Arc<dyn ControlPlane>,
}

impl std::fmt::Debug for CloudExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudExecutor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

struct Tracker {
    moon: i64,
    state: IterationState,
}

impl Tracker {
    fn advance(&mut self, next: IterationState) -> Result<(), SandboxError> {
        self.state = self.state.advance(next)?;
        debug!(moon = self.moon, state = %self.state, "iteration state");
        Ok(())
    }
}

impl CloudExecutor {
    pub fn new(config: CloudConfig, control_plane: Arc<dyn ControlPlane>) -> Self {
        Self {
            config,
            control_plane,
        }
    }

    pub fn config(&self) -> &CloudConfig {
        &self.config
    }

    fn command(&self, iteration: &Iteration, data: &LinkedData, scratch: &Path) -> SandboxCommand {
        let config = &self.config;
        SandboxCommand {
            competition_name: config.competition_name.clone(),
            competition_format: config.competition_format,
            x: data.x.clone(),
            y: data.y.clone(),
            y_raw: data.y_raw.clone(),
            main_file: config.main_file.clone(),
            code_directory: config.code_directory.clone(),
            model_directory: config.model_directory.clone(),
            prediction: scratch.join(format!("prediction.{}", config.prediction_format.extension())),
            trace: scratch.join("trace.txt"),
            state_file: config.state_file.clone(),
            ping_urls: config.ping_urls.clone(),
            train: iteration.train,
            moon: iteration.key,
            embargo: config.embargo,
            number_of_features: config.number_of_features,
            gpu: config.gpu,
            id_column_name: config.column_names.id().to_string(),
            moon_column_name: config.column_names.moon().to_string(),
            targets: SandboxCommand::targets_of(&config.column_names),
            fuse_pid: config.fuse_pid,
            fuse_signal_number: config.fuse_signal_number,
            interpreter: config.interpreter.clone(),
        }
    }

    async fn run_child(
        &self,
        tracker: &mut Tracker,
        command: &SandboxCommand,
    ) -> Result<Option<Table>, SandboxError> {
        let launcher = &self.config.launcher;
        let mut child = Command::new(&launcher.program)
            .args(&launcher.args)
            .args(command.to_args())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SandboxError::Launch {
                program: launcher.program.display().to_string(),
                source,
            })?;
        tracker.advance(IterationState::ChildSpawned)?;

        tracker.advance(IterationState::ChildRunning)?;
        if let Err(e) = self.control_plane.heartbeat(command.moon).await {
            warn!(error = %e, moon = command.moon, "heartbeat failed");
        }

        let status = match child.wait().await {
            Ok(status) => status,
            Err(e) => {
                tracker.advance(IterationState::ChildFailed)?;
                return Err(SandboxError::io(&launcher.program, e));
            }
        };

        if status.success() {
            tracker.advance(IterationState::ChildSucceeded)?;
            if !command.prediction.exists() {
                return Ok(None);
            }
            let prediction =
                read_table(&command.prediction).map_err(|e| SandboxError::UnreadablePrediction {
                    path: command.prediction.display().to_string(),
                    message: e.to_string(),
                })?;
            return Ok(Some(prediction));
        }

        tracker.advance(IterationState::ChildFailed)?;
        let trace = std::fs::read_to_string(&command.trace).unwrap_or_default();
        if let Err(e) = self.control_plane.report_trace(command.moon, &trace).await {
            warn!(error = %e, moon = command.moon, "failed to report trace");
        }

        Err(SandboxError::ChildFailed {
            moon: command.moon,
            code: status.code(),
            trace,
        })
    }
}

struct LinkedData {
    x: PathBuf,
    y: PathBuf,
    y_raw: Option<PathBuf>,
}

/// Hard-link the staged files into `scratch/data` and open them up for
/// the child.
fn link_data(config: &CloudConfig, scratch: &Path) -> Result<LinkedData, SandboxError> {
    let data = scratch.join("data");
    std::fs::create_dir_all(&data).map_err(|e| SandboxError::io(&data, e))?;

    let link = |source: &Path| -> Result<PathBuf, SandboxError> {
        let name = source.file_name().ok_or_else(|| SandboxError::Io {
            path: source.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a file"),
        })?;
        let target = data.join(name);
        std::fs::hard_link(source, &target).map_err(|e| SandboxError::io(source, e))?;
        widen(&target, 0o644)?;
        Ok(target)
    };

    let linked = LinkedData {
        x: link(&config.x)?,
        y: link(&config.y)?,
        y_raw: config.y_raw.as_deref().map(link).transpose()?,
    };

    widen(scratch, 0o777)?;
    widen(&data, 0o755)?;
    Ok(linked)
}

#[cfg(unix)]
fn widen(path: &Path, mode: u32) -> Result<(), SandboxError> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| SandboxError::io(path, e))
}

#[cfg(not(unix))]
fn widen(_path: &Path, _mode: u32) -> Result<(), SandboxError> {
    Ok(())
}

#[async_trait]
impl IterationExecutor for CloudExecutor {
    async fn execute(&self, iteration: &Iteration) -> RunnerResult<Option<Table>> {
        let mut tracker = Tracker {
            moon: iteration.key,
            state: IterationState::Ready,
        };
        tracker.advance(IterationState::Linking)?;

        std::fs::create_dir_all(&self.config.scratch_directory)
            .map_err(|e| SandboxError::io(&self.config.scratch_directory, e))?;
        let scratch = tempfile::Builder::new()
            .prefix(&format!("moon-{}-", iteration.key))
            .tempdir_in(&self.config.scratch_directory)
            .map_err(|e| SandboxError::io(&self.config.scratch_directory, e))?;

        let result = match link_data(&self.config, scratch.path()) {
            Ok(data) => {
                let command = self.command(iteration, &data, scratch.path());
                info!(moon = iteration.key, train = iteration.train, "starting sandboxed child");
                self.run_child(&mut tracker, &command).await
            }
            Err(e) => Err(e),
        };

        tracker.advance(IterationState::Cleaned)?;
        drop(scratch);

        Ok(result?)
    }
}
