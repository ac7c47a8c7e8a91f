//! Child side of a sandboxed iteration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::command::SandboxCommand;
use super::state::StateFile;
use super::SandboxError;
use crate::collector::persist_table;
use crate::driver::{validate_shape, Iteration, IterationExecutor, LocalData, LocalExecutor, RunContext};
use crate::errors::{RunnerError, RunnerResult};
use crate::loader::{Handler, ScriptOptions, UserModule};
use crate::table::{read_table, TableFormat};

const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Fails if any of `urls` answers at all.
pub async fn ping(urls: &[String]) -> Result<(), SandboxError> {
    if urls.is_empty() {
        return Ok(());
    }

    let client = reqwest::Client::builder()
        .timeout(PING_TIMEOUT)
        .build()
        .map_err(|e| SandboxError::FuseFailed {
            message: format!("cannot build ping client: {e}"),
        })?;

    for url in urls {
        match client.get(url).send().await {
            Ok(response) => {
                warn!(url = %url, status = response.status().as_u16(), "network is reachable");
                return Err(SandboxError::NetworkEscape { url: url.clone() });
            }
            Err(e) => debug!(url = %url, error = %e, "unreachable"),
        }
    }

    Ok(())
}

/// Signal the fuse process, then wait until `directory` is no longer readable.
#[derive(Debug, Clone)]
pub struct FuseOptions {
    pub pid: u32,
    pub signal_number: i32,
    pub directory: PathBuf,
    pub attempts: u32,
    pub interval: Duration,
}

impl FuseOptions {
    pub fn new(pid: u32, signal_number: i32, directory: impl Into<PathBuf>) -> Self {
        Self {
            pid,
            signal_number,
            directory: directory.into(),
            attempts: 50,
            interval: Duration::from_millis(100),
        }
    }
}

#[cfg(unix)]
pub async fn trip_fuse(options: &FuseOptions) -> Result<(), SandboxError> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let signal = Signal::try_from(options.signal_number).map_err(|e| SandboxError::FuseFailed {
        message: format!("invalid signal {}: {e}", options.signal_number),
    })?;

    kill(Pid::from_raw(options.pid as i32), signal).map_err(|e| SandboxError::FuseFailed {
        message: format!("cannot signal fuse {}: {e}", options.pid),
    })?;

    for attempt in 1..=options.attempts {
        match std::fs::read_dir(&options.directory) {
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                debug!(attempt, "fuse blown");
                return Ok(());
            }
            _ => tokio::time::sleep(options.interval).await,
        }
    }

    Err(SandboxError::FuseFailed {
        message: format!(
            "{} still readable after {} attempts",
            options.directory.display(),
            options.attempts
        ),
    })
}

#[cfg(not(unix))]
pub async fn trip_fuse(_options: &FuseOptions) -> Result<(), SandboxError> {
    Err(SandboxError::FuseFailed {
        message: "fuse is only supported on unix".to_string(),
    })
}

/// Run one iteration inside the sandbox and write the prediction.
pub async fn run_child(command: &SandboxCommand) -> RunnerResult<()> {
    ping(&command.ping_urls).await?;

    let state = StateFile::read(&command.state_file)?;
    let x = read_table(&command.x)?;
    let y = read_table(&command.y)?;
    debug!(x_rows = x.num_rows(), y_rows = y.num_rows(), "data loaded");

    match (command.fuse_pid, command.fuse_signal_number) {
        (Some(pid), Some(signal_number)) => {
            let directory = command.x.parent().unwrap_or_else(|| Path::new("."));
            trip_fuse(&FuseOptions::new(pid, signal_number, directory)).await?;
        }
        _ => debug!("no fuse configured"),
    }

    // Tables go to the script in the same format the prediction is written in.
    let options = ScriptOptions {
        interpreter: command.interpreter.clone(),
        table_format: TableFormat::from_path(&command.prediction).unwrap_or_default(),
    };
    let module = UserModule::load(&command.code_directory.join(&command.main_file), &options).await?;
    let handler = Handler::from_module(&module)?;

    let column_names = Arc::new(command.column_names()?);
    let run = RunContext {
        embargo: command.embargo,
        number_of_features: command.number_of_features,
        model_directory: command.model_directory.clone(),
        has_gpu: command.gpu,
        column_names: Arc::clone(&column_names),
        features: state.feature_groups(),
    };
    let executor = LocalExecutor::new(
        handler,
        run,
        LocalData {
            x: Arc::new(x),
            y: Arc::new(y),
        },
    );

    let iteration = Iteration {
        index: 0,
        key: command.moon,
        train: command.train,
    };
    let prediction = executor.execute(&iteration).await?;
    let prediction = validate_shape(prediction, command.moon, &column_names)?;

    persist_table(&prediction, &command.prediction)?;
    info!(moon = command.moon, rows = prediction.num_rows(), "prediction written");
    Ok(())
}

/// Write what the parent forwards to the control plane.
pub fn write_trace(path: &Path, error: &RunnerError) {
    let content = match error {
        RunnerError::UserCode(e) => e.trace().to_string(),
        other => other.to_string(),
    };

    if let Err(e) = std::fs::write(path, content) {
        warn!(path = %path.display(), error = %e, "failed to write trace");
    }
}
