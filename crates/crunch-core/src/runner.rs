//! End-to-end runs: stage data, drive the loop, persist, validate.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::adapter::{AdapterConfig, AdapterError, DataAdapter, DataRelease, RoundId};
use crate::checks::{self, Check};
use crate::collector::{Collector, PredictionCollector};
use crate::config::{self, Environment, ProjectInfo};
use crate::driver::{self, LocalData, LocalExecutor, LoopOptions, LoopReport, RunContext};
use crate::errors::{RunnerError, RunnerResult};
use crate::loader::{Handler, ScriptOptions, UserModule};
use crate::model::{role, test_keys, ColumnNames, Metric, ReducedPolicy};
use crate::sandbox::{
    CloudConfig, CloudExecutor, CompetitionFormat, ControlPlane, Launcher, StateFile,
};
use crate::table::{read_table, Table, TableFormat};

pub const DEFAULT_PREDICTION_FILE: &str = "prediction.parquet";

/// Where the participant's code comes from.
#[derive(Debug, Clone)]
pub enum CodeSource {
    /// A script speaking the describe/call protocol.
    Script { path: PathBuf, options: ScriptOptions },
    /// An already built module.
    Module(UserModule),
}

impl CodeSource {
    async fn handler(&self) -> RunnerResult<Handler> {
        let module = match self {
            Self::Script { path, options } => UserModule::load(path, options).await?,
            Self::Module(module) => module.clone(),
        };
        Ok(Handler::from_module(&module)?)
    }
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub prediction_path: PathBuf,
    pub report: LoopReport,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    fn finish(prediction_path: PathBuf, report: LoopReport, started_at: DateTime<Utc>) -> Self {
        let finished_at = Utc::now();
        info!(
            path = %prediction_path.display(),
            iterations = report.iterations,
            elapsed_ms = (finished_at - started_at).num_milliseconds(),
            "run finished"
        );

        Self {
            prediction_path,
            report,
            started_at,
            finished_at,
        }
    }
}

/// Files of the data release once staged.
struct Staged {
    release: DataRelease,
    paths: BTreeMap<String, PathBuf>,
}

impl Staged {
    fn state_file(&self, checks: Vec<Check>, metrics: Vec<Metric>) -> StateFile {
        StateFile {
            splits: self.release.splits.clone(),
            metrics,
            checks,
            features: self.release.features.to_release(),
            default_feature_group: self.release.default_feature_group.clone(),
        }
    }

    fn path(&self, role_name: &str) -> Option<&Path> {
        self.paths.get(role_name).map(PathBuf::as_path)
    }

    fn require(&self, role_name: &str) -> RunnerResult<&Path> {
        self.path(role_name).ok_or_else(|| {
            AdapterError::InvalidResponse {
                message: format!("data release has no {role_name} file"),
            }
            .into()
        })
    }

    /// Full feature and target tables, whatever the layout.
    fn load_tables(&self) -> RunnerResult<LocalData> {
        if let Some(x) = self.path(role::X) {
            return Ok(LocalData {
                x: Arc::new(read_table(x)?),
                y: Arc::new(read_table(self.require(role::Y)?)?),
            });
        }

        let x_train = read_table(self.require(role::X_TRAIN)?)?;
        let x_test = read_table(self.require(role::X_TEST)?)?;
        let mut y = vec![read_table(self.require(role::Y_TRAIN)?)?];
        if let Some(y_test) = self.path(role::Y_TEST) {
            y.push(read_table(y_test)?);
        }

        Ok(LocalData {
            x: Arc::new(Table::concat(&[x_train, x_test])?),
            y: Arc::new(Table::concat(&y)?),
        })
    }
}

async fn stage(
    adapter: &DataAdapter,
    round: RoundId,
    directory: &Path,
    force: bool,
) -> RunnerResult<Staged> {
    let release = adapter.resolve(round).await?;
    let paths = adapter.download(&release.data_files, directory, force).await?;
    Ok(Staged { release, paths })
}

fn run_context(release: &DataRelease, model_directory: &Path, has_gpu: bool) -> RunContext {
    RunContext {
        embargo: release.embargo,
        number_of_features: release.number_of_features,
        model_directory: model_directory.to_path_buf(),
        has_gpu,
        column_names: Arc::new(release.column_names.clone()),
        features: release.features.clone(),
    }
}

fn collector_for(path: &Path, streaming: bool) -> RunnerResult<Collector> {
    if streaming {
        Ok(Collector::file(path)?)
    } else {
        Ok(Collector::memory())
    }
}

/// Run the checks on the persisted artifact. Skipped without an example.
fn validate(
    checks: &[Check],
    prediction_path: &Path,
    example_path: Option<&Path>,
    column_names: &ColumnNames,
) -> RunnerResult<()> {
    let Some(example_path) = example_path else {
        warn!("no example prediction, skipping checks");
        return Ok(());
    };

    let prediction = read_table(prediction_path)?;
    let example = read_table(example_path)?;
    checks::run(checks, &prediction, &example, column_names)?;

    info!(checks = checks.len(), "prediction is valid");
    Ok(())
}

fn ensure_directory(path: &Path) -> RunnerResult<()> {
    std::fs::create_dir_all(path).map_err(|e| RunnerError::io(path, e))
}

/// Inputs of a local run.
#[derive(Debug, Clone)]
pub struct LocalRunInputs {
    pub project_directory: PathBuf,
    pub code: CodeSource,
    pub model_directory: PathBuf,
    pub round: RoundId,
    pub loop_options: LoopOptions,
    pub reduced_policy: ReducedPolicy,
    pub force_download: bool,
    pub skip_checks: bool,
    pub has_gpu: bool,
    /// Stream predictions to disk instead of keeping them in memory.
    pub streaming: bool,
    /// Defaults to `<project>/data/prediction.parquet`.
    pub prediction_path: Option<PathBuf>,
    pub environment: Environment,
}

impl LocalRunInputs {
    pub fn new(project_directory: impl Into<PathBuf>, code: CodeSource) -> Self {
        let project_directory = project_directory.into();
        Self {
            model_directory: project_directory.join("resources"),
            project_directory,
            code,
            round: RoundId::Current,
            loop_options: LoopOptions {
                train_frequency: 1,
                force_first_train: true,
                determinism_check: false,
            },
            reduced_policy: ReducedPolicy::default(),
            force_download: false,
            skip_checks: false,
            has_gpu: false,
            streaming: false,
            prediction_path: None,
            environment: Environment::default(),
        }
    }
}

/// A run on the participant's machine, user code in-process.
#[derive(Debug)]
pub struct LocalRun {
    inputs: LocalRunInputs,
}

impl LocalRun {
    pub fn new(inputs: LocalRunInputs) -> Self {
        Self { inputs }
    }

    pub async fn execute(self) -> RunnerResult<RunSummary> {
        let started_at = Utc::now();
        let inputs = self.inputs;
        let project = ProjectInfo::load(&inputs.project_directory)?;

        let mut adapter_config = AdapterConfig::from_environment(&inputs.environment)
            .with_size_variant(project.data_size_variant);
        if inputs.environment.api_key.is_none() {
            adapter_config = adapter_config.with_token(config::load_token(&inputs.project_directory)?);
        }
        let adapter = DataAdapter::new(adapter_config, &project.competition_name)?;

        let data_directory = inputs.project_directory.join(config::DATA_DIRECTORY);
        let staged = stage(&adapter, inputs.round, &data_directory, inputs.force_download).await?;
        let release = &staged.release;

        let keys = test_keys(&release.splits, inputs.reduced_policy)?;
        let data = staged.load_tables()?;
        let handler = inputs.code.handler().await?;

        ensure_directory(&inputs.model_directory)?;
        let has_model = driver::has_model(&inputs.model_directory);

        let prediction_path = inputs
            .prediction_path
            .clone()
            .unwrap_or_else(|| data_directory.join(DEFAULT_PREDICTION_FILE));

        info!(
            competition = %project.competition_name,
            keys = keys.len(),
            has_model,
            "starting local run"
        );

        let executor = LocalExecutor::new(
            handler,
            run_context(release, &inputs.model_directory, inputs.has_gpu),
            data,
        );
        let collector = collector_for(&prediction_path, inputs.streaming)?;
        let (collector, report) = driver::run(
            &executor,
            &keys,
            &release.column_names,
            &inputs.loop_options,
            has_model,
            collector,
        )
        .await?;

        // Persisted before validation so a failing artifact can be inspected.
        collector.persist(&prediction_path)?;
        info!(path = %prediction_path.display(), "prediction saved");

        if !inputs.skip_checks {
            let checks = adapter.checks().await?;
            validate(
                &checks,
                &prediction_path,
                staged.path(role::EXAMPLE_PREDICTION),
                &release.column_names,
            )?;
        }

        Ok(RunSummary::finish(prediction_path, report, started_at))
    }
}

/// Inputs of a hosted run.
#[derive(Debug, Clone)]
pub struct CloudRunInputs {
    pub competition_name: String,
    pub competition_format: CompetitionFormat,
    pub round: RoundId,
    /// Staging directory for downloaded files.
    pub data_directory: PathBuf,
    /// Scratch root for state file and per-iteration directories.
    pub scratch_directory: PathBuf,
    pub code_directory: PathBuf,
    pub main_file: PathBuf,
    pub model_directory: PathBuf,
    pub prediction_path: PathBuf,
    pub launcher: Launcher,
    pub ping_urls: Vec<String>,
    pub fuse_pid: Option<u32>,
    pub fuse_signal_number: Option<i32>,
    pub interpreter: Option<PathBuf>,
    pub loop_options: LoopOptions,
    pub reduced_policy: ReducedPolicy,
    pub has_gpu: bool,
    pub skip_checks: bool,
    pub upload: bool,
    pub environment: Environment,
}

/// A run where every iteration happens in a sandboxed child.
pub struct CloudRun {
    inputs: CloudRunInputs,
    control_plane: Arc<dyn ControlPlane>,
}

impl CloudRun {
    pub fn new(inputs: CloudRunInputs, control_plane: Arc<dyn ControlPlane>) -> Self {
        Self {
            inputs,
            control_plane,
        }
    }

    pub async fn execute(self) -> RunnerResult<RunSummary> {
        let started_at = Utc::now();
        let inputs = self.inputs;

        let adapter = DataAdapter::new(
            AdapterConfig::from_environment(&inputs.environment),
            &inputs.competition_name,
        )?;
        let staged = stage(&adapter, inputs.round, &inputs.data_directory, false).await?;
        let release = &staged.release;
        let keys = test_keys(&release.splits, inputs.reduced_policy)?;

        let checks = if inputs.skip_checks {
            Vec::new()
        } else {
            adapter.checks().await?
        };
        let metrics = adapter.metrics().await?;

        ensure_directory(&inputs.scratch_directory)?;
        ensure_directory(&inputs.model_directory)?;
        let state_file = inputs.scratch_directory.join("state.json");
        staged
            .state_file(checks.clone(), metrics)
            .write(&state_file)?;

        let config = CloudConfig {
            launcher: inputs.launcher.clone(),
            competition_name: inputs.competition_name.clone(),
            competition_format: inputs.competition_format,
            x: staged.require(role::X)?.to_path_buf(),
            y: staged.require(role::Y)?.to_path_buf(),
            y_raw: staged.path(role::Y_RAW).map(Path::to_path_buf),
            scratch_directory: inputs.scratch_directory.clone(),
            code_directory: inputs.code_directory.clone(),
            main_file: inputs.main_file.clone(),
            model_directory: inputs.model_directory.clone(),
            state_file,
            ping_urls: inputs.ping_urls.clone(),
            embargo: release.embargo,
            number_of_features: release.number_of_features,
            gpu: inputs.has_gpu,
            column_names: Arc::new(release.column_names.clone()),
            fuse_pid: inputs.fuse_pid,
            fuse_signal_number: inputs.fuse_signal_number,
            interpreter: inputs.interpreter.clone(),
            prediction_format: TableFormat::Parquet,
        };

        let has_model = driver::has_model(&inputs.model_directory);
        info!(
            competition = %inputs.competition_name,
            keys = keys.len(),
            has_model,
            "starting cloud run"
        );

        let executor = CloudExecutor::new(config, Arc::clone(&self.control_plane));
        let (collector, report) = driver::run(
            &executor,
            &keys,
            &release.column_names,
            &inputs.loop_options,
            has_model,
            Collector::memory(),
        )
        .await?;

        collector.persist(&inputs.prediction_path)?;

        if !inputs.skip_checks {
            validate(
                &checks,
                &inputs.prediction_path,
                staged.path(role::EXAMPLE_PREDICTION),
                &release.column_names,
            )?;
        }

        if inputs.upload {
            self.control_plane.upload_result(&inputs.prediction_path).await?;
        }

        Ok(RunSummary::finish(inputs.prediction_path, report, started_at))
    }
}

/// Default launcher: this executable's `child` subcommand, unsandboxed.
pub fn self_launcher() -> RunnerResult<Launcher> {
    let program = std::env::current_exe().map_err(|e| RunnerError::io("current executable", e))?;
    Ok(Launcher {
        program,
        args: vec![OsString::from("child")],
    })
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::model::{DataFiles, DataReleaseSplit, Features, TargetColumnNames};

    fn staged(dir: &Path, files: &[(&str, &str, &str)]) -> Staged {
        let mut paths = BTreeMap::new();
        for (role_name, name, content) in files {
            let path = dir.join(name);
            std::fs::write(&path, content).unwrap();
            paths.insert(role_name.to_string(), path);
        }

        Staged {
            release: DataRelease {
                embargo: 0,
                number_of_features: 1,
                column_names: ColumnNames::new(
                    "id",
                    "moon",
                    None,
                    vec![TargetColumnNames::new(1, "t", "target", "prediction")],
                )
                .unwrap(),
                splits: Vec::new(),
                features: Features::default(),
                default_feature_group: "legacy".to_string(),
                data_files: DataFiles::new(),
            },
            paths,
        }
    }

    #[test]
    fn test_split_layout_is_concatenated() {
        let dir = TempDir::new().unwrap();
        let staged = staged(
            dir.path(),
            &[
                (role::X_TRAIN, "X_train.csv", "id,moon,f1\n1,1,0.1\n2,1,0.2\n"),
                (role::X_TEST, "X_test.csv", "id,moon,f1\n1,2,0.3\n"),
                (role::Y_TRAIN, "y_train.csv", "id,moon,target\n1,1,1.0\n2,1,0.0\n"),
            ],
        );

        let data = staged.load_tables().unwrap();
        assert_eq!(data.x.num_rows(), 3);
        assert_eq!(data.y.num_rows(), 2);
        assert_eq!(
            data.x.column("moon").unwrap().keys().unwrap(),
            vec![Some(1), Some(1), Some(2)]
        );
    }

    #[test]
    fn test_whole_layout_needs_y() {
        let dir = TempDir::new().unwrap();
        let staged = staged(dir.path(), &[(role::X, "X.csv", "id,moon,f1\n1,1,0.1\n")]);

        let err = staged.load_tables().unwrap_err();
        assert!(matches!(
            err,
            RunnerError::Adapter(AdapterError::InvalidResponse { ref message }) if message.contains("y")
        ));
    }

    #[test]
    fn test_missing_example_skips_checks() {
        let dir = TempDir::new().unwrap();
        let staged = staged(dir.path(), &[]);
        validate(
            &[],
            Path::new("/nonexistent/prediction.csv"),
            None,
            &staged.release.column_names,
        )
        .unwrap();
    }

    #[test]
    fn test_state_file_carries_metrics() {
        let dir = TempDir::new().unwrap();
        let mut staged = staged(dir.path(), &[]);
        staged.release.splits = vec![DataReleaseSplit::train(1), DataReleaseSplit::test(2)];

        let metric: Metric = serde_json::from_value(serde_json::json!({
            "id": 7,
            "name": "spearman",
            "function": "SPEARMAN",
            "targetName": "t",
            "score": true
        }))
        .unwrap();

        let path = dir.path().join("state.json");
        staged.state_file(Vec::new(), vec![metric.clone()]).write(&path).unwrap();

        let state = StateFile::read(&path).unwrap();
        assert_eq!(state.metrics, vec![metric]);
        assert_eq!(state.splits.len(), 2);
    }
}
