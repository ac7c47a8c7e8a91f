use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use crunch_core::adapter::RoundId;
use crunch_core::model::{ReducedPolicy, SplitReduced};
use crunch_core::sandbox::CompetitionFormat;
use crunch_core::table::TableFormat;

#[derive(Parser)]
#[command(
    name = "crunch-runner",
    version,
    about = "Runs a competition submission against the held-out data"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the submission in-process on a project directory
    Local(LocalArgs),
    /// Drive the loop with every iteration in a sandboxed child
    Cloud(CloudArgs),
    /// One sandboxed iteration (launched by `cloud`)
    #[command(hide = true)]
    Child(ChildArgs),
}

#[derive(Args, Debug, Clone)]
pub struct LoopArgs {
    /// Train on every moon divisible by this value; 0 disables periodic training
    #[arg(long, default_value_t = 1)]
    pub train_frequency: i64,

    /// Do not force training on the first moon when a model already exists
    #[arg(long)]
    pub no_force_first_train: bool,

    /// Re-run inference on every moon and compare outputs
    #[arg(long)]
    pub determinism_check: bool,

    /// Which reduced test moons to run
    #[arg(long, value_enum, default_value_t = ReducedArg::Include)]
    pub reduced: ReducedArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReducedArg {
    Include,
    Exclude,
    X,
    Xy,
}

impl From<ReducedArg> for ReducedPolicy {
    fn from(value: ReducedArg) -> Self {
        match value {
            ReducedArg::Include => ReducedPolicy::Include,
            ReducedArg::Exclude => ReducedPolicy::Exclude,
            ReducedArg::X => ReducedPolicy::Only(SplitReduced::X),
            ReducedArg::Xy => ReducedPolicy::Only(SplitReduced::Xy),
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatArg {
    Csv,
    Parquet,
}

impl From<FormatArg> for TableFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Csv => TableFormat::Csv,
            FormatArg::Parquet => TableFormat::Parquet,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct LocalArgs {
    /// Project directory holding `.crunchdao/`
    #[arg(long, default_value = ".")]
    pub project_directory: PathBuf,

    /// Entrypoint script, relative to the project directory
    #[arg(long, default_value = "main.py")]
    pub main_file: PathBuf,

    /// Interpreter for the entrypoint script
    #[arg(long)]
    pub interpreter: Option<PathBuf>,

    /// Table format exchanged with the script
    #[arg(long, value_enum, default_value_t = FormatArg::Parquet)]
    pub exchange_format: FormatArg,

    /// Model directory, relative to the project directory
    #[arg(long, default_value = "resources")]
    pub model_directory: PathBuf,

    /// Round number, `@current` or `@last`
    #[arg(long, default_value = "@current")]
    pub round: RoundId,

    /// Output path (default: <project>/data/prediction.parquet)
    #[arg(long)]
    pub prediction: Option<PathBuf>,

    /// Download data files even when already staged
    #[arg(long)]
    pub force_download: bool,

    /// Skip prediction checks
    #[arg(long)]
    pub skip_checks: bool,

    /// Tell the user code a GPU is available
    #[arg(long)]
    pub gpu: bool,

    /// Stream predictions to disk instead of memory
    #[arg(long)]
    pub streaming: bool,

    #[command(flatten)]
    pub looping: LoopArgs,
}

#[derive(Args, Debug, Clone)]
pub struct CloudArgs {
    #[arg(long)]
    pub competition_name: String,

    #[arg(long, default_value = "TIMESERIES")]
    pub competition_format: CompetitionFormat,

    /// Round number, `@current` or `@last`
    #[arg(long, default_value = "@current")]
    pub round: RoundId,

    /// Staging directory for data files
    #[arg(long)]
    pub data_directory: PathBuf,

    /// Root of the state file and per-iteration scratch directories
    #[arg(long)]
    pub scratch_directory: PathBuf,

    #[arg(long)]
    pub code_directory: PathBuf,

    /// Entrypoint script, relative to the code directory
    #[arg(long, default_value = "main.py")]
    pub main_file: PathBuf,

    #[arg(long)]
    pub model_directory: PathBuf,

    /// Final prediction artifact
    #[arg(long)]
    pub prediction: PathBuf,

    /// Sandbox launcher program (default: this binary's `child` subcommand)
    #[arg(long)]
    pub launcher: Option<PathBuf>,

    /// Argument passed to the launcher before the child argv (repeatable)
    #[arg(long = "launcher-arg", allow_hyphen_values = true)]
    pub launcher_args: Vec<String>,

    /// URL the child must not reach (repeatable)
    #[arg(long = "ping-url")]
    pub ping_urls: Vec<String>,

    /// Disable the liveness probe
    #[arg(long)]
    pub no_ping: bool,

    #[arg(long)]
    pub fuse_pid: Option<u32>,

    #[arg(long)]
    pub fuse_signal_number: Option<i32>,

    #[arg(long)]
    pub interpreter: Option<PathBuf>,

    /// Control plane run identifier; without it nothing is reported
    #[arg(long, env = "RUN_ID")]
    pub run_id: Option<String>,

    /// Attempts for the result upload
    #[arg(long, default_value_t = 3)]
    pub upload_retries: u32,

    #[arg(long)]
    pub skip_checks: bool,

    #[arg(long)]
    pub gpu: bool,

    #[command(flatten)]
    pub looping: LoopArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ChildArgs {
    #[arg(long)]
    pub competition_name: String,

    #[arg(long)]
    pub competition_format: CompetitionFormat,

    #[arg(long)]
    pub x: PathBuf,

    #[arg(long)]
    pub y: PathBuf,

    #[arg(long)]
    pub y_raw: Option<PathBuf>,

    #[arg(long)]
    pub main_file: PathBuf,

    #[arg(long)]
    pub code_directory: PathBuf,

    #[arg(long)]
    pub model_directory: PathBuf,

    #[arg(long)]
    pub prediction: PathBuf,

    #[arg(long)]
    pub trace: PathBuf,

    #[arg(long)]
    pub state_file: PathBuf,

    #[arg(long = "ping-url")]
    pub ping_urls: Vec<String>,

    #[arg(long, action = ArgAction::Set)]
    pub train: bool,

    #[arg(long, allow_negative_numbers = true)]
    pub moon: i64,

    #[arg(long)]
    pub embargo: i64,

    #[arg(long)]
    pub number_of_features: i64,

    #[arg(long, action = ArgAction::Set)]
    pub gpu: bool,

    #[arg(long)]
    pub id_column_name: String,

    #[arg(long)]
    pub moon_column_name: String,

    /// `--target <NAME> <INPUT> <OUTPUT>`, repeated per target
    #[arg(
        long = "target",
        num_args = 3,
        value_names = ["NAME", "INPUT", "OUTPUT"],
        action = ArgAction::Append,
        required = true
    )]
    pub targets: Vec<String>,

    #[arg(long)]
    pub fuse_pid: Option<u32>,

    #[arg(long)]
    pub fuse_signal_number: Option<i32>,

    #[arg(long)]
    pub interpreter: Option<PathBuf>,
}
