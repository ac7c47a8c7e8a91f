//! The child's command line.

use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::model::{ColumnNames, ModelError, TargetColumnNames};

/// Probed by the child; none of them may answer.
pub const DEFAULT_PING_URLS: &[&str] = &["https://www.google.com/", "https://api.hub.crunchdao.com/"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompetitionFormat {
    #[default]
    Timeseries,
}

impl fmt::Display for CompetitionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeseries => f.write_str("TIMESERIES"),
        }
    }
}

impl FromStr for CompetitionFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TIMESERIES" => Ok(Self::Timeseries),
            other => Err(format!("unsupported competition format: {other}")),
        }
    }
}

/// `--target <name> <input> <output>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    pub name: String,
    pub input: String,
    pub output: String,
}

/// Everything the child needs, as passed on its command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxCommand {
    pub competition_name: String,
    pub competition_format: CompetitionFormat,
    pub x: PathBuf,
    pub y: PathBuf,
    pub y_raw: Option<PathBuf>,
    /// Relative to `code_directory`.
    pub main_file: PathBuf,
    pub code_directory: PathBuf,
    pub model_directory: PathBuf,
    pub prediction: PathBuf,
    pub trace: PathBuf,
    pub state_file: PathBuf,
    pub ping_urls: Vec<String>,
    pub train: bool,
    pub moon: i64,
    pub embargo: i64,
    pub number_of_features: i64,
    pub gpu: bool,
    pub id_column_name: String,
    pub moon_column_name: String,
    pub targets: Vec<TargetSpec>,
    pub fuse_pid: Option<u32>,
    pub fuse_signal_number: Option<i32>,
    pub interpreter: Option<PathBuf>,
}

impl SandboxCommand {
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        let mut push = |flag: &str, value: OsString| {
            args.push(flag.into());
            args.push(value);
        };

        push("--competition-name", self.competition_name.clone().into());
        push("--competition-format", self.competition_format.to_string().into());
        push("--x", self.x.clone().into());
        push("--y", self.y.clone().into());
        if let Some(y_raw) = &self.y_raw {
            push("--y-raw", y_raw.clone().into());
        }
        push("--main-file", self.main_file.clone().into());
        push("--code-directory", self.code_directory.clone().into());
        push("--model-directory", self.model_directory.clone().into());
        push("--prediction", self.prediction.clone().into());
        push("--trace", self.trace.clone().into());
        push("--state-file", self.state_file.clone().into());
        for url in &self.ping_urls {
            push("--ping-url", url.into());
        }
        push("--train", self.train.to_string().into());
        push("--moon", self.moon.to_string().into());
        push("--embargo", self.embargo.to_string().into());
        push("--number-of-features", self.number_of_features.to_string().into());
        push("--gpu", self.gpu.to_string().into());
        push("--id-column-name", self.id_column_name.clone().into());
        push("--moon-column-name", self.moon_column_name.clone().into());
        if let Some(pid) = self.fuse_pid {
            push("--fuse-pid", pid.to_string().into());
        }
        if let Some(signal) = self.fuse_signal_number {
            push("--fuse-signal-number", signal.to_string().into());
        }
        if let Some(interpreter) = &self.interpreter {
            push("--interpreter", interpreter.clone().into());
        }

        for target in &self.targets {
            args.push("--target".into());
            args.push(target.name.clone().into());
            args.push(target.input.clone().into());
            args.push(target.output.clone().into());
        }

        args
    }

    /// Targets get ids by position; the first one is primary.
    pub fn column_names(&self) -> Result<ColumnNames, ModelError> {
        let targets = self
            .targets
            .iter()
            .enumerate()
            .map(|(index, t)| {
                TargetColumnNames::new(index as i64 + 1, &t.name, &t.input, &t.output)
            })
            .collect();

        ColumnNames::new(&self.id_column_name, &self.moon_column_name, None, targets)
    }

    pub fn targets_of(column_names: &ColumnNames) -> Vec<TargetSpec> {
        column_names
            .targets()
            .iter()
            .map(|t| TargetSpec {
                name: t.name.clone(),
                input: t.input.clone(),
                output: t.output.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command() -> SandboxCommand {
        SandboxCommand {
            competition_name: "mid-one".into(),
            competition_format: CompetitionFormat::Timeseries,
            x: "/scratch/data/X.parquet".into(),
            y: "/scratch/data/y.parquet".into(),
            y_raw: None,
            main_file: "main.py".into(),
            code_directory: "/code".into(),
            model_directory: "/model".into(),
            prediction: "/scratch/prediction.parquet".into(),
            trace: "/scratch/trace.txt".into(),
            state_file: "/scratch/state.json".into(),
            ping_urls: vec!["https://a/".into(), "https://b/".into()],
            train: true,
            moon: 42,
            embargo: 3,
            number_of_features: 10,
            gpu: false,
            id_column_name: "id".into(),
            moon_column_name: "moon".into(),
            targets: vec![
                TargetSpec {
                    name: "w".into(),
                    input: "target_w".into(),
                    output: "prediction_w".into(),
                },
                TargetSpec {
                    name: "r".into(),
                    input: "target_r".into(),
                    output: "prediction_r".into(),
                },
            ],
            fuse_pid: Some(1234),
            fuse_signal_number: Some(10),
            interpreter: None,
        }
    }

    #[test]
    fn test_args() {
        let args: Vec<String> = command()
            .to_args()
            .into_iter()
            .map(|a| a.into_string().unwrap())
            .collect();

        let find = |flag: &str| {
            let index = args.iter().position(|a| a == flag).unwrap();
            args[index + 1].clone()
        };

        assert_eq!(find("--competition-format"), "TIMESERIES");
        assert_eq!(find("--train"), "true");
        assert_eq!(find("--moon"), "42");
        assert_eq!(find("--fuse-pid"), "1234");
        assert!(!args.contains(&"--y-raw".to_string()));
        assert!(!args.contains(&"--interpreter".to_string()));
        assert_eq!(args.iter().filter(|a| *a == "--ping-url").count(), 2);

        let target = args.iter().position(|a| a == "--target").unwrap();
        assert_eq!(&args[target + 1..target + 4], ["w", "target_w", "prediction_w"]);
    }

    #[test]
    fn test_column_names_from_targets() {
        let names = command().column_names().unwrap();
        assert_eq!(names.primary_target().output, "prediction_w");
        assert_eq!(names.targets()[1].id, 2);

        let mut empty = command();
        empty.targets.clear();
        assert_eq!(empty.column_names().unwrap_err(), ModelError::NoTarget);
    }
}
