use crunch_core::sandbox::{run_child, write_trace, SandboxCommand, TargetSpec};

use super::super::args::ChildArgs;
use super::report_failure;
use crate::exit_codes::SUCCESS;

impl ChildArgs {
    pub fn into_command(self) -> SandboxCommand {
        let targets = self
            .targets
            .chunks_exact(3)
            .map(|chunk| TargetSpec {
                name: chunk[0].clone(),
                input: chunk[1].clone(),
                output: chunk[2].clone(),
            })
            .collect();

        SandboxCommand {
            competition_name: self.competition_name,
            competition_format: self.competition_format,
            x: self.x,
            y: self.y,
            y_raw: self.y_raw,
            main_file: self.main_file,
            code_directory: self.code_directory,
            model_directory: self.model_directory,
            prediction: self.prediction,
            trace: self.trace,
            state_file: self.state_file,
            ping_urls: self.ping_urls,
            train: self.train,
            moon: self.moon,
            embargo: self.embargo,
            number_of_features: self.number_of_features,
            gpu: self.gpu,
            id_column_name: self.id_column_name,
            moon_column_name: self.moon_column_name,
            targets,
            fuse_pid: self.fuse_pid,
            fuse_signal_number: self.fuse_signal_number,
            interpreter: self.interpreter,
        }
    }
}

pub async fn run(args: ChildArgs) -> anyhow::Result<i32> {
    let command = args.into_command();

    match run_child(&command).await {
        Ok(()) => Ok(SUCCESS),
        Err(e) => {
            write_trace(&command.trace, &e);
            Ok(report_failure(&e))
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use crate::cli::args::{Cli, Command};

    #[test]
    fn test_child_argv_round_trips_sandbox_command() {
        let argv = [
            "crunch-runner",
            "child",
            "--competition-name",
            "datacrunch",
            "--competition-format",
            "TIMESERIES",
            "--x",
            "/data/X.parquet",
            "--y",
            "/data/y.parquet",
            "--main-file",
            "main.py",
            "--code-directory",
            "/code",
            "--model-directory",
            "/model",
            "--prediction",
            "/out/prediction.parquet",
            "--trace",
            "/out/trace.txt",
            "--state-file",
            "/state.json",
            "--ping-url",
            "https://example.com/",
            "--train",
            "false",
            "--moon",
            "7",
            "--embargo",
            "2",
            "--number-of-features",
            "3",
            "--gpu",
            "true",
            "--id-column-name",
            "id",
            "--moon-column-name",
            "moon",
            "--target",
            "target_w",
            "target_w",
            "prediction_w",
            "--target",
            "target_r",
            "target_r",
            "prediction_r",
        ];

        let cli = Cli::try_parse_from(argv).unwrap();
        let Command::Child(args) = cli.cmd else {
            panic!("expected child subcommand");
        };
        let command = args.into_command();

        assert!(!command.train);
        assert!(command.gpu);
        assert_eq!(command.moon, 7);
        assert_eq!(command.targets.len(), 2);
        assert_eq!(command.targets[1].output, "prediction_r");

        let mut reparsed = vec!["crunch-runner".into(), "child".into()];
        reparsed.extend(command.to_args());
        let cli = Cli::try_parse_from(reparsed).unwrap();
        let Command::Child(args) = cli.cmd else {
            panic!("expected child subcommand");
        };
        assert_eq!(args.into_command(), command);
    }
}
