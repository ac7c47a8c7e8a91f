use crunch_core::config::Environment;
use crunch_core::loader::ScriptOptions;
use crunch_core::runner::{CodeSource, LocalRun, LocalRunInputs};

use super::super::args::LocalArgs;
use super::{log_determinism, report_failure};
use crate::exit_codes::SUCCESS;

pub async fn run(args: LocalArgs) -> anyhow::Result<i32> {
    let project = args.project_directory.clone();

    let mut options = ScriptOptions::default().with_table_format(args.exchange_format.into());
    if let Some(interpreter) = &args.interpreter {
        options = options.with_interpreter(interpreter);
    }

    let mut inputs = LocalRunInputs::new(
        &project,
        CodeSource::Script {
            path: project.join(&args.main_file),
            options,
        },
    );
    inputs.model_directory = project.join(&args.model_directory);
    inputs.round = args.round;
    inputs.loop_options = args.looping.options();
    inputs.reduced_policy = args.looping.reduced.into();
    inputs.force_download = args.force_download;
    inputs.skip_checks = args.skip_checks;
    inputs.has_gpu = args.gpu;
    inputs.streaming = args.streaming;
    inputs.prediction_path = args.prediction.clone();
    inputs.environment = Environment::from_env();

    match LocalRun::new(inputs).execute().await {
        Ok(summary) => {
            log_determinism(&summary.report);
            println!("{}", summary.prediction_path.display());
            Ok(SUCCESS)
        }
        Err(e) => Ok(report_failure(&e)),
    }
}
