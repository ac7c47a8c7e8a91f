use std::ffi::OsString;
use std::sync::Arc;
use std::time::Duration;

use crunch_core::config::Environment;
use crunch_core::runner::{self_launcher, CloudRun, CloudRunInputs};
use crunch_core::sandbox::{ControlPlane, HttpControlPlane, Launcher, NoopControlPlane, DEFAULT_PING_URLS};

use super::super::args::CloudArgs;
use super::{log_determinism, report_failure};
use crate::exit_codes::SUCCESS;

const UPLOAD_RETRY_DELAY: Duration = Duration::from_secs(5);

pub async fn run(args: CloudArgs) -> anyhow::Result<i32> {
    let environment = Environment::from_env();

    let launcher = match &args.launcher {
        Some(program) => Launcher {
            program: program.clone(),
            args: args.launcher_args.iter().map(OsString::from).collect(),
        },
        None => self_launcher()?,
    };

    let ping_urls = if args.no_ping {
        Vec::new()
    } else if args.ping_urls.is_empty() {
        DEFAULT_PING_URLS.iter().map(|url| url.to_string()).collect()
    } else {
        args.ping_urls.clone()
    };

    let control_plane: Arc<dyn ControlPlane> = match &args.run_id {
        Some(run_id) => Arc::new(
            HttpControlPlane::new(&environment.api_base_url, run_id.clone())?
                .with_api_key(environment.api_key.clone())
                .with_retries(args.upload_retries, UPLOAD_RETRY_DELAY),
        ),
        None => {
            tracing::warn!("no run id, control plane reporting disabled");
            Arc::new(NoopControlPlane)
        }
    };

    let inputs = CloudRunInputs {
        competition_name: args.competition_name.clone(),
        competition_format: args.competition_format,
        round: args.round,
        data_directory: args.data_directory.clone(),
        scratch_directory: args.scratch_directory.clone(),
        code_directory: args.code_directory.clone(),
        main_file: args.main_file.clone(),
        model_directory: args.model_directory.clone(),
        prediction_path: args.prediction.clone(),
        launcher,
        ping_urls,
        fuse_pid: args.fuse_pid,
        fuse_signal_number: args.fuse_signal_number,
        interpreter: args.interpreter.clone(),
        loop_options: args.looping.options(),
        reduced_policy: args.looping.reduced.into(),
        has_gpu: args.gpu,
        skip_checks: args.skip_checks,
        upload: args.run_id.is_some(),
        environment,
    };

    match CloudRun::new(inputs, control_plane).execute().await {
        Ok(summary) => {
            log_determinism(&summary.report);
            println!("{}", summary.prediction_path.display());
            Ok(SUCCESS)
        }
        Err(e) => Ok(report_failure(&e)),
    }
}
