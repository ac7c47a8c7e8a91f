pub mod child;
pub mod cloud;
pub mod dispatch;
pub mod local;

pub use dispatch::dispatch;

use crunch_core::driver::{LoopOptions, LoopReport};
use crunch_core::RunnerError;

use super::args::LoopArgs;

impl LoopArgs {
    pub fn options(&self) -> LoopOptions {
        LoopOptions {
            train_frequency: self.train_frequency,
            force_first_train: !self.no_force_first_train,
            determinism_check: self.determinism_check,
        }
    }
}

/// Log a failed run and turn it into its exit code.
pub(crate) fn report_failure(error: &RunnerError) -> i32 {
    tracing::error!(exit_code = error.exit_code(), "run failed");
    eprintln!("error: {error}");
    error.exit_code()
}

/// `passed`/`failed` when the determinism check ran.
pub(crate) fn determinism_outcome(report: &LoopReport) -> Option<&'static str> {
    report
        .determinism
        .map(|deterministic| if deterministic { "passed" } else { "failed" })
}

pub(crate) fn log_determinism(report: &LoopReport) {
    match determinism_outcome(report) {
        Some("passed") => tracing::info!(determinism = "passed", "determinism check"),
        Some(outcome) => tracing::warn!(determinism = outcome, "inference is not deterministic"),
        None => {}
    }
}
