//! The moon-indexed train/infer loop.
//!
//! The loop is the same for local and cloud runs; only the
//! [`IterationExecutor`] differs.

use std::path::Path;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::collector::PredictionCollector;
use crate::errors::{RunnerError, RunnerResult};
use crate::model::ColumnNames;
use crate::table::Table;

mod context;
mod local;
mod views;

pub use context::{LoopContext, RunContext};
pub use local::{LocalData, LocalExecutor};
pub use views::{test_view, train_view};

/// Loop knobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopOptions {
    /// Train on every key divisible by this; `0` disables periodic training.
    pub train_frequency: i64,
    /// Train on the first key even if a model exists.
    pub force_first_train: bool,
    /// Re-run `infer` on every key and compare outputs.
    pub determinism_check: bool,
}

/// Whether iteration `index` on `key` trains.
pub fn should_train(index: usize, key: i64, options: &LoopOptions, has_model: bool) -> bool {
    if options.train_frequency != 0 && key.rem_euclid(options.train_frequency) == 0 {
        return true;
    }

    index == 0 && (!has_model || options.force_first_train)
}

/// True when `model_directory` exists and holds at least one entry.
pub fn has_model(model_directory: &Path) -> bool {
    std::fs::read_dir(model_directory)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Iteration {
    pub index: usize,
    pub key: i64,
    pub train: bool,
}

/// Runs one iteration: optional training, then inference.
#[async_trait]
pub trait IterationExecutor: Send + Sync {
    async fn execute(&self, iteration: &Iteration) -> RunnerResult<Option<Table>>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopReport {
    pub iterations: usize,
    pub trained_keys: Vec<i64>,
    /// `None` when the determinism check is disabled.
    pub determinism: Option<bool>,
}

/// Drive `executor` over `keys` in ascending order, appending every
/// prediction to `collector`. On error the collector is discarded.
pub async fn run<E, C>(
    executor: &E,
    keys: &[i64],
    column_names: &ColumnNames,
    options: &LoopOptions,
    has_model: bool,
    mut collector: C,
) -> RunnerResult<(C, LoopReport)>
where
    E: IterationExecutor + ?Sized,
    C: PredictionCollector,
{
    let mut keys = keys.to_vec();
    keys.sort_unstable();

    let mut report = LoopReport {
        determinism: options.determinism_check.then_some(true),
        ..LoopReport::default()
    };

    for (index, &key) in keys.iter().enumerate() {
        let iteration = Iteration {
            index,
            key,
            train: should_train(index, key, options, has_model),
        };

        match run_iteration(executor, &iteration, column_names, options, &mut collector).await {
            Ok(deterministic) => {
                if iteration.train {
                    report.trained_keys.push(key);
                }
                if deterministic == Some(false) {
                    report.determinism = Some(false);
                }
                report.iterations += 1;
            }
            Err(e) => {
                collector.discard();
                return Err(e);
            }
        }
    }

    info!(
        iterations = report.iterations,
        trained = report.trained_keys.len(),
        determinism = ?report.determinism,
        "loop finished"
    );

    Ok((collector, report))
}

async fn run_iteration<E, C>(
    executor: &E,
    iteration: &Iteration,
    column_names: &ColumnNames,
    options: &LoopOptions,
    collector: &mut C,
) -> RunnerResult<Option<bool>>
where
    E: IterationExecutor + ?Sized,
    C: PredictionCollector,
{
    info!(moon = iteration.key, train = iteration.train, "iteration");

    let prediction = executor.execute(iteration).await?;
    let prediction = validate_shape(prediction, iteration.key, column_names)?;

    let deterministic = if options.determinism_check {
        let replay = executor
            .execute(&Iteration {
                train: false,
                ..*iteration
            })
            .await?;

        let same = replay.is_some_and(|replay| replay.bitwise_eq(&prediction));
        if !same {
            warn!(moon = iteration.key, "inference is not deterministic");
        }
        Some(same)
    } else {
        None
    };

    collector.append(prediction)?;
    Ok(deterministic)
}

/// `infer` must return a table holding the id, the moon and every target's
/// output column.
pub fn validate_shape(
    prediction: Option<Table>,
    moon: i64,
    column_names: &ColumnNames,
) -> RunnerResult<Table> {
    let prediction = prediction.ok_or_else(|| RunnerError::InvalidPrediction {
        moon,
        message: "infer returned nothing".to_string(),
    })?;

    let required = [column_names.id(), column_names.moon()]
        .into_iter()
        .chain(column_names.targets().iter().map(|t| t.output.as_str()));

    for name in required {
        if prediction.column(name).is_none() {
            return Err(RunnerError::InvalidPrediction {
                moon,
                message: format!("missing column: {name}"),
            });
        }
    }

    Ok(prediction)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::collector::MemoryCollector;
    use crate::model::TargetColumnNames;
    use crate::table::Column;

    fn column_names() -> ColumnNames {
        ColumnNames::new(
            "id",
            "moon",
            None,
            vec![TargetColumnNames::new(1, "w", "target", "prediction")],
        )
        .unwrap()
    }

    struct Recording {
        calls: Mutex<Vec<Iteration>>,
        fail_at: Option<i64>,
    }

    #[async_trait]
    impl IterationExecutor for Recording {
        async fn execute(&self, iteration: &Iteration) -> RunnerResult<Option<Table>> {
            self.calls.lock().unwrap().push(*iteration);
            if self.fail_at == Some(iteration.key) {
                return Err(RunnerError::internal("boom"));
            }
            Ok(Some(
                Table::new(vec![
                    Column::int("id", [1]),
                    Column::int("moon", [iteration.key]),
                    Column::float("prediction", [iteration.key as f64 * 0.1]),
                ])
                .unwrap(),
            ))
        }
    }

    fn recording(fail_at: Option<i64>) -> Recording {
        Recording {
            calls: Mutex::new(Vec::new()),
            fail_at,
        }
    }

    #[test]
    fn test_should_train() {
        let periodic = LoopOptions {
            train_frequency: 2,
            ..LoopOptions::default()
        };
        assert!(should_train(3, 4, &periodic, true));
        assert!(!should_train(3, 5, &periodic, true));
        assert!(should_train(0, 5, &periodic, false));
        assert!(!should_train(0, 5, &periodic, true));

        let forced = LoopOptions {
            force_first_train: true,
            ..LoopOptions::default()
        };
        assert!(should_train(0, 5, &forced, true));
        assert!(!should_train(1, 6, &forced, false));
    }

    #[test]
    fn test_has_model() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(!has_model(&dir.path().join("missing")));
        assert!(!has_model(dir.path()));
        std::fs::write(dir.path().join("model.bin"), b"x").unwrap();
        assert!(has_model(dir.path()));
    }

    #[tokio::test]
    async fn test_keys_run_in_ascending_order() {
        let executor = recording(None);
        let options = LoopOptions {
            train_frequency: 0,
            force_first_train: false,
            determinism_check: false,
        };

        let (collector, report) = run(
            &executor,
            &[30, 10, 20],
            &column_names(),
            &options,
            false,
            MemoryCollector::new(),
        )
        .await
        .unwrap();

        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls.iter().map(|c| c.key).collect::<Vec<_>>(), vec![10, 20, 30]);
        assert_eq!(report.trained_keys, vec![10]);
        assert_eq!(report.determinism, None);
        assert_eq!(collector.len(), 3);
    }

    #[tokio::test]
    async fn test_determinism_replay_does_not_train() {
        let executor = recording(None);
        let options = LoopOptions {
            train_frequency: 1,
            force_first_train: true,
            determinism_check: true,
        };

        let (_, report) = run(
            &executor,
            &[10, 20],
            &column_names(),
            &options,
            false,
            MemoryCollector::new(),
        )
        .await
        .unwrap();

        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls.len(), 4);
        assert!(calls[0].train && !calls[1].train);
        assert_eq!(report.determinism, Some(true));
    }

    #[tokio::test]
    async fn test_error_stops_loop() {
        let executor = recording(Some(20));
        let result = run(
            &executor,
            &[10, 20, 30],
            &column_names(),
            &LoopOptions::default(),
            false,
            MemoryCollector::new(),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(executor.calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_validate_shape() {
        let names = column_names();
        assert!(matches!(
            validate_shape(None, 1, &names),
            Err(RunnerError::InvalidPrediction { .. })
        ));

        let partial = Table::new(vec![Column::int("id", [1]), Column::int("moon", [1])]).unwrap();
        let err = validate_shape(Some(partial), 1, &names).unwrap_err();
        assert_eq!(err.to_string(), "invalid prediction at moon 1: missing column: prediction");
    }
}
