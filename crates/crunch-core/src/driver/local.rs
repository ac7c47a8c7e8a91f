use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::context::{LoopContext, RunContext};
use super::views::{test_view, train_view};
use super::{Iteration, IterationExecutor};
use crate::binder::{bind, Parameter, Value};
use crate::errors::RunnerResult;
use crate::loader::Handler;
use crate::table::Table;

/// Full feature and target tables across every moon.
#[derive(Debug, Clone)]
pub struct LocalData {
    pub x: Arc<Table>,
    pub y: Arc<Table>,
}

/// Calls the user handler in-process.
#[derive(Debug)]
pub struct LocalExecutor {
    handler: Handler,
    run: RunContext,
    data: LocalData,
}

impl LocalExecutor {
    pub fn new(handler: Handler, run: RunContext, data: LocalData) -> Self {
        Self { handler, run, data }
    }

    pub fn run_context(&self) -> &RunContext {
        &self.run
    }
}

#[async_trait]
impl IterationExecutor for LocalExecutor {
    async fn execute(&self, iteration: &Iteration) -> RunnerResult<Option<Table>> {
        let moon_column = self.run.column_names.moon();
        let context = LoopContext::new(&self.run, iteration.key, iteration.train);

        if iteration.train {
            let x_train = train_view(&self.data.x, moon_column, iteration.key, self.run.embargo)?;
            let y_train = train_view(&self.data.y, moon_column, iteration.key, self.run.embargo)?;
            debug!(
                moon = iteration.key,
                x_rows = x_train.num_rows(),
                y_rows = y_train.num_rows(),
                "calling train"
            );

            let mut pool = context.to_pool();
            pool.insert(Parameter::XTrain, Value::Table(Arc::new(x_train)))
                .insert(Parameter::YTrain, Value::Table(Arc::new(y_train)));

            let arguments = bind(self.handler.train.signature(), &pool)?;
            self.handler.train.call(arguments).await?;
        }

        let x_test = test_view(&self.data.x, moon_column, iteration.key)?;
        debug!(moon = iteration.key, rows = x_test.num_rows(), "calling infer");

        let mut pool = context.trained(iteration.train).to_pool();
        pool.insert(Parameter::XTest, Value::Table(Arc::new(x_test)));

        let arguments = bind(self.handler.infer.signature(), &pool)?;
        Ok(self.handler.infer.call(arguments).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use super::*;
    use crate::binder::Signature;
    use crate::loader::{UserCodeError, UserModule, INFER, TRAIN};
    use crate::model::{ColumnNames, Features, TargetColumnNames};
    use crate::table::Column;

    fn run_context(embargo: i64) -> RunContext {
        RunContext {
            embargo,
            number_of_features: 1,
            model_directory: PathBuf::from("resources"),
            has_gpu: false,
            column_names: Arc::new(
                ColumnNames::new(
                    "id",
                    "moon",
                    None,
                    vec![TargetColumnNames::new(1, "w", "target", "prediction")],
                )
                .unwrap(),
            ),
            features: Features::default(),
        }
    }

    fn data() -> LocalData {
        let moons: Vec<i64> = (90..=100).collect();
        LocalData {
            x: Arc::new(
                Table::new(vec![
                    Column::int("id", moons.iter().map(|_| 1)),
                    Column::int("moon", moons.iter().copied()),
                    Column::float("f1", moons.iter().map(|m| *m as f64)),
                ])
                .unwrap(),
            ),
            y: Arc::new(
                Table::new(vec![
                    Column::int("id", moons.iter().map(|_| 1)),
                    Column::int("moon", moons.iter().copied()),
                    Column::float("target", moons.iter().map(|_| 0.0)),
                ])
                .unwrap(),
            ),
        }
    }

    fn moons_of(table: &Table) -> Vec<i64> {
        table
            .column("moon")
            .unwrap()
            .keys()
            .unwrap()
            .into_iter()
            .flatten()
            .collect()
    }

    #[tokio::test]
    async fn test_views_handed_to_user_code() {
        let seen_train = Arc::new(Mutex::new(Vec::new()));
        let seen_infer = Arc::new(Mutex::new(Vec::new()));
        let train_sink = Arc::clone(&seen_train);
        let infer_sink = Arc::clone(&seen_infer);

        let module = UserModule::builder("inline")
            .entrypoint(TRAIN, Signature::named(["X_train", "y_train"]), move |arguments| {
                let x = arguments.get("X_train").and_then(Value::as_table).unwrap();
                train_sink.lock().unwrap().extend(moons_of(x));
                Ok(None)
            })
            .entrypoint(
                INFER,
                Signature::named(["x_test", "has_trained"]),
                move |arguments| {
                    let x = arguments.get("x_test").and_then(Value::as_table).unwrap();
                    infer_sink.lock().unwrap().extend(moons_of(x));
                    if arguments.get("has_trained").and_then(Value::as_flag) != Some(true) {
                        return Err(UserCodeError::Visible("expected training".into()));
                    }
                    Ok(Some(x.clone()))
                },
            )
            .build();

        let executor = LocalExecutor::new(Handler::from_module(&module).unwrap(), run_context(5), data());
        let prediction = executor
            .execute(&Iteration {
                index: 0,
                key: 100,
                train: true,
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(*seen_train.lock().unwrap(), vec![90, 91, 92, 93, 94]);
        assert_eq!(*seen_infer.lock().unwrap(), vec![100]);
        assert_eq!(prediction.num_rows(), 1);
    }
}
