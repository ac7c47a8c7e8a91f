use std::path::PathBuf;
use std::sync::Arc;

use crate::binder::{Parameter, ParameterPool, Value};
use crate::model::{ColumnNames, Features};

/// Values that stay the same for the whole run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub embargo: i64,
    pub number_of_features: i64,
    pub model_directory: PathBuf,
    pub has_gpu: bool,
    pub column_names: Arc<ColumnNames>,
    pub features: Features,
}

/// Values of one iteration, handed to user code through the binder.
#[derive(Debug, Clone, Copy)]
pub struct LoopContext<'a> {
    pub run: &'a RunContext,
    pub moon: i64,
    pub train: bool,
    pub has_trained: bool,
}

impl<'a> LoopContext<'a> {
    pub fn new(run: &'a RunContext, moon: i64, train: bool) -> Self {
        Self {
            run,
            moon,
            train,
            has_trained: false,
        }
    }

    pub fn trained(mut self, has_trained: bool) -> Self {
        self.has_trained = has_trained;
        self
    }

    /// Every scalar well-known value. Tables are added by the caller.
    pub fn to_pool(&self) -> ParameterPool {
        let run = self.run;
        let column_names = &run.column_names;
        let primary = column_names.primary_target();

        let mut pool = ParameterPool::new();
        pool.insert(
            Parameter::ModelDirectoryPath,
            Value::Path(run.model_directory.clone()),
        )
        .insert(
            Parameter::IdColumnName,
            Value::Text(column_names.id().to_string()),
        )
        .insert(
            Parameter::MoonColumnName,
            Value::Text(column_names.moon().to_string()),
        )
        .insert(
            Parameter::TargetColumnName,
            Value::Text(primary.input.clone()),
        )
        .insert(
            Parameter::PredictionColumnName,
            Value::Text(primary.output.clone()),
        )
        .insert(
            Parameter::TargetColumnNames,
            Value::Columns(column_names.inputs()),
        )
        .insert(
            Parameter::PredictionColumnNames,
            Value::Columns(column_names.outputs()),
        )
        .insert(
            Parameter::ColumnNames,
            Value::ColumnNames(Arc::clone(column_names)),
        )
        .insert(Parameter::Moon, Value::Integer(self.moon))
        .insert(Parameter::Embargo, Value::Integer(run.embargo))
        .insert(
            Parameter::NumberOfFeatures,
            Value::Integer(run.number_of_features),
        )
        .insert(Parameter::HasGpu, Value::Flag(run.has_gpu))
        .insert(Parameter::HasTrained, Value::Flag(self.has_trained));

        for (name, columns) in run.features.to_parameter_variants() {
            if let Some(parameter) = Parameter::from_name(&name) {
                pool.insert(parameter, Value::Names(columns));
            }
        }

        pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ReleaseFeature, TargetColumnNames};

    #[test]
    fn test_pool_contents() {
        let run = RunContext {
            embargo: 2,
            number_of_features: 1,
            model_directory: PathBuf::from("resources"),
            has_gpu: false,
            column_names: Arc::new(
                ColumnNames::new(
                    "id",
                    "moon",
                    None,
                    vec![
                        TargetColumnNames::new(1, "w", "target_w", "prediction_w"),
                        TargetColumnNames::new(2, "r", "target_r", "prediction_r"),
                    ],
                )
                .unwrap(),
            ),
            features: Features::from_release(
                &[ReleaseFeature {
                    name: "f1".into(),
                    group: "alpha".into(),
                }],
                "alpha",
            ),
        };

        let pool = LoopContext::new(&run, 7, true).trained(true).to_pool();

        assert_eq!(pool.get(&Parameter::Moon).and_then(Value::as_integer), Some(7));
        assert_eq!(pool.get(&Parameter::HasTrained).and_then(Value::as_flag), Some(true));
        assert_eq!(
            pool.get(&Parameter::TargetColumnName).and_then(Value::as_text),
            Some("target_w")
        );
        let outputs = pool
            .get(&Parameter::PredictionColumnNames)
            .and_then(Value::as_columns)
            .unwrap();
        assert_eq!(&outputs["r"], "prediction_r");
        assert_eq!(
            pool.get(&Parameter::FeatureGroup("alpha".into()))
                .and_then(Value::as_names),
            Some(&["f1".to_string()][..])
        );
        assert!(!pool.contains(&Parameter::XTrain));
    }
}
