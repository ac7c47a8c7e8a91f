//! Parameter binding.
//!
//! User entrypoints declare which well-known values they want through a
//! [`Signature`]. The driver fills a [`ParameterPool`] for the current
//! iteration and [`bind`] hands each entrypoint exactly what it declared,
//! keyed by the spelling the entrypoint used.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::model::{ColumnNames, Columns};
use crate::table::Table;

const FEATURE_GROUP_PREFIX: &str = "feature_column_names_";

/// Binding errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindError {
    #[error("unknown parameter: {name}")]
    UnknownParameter { name: String },

    #[error("no value available for required parameter: {name}")]
    MissingValue { name: String },

    #[error("positional-only parameters are not supported: {name}")]
    PositionalOnly { name: String },

    #[error("variadic parameters are not supported: {name}")]
    Variadic { name: String },
}

/// Well-known values the runner can supply.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Parameter {
    XTrain,
    YTrain,
    XTest,
    ModelDirectoryPath,
    IdColumnName,
    MoonColumnName,
    TargetColumnName,
    PredictionColumnName,
    TargetColumnNames,
    PredictionColumnNames,
    ColumnNames,
    Moon,
    Embargo,
    NumberOfFeatures,
    HasGpu,
    HasTrained,
    /// Default feature group.
    FeatureColumnNames,
    /// `feature_column_names_<group>`.
    FeatureGroup(String),
}

impl Parameter {
    /// Resolve a declared name, aliases included.
    pub fn from_name(name: &str) -> Option<Self> {
        let parameter = match name {
            "X_train" | "x_train" => Self::XTrain,
            "Y_train" | "y_train" => Self::YTrain,
            "X_test" | "x_test" => Self::XTest,
            "model_directory_path" => Self::ModelDirectoryPath,
            "id_column_name" => Self::IdColumnName,
            "moon_column_name" => Self::MoonColumnName,
            "target_column_name" => Self::TargetColumnName,
            "prediction_column_name" => Self::PredictionColumnName,
            "target_column_names" => Self::TargetColumnNames,
            "prediction_column_names" => Self::PredictionColumnNames,
            "column_names" => Self::ColumnNames,
            "moon" | "current_moon" => Self::Moon,
            "embargo" => Self::Embargo,
            "number_of_features" => Self::NumberOfFeatures,
            "has_gpu" => Self::HasGpu,
            "has_trained" => Self::HasTrained,
            "feature_column_names" => Self::FeatureColumnNames,
            _ => {
                let group = name.strip_prefix(FEATURE_GROUP_PREFIX)?;
                if group.is_empty() {
                    return None;
                }
                Self::FeatureGroup(group.to_string())
            }
        };

        Some(parameter)
    }

    pub fn canonical_name(&self) -> Cow<'static, str> {
        let name = match self {
            Self::XTrain => "X_train",
            Self::YTrain => "Y_train",
            Self::XTest => "X_test",
            Self::ModelDirectoryPath => "model_directory_path",
            Self::IdColumnName => "id_column_name",
            Self::MoonColumnName => "moon_column_name",
            Self::TargetColumnName => "target_column_name",
            Self::PredictionColumnName => "prediction_column_name",
            Self::TargetColumnNames => "target_column_names",
            Self::PredictionColumnNames => "prediction_column_names",
            Self::ColumnNames => "column_names",
            Self::Moon => "moon",
            Self::Embargo => "embargo",
            Self::NumberOfFeatures => "number_of_features",
            Self::HasGpu => "has_gpu",
            Self::HasTrained => "has_trained",
            Self::FeatureColumnNames => "feature_column_names",
            Self::FeatureGroup(group) => return Cow::Owned(format!("{FEATURE_GROUP_PREFIX}{group}")),
        };

        Cow::Borrowed(name)
    }
}

/// A value handed to user code.
#[derive(Debug, Clone)]
pub enum Value {
    Table(Arc<Table>),
    Path(PathBuf),
    Text(String),
    Integer(i64),
    Flag(bool),
    Columns(Columns),
    ColumnNames(Arc<ColumnNames>),
    Names(Vec<String>),
}

impl Value {
    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Self::Table(table) => Some(table),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&std::path::Path> {
        match self {
            Self::Path(path) => Some(path),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_columns(&self) -> Option<&Columns> {
        match self {
            Self::Columns(columns) => Some(columns),
            _ => None,
        }
    }

    pub fn as_names(&self) -> Option<&[String]> {
        match self {
            Self::Names(names) => Some(names),
            _ => None,
        }
    }
}

/// Values available for the current call.
#[derive(Debug, Clone, Default)]
pub struct ParameterPool {
    values: HashMap<Parameter, Value>,
}

impl ParameterPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, parameter: Parameter, value: Value) -> &mut Self {
        self.values.insert(parameter, value);
        self
    }

    pub fn with(mut self, parameter: Parameter, value: Value) -> Self {
        self.insert(parameter, value);
        self
    }

    pub fn remove(&mut self, parameter: &Parameter) -> Option<Value> {
        self.values.remove(parameter)
    }

    pub fn get(&self, parameter: &Parameter) -> Option<&Value> {
        self.values.get(parameter)
    }

    pub fn contains(&self, parameter: &Parameter) -> bool {
        self.values.contains_key(parameter)
    }
}

/// How a formal parameter may be passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    #[default]
    Named,
    PositionalOnly,
    VarPositional,
    VarKeyword,
}

/// One declared parameter of an entrypoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormalParameter {
    pub name: String,
    #[serde(default)]
    pub kind: ParameterKind,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl FormalParameter {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParameterKind::Named,
            required: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_kind(mut self, kind: ParameterKind) -> Self {
        self.kind = kind;
        self
    }
}

/// The declared parameters of an entrypoint, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub parameters: Vec<FormalParameter>,
}

impl Signature {
    pub fn new(parameters: Vec<FormalParameter>) -> Self {
        Self { parameters }
    }

    /// Required named parameters.
    pub fn named<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(names.into_iter().map(FormalParameter::named).collect())
    }

    pub fn with(mut self, parameter: FormalParameter) -> Self {
        self.parameters.push(parameter);
        self
    }
}

/// Arguments ready to pass, keyed by the declared spelling.
#[derive(Debug, Clone, Default)]
pub struct BoundArguments {
    entries: Vec<(String, Value)>,
}

impl BoundArguments {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Lookup by well-known parameter, whatever spelling was declared.
    pub fn get_parameter(&self, parameter: &Parameter) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(key, _)| Parameter::from_name(key).as_ref() == Some(parameter))
            .map(|(_, value)| value)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Pick, for each declared parameter, its value from the pool.
pub fn bind(signature: &Signature, pool: &ParameterPool) -> Result<BoundArguments, BindError> {
    let mut entries = Vec::with_capacity(signature.parameters.len());

    for formal in &signature.parameters {
        let name = &formal.name;
        match formal.kind {
            ParameterKind::Named => {}
            ParameterKind::PositionalOnly => {
                return Err(BindError::PositionalOnly { name: name.clone() })
            }
            ParameterKind::VarPositional | ParameterKind::VarKeyword => {
                return Err(BindError::Variadic { name: name.clone() })
            }
        }

        let parameter = Parameter::from_name(name)
            .ok_or_else(|| BindError::UnknownParameter { name: name.clone() })?;

        match pool.get(&parameter) {
            Some(value) => entries.push((name.clone(), value.clone())),
            None if formal.required => {
                return Err(BindError::MissingValue { name: name.clone() })
            }
            None => {}
        }
    }

    Ok(BoundArguments { entries })
}
