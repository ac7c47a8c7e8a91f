//! Structural checks of a prediction against the example prediction.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use crate::model::ColumnNames;
use crate::table::Table;

mod functions;

/// Where a check applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckScope {
    /// Once, on the full tables.
    Root,
    /// Once per moon of the example prediction, on the at-moon slices.
    Moon,
}

impl fmt::Display for CheckScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => f.write_str("ROOT"),
            Self::Moon => f.write_str("MOON"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckFunction {
    ColumnsName,
    Nans,
    ValuesBetween { min: Option<f64>, max: Option<f64> },
    ValuesAllowed { values: Vec<f64> },
    Moons,
    Ids { allow_duplicates: bool },
    Constants,
}

impl CheckFunction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ColumnsName => "COLUMNS_NAME",
            Self::Nans => "NANS",
            Self::ValuesBetween { .. } => "VALUES_BETWEEN",
            Self::ValuesAllowed { .. } => "VALUES_ALLOWED",
            Self::Moons => "MOONS",
            Self::Ids { .. } => "IDS",
            Self::Constants => "CONSTANTS",
        }
    }

    fn from_record(name: &str, parameters: &Map<String, JsonValue>) -> Result<Self, String> {
        let number = |key: &str| -> Result<Option<f64>, String> {
            match parameters.get(key) {
                None | Some(JsonValue::Null) => Ok(None),
                Some(value) => value
                    .as_f64()
                    .map(Some)
                    .ok_or_else(|| format!("{name}: parameter {key} must be a number")),
            }
        };

        let function = match name {
            "COLUMNS_NAME" => Self::ColumnsName,
            "NANS" => Self::Nans,
            "VALUES_BETWEEN" => Self::ValuesBetween {
                min: number("min")?,
                max: number("max")?,
            },
            "VALUES_ALLOWED" => {
                let values = match parameters.get("values") {
                    Some(JsonValue::Array(values)) => values
                        .iter()
                        .map(|v| {
                            v.as_f64()
                                .ok_or_else(|| format!("{name}: values must be numbers"))
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                    _ => return Err(format!("{name}: missing parameter values")),
                };
                Self::ValuesAllowed { values }
            }
            "MOONS" => Self::Moons,
            "IDS" => Self::Ids {
                allow_duplicates: parameters
                    .get("allowDuplicates")
                    .and_then(JsonValue::as_bool)
                    .unwrap_or(false),
            },
            "CONSTANTS" => Self::Constants,
            other => return Err(format!("unknown check function: {other}")),
        };

        Ok(function)
    }

    fn parameters(&self) -> Map<String, JsonValue> {
        let mut parameters = Map::new();
        match self {
            Self::ValuesBetween { min, max } => {
                parameters.insert("min".into(), (*min).into());
                parameters.insert("max".into(), (*max).into());
            }
            Self::ValuesAllowed { values } => {
                parameters.insert("values".into(), values.clone().into());
            }
            Self::Ids { allow_duplicates } => {
                parameters.insert("allowDuplicates".into(), (*allow_duplicates).into());
            }
            _ => {}
        }
        parameters
    }
}

/// One configured check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CheckRecord", into = "CheckRecord")]
pub struct Check {
    pub function: CheckFunction,
    pub scope: CheckScope,
    pub order: i64,
}

impl Check {
    pub fn new(function: CheckFunction, scope: CheckScope, order: i64) -> Self {
        Self {
            function,
            scope,
            order,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CheckRecord {
    function: String,
    scope: CheckScope,
    #[serde(default)]
    order: i64,
    #[serde(default)]
    parameters: Map<String, JsonValue>,
}

impl TryFrom<CheckRecord> for Check {
    type Error = String;

    fn try_from(record: CheckRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            function: CheckFunction::from_record(&record.function, &record.parameters)?,
            scope: record.scope,
            order: record.order,
        })
    }
}

impl From<Check> for CheckRecord {
    fn from(check: Check) -> Self {
        Self {
            function: check.function.name().to_string(),
            parameters: check.function.parameters(),
            scope: check.scope,
            order: check.order,
        }
    }
}

/// A failed check.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("check {function} failed at {}: {message}", location(.scope, .moon))]
pub struct CheckError {
    pub function: &'static str,
    pub scope: CheckScope,
    pub moon: Option<i64>,
    pub message: String,
}

fn location(scope: &CheckScope, moon: &Option<i64>) -> String {
    match moon {
        Some(moon) => format!("{scope} (moon {moon})"),
        None => scope.to_string(),
    }
}

/// Tables a check looks at.
pub(crate) struct CheckInput<'a> {
    pub prediction: &'a Table,
    pub example: &'a Table,
    pub column_names: &'a ColumnNames,
}

/// Run `checks` in ascending order: ROOT checks once, then MOON checks for
/// every moon of the example prediction. Stops at the first failure.
pub fn run(
    checks: &[Check],
    prediction: &Table,
    example_prediction: &Table,
    column_names: &ColumnNames,
) -> Result<(), CheckError> {
    let mut ordered: Vec<&Check> = checks.iter().collect();
    ordered.sort_by_key(|check| check.order);

    let input = CheckInput {
        prediction,
        example: example_prediction,
        column_names,
    };

    for check in ordered.iter().filter(|c| c.scope == CheckScope::Root) {
        debug!(function = check.function.name(), "running root check");
        functions::apply(&check.function, &input)
            .map_err(|message| failure(check, None, message))?;
    }

    let moon_checks: Vec<&&Check> = ordered
        .iter()
        .filter(|c| c.scope == CheckScope::Moon)
        .collect();
    let Some(first) = moon_checks.first() else {
        return Ok(());
    };

    let moon_column = column_names.moon();
    let moons = example_prediction
        .distinct_keys(moon_column)
        .map_err(|e| failure(first, None, e.to_string()))?;

    for moon in moons {
        let at_moon = |table: &Table| table.filter_keys(moon_column, |key| key == moon);
        let prediction = at_moon(prediction).map_err(|e| failure(first, Some(moon), e.to_string()))?;
        let example = at_moon(example_prediction).map_err(|e| failure(first, Some(moon), e.to_string()))?;

        let input = CheckInput {
            prediction: &prediction,
            example: &example,
            column_names,
        };

        for check in &moon_checks {
            functions::apply(&check.function, &input)
                .map_err(|message| failure(check, Some(moon), message))?;
        }
    }

    Ok(())
}

fn failure(check: &Check, moon: Option<i64>, message: String) -> CheckError {
    CheckError {
        function: check.function.name(),
        scope: check.scope,
        moon,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TargetColumnNames;
    use crate::table::Column;

    fn column_names() -> ColumnNames {
        ColumnNames::new(
            "id",
            "moon",
            None,
            vec![TargetColumnNames::new(1, "w", "target_w", "prediction_w")],
        )
        .unwrap()
    }

    fn table(moons: &[i64], ids: &[&str], predictions: &[f64]) -> Table {
        Table::new(vec![
            Column::int("moon", moons.iter().copied()),
            Column::text("id", ids.iter().copied()),
            Column::float("prediction_w", predictions.iter().copied()),
        ])
        .unwrap()
    }

    #[test]
    fn test_check_json_shape() {
        let checks: Vec<Check> = serde_json::from_str(
            r#"[
                {"function": "VALUES_BETWEEN", "scope": "ROOT", "order": 2, "parameters": {"min": -1, "max": 1}},
                {"function": "IDS", "scope": "MOON", "order": 1, "parameters": {"allowDuplicates": true}},
                {"function": "NANS", "scope": "ROOT"}
            ]"#,
        )
        .unwrap();

        assert_eq!(
            checks[0].function,
            CheckFunction::ValuesBetween {
                min: Some(-1.0),
                max: Some(1.0)
            }
        );
        assert_eq!(checks[1].function, CheckFunction::Ids { allow_duplicates: true });
        assert_eq!(checks[2].order, 0);

        let json = serde_json::to_value(&checks[0]).unwrap();
        assert_eq!(json["function"], "VALUES_BETWEEN");
        assert_eq!(json["parameters"]["max"], 1.0);
    }

    #[test]
    fn test_unknown_function_rejected() {
        let result: Result<Check, _> =
            serde_json::from_str(r#"{"function": "SHAPE", "scope": "ROOT"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_root_failure_message() {
        let example = table(&[1, 1], &["a", "b"], &[0.1, 0.2]);
        let prediction = table(&[1, 1], &["a", "b"], &[0.1, f64::NAN]);

        let err = run(
            &[Check::new(CheckFunction::Nans, CheckScope::Root, 0)],
            &prediction,
            &example,
            &column_names(),
        )
        .unwrap_err();

        assert_eq!(err.message, "NaNs detected");
        assert_eq!(err.function, "NANS");
        assert_eq!(err.moon, None);
    }

    #[test]
    fn test_moon_scope_reports_key() {
        let example = table(&[1, 1, 2, 2], &["a", "b", "a", "c"], &[0.1, 0.2, 0.3, 0.4]);
        let prediction = table(&[1, 1, 2, 2], &["a", "b", "a", "b"], &[0.1, 0.2, 0.3, 0.4]);

        let err = run(
            &[Check::new(
                CheckFunction::Ids {
                    allow_duplicates: false,
                },
                CheckScope::Moon,
                0,
            )],
            &prediction,
            &example,
            &column_names(),
        )
        .unwrap_err();

        assert_eq!(err.message, "Different ID(s)");
        assert_eq!(err.scope, CheckScope::Moon);
        assert_eq!(err.moon, Some(2));
        assert_eq!(err.to_string(), "check IDS failed at MOON (moon 2): Different ID(s)");
    }

    #[test]
    fn test_checks_run_in_order() {
        let example = table(&[1, 1], &["a", "b"], &[0.1, 0.2]);
        let prediction = table(&[1, 1], &["a", "b"], &[5.0, 5.0]);

        let checks = [
            Check::new(CheckFunction::Constants, CheckScope::Root, 2),
            Check::new(
                CheckFunction::ValuesBetween {
                    min: Some(0.0),
                    max: Some(1.0),
                },
                CheckScope::Root,
                1,
            ),
        ];

        let err = run(&checks, &prediction, &example, &column_names()).unwrap_err();
        assert_eq!(err.function, "VALUES_BETWEEN");
    }

    #[test]
    fn test_validation_is_idempotent() {
        let example = table(&[1, 2], &["a", "a"], &[0.1, 0.2]);
        let prediction = table(&[1, 2], &["a", "a"], &[0.3, 0.4]);
        let checks = [
            Check::new(CheckFunction::ColumnsName, CheckScope::Root, 0),
            Check::new(CheckFunction::Moons, CheckScope::Root, 1),
            Check::new(CheckFunction::Ids { allow_duplicates: false }, CheckScope::Moon, 2),
            Check::new(CheckFunction::Nans, CheckScope::Moon, 3),
        ];

        let first = run(&checks, &prediction, &example, &column_names());
        let second = run(&checks, &prediction, &example, &column_names());
        assert_eq!(first, second);
        assert!(first.is_ok());
    }
}
