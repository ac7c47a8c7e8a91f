use std::collections::{BTreeMap, BTreeSet};

use super::{CheckFunction, CheckInput};
use crate::table::{Cell, Column, Table};

type CheckOutcome = Result<(), String>;

pub(super) fn apply(function: &CheckFunction, input: &CheckInput<'_>) -> CheckOutcome {
    match function {
        CheckFunction::ColumnsName => columns_name(input),
        CheckFunction::Nans => nans(input.prediction),
        CheckFunction::ValuesBetween { min, max } => values_between(input, *min, *max),
        CheckFunction::ValuesAllowed { values } => values_allowed(input, values),
        CheckFunction::Moons => moons(input),
        CheckFunction::Ids { allow_duplicates } => ids(input, *allow_duplicates),
        CheckFunction::Constants => constants(input),
    }
}

fn columns_name(input: &CheckInput<'_>) -> CheckOutcome {
    let left: BTreeSet<&str> = input.prediction.column_names().into_iter().collect();
    let right: BTreeSet<&str> = input.example.column_names().into_iter().collect();

    if left != right {
        return Err("Columns name are different".to_string());
    }
    Ok(())
}

fn nans(prediction: &Table) -> CheckOutcome {
    let found = prediction
        .columns()
        .iter()
        .filter_map(Column::numeric_values)
        .any(|values| values.iter().any(|v| !v.is_some_and(f64::is_finite)));

    if found {
        return Err("NaNs detected".to_string());
    }
    Ok(())
}

/// Output columns of every target, as present in the prediction.
fn output_columns<'a>(input: &CheckInput<'a>) -> Result<Vec<&'a Column>, String> {
    input
        .column_names
        .targets()
        .iter()
        .map(|target| {
            input
                .prediction
                .column(&target.output)
                .ok_or_else(|| format!("Missing column: {}", target.output))
        })
        .collect()
}

fn values_between(input: &CheckInput<'_>, min: Option<f64>, max: Option<f64>) -> CheckOutcome {
    let min = min.unwrap_or(f64::NEG_INFINITY);
    let max = max.unwrap_or(f64::INFINITY);

    for column in output_columns(input)? {
        let inside = column
            .cells()
            .all(|cell| cell.as_f64().is_some_and(|v| min <= v && v <= max));
        if !inside {
            return Err(format!("Values must be between {min} and {max}"));
        }
    }
    Ok(())
}

fn values_allowed(input: &CheckInput<'_>, values: &[f64]) -> CheckOutcome {
    for column in output_columns(input)? {
        let allowed = column
            .cells()
            .all(|cell| cell.as_f64().is_some_and(|v| values.contains(&v)));
        if !allowed {
            return Err(format!("Values must be in {values:?}"));
        }
    }
    Ok(())
}

fn key_set(table: &Table, name: &str) -> Result<BTreeSet<String>, String> {
    let column = table
        .column(name)
        .ok_or_else(|| format!("Missing column: {name}"))?;
    Ok(column.cells().map(|cell| key_of(&cell)).collect())
}

/// Canonical text of a key cell, so `3` and `3.0` compare equal.
fn key_of(cell: &Cell) -> String {
    match cell {
        Cell::Float(v) if v.fract() == 0.0 && v.is_finite() => format!("{}", *v as i64),
        other => other.to_string(),
    }
}

fn moons(input: &CheckInput<'_>) -> CheckOutcome {
    let moon = input.column_names.moon();
    if key_set(input.prediction, moon)? != key_set(input.example, moon)? {
        return Err("Different moon(s)".to_string());
    }
    Ok(())
}

fn id_pairs(table: &Table, moon: &str, id: &str) -> Result<BTreeMap<(String, String), usize>, String> {
    let moons = table
        .column(moon)
        .ok_or_else(|| format!("Missing column: {moon}"))?;
    let ids = table
        .column(id)
        .ok_or_else(|| format!("Missing column: {id}"))?;

    let mut counts = BTreeMap::new();
    for (moon, id) in moons.cells().zip(ids.cells()) {
        *counts.entry((key_of(&moon), key_of(&id))).or_insert(0) += 1;
    }
    Ok(counts)
}

fn ids(input: &CheckInput<'_>, allow_duplicates: bool) -> CheckOutcome {
    let moon = input.column_names.moon();
    let id = input.column_names.id();

    let predicted = id_pairs(input.prediction, moon, id)?;
    let expected = id_pairs(input.example, moon, id)?;

    if !predicted.keys().eq(expected.keys()) {
        return Err("Different ID(s)".to_string());
    }
    if !allow_duplicates && predicted.values().any(|count| *count > 1) {
        return Err("Duplicate ID(s)".to_string());
    }
    Ok(())
}

fn constants(input: &CheckInput<'_>) -> CheckOutcome {
    for column in output_columns(input)? {
        if column.len() <= 1 {
            continue;
        }
        let first = column.cell(0);
        if column.cells().skip(1).all(|cell| cell.bitwise_eq(&first)) {
            return Err("Constant values detected".to_string());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColumnNames, TargetColumnNames};

    fn column_names() -> ColumnNames {
        ColumnNames::new(
            "id",
            "moon",
            None,
            vec![
                TargetColumnNames::new(1, "w", "target_w", "prediction_w"),
                TargetColumnNames::new(2, "r", "target_r", "prediction_r"),
            ],
        )
        .unwrap()
    }

    fn table(moons: &[i64], ids: &[i64], w: &[f64], r: &[f64]) -> Table {
        Table::new(vec![
            Column::int("moon", moons.iter().copied()),
            Column::int("id", ids.iter().copied()),
            Column::float("prediction_w", w.iter().copied()),
            Column::float("prediction_r", r.iter().copied()),
        ])
        .unwrap()
    }

    fn check(function: CheckFunction, prediction: &Table, example: &Table) -> CheckOutcome {
        let column_names = column_names();
        apply(
            &function,
            &CheckInput {
                prediction,
                example,
                column_names: &column_names,
            },
        )
    }

    #[test]
    fn test_columns_name_ignores_order() {
        let example = table(&[1], &[1], &[0.0], &[0.0]);
        let reordered = Table::new(vec![
            Column::float("prediction_r", [0.0]),
            Column::float("prediction_w", [0.0]),
            Column::int("id", [1]),
            Column::int("moon", [1]),
        ])
        .unwrap();
        assert!(check(CheckFunction::ColumnsName, &reordered, &example).is_ok());

        let missing = Table::new(vec![Column::int("moon", [1])]).unwrap();
        assert_eq!(
            check(CheckFunction::ColumnsName, &missing, &example).unwrap_err(),
            "Columns name are different"
        );
    }

    #[test]
    fn test_nans_cover_infinite_and_null() {
        let example = table(&[1], &[1], &[0.0], &[0.0]);
        let infinite = table(&[1], &[1], &[f64::INFINITY], &[0.0]);
        assert_eq!(
            check(CheckFunction::Nans, &infinite, &example).unwrap_err(),
            "NaNs detected"
        );

        let null = Table::new(vec![Column::new(
            "prediction_w",
            crate::table::ColumnData::Float64(vec![Some(1.0), None]),
        )])
        .unwrap();
        assert!(check(CheckFunction::Nans, &null, &example).is_err());
        assert!(check(CheckFunction::Nans, &example, &example).is_ok());
    }

    #[test]
    fn test_values_between_and_allowed() {
        let example = table(&[1, 1], &[1, 2], &[0.0, 0.0], &[0.0, 0.0]);
        let prediction = table(&[1, 1], &[1, 2], &[0.5, 1.0], &[0.0, 2.0]);

        let between = CheckFunction::ValuesBetween {
            min: Some(0.0),
            max: Some(1.0),
        };
        assert_eq!(
            check(between, &prediction, &example).unwrap_err(),
            "Values must be between 0 and 1"
        );

        let open = CheckFunction::ValuesBetween {
            min: Some(0.0),
            max: None,
        };
        assert!(check(open, &prediction, &example).is_ok());

        let allowed = CheckFunction::ValuesAllowed {
            values: vec![0.0, 0.5, 1.0, 2.0],
        };
        assert!(check(allowed, &prediction, &example).is_ok());

        let allowed = CheckFunction::ValuesAllowed {
            values: vec![0.0, 1.0],
        };
        assert_eq!(
            check(allowed, &prediction, &example).unwrap_err(),
            "Values must be in [0.0, 1.0]"
        );
    }

    #[test]
    fn test_missing_output_column() {
        let example = table(&[1], &[1], &[0.0], &[0.0]);
        let prediction = Table::new(vec![
            Column::int("moon", [1]),
            Column::int("id", [1]),
            Column::float("prediction_w", [0.0]),
        ])
        .unwrap();

        assert_eq!(
            check(CheckFunction::Constants, &prediction, &example).unwrap_err(),
            "Missing column: prediction_r"
        );
    }

    #[test]
    fn test_moons_compare_integral_floats() {
        let example = table(&[1, 2], &[1, 1], &[0.0, 0.0], &[0.0, 0.0]);
        let prediction = Table::new(vec![Column::float("moon", [2.0, 1.0])]).unwrap();
        assert!(check(CheckFunction::Moons, &prediction, &example).is_ok());

        let other = table(&[1, 3], &[1, 1], &[0.0, 0.0], &[0.0, 0.0]);
        assert_eq!(
            check(CheckFunction::Moons, &other, &example).unwrap_err(),
            "Different moon(s)"
        );
    }

    #[test]
    fn test_ids_duplicates() {
        let example = table(&[1, 2], &[7, 7], &[0.0, 0.0], &[0.0, 0.0]);

        // Same id on two moons is not a duplicate.
        assert!(check(
            CheckFunction::Ids {
                allow_duplicates: false
            },
            &example,
            &example
        )
        .is_ok());

        let duplicated = table(&[1, 1, 2], &[7, 7, 7], &[0.0; 3], &[0.0; 3]);
        assert_eq!(
            check(
                CheckFunction::Ids {
                    allow_duplicates: false
                },
                &duplicated,
                &example
            )
            .unwrap_err(),
            "Duplicate ID(s)"
        );
        assert!(check(
            CheckFunction::Ids {
                allow_duplicates: true
            },
            &duplicated,
            &example
        )
        .is_ok());
    }

    #[test]
    fn test_constants_needs_more_than_one_row() {
        let single = table(&[1], &[1], &[0.5], &[0.5]);
        assert!(check(CheckFunction::Constants, &single, &single).is_ok());

        let constant = table(&[1, 1], &[1, 2], &[0.5, 0.5], &[0.1, 0.2]);
        assert_eq!(
            check(CheckFunction::Constants, &constant, &constant).unwrap_err(),
            "Constant values detected"
        );
    }
}
