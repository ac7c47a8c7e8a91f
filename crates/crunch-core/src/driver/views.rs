//! Embargo slicing.

use crate::table::{Table, TableResult};

/// Rows usable for training at `moon`: strictly before `moon - embargo`.
pub fn train_view(table: &Table, moon_column: &str, moon: i64, embargo: i64) -> TableResult<Table> {
    let horizon = moon.saturating_sub(embargo);
    table.filter_keys(moon_column, |key| key < horizon)
}

/// Rows at exactly `moon`.
pub fn test_view(table: &Table, moon_column: &str, moon: i64) -> TableResult<Table> {
    table.filter_keys(moon_column, |key| key == moon)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Column;

    #[test]
    fn test_embargo_boundary() {
        let table = Table::new(vec![
            Column::int("moon", 90..=100),
            Column::float("feature", (90..=100).map(|m| m as f64)),
        ])
        .unwrap();

        let train = train_view(&table, "moon", 100, 5).unwrap();
        let moons: Vec<i64> = train
            .column("moon")
            .unwrap()
            .keys()
            .unwrap()
            .into_iter()
            .flatten()
            .collect();
        assert_eq!(moons, vec![90, 91, 92, 93, 94]);

        let test = test_view(&table, "moon", 100).unwrap();
        assert_eq!(test.num_rows(), 1);
        assert_eq!(test.column("feature").unwrap().cell(0), crate::table::Cell::Float(100.0));
    }

    #[test]
    fn test_extreme_keys_saturate() {
        let table = Table::new(vec![Column::int("moon", [i64::MIN, 0, i64::MAX])]).unwrap();

        assert_eq!(train_view(&table, "moon", i64::MIN, 5).unwrap().num_rows(), 0);
        assert_eq!(train_view(&table, "moon", i64::MAX, -5).unwrap().num_rows(), 2);
    }
}
