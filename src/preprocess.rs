//! Table preparation before encoding and type restoration after decoding.

use tracing::debug;
use crate::error::{Result, SynthError};
use crate::metadata::{ColumnMeta, MetadataRegistry};
use crate::schema::{Column, DataType, NumericTable, Table, Value};

/// Removes every column flagged `drop` for `dataset`.
pub fn drop_columns(registry: &MetadataRegistry, dataset: &str, table: &Table) -> Result<Table> {
    let to_drop = registry.columns_to_drop(dataset, Some(table))?;
    let names: Vec<&str> = to_drop.iter().map(String::as_str).collect();

    debug!(dataset, dropped = ?names, "Dropping flagged columns");

    Ok(table.without_columns(&names))
}

/// Missing-value sentinels of one column.
///
/// A sentinel matches a cell with the same text. In an integer or float column it also
/// matches a cell holding the same number, so `-1.0` matches `-1` and `-1.00`.
pub struct Sentinels<'a> {
    raw: &'a [String],
    numbers: Vec<f64>,
}

impl<'a> Sentinels<'a> {
    pub fn new(meta: Option<&'a ColumnMeta>) -> Self {
        let raw = meta.map(|c| c.missing_values.as_slice()).unwrap_or_default();
        let numbers = match meta.map(|c| c.data_type) {
            Some(DataType::Integer | DataType::Float) => {
                raw.iter().filter_map(|s| s.trim().parse::<f64>().ok()).collect()
            }
            _ => Vec::new(),
        };
        Self { raw, numbers }
    }

    /// `field` is a raw, already trimmed input field.
    pub fn matches_field(&self, field: &str) -> bool {
        self.raw.iter().any(|s| s == field)
            || (!self.numbers.is_empty() && field.parse::<f64>().is_ok_and(|v| self.numbers.contains(&v)))
    }

    pub fn matches(&self, value: &Value) -> bool {
        match value {
            Value::Null => false,
            Value::Text(s) => self.matches_field(s),
            other => {
                let text = other.to_string();
                self.raw.iter().any(|s| *s == text) || other.as_f64().is_some_and(|v| self.numbers.contains(&v))
            }
        }
    }
}

/// Replaces cells matching one of the column's missing sentinels by `Null`.
pub fn replace_missing_sentinels(registry: &MetadataRegistry, dataset: &str, table: &Table) -> Result<Table> {
    let meta = registry.dataset(dataset)?;
    let mut replaced = 0usize;

    let columns = table
        .columns()
        .iter()
        .map(|column| {
            let sentinels = Sentinels::new(meta.column(&column.name));

            let values = column
                .values
                .iter()
                .map(|value| {
                    if sentinels.matches(value) {
                        replaced += 1;
                        Value::Null
                    } else {
                        value.clone()
                    }
                })
                .collect();

            Column::new(column.name.clone(), values)
        })
        .collect();

    debug!(dataset, replaced, "Replaced missing-value sentinels");

    Table::new(columns)
}

/// Removes every row holding at least one `Null`.
pub fn drop_incomplete_rows(table: &Table) -> Table {
    let complete = table.filter_rows(|i| table.columns().iter().all(|c| !c.values[i].is_null()));

    debug!(
        before = table.n_rows(),
        after = complete.n_rows(),
        "Dropped incomplete rows"
    );

    complete
}

/// Casts every column to the type declared for `dataset`.
pub fn coerce_types(registry: &MetadataRegistry, dataset: &str, table: &Table) -> Result<Table> {
    let columns = table
        .columns()
        .iter()
        .map(|column| {
            let data_type = registry.data_type(dataset, &column.name)?;
            let values = column
                .values
                .iter()
                .map(|v| coerce_value(&column.name, v, data_type))
                .collect::<Result<Vec<_>>>()?;
            Ok(Column::new(column.name.clone(), values))
        })
        .collect::<Result<Vec<_>>>()?;

    Table::new(columns)
}

/// Casts one value to `data_type`. Floats headed for integer columns are rounded first.
pub fn coerce_value(column: &str, value: &Value, data_type: DataType) -> Result<Value> {
    match (data_type, value) {
        (_, Value::Null) => Ok(Value::Null),
        (DataType::Integer, Value::Integer(i)) => Ok(Value::Integer(*i)),
        (DataType::Integer, Value::Float(v)) => round_to_integer(column, *v),
        (DataType::Integer, Value::Text(s)) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(i) => Ok(Value::Integer(i)),
                Err(_) => {
                    let v = s
                        .parse::<f64>()
                        .map_err(|_| SynthError::coercion(column, format!("'{}' is not an integer", s)))?;
                    round_to_integer(column, v)
                }
            }
        }
        (DataType::Float, Value::Integer(i)) => Ok(Value::Float(*i as f64)),
        (DataType::Float, Value::Float(v)) => Ok(Value::Float(*v)),
        (DataType::Float, Value::Text(s)) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| SynthError::coercion(column, format!("'{}' is not a number", s))),
        (DataType::Text, Value::Text(s)) => Ok(Value::Text(s.clone())),
        (DataType::Text, other) => Ok(Value::Text(other.to_string())),
    }
}

fn round_to_integer(column: &str, v: f64) -> Result<Value> {
    let rounded = v.round();
    if !rounded.is_finite() || rounded < i64::MIN as f64 || rounded > i64::MAX as f64 {
        return Err(SynthError::coercion(column, format!("{} does not fit an integer", v)));
    }
    Ok(Value::Integer(rounded as i64))
}

/// Moves indicator columns from {0, 1} to {-1, 1}. Only exact zeros are replaced.
pub fn center_indicators(table: &mut NumericTable, indicator_columns: &[String]) {
    replace_exact(table, indicator_columns, 0.0, -1.0);
}

/// Inverse of [`center_indicators`]: exact -1 values become 0 again.
pub fn uncenter_indicators(table: &mut NumericTable, indicator_columns: &[String]) {
    replace_exact(table, indicator_columns, -1.0, 0.0);
}

fn replace_exact(table: &mut NumericTable, columns: &[String], from: f64, to: f64) {
    for name in columns {
        if let Some(idx) = table.position(name) {
            for cell in table.data.column_mut(idx).iter_mut() {
                if *cell == from {
                    *cell = to;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;
    use std::collections::HashMap;
    use crate::metadata::tests::iris_registry;
    use crate::metadata::{DatasetMetadata, VarType};

    fn raw_iris() -> Table {
        Table::new(vec![
            Column::new("id", vec![Value::from(1), Value::from(2), Value::from(3)]),
            Column::new("sepal_length", vec![Value::from(5.1), Value::from(4.9), Value::from(6.3)]),
            Column::new("petals", vec![Value::from(4), Value::from(5), Value::from(4)]),
            Column::new("color", vec![Value::from("red"), Value::from("?"), Value::from("blue")]),
            Column::new("species", vec![Value::from("setosa"), Value::from("setosa"), Value::from("virginica")]),
        ])
        .unwrap()
    }

    #[test]
    fn test_preprocessing_chain() -> anyhow::Result<()> {
        let registry = iris_registry();
        let table = raw_iris();

        let dropped = drop_columns(&registry, "iris", &table)?;
        assert!(!dropped.contains("id"));
        assert_eq!(dropped.n_cols(), 4);

        let replaced = replace_missing_sentinels(&registry, "iris", &dropped)?;
        assert!(replaced.column("color").unwrap().values[1].is_null());

        let complete = drop_incomplete_rows(&replaced);
        assert_eq!(complete.n_rows(), 2);
        assert_eq!(complete.column("color").unwrap().values, vec![Value::from("red"), Value::from("blue")]);

        Ok(())
    }

    #[test]
    fn test_numeric_sentinels_match_by_value() -> anyhow::Result<()> {
        let columns = vec![
            ColumnMeta::new("sepal_length", VarType::Continuous, DataType::Float).with_missing_values(&["-1.0"]),
            ColumnMeta::new("petals", VarType::Continuous, DataType::Integer).with_missing_values(&["-1"]),
            ColumnMeta::new("color", VarType::Discrete, DataType::Text).with_missing_values(&["-1.0"]),
        ];
        let registry = MetadataRegistry::new(HashMap::from([("plants".to_string(), DatasetMetadata::new(columns))]));

        let table = Table::new(vec![
            Column::new("sepal_length", vec![Value::from(-1.0), Value::from(-1), Value::from(-1.5)]),
            Column::new("petals", vec![Value::from(-1), Value::from(-1.0), Value::from(1)]),
            Column::new("color", vec![Value::from("-1.0"), Value::from("-1"), Value::from("blue")]),
        ])?;

        let replaced = replace_missing_sentinels(&registry, "plants", &table)?;

        assert_eq!(replaced.column("sepal_length").unwrap().values, vec![Value::Null, Value::Null, Value::from(-1.5)]);
        assert_eq!(replaced.column("petals").unwrap().values, vec![Value::Null, Value::Null, Value::from(1)]);
        // text columns compare the text only
        assert_eq!(replaced.column("color").unwrap().values, vec![Value::Null, Value::from("-1"), Value::from("blue")]);

        Ok(())
    }

    #[test]
    fn test_sentinel_field_matching() {
        let meta = ColumnMeta::new("sepal_length", VarType::Continuous, DataType::Float)
            .with_missing_values(&["-1.0", "n/a"]);
        let sentinels = Sentinels::new(Some(&meta));

        assert!(sentinels.matches_field("-1.0"));
        assert!(sentinels.matches_field("-1"));
        assert!(sentinels.matches_field("-1.00"));
        assert!(sentinels.matches_field("n/a"));
        assert!(!sentinels.matches_field("1.0"));
        assert!(!sentinels.matches(&Value::Null));
        assert!(!Sentinels::new(None).matches_field("-1.0"));
    }

    #[test]
    fn test_coerce_types_rounds_integers() -> anyhow::Result<()> {
        let registry = iris_registry();
        let table = Table::new(vec![
            Column::new("petals", vec![Value::from(3.6), Value::from(4.4), Value::from("7")]),
            Column::new("sepal_length", vec![Value::from(5), Value::from(4.5), Value::from("6.25")]),
            Column::new("color", vec![Value::from(1), Value::from("red"), Value::from(2.5)]),
        ])?;

        let coerced = coerce_types(&registry, "iris", &table)?;

        assert_eq!(
            coerced.column("petals").unwrap().values,
            vec![Value::from(4), Value::from(4), Value::from(7)]
        );
        assert_eq!(
            coerced.column("sepal_length").unwrap().values,
            vec![Value::from(5.0), Value::from(4.5), Value::from(6.25)]
        );
        assert_eq!(
            coerced.column("color").unwrap().values,
            vec![Value::from("1"), Value::from("red"), Value::from("2.5")]
        );

        Ok(())
    }

    #[test]
    fn test_coerce_value_failures() {
        assert!(matches!(
            coerce_value("petals", &Value::from("many"), DataType::Integer),
            Err(SynthError::TypeCoercion { .. })
        ));
        assert!(coerce_value("petals", &Value::from(f64::NAN), DataType::Integer).is_err());
        assert!(coerce_value("x", &Value::from("abc"), DataType::Float).is_err());
    }

    #[test]
    fn test_center_and_uncenter_indicators() -> anyhow::Result<()> {
        let data = DMatrix::from_row_slice(2, 3, &[0.0, 1.0, 0.0, 1.0, 0.0, 0.0]);
        let mut table = NumericTable::new(vec!["x".into(), "c_a".into(), "c_b".into()], data)?;
        let indicators = vec!["c_a".to_string(), "c_b".to_string()];

        center_indicators(&mut table, &indicators);
        assert_eq!(table.column_values(0), vec![0.0, 1.0]);
        assert_eq!(table.column_values(1), vec![1.0, -1.0]);
        assert_eq!(table.column_values(2), vec![-1.0, -1.0]);

        uncenter_indicators(&mut table, &indicators);
        assert_eq!(table.column_values(1), vec![1.0, 0.0]);
        assert_eq!(table.column_values(2), vec![0.0, 0.0]);

        Ok(())
    }
}
