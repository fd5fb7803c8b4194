use std::collections::BTreeMap;
use nalgebra::DMatrix;
use tracing::debug;
use crate::error::{Result, SynthError};
use crate::metadata::MetadataRegistry;
use crate::preprocess::coerce_types;
use crate::schema::{Column, NumericTable, Table, Value};

/// Label maps keyed by column name.
pub type LabelMaps = BTreeMap<String, LabelMap>;

/// Bijection between a column's distinct values (ascending) and the codes `0..K`.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMap {
    classes: Vec<Value>,
}

impl LabelMap {
    pub fn fit(values: &[Value]) -> Self {
        let mut classes = values.to_vec();
        classes.sort();
        classes.dedup();
        Self { classes }
    }

    pub fn code(&self, value: &Value) -> Option<usize> {
        self.classes.binary_search(value).ok()
    }

    /// Maps a (possibly synthesized) number back to a class.
    ///
    /// The number is rounded to the nearest code. A code that rounds outside `0..K` is
    /// rejected rather than pulled onto the first or last class.
    pub fn value(&self, code: f64, column: &str) -> Result<Value> {
        if code.is_nan() {
            return Err(SynthError::coercion(column, "cannot decode a missing code"));
        }

        let rounded = code.round();
        if rounded < 0.0 || rounded >= self.classes.len() as f64 {
            return Err(SynthError::coercion(
                column,
                format!("code {} is outside the {} known classes", code, self.classes.len()),
            ));
        }
        Ok(self.classes[rounded as usize].clone())
    }
}

/// Replaces every discrete column by its label codes. Other columns must already be numeric.
pub fn encode(table: &Table, discrete_columns: &[String]) -> Result<(NumericTable, LabelMaps)> {
    if let Some(missing) = discrete_columns.iter().find(|c| !table.contains(c)) {
        return Err(SynthError::invalid_column(missing, "discrete column not present in table"));
    }

    let n_rows = table.n_rows();
    let mut maps = LabelMaps::new();
    let mut names = Vec::with_capacity(table.n_cols());
    let mut data = DMatrix::zeros(n_rows, table.n_cols());

    for (col_idx, column) in table.columns().iter().enumerate() {
        names.push(column.name.clone());

        if discrete_columns.contains(&column.name) {
            let map = LabelMap::fit(&column.values);
            for (row, value) in column.values.iter().enumerate() {
                // every value was used to fit the map
                data[(row, col_idx)] = map.code(value).unwrap_or_default() as f64;
            }
            debug!(column = %column.name, classes = map.classes.len(), "Fitted label map");
            maps.insert(column.name.clone(), map);
        } else {
            for (row, value) in column.values.iter().enumerate() {
                data[(row, col_idx)] = match value {
                    Value::Null => f64::NAN,
                    Value::Text(s) => {
                        return Err(SynthError::coercion(
                            &column.name,
                            format!("continuous column holds text '{}'", s),
                        ));
                    }
                    other => other.as_f64().unwrap_or(f64::NAN),
                };
            }
        }
    }

    Ok((NumericTable::new(names, data)?, maps))
}

/// Maps label codes back to values and restores every column's declared type.
pub fn decode(
    registry: &MetadataRegistry,
    dataset: &str,
    numeric: &NumericTable,
    maps: &LabelMaps,
) -> Result<Table> {
    if let Some(missing) = maps.keys().find(|c| numeric.position(c).is_none()) {
        return Err(SynthError::invalid_column(missing, "label-mapped column not present in data"));
    }

    let columns = numeric
        .columns
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let cells = numeric.data.column(idx);
            let values = match maps.get(name) {
                Some(map) => cells
                    .iter()
                    .map(|&code| map.value(code, name))
                    .collect::<Result<Vec<_>>>()?,
                None => cells
                    .iter()
                    .map(|&x| if x.is_nan() { Value::Null } else { Value::Float(x) })
                    .collect(),
            };
            Ok(Column::new(name.clone(), values))
        })
        .collect::<Result<Vec<_>>>()?;

    coerce_types(registry, dataset, &Table::new(columns)?)
}
