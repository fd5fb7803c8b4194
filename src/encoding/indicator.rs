use nalgebra::DMatrix;
use tracing::debug;
use crate::error::{Result, SynthError};
use crate::metadata::MetadataRegistry;
use crate::preprocess::coerce_types;
use crate::schema::{Column, NumericTable, Table, Value};

/// The indicator columns generated for one discrete column, in encoding order.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorGroup {
    pub column: String,
    pub indicators: Vec<String>,
}

impl IndicatorGroup {
    fn prefix(&self) -> String {
        format!("{}_", self.column)
    }

    /// Recovers the encoded value from one of this group's indicator names.
    pub fn value_of(&self, indicator: &str) -> Option<String> {
        indicator.strip_prefix(&self.prefix()).map(str::to_string)
    }
}

pub fn indicator_name(column: &str, value: &Value) -> String {
    format!("{}_{}", column, value)
}

/// Expands each discrete column into one indicator column per distinct value.
///
/// Non-discrete columns come first in table order, followed by the groups in
/// `discrete_columns` order; within a group values are ascending. Cells hold 0 or 1.
pub fn encode(table: &Table, discrete_columns: &[String]) -> Result<NumericTable> {
    if let Some(missing) = discrete_columns.iter().find(|c| !table.contains(c)) {
        return Err(SynthError::invalid_column(missing, "discrete column not present in table"));
    }

    let n_rows = table.n_rows();
    let mut names = Vec::new();
    let mut columns: Vec<Vec<f64>> = Vec::new();

    for column in table.columns().iter().filter(|c| !discrete_columns.contains(&c.name)) {
        let values = column
            .values
            .iter()
            .map(|v| match v {
                Value::Text(s) => Err(SynthError::coercion(
                    &column.name,
                    format!("continuous column holds text '{}'", s),
                )),
                other => Ok(other.as_f64().unwrap_or(f64::NAN)),
            })
            .collect::<Result<Vec<_>>>()?;
        names.push(column.name.clone());
        columns.push(values);
    }

    for name in discrete_columns {
        let Some(column) = table.column(name) else { continue };

        let mut distinct = column.values.clone();
        distinct.sort();
        distinct.dedup();

        for value in &distinct {
            names.push(indicator_name(name, value));
            columns.push(
                column
                    .values
                    .iter()
                    .map(|v| if v == value { 1.0 } else { 0.0 })
                    .collect(),
            );
        }

        debug!(column = %name, indicators = distinct.len(), "Expanded discrete column");
    }

    let data = DMatrix::from_fn(n_rows, columns.len(), |r, c| columns[c][r]);
    NumericTable::new(names, data)
}

/// Finds the indicator group of every discrete column.
///
/// An indicator belongs to the discrete column whose `<column>_` prefix it carries; when
/// several prefixes match, the longest wins. Columns named in `passthrough` are never
/// treated as indicators.
pub fn indicator_groups(
    numeric: &NumericTable,
    discrete_columns: &[String],
    passthrough: &[String],
) -> Vec<IndicatorGroup> {
    let mut groups: Vec<IndicatorGroup> = discrete_columns
        .iter()
        .map(|c| IndicatorGroup {
            column: c.clone(),
            indicators: Vec::new(),
        })
        .collect();

    for name in numeric.columns.iter().filter(|n| !passthrough.contains(n)) {
        let owner = groups
            .iter_mut()
            .filter(|g| name.starts_with(&g.prefix()))
            .max_by_key(|g| g.column.len());
        if let Some(group) = owner {
            group.indicators.push(name.clone());
        }
    }

    groups
}

/// Collapses indicator groups back to their discrete columns.
///
/// Each row takes the value of the group member holding the largest number; on a tie the
/// leftmost member wins, so an all-equal group resolves to its first indicator. The merged
/// columns are then put in `column_order` and cast to their declared types.
pub fn decode(
    registry: &MetadataRegistry,
    dataset: &str,
    numeric: &NumericTable,
    discrete_columns: &[String],
    column_order: &[String],
) -> Result<Table> {
    let passthrough: Vec<String> = column_order
        .iter()
        .filter(|c| !discrete_columns.contains(c))
        .cloned()
        .collect();
    let groups = indicator_groups(numeric, discrete_columns, &passthrough);

    let mut merged: Vec<Column> = Vec::with_capacity(column_order.len());

    for group in &groups {
        if group.indicators.is_empty() {
            return Err(SynthError::invalid_column(&group.column, "indicator group is empty"));
        }

        let positions: Vec<usize> = group
            .indicators
            .iter()
            .filter_map(|name| numeric.position(name))
            .collect();

        let values = (0..numeric.n_rows())
            .map(|row| {
                let winner = leftmost_max(positions.iter().map(|&p| numeric.data[(row, p)]));
                let indicator = &group.indicators[winner];
                group
                    .value_of(indicator)
                    .map(Value::Text)
                    .ok_or_else(|| SynthError::invalid_column(indicator, "indicator name lacks its column prefix"))
            })
            .collect::<Result<Vec<_>>>()?;

        merged.push(Column::new(group.column.clone(), values));
    }

    let grouped: Vec<&String> = groups.iter().flat_map(|g| &g.indicators).collect();
    for (idx, name) in numeric.columns.iter().enumerate() {
        if grouped.contains(&name) {
            continue;
        }
        let values = numeric
            .data
            .column(idx)
            .iter()
            .map(|&x| if x.is_nan() { Value::Null } else { Value::Float(x) })
            .collect();
        merged.push(Column::new(name.clone(), values));
    }

    let order: Vec<&str> = column_order.iter().map(String::as_str).collect();
    let table = Table::new(merged)?.select(&order)?;

    coerce_types(registry, dataset, &table)
}

/// Index of the first maximum; NaN never wins over a number.
fn leftmost_max<I>(values: I) -> usize
where
    I: IntoIterator<Item = f64>,
{
    let mut best_idx = 0;
    let mut best = f64::NAN;

    for (idx, v) in values.into_iter().enumerate() {
        if v > best || (best.is_nan() && !v.is_nan()) {
            best = v;
            best_idx = idx;
        }
    }

    best_idx
}
