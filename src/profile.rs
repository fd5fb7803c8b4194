// Column statistics of a preprocessed or synthetic table, written next to the generated files

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Median, Statistics};
use tracing::debug;
use crate::error::{Result, SynthError};
use crate::schema::{Table, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnProfile {
    Continuous {
        count: usize,
        null_count: usize,
        summary: Option<Summary>,
    },
    Discrete {
        count: usize,
        null_count: usize,
        frequencies: BTreeMap<String, u64>,
    },
}

/// Moments of the non-null values of a continuous column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    /// Sample standard deviation; `None` below two values.
    pub std: Option<f64>,
    /// Bias-corrected skewness; `None` below three values or without spread.
    pub skewness: Option<f64>,
    /// Bias-corrected excess kurtosis; `None` below four values or without spread.
    pub kurtosis: Option<f64>,
}

impl Summary {
    pub fn compute(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let n = values.len() as f64;
        let mean = Statistics::mean(values);
        let std = (values.len() > 1).then(|| Statistics::std_dev(values));

        // central moments
        let m2 = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let m3 = values.iter().map(|v| (v - mean).powi(3)).sum::<f64>() / n;
        let m4 = values.iter().map(|v| (v - mean).powi(4)).sum::<f64>() / n;
        let spread = m2 > f64::EPSILON;

        let skewness = (values.len() > 2 && spread).then(|| {
            let g1 = m3 / m2.powf(1.5);
            g1 * (n * (n - 1.0)).sqrt() / (n - 2.0)
        });
        let kurtosis = (values.len() > 3 && spread).then(|| {
            let g2 = m4 / (m2 * m2) - 3.0;
            ((n + 1.0) * g2 + 6.0) * (n - 1.0) / ((n - 2.0) * (n - 3.0))
        });

        Some(Self {
            min: Statistics::min(values),
            max: Statistics::max(values),
            mean,
            median: Data::new(values.to_vec()).median(),
            std,
            skewness,
            kurtosis,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedProfile {
    pub column: String,
    #[serde(flatten)]
    pub profile: ColumnProfile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableProfile {
    pub rows: usize,
    pub columns: Vec<NamedProfile>,
}

impl TableProfile {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub fn profile_table(table: &Table, discrete_columns: &[String]) -> Result<TableProfile> {
    if let Some(missing) = discrete_columns.iter().find(|c| !table.contains(c)) {
        return Err(SynthError::invalid_column(missing, "discrete column not present in table"));
    }

    let mut columns = Vec::with_capacity(table.n_cols());

    for column in table.columns() {
        let null_count = column.values.iter().filter(|v| v.is_null()).count();
        let count = column.values.len() - null_count;

        let profile = if discrete_columns.contains(&column.name) {
            let mut frequencies = BTreeMap::new();
            for value in column.values.iter().filter(|v| !v.is_null()) {
                *frequencies.entry(value.to_string()).or_insert(0) += 1;
            }
            ColumnProfile::Discrete { count, null_count, frequencies }
        } else {
            let values = column
                .values
                .iter()
                .filter(|v| !v.is_null())
                .map(|v| match v {
                    Value::Text(s) => Err(SynthError::coercion(
                        &column.name,
                        format!("continuous column holds text '{}'", s),
                    )),
                    other => Ok(other.as_f64().unwrap_or(f64::NAN)),
                })
                .collect::<Result<Vec<_>>>()?;
            ColumnProfile::Continuous {
                count,
                null_count,
                summary: Summary::compute(&values),
            }
        };

        columns.push(NamedProfile {
            column: column.name.clone(),
            profile,
        });
    }

    debug!(rows = table.n_rows(), columns = columns.len(), "Profiled table");

    Ok(TableProfile {
        rows: table.n_rows(),
        columns,
    })
}
