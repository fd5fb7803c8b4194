use nalgebra::DMatrix;
use crate::encoding::{indicator, label, EncoderKind, LabelMaps};
use crate::error::Result;
use crate::metadata::MetadataRegistry;
use crate::preprocess::{center_indicators, uncenter_indicators};
use crate::schema::{NumericTable, Table};

/// A table in its numeric working form, together with what is needed to decode it.
#[derive(Debug, Clone)]
pub enum EncodedTable {
    Label {
        numeric: NumericTable,
        maps: LabelMaps,
    },
    /// Indicator cells are centered to {-1, 1} while in this form.
    OneHot {
        numeric: NumericTable,
        discrete_columns: Vec<String>,
        column_order: Vec<String>,
        indicators: Vec<String>,
    },
}

impl EncodedTable {
    pub fn encode(kind: EncoderKind, table: &Table, discrete_columns: &[String]) -> Result<Self> {
        match kind {
            EncoderKind::Label => {
                let (numeric, maps) = label::encode(table, discrete_columns)?;
                Ok(EncodedTable::Label { numeric, maps })
            }
            EncoderKind::OneHot => {
                let mut numeric = indicator::encode(table, discrete_columns)?;
                let column_order: Vec<String> = table.column_names().iter().map(|s| s.to_string()).collect();
                let passthrough: Vec<String> = column_order
                    .iter()
                    .filter(|c| !discrete_columns.contains(c))
                    .cloned()
                    .collect();

                let indicators: Vec<String> = indicator::indicator_groups(&numeric, discrete_columns, &passthrough)
                    .into_iter()
                    .flat_map(|g| g.indicators)
                    .collect();
                center_indicators(&mut numeric, &indicators);

                Ok(EncodedTable::OneHot {
                    numeric,
                    discrete_columns: discrete_columns.to_vec(),
                    column_order,
                    indicators,
                })
            }
        }
    }

    pub fn numeric(&self) -> &NumericTable {
        match self {
            EncodedTable::Label { numeric, .. } | EncodedTable::OneHot { numeric, .. } => numeric,
        }
    }

    /// Positions of the columns an imputer should treat as discrete.
    pub fn discrete_indices(&self) -> Vec<usize> {
        let numeric = self.numeric();
        let names: Vec<&String> = match self {
            EncodedTable::Label { maps, .. } => maps.keys().collect(),
            EncodedTable::OneHot { indicators, .. } => indicators.iter().collect(),
        };
        names.into_iter().filter_map(|n| numeric.position(n)).collect()
    }

    /// Decodes a matrix laid out like [`EncodedTable::numeric`] back to declared types.
    pub fn decode(&self, registry: &MetadataRegistry, dataset: &str, data: DMatrix<f64>) -> Result<Table> {
        let mut synthetic = NumericTable::new(self.numeric().columns.clone(), data)?;

        match self {
            EncodedTable::Label { maps, .. } => label::decode(registry, dataset, &synthetic, maps),
            EncodedTable::OneHot {
                discrete_columns,
                column_order,
                indicators,
                ..
            } => {
                uncenter_indicators(&mut synthetic, indicators);
                indicator::decode(registry, dataset, &synthetic, discrete_columns, column_order)
            }
        }
    }
}
