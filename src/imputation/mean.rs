use nalgebra::DMatrix;
use rand::RngCore;
use tracing::debug;
use crate::error::Result;
use crate::imputation::{ensure_not_empty, is_missing, observed, Imputer};

/// Fills continuous columns with their observed mean and discrete columns with their most
/// frequent observed value (the smallest one on ties). Columns without any observed value
/// are filled with 0.
#[derive(Debug, Clone, Default)]
pub struct MeanImputer;

impl MeanImputer {
    pub fn new() -> Self {
        Self
    }
}

fn mode(mut values: Vec<f64>) -> Option<f64> {
    values.sort_by(f64::total_cmp);

    let mut best: Option<(f64, usize)> = None;
    let mut i = 0;
    while i < values.len() {
        let run = values[i..].iter().take_while(|v| **v == values[i]).count();
        if best.is_none_or(|(_, count)| run > count) {
            best = Some((values[i], run));
        }
        i += run;
    }

    best.map(|(value, _)| value)
}

impl Imputer for MeanImputer {
    fn name(&self) -> &str {
        "mean"
    }

    fn impute(
        &mut self,
        data: &DMatrix<f64>,
        discrete_columns: &[usize],
        _rng: &mut dyn RngCore,
    ) -> Result<DMatrix<f64>> {
        ensure_not_empty(self.name(), data)?;

        let mut imputed = data.clone();

        for col in 0..data.ncols() {
            let values = observed(data, col);
            let fill = if values.is_empty() {
                debug!(column = col, "No observed values, filling with 0");
                0.0
            } else if discrete_columns.contains(&col) {
                mode(values).unwrap_or(0.0)
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            };

            for cell in imputed.column_mut(col).iter_mut() {
                if is_missing(*cell) {
                    *cell = fill;
                }
            }
        }

        Ok(imputed)
    }
}
