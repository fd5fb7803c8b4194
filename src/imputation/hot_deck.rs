use nalgebra::DMatrix;
use rand::RngCore;
use rand::seq::SliceRandom;
use crate::error::Result;
use crate::imputation::{ensure_not_empty, is_missing, observed, Imputer};

/// Replaces each missing cell by a value drawn uniformly from the observed cells of the
/// same column (a random donor). Columns without any observed value are filled with 0.
#[derive(Debug, Clone, Default)]
pub struct HotDeckImputer;

impl HotDeckImputer {
    pub fn new() -> Self {
        Self
    }
}

impl Imputer for HotDeckImputer {
    fn name(&self) -> &str {
        "hot-deck"
    }

    fn impute(
        &mut self,
        data: &DMatrix<f64>,
        _discrete_columns: &[usize],
        rng: &mut dyn RngCore,
    ) -> Result<DMatrix<f64>> {
        ensure_not_empty(self.name(), data)?;

        let mut imputed = data.clone();

        for col in 0..data.ncols() {
            let donors = observed(data, col);
            for cell in imputed.column_mut(col).iter_mut() {
                if is_missing(*cell) {
                    *cell = donors.choose(&mut *rng).copied().unwrap_or(0.0);
                }
            }
        }

        Ok(imputed)
    }
}
