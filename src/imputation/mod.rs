//! Imputers: fill the missing cells (NaN) of a numeric matrix.
//!
//! The amputation scheduler only knows the [`Imputer`] trait. Concrete algorithms:
//! - [`MeanImputer`]: column mean, or most frequent value for discrete columns
//! - [`HotDeckImputer`]: a random observed value of the same column
//! - [`CopulaImputer`]: conditional draw from a Gaussian copula fitted on the observed cells

mod copula;
mod hot_deck;
mod mean;

pub use copula::CopulaImputer;
pub use hot_deck::HotDeckImputer;
pub use mean::MeanImputer;

use std::fmt;
use nalgebra::DMatrix;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::warn;
use crate::error::{Result, SynthError};

pub trait Imputer {
    fn name(&self) -> &str;

    /// Returns a matrix of the same shape as `data` in which every NaN has been replaced.
    ///
    /// `discrete_columns` holds the indices of columns whose values are codes or indicators.
    fn impute(
        &mut self,
        data: &DMatrix<f64>,
        discrete_columns: &[usize],
        rng: &mut dyn RngCore,
    ) -> Result<DMatrix<f64>>;
}

/// Hyperparameters shared by the imputers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImputerParams {
    /// Shrinkage towards the identity applied to the copula correlation matrix.
    pub shrinkage: f64,
    /// Snap values drawn for discrete columns to the nearest observed value.
    pub snap_discrete: bool,
}

impl Default for ImputerParams {
    fn default() -> Self {
        Self {
            shrinkage: 0.05,
            snap_discrete: true,
        }
    }
}

impl ImputerParams {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.shrinkage) {
            return Err(SynthError::configuration(format!(
                "shrinkage must lie in [0, 1], got {}",
                self.shrinkage
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImputerKind {
    Mean,
    HotDeck,
    #[default]
    Copula,
}

impl ImputerKind {
    pub const ALL: [ImputerKind; 3] = [ImputerKind::Mean, ImputerKind::HotDeck, ImputerKind::Copula];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImputerKind::Mean => "mean",
            ImputerKind::HotDeck => "hot-deck",
            ImputerKind::Copula => "copula",
        }
    }

    /// Resolves an algorithm name. Unknown names fall back to the default algorithm.
    pub fn from_name(name: &str) -> Self {
        let wanted = name.trim().to_lowercase();
        match Self::ALL.iter().find(|k| k.as_str() == wanted) {
            Some(kind) => *kind,
            None => {
                let fallback = Self::default();
                warn!(
                    algorithm = %name,
                    fallback = fallback.as_str(),
                    "Unsupported imputation algorithm, using the default"
                );
                fallback
            }
        }
    }

    pub fn build(self, params: &ImputerParams) -> Box<dyn Imputer> {
        match self {
            ImputerKind::Mean => Box::new(MeanImputer::new()),
            ImputerKind::HotDeck => Box::new(HotDeckImputer::new()),
            ImputerKind::Copula => Box::new(CopulaImputer::new(params.clone())),
        }
    }
}

impl fmt::Display for ImputerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check if value is missing (NaN)
#[inline]
pub fn is_missing(v: f64) -> bool {
    v.is_nan()
}

/// Observed (non-missing) values of column `col`.
pub(crate) fn observed(data: &DMatrix<f64>, col: usize) -> Vec<f64> {
    data.column(col).iter().copied().filter(|v| !is_missing(*v)).collect()
}

pub(crate) fn ensure_not_empty(name: &str, data: &DMatrix<f64>) -> Result<()> {
    if data.nrows() == 0 || data.ncols() == 0 {
        return Err(SynthError::imputer(
            name,
            format!("cannot impute an empty {}x{} matrix", data.nrows(), data.ncols()),
        ));
    }
    Ok(())
}

/// Closest value of an ascending, non-empty slice to `x`.
pub(crate) fn nearest(sorted: &[f64], x: f64) -> f64 {
    let idx = sorted.partition_point(|v| *v < x);
    match (idx.checked_sub(1).map(|i| sorted[i]), sorted.get(idx)) {
        (Some(lo), Some(&hi)) => if x - lo <= hi - x { lo } else { hi },
        (Some(lo), None) => lo,
        (None, Some(&hi)) => hi,
        (None, None) => x,
    }
}
