//! Gaussian copula imputation: missing cells are drawn from the conditional distribution
//! implied by the observed cells of the same row.
//!
//! # Mathematical Foundation
//!
//! Each column is standardized with its observed mean and standard deviation,
//! `z = (x - μ) / σ`. The standardized columns are modelled as a multivariate normal with
//! correlation matrix `R`, estimated from pairwise-complete observations.
//!
//! For a row with observed block `O` and missing block `M`:
//!
//! - conditional mean: `μ_M|O = R_MO · R_OO⁻¹ · z_O`
//! - conditional covariance: `Σ_M|O = R_MM − R_MO · R_OO⁻¹ · R_OM`
//!
//! A draw is `z_M = μ_M|O + L · ε` where `L` is the Cholesky factor of `Σ_M|O` and
//! `ε ~ N(0, I)`. The draw is mapped back with `x = μ + σ · z`.
//!
//! # Conditioning
//!
//! Pairwise estimates are not guaranteed to form a positive definite matrix, so `R` is
//! shrunk towards the identity, `(1 − λ)·R + λ·I`, with growing `λ` until the Cholesky
//! decomposition succeeds.

use nalgebra::{DMatrix, DVector};
use rand::{Rng, RngCore};
use tracing::debug;
use crate::error::{Result, SynthError};
use crate::imputation::{ensure_not_empty, is_missing, nearest, observed, Imputer, ImputerParams};

const MIN_STD: f64 = 1e-10;

const JITTER: f64 = 1e-9;

const SHRINKAGE_STEPS: [f64; 4] = [0.1, 0.25, 0.5, 1.0];

/// Shrinkage values to try, ascending from `min_shrinkage` up to full shrinkage.
fn shrinkage_schedule(min_shrinkage: f64) -> Vec<f64> {
    std::iter::once(min_shrinkage)
        .chain(SHRINKAGE_STEPS.into_iter().filter(|s| *s > min_shrinkage))
        .collect()
}

/// Correlation matrix of standardized columns, estimated from pairwise-complete rows.
#[derive(Debug, Clone)]
pub struct CorrelationMatrix {
    pub matrix: DMatrix<f64>,
    pub shrinkage: f64,
}

impl CorrelationMatrix {
    /// `standardized` holds NaN for missing cells.
    pub fn compute(standardized: &DMatrix<f64>, min_shrinkage: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&min_shrinkage) {
            return Err(SynthError::configuration(format!(
                "copula shrinkage must lie in [0, 1], got {}",
                min_shrinkage
            )));
        }

        let n_cols = standardized.ncols();
        let mut matrix = DMatrix::identity(n_cols, n_cols);

        for i in 0..n_cols {
            for j in (i + 1)..n_cols {
                let pairs: Vec<(f64, f64)> = standardized
                    .column(i)
                    .iter()
                    .zip(standardized.column(j).iter())
                    .filter(|(a, b)| !is_missing(**a) && !is_missing(**b))
                    .map(|(a, b)| (*a, *b))
                    .collect();

                let r = if pairs.len() < 2 {
                    0.0
                } else {
                    let sum: f64 = pairs.iter().map(|(a, b)| a * b).sum();
                    (sum / (pairs.len() - 1) as f64).clamp(-1.0, 1.0)
                };

                matrix[(i, j)] = r;
                matrix[(j, i)] = r;
            }
        }

        for shrinkage in shrinkage_schedule(min_shrinkage) {
            let shrunk = &matrix * (1.0 - shrinkage) + DMatrix::identity(n_cols, n_cols) * shrinkage;
            if shrunk.clone().cholesky().is_some() {
                debug!(columns = n_cols, shrinkage, "Computed correlation matrix");
                return Ok(Self {
                    matrix: shrunk,
                    shrinkage,
                });
            }
        }

        Err(SynthError::imputer(
            "copula",
            "correlation matrix is not positive definite even after full shrinkage",
        ))
    }
}

#[derive(Debug, Clone)]
struct Marginal {
    mean: f64,
    std: f64,
    /// Observed values, ascending; used to snap discrete draws.
    support: Vec<f64>,
}

impl Marginal {
    fn fit(mut values: Vec<f64>) -> Self {
        if values.is_empty() {
            return Self {
                mean: 0.0,
                std: 0.0,
                support: Vec::new(),
            };
        }

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let std = if values.len() < 2 {
            0.0
        } else {
            (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        };

        values.sort_by(f64::total_cmp);
        values.dedup();

        Self {
            mean,
            std,
            support: values,
        }
    }

    fn is_degenerate(&self) -> bool {
        self.std < MIN_STD
    }

    fn standardize(&self, x: f64) -> f64 {
        if is_missing(x) {
            f64::NAN
        } else if self.is_degenerate() {
            0.0
        } else {
            (x - self.mean) / self.std
        }
    }

    fn restore(&self, z: f64) -> f64 {
        if self.is_degenerate() {
            self.mean
        } else {
            self.mean + self.std * z
        }
    }
}

#[derive(Debug, Clone)]
pub struct CopulaImputer {
    params: ImputerParams,
}

impl CopulaImputer {
    pub fn new(params: ImputerParams) -> Self {
        Self { params }
    }

    fn standard_normal(rng: &mut dyn RngCore) -> f64 {
        // Box-Muller transform for standard normal
        let u1: f64 = 1.0 - rng.r#gen::<f64>();
        let u2: f64 = rng.r#gen();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }

    /// Draws `z_M` given `z_O` for one row.
    fn draw_missing(
        correlation: &DMatrix<f64>,
        observed_idx: &[usize],
        missing_idx: &[usize],
        z_observed: &DVector<f64>,
        rng: &mut dyn RngCore,
    ) -> DVector<f64> {
        let r_mm = correlation.select_rows(missing_idx).select_columns(missing_idx);

        let (mean, covariance) = if observed_idx.is_empty() {
            (DVector::zeros(missing_idx.len()), r_mm)
        } else {
            let r_oo = correlation.select_rows(observed_idx).select_columns(observed_idx);
            let r_mo = correlation.select_rows(missing_idx).select_columns(observed_idx);

            match r_oo.cholesky() {
                Some(chol) => {
                    let mean = &r_mo * chol.solve(z_observed);
                    let covariance = &r_mm - &r_mo * chol.solve(&r_mo.transpose());
                    (mean, covariance)
                }
                None => (DVector::zeros(missing_idx.len()), r_mm),
            }
        };

        let k = missing_idx.len();
        let noise = DVector::from_fn(k, |_, _| Self::standard_normal(&mut *rng));
        let jittered = &covariance + DMatrix::identity(k, k) * JITTER;

        match jittered.cholesky() {
            Some(chol) => mean + chol.l() * noise,
            None => {
                // fall back to independent draws with the conditional variances
                let scales = DVector::from_fn(k, |i, _| covariance[(i, i)].max(0.0).sqrt());
                mean + scales.component_mul(&noise)
            }
        }
    }
}

impl Imputer for CopulaImputer {
    fn name(&self) -> &str {
        "copula"
    }

    fn impute(
        &mut self,
        data: &DMatrix<f64>,
        discrete_columns: &[usize],
        rng: &mut dyn RngCore,
    ) -> Result<DMatrix<f64>> {
        ensure_not_empty(self.name(), data)?;

        let (n_rows, n_cols) = data.shape();
        let marginals: Vec<Marginal> = (0..n_cols).map(|c| Marginal::fit(observed(data, c))).collect();
        let standardized = DMatrix::from_fn(n_rows, n_cols, |r, c| marginals[c].standardize(data[(r, c)]));
        let correlation = CorrelationMatrix::compute(&standardized, self.params.shrinkage)?;

        let mut imputed = data.clone();

        for row in 0..n_rows {
            let (missing_idx, observed_idx): (Vec<usize>, Vec<usize>) =
                (0..n_cols).partition(|&c| is_missing(data[(row, c)]));

            if missing_idx.is_empty() {
                continue;
            }

            let z_observed = DVector::from_iterator(
                observed_idx.len(),
                observed_idx.iter().map(|&c| standardized[(row, c)]),
            );
            let z_missing = Self::draw_missing(&correlation.matrix, &observed_idx, &missing_idx, &z_observed, rng);

            for (k, &col) in missing_idx.iter().enumerate() {
                let marginal = &marginals[col];
                let mut value = marginal.restore(z_missing[k]);

                if self.params.snap_discrete && discrete_columns.contains(&col) && !marginal.support.is_empty() {
                    value = nearest(&marginal.support, value);
                }

                imputed[(row, col)] = if value.is_finite() { value } else { marginal.mean };
            }
        }

        Ok(imputed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use crate::imputation::tests::{assert_completes, masked_sample};

    #[test]
    fn test_completes_and_snaps_discrete() -> anyhow::Result<()> {
        let data = masked_sample();
        let mut rng = StdRng::seed_from_u64(42);

        let imputed = CopulaImputer::new(ImputerParams::default()).impute(&data, &[1], &mut rng)?;

        assert_completes(&data, &imputed);
        assert!([0.0, 1.0, 2.0].contains(&imputed[(3, 1)]));

        Ok(())
    }

    #[test]
    fn test_strong_correlation_guides_draw() -> anyhow::Result<()> {
        // y = 2x; with y = 20 observed, x should be pulled well below its mean (~19.7)
        let mut values = Vec::new();
        for i in 0..40 {
            let x = i as f64;
            values.extend_from_slice(&[x, 2.0 * x]);
        }
        let mut data = DMatrix::from_row_slice(40, 2, &values);
        data[(10, 0)] = f64::NAN;

        let params = ImputerParams {
            shrinkage: 0.0,
            snap_discrete: false,
        };
        let mut imputer = CopulaImputer::new(params);
        let mut rng = StdRng::seed_from_u64(5);

        let draws = 200;
        let mut total = 0.0;
        for _ in 0..draws {
            total += imputer.impute(&data, &[], &mut rng)?[(10, 0)];
        }
        let average = total / draws as f64;

        assert!(average > 5.0 && average < 15.0, "average draw {}", average);

        Ok(())
    }

    #[test]
    fn test_all_missing_row_and_column() -> anyhow::Result<()> {
        let data = DMatrix::from_row_slice(
            3,
            2,
            &[f64::NAN, f64::NAN, f64::NAN, 1.0, f64::NAN, 3.0],
        );
        let mut rng = StdRng::seed_from_u64(1);

        let imputed = CopulaImputer::new(ImputerParams::default()).impute(&data, &[0], &mut rng)?;

        assert_completes(&data, &imputed);
        assert_eq!(imputed[(0, 0)], 0.0);

        Ok(())
    }

    #[test]
    fn test_correlation_matrix_is_decomposable() -> anyhow::Result<()> {
        let standardized = DMatrix::from_row_slice(
            4,
            3,
            &[
                -1.0, -1.0, 1.0,
                -0.5, f64::NAN, 0.5,
                0.5, 0.4, f64::NAN,
                1.0, 1.1, -1.0,
            ],
        );

        let correlation = CorrelationMatrix::compute(&standardized, 0.0)?;
        assert_eq!(correlation.matrix[(0, 0)], 1.0);
        assert_eq!(correlation.matrix[(0, 1)], correlation.matrix[(1, 0)]);
        assert!(correlation.matrix.clone().cholesky().is_some());

        let shrunk = CorrelationMatrix::compute(&standardized, 0.3)?;
        assert!(shrunk.shrinkage >= 0.3);

        Ok(())
    }

    #[test]
    fn test_shrinkage_schedule_never_goes_below_minimum() {
        assert_eq!(shrinkage_schedule(0.0), vec![0.0, 0.1, 0.25, 0.5, 1.0]);
        assert_eq!(shrinkage_schedule(0.05), vec![0.05, 0.1, 0.25, 0.5, 1.0]);
        assert_eq!(shrinkage_schedule(0.3), vec![0.3, 0.5, 1.0]);
        assert_eq!(shrinkage_schedule(0.5), vec![0.5, 1.0]);
        assert_eq!(shrinkage_schedule(1.0), vec![1.0]);

        for min in [0.0, 0.05, 0.1, 0.3, 0.75] {
            let schedule = shrinkage_schedule(min);
            assert!(schedule.windows(2).all(|w| w[0] < w[1]), "not ascending from {}", min);
        }
    }

    #[test]
    fn test_invalid_shrinkage_rejected() {
        let standardized = DMatrix::from_row_slice(2, 2, &[-1.0, 1.0, 1.0, -1.0]);
        for shrinkage in [f64::NAN, -0.1, 1.5, f64::INFINITY] {
            assert!(
                matches!(
                    CorrelationMatrix::compute(&standardized, shrinkage),
                    Err(SynthError::Configuration { .. })
                ),
                "shrinkage {} accepted",
                shrinkage
            );
        }

        let mut imputer = CopulaImputer::new(ImputerParams {
            shrinkage: f64::NAN,
            ..ImputerParams::default()
        });
        let data = DMatrix::from_row_slice(2, 2, &[1.0, f64::NAN, 2.0, 3.0]);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            imputer.impute(&data, &[], &mut rng),
            Err(SynthError::Configuration { .. })
        ));
    }
}
