use indicatif::ProgressBar;
use nalgebra::DMatrix;
use rand::Rng;
use tracing::{debug, info};
use crate::amputation::{AmputationScheduler, MissRate};
use crate::error::{Result, SynthError};
use crate::imputation::Imputer;

/// Assembles an exact number of synthetic rows out of complete replica passes.
pub struct ReplicaSampler<'a> {
    scheduler: AmputationScheduler<'a>,
    imputer: Box<dyn Imputer>,
    progress: Option<ProgressBar>,
}

impl<'a> ReplicaSampler<'a> {
    pub fn new(
        source: &'a DMatrix<f64>,
        discrete_columns: &'a [usize],
        miss_rate: MissRate,
        imputer: Box<dyn Imputer>,
    ) -> Result<Self> {
        if source.nrows() == 0 {
            return Err(SynthError::configuration("cannot sample from a source with no rows"));
        }
        if let Some(&bad) = discrete_columns.iter().find(|&&c| c >= source.ncols()) {
            return Err(SynthError::configuration(format!(
                "discrete column index {} out of range for {} columns",
                bad,
                source.ncols()
            )));
        }

        Ok(Self {
            scheduler: AmputationScheduler::new(source, discrete_columns, miss_rate),
            imputer,
            progress: None,
        })
    }

    /// Ticks `progress` once per finished replica pass.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Number of replica passes needed for `n_requested` rows.
    pub fn passes_for(&self, n_requested: usize) -> usize {
        n_requested.div_ceil(self.scheduler.source().nrows())
    }

    /// Returns exactly `n_requested` synthetic rows.
    ///
    /// Whole replicas are emitted in pass order; the last, partial block is a uniform
    /// row sample without replacement drawn from one more complete replica.
    pub fn sample<R: Rng>(&mut self, n_requested: usize, rng: &mut R) -> Result<DMatrix<f64>> {
        let (n_rows, n_cols) = self.scheduler.source().shape();
        let full_passes = n_requested / n_rows;
        let remainder = n_requested % n_rows;
        let total_passes = self.passes_for(n_requested);

        info!(
            requested = n_requested,
            source_rows = n_rows,
            full_passes,
            remainder,
            imputer = self.imputer.name(),
            miss_rate = self.scheduler.miss_rate().value(),
            "Sampling synthetic rows"
        );

        if let Some(pb) = &self.progress {
            pb.set_length(total_passes as u64);
            pb.set_position(0);
        }

        let mut output = DMatrix::zeros(n_requested, n_cols);

        for pass in 0..full_passes {
            let replica = self.scheduler.run_pass(self.imputer.as_mut(), rng)?;
            output.rows_mut(pass * n_rows, n_rows).copy_from(&replica);
            self.tick(pass + 1, total_passes);
        }

        if remainder > 0 {
            let replica = self.scheduler.run_pass(self.imputer.as_mut(), rng)?;
            let rows = rand::seq::index::sample(rng, n_rows, remainder).into_vec();
            output
                .rows_mut(full_passes * n_rows, remainder)
                .copy_from(&replica.select_rows(rows.iter()));
            self.tick(total_passes, total_passes);
        }

        if let Some(pb) = &self.progress {
            pb.finish();
        }

        Ok(output)
    }

    fn tick(&self, done: usize, total: usize) {
        debug!(pass = done, of = total, "Replica finished");
        if let Some(pb) = &self.progress {
            pb.inc(1);
        }
    }
}
