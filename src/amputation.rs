//! Cell-universe amputation: one replica pass as an explicit state machine.
//!
//! A pass starts from the set of all `(row, column)` coordinates of the source matrix (the
//! universe). Each round draws a random batch of coordinates, hides those cells in a fresh
//! copy of the source, asks the imputer to fill them, and copies the filled cells into the
//! replica. The pass is over once every coordinate has been drawn exactly once.
//!
//! ```text
//! Ready ──▶ Amputating ──▶ Imputing ──▶ Merging ──▶ Ready ... ──▶ Done
//!                              │
//!                              └──(imputer error)──▶ Failed
//! ```

use std::fmt;
use std::str::FromStr;
use nalgebra::DMatrix;
use rand::Rng;
use tracing::{debug, info, warn};
use crate::error::{Result, SynthError};
use crate::imputation::Imputer;

/// Marker written into amputated cells.
pub const MISSING: f64 = f64::NAN;

pub type Cell = (usize, usize);

/// Fraction of the universe amputated per batch, validated to lie in `[0.0, 1.0)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MissRate(f64);

impl MissRate {
    pub fn new(rate: f64) -> Result<Self> {
        if !(0.0..1.0).contains(&rate) {
            return Err(SynthError::configuration(format!(
                "miss_rate must lie in [0.0, 1.0), got {}",
                rate
            )));
        }
        Ok(Self(rate))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// Cells per batch for a universe of `n_cells`: `ceil(n_cells * rate)`, never below one.
    pub fn batch_size(&self, n_cells: usize) -> usize {
        ((n_cells as f64 * self.0).ceil() as usize).max(1)
    }
}

impl Default for MissRate {
    fn default() -> Self {
        Self(0.2)
    }
}

impl fmt::Display for MissRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MissRate {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let rate: f64 = s
            .trim()
            .parse()
            .map_err(|_| format!("'{}' is not a number", s))?;
        MissRate::new(rate).map_err(|e| e.to_string())
    }
}

/// Coordinates drawn for one round, with their positions in the universe (descending).
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    positions: Vec<usize>,
    cells: Vec<Cell>,
}

impl Batch {
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }
}

#[derive(Debug, Clone)]
pub enum PassState {
    Ready,
    Amputating { batch: Batch },
    Imputing { batch: Batch, masked: DMatrix<f64> },
    Merging { batch: Batch, imputed: DMatrix<f64> },
    Done,
    Failed,
}

impl PassState {
    pub fn name(&self) -> &'static str {
        match self {
            PassState::Ready => "ready",
            PassState::Amputating { .. } => "amputating",
            PassState::Imputing { .. } => "imputing",
            PassState::Merging { .. } => "merging",
            PassState::Done => "done",
            PassState::Failed => "failed",
        }
    }
}

/// Holds the source matrix and the amputation settings; hands out replica passes.
#[derive(Debug, Clone)]
pub struct AmputationScheduler<'a> {
    source: &'a DMatrix<f64>,
    discrete_columns: &'a [usize],
    miss_rate: MissRate,
}

impl<'a> AmputationScheduler<'a> {
    pub fn new(source: &'a DMatrix<f64>, discrete_columns: &'a [usize], miss_rate: MissRate) -> Self {
        Self {
            source,
            discrete_columns,
            miss_rate,
        }
    }

    pub fn source(&self) -> &DMatrix<f64> {
        self.source
    }

    pub fn miss_rate(&self) -> MissRate {
        self.miss_rate
    }

    /// A fresh pass over the full universe.
    pub fn pass(&self) -> ReplicaPass<'a> {
        ReplicaPass::new(self.source, self.discrete_columns, self.miss_rate)
    }

    /// Runs one pass to completion and returns the replica.
    pub fn run_pass<R: Rng>(&self, imputer: &mut dyn Imputer, rng: &mut R) -> Result<DMatrix<f64>> {
        self.pass().run(imputer, rng)
    }
}

/// The state of one replica pass.
pub struct ReplicaPass<'a> {
    source: &'a DMatrix<f64>,
    discrete_columns: &'a [usize],
    batch_size: usize,
    universe: Vec<Cell>,
    replica: DMatrix<f64>,
    state: PassState,
    rounds: usize,
}

impl<'a> ReplicaPass<'a> {
    pub fn new(source: &'a DMatrix<f64>, discrete_columns: &'a [usize], miss_rate: MissRate) -> Self {
        let (n_rows, n_cols) = source.shape();
        let universe: Vec<Cell> = (0..n_rows)
            .flat_map(|r| (0..n_cols).map(move |c| (r, c)))
            .collect();

        Self {
            source,
            discrete_columns,
            batch_size: miss_rate.batch_size(universe.len()),
            universe,
            replica: source.clone(),
            state: PassState::Ready,
            rounds: 0,
        }
    }

    /// Coordinates not yet merged into the replica.
    pub fn remaining(&self) -> usize {
        self.universe.len()
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, PassState::Done)
    }

    /// Performs a single transition.
    ///
    /// An error leaves the pass in [`PassState::Failed`]; a failed pass cannot be resumed.
    pub fn step<R: Rng>(&mut self, imputer: &mut dyn Imputer, rng: &mut R) -> Result<()> {
        let state = std::mem::replace(&mut self.state, PassState::Failed);
        let from = state.name();

        match self.transition(state, imputer, rng) {
            Ok(next) => {
                self.state = next;
                Ok(())
            }
            Err(e) => {
                warn!(
                    state = from,
                    rounds = self.rounds(),
                    remaining = self.remaining(),
                    error = %e,
                    "Replica pass failed"
                );
                Err(e)
            }
        }
    }

    fn transition<R: Rng>(&mut self, state: PassState, imputer: &mut dyn Imputer, rng: &mut R) -> Result<PassState> {
        let next = match state {
            PassState::Ready if self.universe.is_empty() => PassState::Done,
            PassState::Ready => PassState::Amputating {
                batch: self.draw_batch(rng),
            },
            PassState::Amputating { batch } => {
                let mut masked = self.source.clone();
                for &(r, c) in batch.cells() {
                    masked[(r, c)] = MISSING;
                }
                PassState::Imputing { batch, masked }
            }
            PassState::Imputing { batch, masked } => {
                let imputed = imputer
                    .impute(&masked, self.discrete_columns, &mut *rng)
                    .map_err(|e| match e {
                        SynthError::ImputerFailure { .. } => e,
                        other => SynthError::imputer(imputer.name(), other.to_string()),
                    })?;
                self.check_imputed(imputer.name(), &batch, &imputed)?;
                PassState::Merging { batch, imputed }
            }
            PassState::Merging { batch, imputed } => {
                for &(r, c) in batch.cells() {
                    self.replica[(r, c)] = imputed[(r, c)];
                }
                for &pos in &batch.positions {
                    self.universe.swap_remove(pos);
                }
                self.rounds += 1;

                debug!(
                    round = self.rounds,
                    batch = batch.cells().len(),
                    remaining = self.universe.len(),
                    "Merged imputed batch into replica"
                );

                PassState::Ready
            }
            PassState::Done => PassState::Done,
            PassState::Failed => {
                return Err(SynthError::configuration("cannot resume a failed replica pass"));
            }
        };

        Ok(next)
    }

    /// Steps until the universe is exhausted and returns the finished replica.
    pub fn run<R: Rng>(mut self, imputer: &mut dyn Imputer, rng: &mut R) -> Result<DMatrix<f64>> {
        while !self.is_done() {
            self.step(imputer, rng)?;
        }

        info!(
            rows = self.replica.nrows(),
            cols = self.replica.ncols(),
            rounds = self.rounds,
            imputer = imputer.name(),
            "Replica pass complete"
        );

        Ok(self.replica)
    }

    fn draw_batch<R: Rng>(&self, rng: &mut R) -> Batch {
        let amount = self.batch_size.min(self.universe.len());
        let mut positions = rand::seq::index::sample(rng, self.universe.len(), amount).into_vec();
        positions.sort_unstable_by(|a, b| b.cmp(a));

        let cells = positions.iter().map(|&p| self.universe[p]).collect();
        Batch { positions, cells }
    }

    fn check_imputed(&self, name: &str, batch: &Batch, imputed: &DMatrix<f64>) -> Result<()> {
        if imputed.shape() != self.source.shape() {
            return Err(SynthError::imputer(
                name,
                format!(
                    "returned a {}x{} matrix for a {}x{} input",
                    imputed.nrows(),
                    imputed.ncols(),
                    self.source.nrows(),
                    self.source.ncols()
                ),
            ));
        }

        if let Some(&(r, c)) = batch.cells().iter().find(|&&(r, c)| !imputed[(r, c)].is_finite()) {
            return Err(SynthError::imputer(
                name,
                format!("left cell ({}, {}) unresolved", r, c),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use rand::{RngCore, SeedableRng};
    use rand::rngs::StdRng;
    use crate::imputation::{HotDeckImputer, MeanImputer};

    fn source(n_rows: usize, n_cols: usize) -> DMatrix<f64> {
        DMatrix::from_fn(n_rows, n_cols, |r, c| (r * n_cols + c) as f64)
    }

    /// Fills every missing cell with -1 and records what it was shown.
    struct Recorder {
        masks: Vec<Vec<Cell>>,
    }

    impl Imputer for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn impute(&mut self, data: &DMatrix<f64>, _: &[usize], _: &mut dyn RngCore) -> Result<DMatrix<f64>> {
            // cells outside the batch must still hold source values, never earlier fills
            assert!(data.iter().all(|v| v.is_nan() || *v >= 0.0));

            let mut cells = Vec::new();
            let mut out = data.clone();
            for r in 0..data.nrows() {
                for c in 0..data.ncols() {
                    if data[(r, c)].is_nan() {
                        cells.push((r, c));
                        out[(r, c)] = -1.0;
                    }
                }
            }
            self.masks.push(cells);
            Ok(out)
        }
    }

    struct Broken {
        shape: (usize, usize),
        fill: f64,
    }

    impl Imputer for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn impute(&mut self, _: &DMatrix<f64>, _: &[usize], _: &mut dyn RngCore) -> Result<DMatrix<f64>> {
            Ok(DMatrix::from_element(self.shape.0, self.shape.1, self.fill))
        }
    }

    /// Collects the batch of every round by stepping the state machine by hand.
    fn collect_batches(source: &DMatrix<f64>, rate: f64, seed: u64) -> anyhow::Result<Vec<Vec<Cell>>> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut imputer = MeanImputer::new();
        let mut pass = ReplicaPass::new(source, &[], MissRate::new(rate)?);
        let mut batches = Vec::new();

        while !pass.is_done() {
            if let PassState::Amputating { batch } = &pass.state {
                batches.push(batch.cells().to_vec());
            }
            pass.step(&mut imputer, &mut rng)?;
        }

        Ok(batches)
    }

    #[test]
    fn test_miss_rate_bounds() {
        assert!(MissRate::new(0.0).is_ok());
        assert!(MissRate::new(0.99).is_ok());
        assert!(matches!(MissRate::new(1.0), Err(SynthError::Configuration { .. })));
        assert!(MissRate::new(-0.1).is_err());
        assert!(MissRate::new(f64::NAN).is_err());
        assert!("1.5".parse::<MissRate>().is_err());
        assert_eq!("0.25".parse::<MissRate>().map(|r| r.value()), Ok(0.25));
    }

    #[test]
    fn test_batch_size() -> anyhow::Result<()> {
        assert_eq!(MissRate::new(0.2)?.batch_size(30), 6);
        assert_eq!(MissRate::new(0.21)?.batch_size(30), 7);
        assert_eq!(MissRate::new(0.0)?.batch_size(30), 1);
        Ok(())
    }

    #[test]
    fn test_batches_partition_the_universe() -> anyhow::Result<()> {
        let source = source(10, 3);

        for (rate, seed) in [(0.0, 1), (0.1, 2), (0.2, 3), (0.35, 4), (0.5, 5), (0.99, 6)] {
            let batches = collect_batches(&source, rate, seed)?;

            let mut seen = HashSet::new();
            for batch in &batches {
                assert!(!batch.is_empty());
                for cell in batch {
                    assert!(seen.insert(*cell), "cell {:?} drawn twice at rate {}", cell, rate);
                }
            }
            assert_eq!(seen.len(), 30, "universe not covered at rate {}", rate);
        }

        Ok(())
    }

    #[test]
    fn test_batch_sizes_shrink_at_the_end() -> anyhow::Result<()> {
        // 30 cells at rate 0.4: batches of 12, 12 and the remaining 6
        let batches = collect_batches(&source(10, 3), 0.4, 9)?;
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![12, 12, 6]);

        // rate 0 amputates one cell per round
        let batches = collect_batches(&source(2, 2), 0.0, 9)?;
        assert_eq!(batches.len(), 4);

        Ok(())
    }

    #[test]
    fn test_state_sequence() -> anyhow::Result<()> {
        let source = source(2, 2);
        let mut rng = StdRng::seed_from_u64(0);
        let mut imputer = MeanImputer::new();
        let mut pass = ReplicaPass::new(&source, &[], MissRate::new(0.5)?);

        let mut names = vec![pass.state.name()];
        while !pass.is_done() {
            pass.step(&mut imputer, &mut rng)?;
            names.push(pass.state.name());
        }

        assert_eq!(
            names,
            vec![
                "ready", "amputating", "imputing", "merging",
                "ready", "amputating", "imputing", "merging",
                "ready", "done",
            ]
        );
        assert_eq!(pass.rounds(), 2);
        assert_eq!(pass.remaining(), 0);

        Ok(())
    }

    #[test]
    fn test_imputer_sees_original_with_only_the_batch_masked() -> anyhow::Result<()> {
        let source = source(4, 3);
        let scheduler = AmputationScheduler::new(&source, &[], MissRate::new(0.25)?);
        let mut recorder = Recorder { masks: Vec::new() };
        let mut rng = StdRng::seed_from_u64(17);

        let replica = scheduler.run_pass(&mut recorder, &mut rng)?;

        // 12 cells, 3 per round
        assert_eq!(recorder.masks.len(), 4);
        assert!(recorder.masks.iter().all(|m| m.len() == 3));
        // every cell was replaced by the recorder's value exactly once
        assert!(replica.iter().all(|v| *v == -1.0));

        Ok(())
    }

    #[test]
    fn test_replica_values_come_from_imputer() -> anyhow::Result<()> {
        let source = source(5, 2);
        let scheduler = AmputationScheduler::new(&source, &[], MissRate::new(0.3)?);
        let mut imputer = HotDeckImputer::new();
        let mut rng = StdRng::seed_from_u64(23);

        let replica = scheduler.run_pass(&mut imputer, &mut rng)?;

        assert_eq!(replica.shape(), source.shape());
        for c in 0..2 {
            let column: Vec<f64> = source.column(c).iter().copied().collect();
            assert!(replica.column(c).iter().all(|v| column.contains(v)));
        }

        Ok(())
    }

    #[test]
    fn test_wrong_shape_is_imputer_failure() -> anyhow::Result<()> {
        let source = source(3, 2);
        let scheduler = AmputationScheduler::new(&source, &[], MissRate::new(0.5)?);
        let mut imputer = Broken { shape: (2, 2), fill: 0.0 };
        let mut rng = StdRng::seed_from_u64(0);

        let result = scheduler.run_pass(&mut imputer, &mut rng);
        assert!(matches!(result, Err(SynthError::ImputerFailure { .. })));

        Ok(())
    }

    #[test]
    fn test_unresolved_cells_fail_the_pass() -> anyhow::Result<()> {
        let source = source(3, 2);
        let mut imputer = Broken { shape: (3, 2), fill: f64::NAN };
        let mut rng = StdRng::seed_from_u64(0);
        let mut pass = ReplicaPass::new(&source, &[], MissRate::new(0.5)?);

        let mut result = Ok(());
        while result.is_ok() && !pass.is_done() {
            result = pass.step(&mut imputer, &mut rng);
        }

        assert!(matches!(result, Err(SynthError::ImputerFailure { .. })));
        assert_eq!(pass.state.name(), "failed");
        assert!(pass.step(&mut imputer, &mut rng).is_err());

        Ok(())
    }
}
