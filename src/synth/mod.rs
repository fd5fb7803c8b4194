mod strategy;

pub use strategy::EncodedTable;

use indicatif::ProgressBar;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::info;
use crate::amputation::MissRate;
use crate::encoding::EncoderKind;
use crate::error::{Result, SynthError};
use crate::imputation::{ImputerKind, ImputerParams};
use crate::metadata::MetadataRegistry;
use crate::preprocess::{drop_columns, drop_incomplete_rows, replace_missing_sentinels};
use crate::sampler::ReplicaSampler;
use crate::schema::Table;

#[derive(Debug, Clone)]
pub struct SynthesisConfig {
    pub dataset: String,
    pub miss_rate: MissRate,
    pub encoder: EncoderKind,
    pub algorithm: ImputerKind,
    /// Rows to generate; the preprocessed row count when unset.
    pub n_samples: Option<usize>,
    pub seed: Option<u64>,
    pub params: ImputerParams,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            dataset: String::new(),
            miss_rate: MissRate::default(),
            encoder: EncoderKind::default(),
            algorithm: ImputerKind::default(),
            n_samples: None,
            seed: None,
            params: ImputerParams::default(),
        }
    }
}

impl SynthesisConfig {
    pub fn for_dataset(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            ..Self::default()
        }
    }
}

pub struct Synthesizer<'a> {
    registry: &'a MetadataRegistry,
    config: SynthesisConfig,
    progress: Option<ProgressBar>,
}

impl<'a> Synthesizer<'a> {
    pub fn new(registry: &'a MetadataRegistry, config: SynthesisConfig) -> Result<Self> {
        let dataset = registry.dataset(&config.dataset)?;
        config.params.validate()?;

        info!(
            dataset = %config.dataset,
            columns = dataset.columns.len(),
            encoder = %config.encoder,
            algorithm = %config.algorithm,
            miss_rate = config.miss_rate.value(),
            "Synthesizer initialized"
        );

        Ok(Self {
            registry,
            config,
            progress: None,
        })
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Cleans `raw` the way the metadata prescribes: flagged columns dropped, sentinels
    /// turned into nulls, incomplete rows removed.
    pub fn preprocess(&self, raw: &Table) -> Result<Table> {
        let dataset = &self.config.dataset;
        let table = drop_columns(self.registry, dataset, raw)?;
        let table = replace_missing_sentinels(self.registry, dataset, &table)?;
        Ok(drop_incomplete_rows(&table))
    }

    pub fn run(&self, raw: &Table) -> Result<SynthesisResult> {
        let dataset = self.config.dataset.as_str();

        let preprocessed = self.preprocess(raw)?;
        if preprocessed.n_rows() == 0 {
            return Err(SynthError::configuration(format!(
                "dataset '{}' has no complete rows left after preprocessing",
                dataset
            )));
        }

        let discrete = self.registry.discrete_columns(dataset, Some(&preprocessed))?;
        let continuous = self.registry.continuous_columns(dataset, Some(&preprocessed))?;
        let target = self.registry.target_column(dataset, Some(&preprocessed))?;

        info!(
            dataset,
            discrete = discrete.len(),
            continuous = continuous.len(),
            target = ?target,
            "Resolved column roles"
        );

        let encoded = EncodedTable::encode(self.config.encoder, &preprocessed, &discrete)?;
        let discrete_indices = encoded.discrete_indices();

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let imputer = self.config.algorithm.build(&self.config.params);
        let mut sampler = ReplicaSampler::new(
            &encoded.numeric().data,
            &discrete_indices,
            self.config.miss_rate,
            imputer,
        )?;
        if let Some(pb) = &self.progress {
            sampler = sampler.with_progress(pb.clone());
        }

        let n_samples = self.config.n_samples.unwrap_or(preprocessed.n_rows());
        let sampled = sampler.sample(n_samples, &mut rng)?;
        let synthetic = encoded.decode(self.registry, dataset, sampled)?;

        info!(
            dataset,
            source_rows = preprocessed.n_rows(),
            synthetic_rows = synthetic.n_rows(),
            encoded_columns = encoded.numeric().columns.len(),
            "Synthesis complete"
        );

        Ok(SynthesisResult {
            encoded_columns: encoded.numeric().columns.clone(),
            preprocessed,
            synthetic,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SynthesisResult {
    /// The cleaned source the synthetic rows were modelled on.
    pub preprocessed: Table,
    pub synthetic: Table,
    /// Column layout of the numeric working matrix.
    pub encoded_columns: Vec<String>,
}
