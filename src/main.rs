use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;
use crate::amputation::MissRate;
use crate::encoding::EncoderKind;
use crate::imputation::ImputerKind;
use crate::metadata::MetadataRegistry;
use crate::profile::{profile_table, TableProfile};
use crate::synth::{SynthesisConfig, Synthesizer};

mod amputation;
mod encoding;
mod error;
mod imputation;
mod io;
mod metadata;
mod preprocess;
mod profile;
mod sampler;
mod schema;
mod synth;

#[derive(Parser)]
#[command(
    name = "tabular_replica",
    version,
    about = "Synthetic tabular data by iterative amputation and imputation",
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {

    Gen {
        /// Metadata registry (JSON)
        #[arg(short = 'm', long = "metadata", required = true)]
        metadata: PathBuf,

        #[arg(short = 'd', long = "dataset", required = true)]
        dataset: String,

        /// Source table (CSV with header)
        #[arg(short = 'i', long = "input", required = true)]
        input: PathBuf,

        /// Output directory
        #[arg(short = 'o', long = "output", default_value = "synthetic")]
        output: PathBuf,

        /// Number of rows to generate (defaults to the preprocessed row count)
        #[arg(short = 'r', long = "rows")]
        rows: Option<usize>,

        /// Amputation rates, one run per rate
        #[arg(long = "ampu-rates", value_delimiter = ',', default_value = "0.2")]
        rates: Vec<MissRate>,

        /// Imputation algorithms (mean, hot-deck, copula), one run per algorithm
        #[arg(long = "algos", value_delimiter = ',', default_value = "copula")]
        algorithms: Vec<String>,

        #[arg(short = 'e', long = "encoder", default_value = "label")]
        encoder: EncoderKind,

        /// Random seed for reproducibility (optional)
        #[arg(short = 's', long = "seed")]
        seed: Option<u64>,

        /// Also write a JSON profile of the source and synthetic tables
        #[arg(long = "profile")]
        profile: bool,
    },

    Profile {
        #[arg(short = 'm', long = "metadata", required = true)]
        metadata: PathBuf,

        #[arg(short = 'd', long = "dataset", required = true)]
        dataset: String,

        #[arg(short = 'i', long = "input", required = true)]
        input: PathBuf,
    },
}

struct GenOptions {
    rows: Option<usize>,
    rates: Vec<MissRate>,
    algorithms: Vec<ImputerKind>,
    encoder: EncoderKind,
    seed: Option<u64>,
    profile: bool,
}

#[derive(Serialize)]
struct RunReport<'a> {
    dataset: &'a str,
    generated_at: String,
    miss_rate: f64,
    encoder: String,
    algorithm: &'a str,
    seed: Option<u64>,
    preprocessed: TableProfile,
    synthetic: TableProfile,
}

fn main() -> Result<()> {

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Gen {
            metadata,
            dataset,
            input,
            output,
            rows,
            rates,
            algorithms,
            encoder,
            seed,
            profile,
        } => {
            let options = GenOptions {
                rows,
                rates,
                algorithms: algorithms.iter().map(|a| ImputerKind::from_name(a)).collect(),
                encoder,
                seed,
                profile,
            };
            generate(&metadata, &dataset, &input, &output, &options)?;
        }
        Commands::Profile { metadata, dataset, input } => {
            print_profile(&metadata, &dataset, &input)?;
        }
    }

    Ok(())
}

fn generate(metadata_path: &Path, dataset: &str, input: &Path, output_dir: &Path, options: &GenOptions) -> Result<()> {
    eprintln!("tabular_replica Generator");

    let registry = MetadataRegistry::load_from_file(metadata_path)
        .context("Failed to load metadata registry")?;
    let raw = io::read_csv(&registry, dataset, input)
        .with_context(|| format!("Failed to read input table {}", input.display()))?;

    eprintln!("Loaded: {} rows, {} columns", raw.n_rows(), raw.n_cols());

    if let Some(s) = options.seed {
        eprintln!("Using seed: {} (reproducible mode)", s);
    }

    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;

    for rate in &options.rates {
        for algorithm in &options.algorithms {
            let stem = output_stem(dataset, *rate, options.encoder, *algorithm);

            let config = SynthesisConfig {
                miss_rate: *rate,
                encoder: options.encoder,
                algorithm: *algorithm,
                n_samples: options.rows,
                seed: options.seed,
                ..SynthesisConfig::for_dataset(dataset)
            };

            let pb = ProgressBar::new(0);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} {prefix:>24} [{bar:30.cyan/blue}] {pos}/{len} replicas")
                    .context("Invalid progress template")?
                    .progress_chars("=> "),
            );
            pb.set_prefix(stem.clone());
            pb.enable_steady_tick(Duration::from_millis(100));

            let synthesizer = Synthesizer::new(&registry, config)
                .context("Failed to initialize synthesizer")?
                .with_progress(pb.clone());

            let result = synthesizer
                .run(&raw)
                .with_context(|| format!("Synthesis failed for {}", stem))?;

            pb.finish_with_message("done");

            let pre_path = output_dir.join(format!("{}_pre.csv", stem));
            let sam_path = output_dir.join(format!("{}_sam.csv", stem));
            io::write_csv(&result.preprocessed, &pre_path)
                .with_context(|| format!("Failed to write {}", pre_path.display()))?;
            io::write_csv(&result.synthetic, &sam_path)
                .with_context(|| format!("Failed to write {}", sam_path.display()))?;

            if options.profile {
                let discrete = registry.discrete_columns(dataset, Some(&result.preprocessed))?;
                let report = RunReport {
                    dataset,
                    generated_at: chrono::Utc::now().to_rfc3339(),
                    miss_rate: rate.value(),
                    encoder: options.encoder.to_string(),
                    algorithm: algorithm.as_str(),
                    seed: options.seed,
                    preprocessed: profile_table(&result.preprocessed, &discrete)?,
                    synthetic: profile_table(&result.synthetic, &discrete)?,
                };
                let report_path = output_dir.join(format!("{}_profile.json", stem));
                std::fs::write(&report_path, serde_json::to_string_pretty(&report)?)
                    .with_context(|| format!("Failed to write {}", report_path.display()))?;
            }

            info!(
                run = %stem,
                rows = result.synthetic.n_rows(),
                "Run written"
            );
            eprintln!("  {} -> {} rows", sam_path.display(), result.synthetic.n_rows());
        }
    }

    eprintln!("Generation complete!");

    Ok(())
}

fn print_profile(metadata_path: &Path, dataset: &str, input: &Path) -> Result<()> {
    let registry = MetadataRegistry::load_from_file(metadata_path)
        .context("Failed to load metadata registry")?;
    let table = io::read_csv(&registry, dataset, input)
        .with_context(|| format!("Failed to read input table {}", input.display()))?;

    let discrete = registry.discrete_columns(dataset, Some(&table))?;
    let profile = profile_table(&table, &discrete).context("Failed to profile table")?;

    println!("{}", profile.to_json()?);

    Ok(())
}

fn output_stem(dataset: &str, rate: MissRate, encoder: EncoderKind, algorithm: ImputerKind) -> String {
    format!("{}_{}_{}_{}", dataset, rate, encoder, algorithm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_stem() -> Result<()> {
        assert_eq!(
            output_stem("iris", MissRate::new(0.25)?, EncoderKind::OneHot, ImputerKind::HotDeck),
            "iris_0.25_one-hot_hot-deck"
        );
        Ok(())
    }

    #[test]
    fn test_gen_parsing() {
        let cli = Cli::try_parse_from([
            "tabular_replica", "gen", "-m", "meta.json", "-d", "iris", "-i", "iris.csv",
            "--ampu-rates", "0.2,0.5", "--algos", "copula,mean", "-e", "one-hot", "-s", "3",
        ])
        .unwrap();

        match cli.command {
            Commands::Gen { dataset, output, rows, rates, algorithms, encoder, seed, profile, .. } => {
                assert_eq!(dataset, "iris");
                assert_eq!(output, PathBuf::from("synthetic"));
                assert_eq!(rows, None);
                assert_eq!(rates.iter().map(|r| r.value()).collect::<Vec<_>>(), vec![0.2, 0.5]);
                assert_eq!(algorithms, vec!["copula", "mean"]);
                assert_eq!(encoder, EncoderKind::OneHot);
                assert_eq!(seed, Some(3));
                assert!(!profile);
            }
            _ => panic!("Expected Gen command"),
        }
    }

    #[test]
    fn test_rate_out_of_range_rejected_at_parse_time() {
        let result = Cli::try_parse_from([
            "tabular_replica", "gen", "-m", "meta.json", "-d", "iris", "-i", "iris.csv",
            "--ampu-rates", "1.0",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_profile_parsing() {
        let cli = Cli::try_parse_from(["tabular_replica", "profile", "-m", "m.json", "-d", "iris", "-i", "x.csv"])
            .unwrap();
        assert!(matches!(cli.command, Commands::Profile { .. }));
    }
}
