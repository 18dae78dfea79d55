use anyhow::{anyhow, Context, Result};
use burn::backend::Autodiff;
use burn::config::Config;
use burn_ndarray::NdArray;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};
use warpkit_atlas::optimizer::{AdamOptimizer, AtlasImage, GradientDescent, Momentum, Optimizer};
use warpkit_atlas::{
    AffinePopulation, AtlasConfig, AtlasFitter, LocalProcessGroup, ProcessGroup, SingleProcess,
};
use warpkit_core::LinearSampler;

mod synthetic;

use synthetic::BlobPopulation;

type Backend = Autodiff<NdArray<f32>>;

#[derive(Parser)]
#[command(name = "warpkit")]
#[command(about = "Affine atlas building on synthetic populations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit an atlas to translated Gaussian blobs
    FitSynthetic {
        /// Atlas configuration (JSON); defaults are used when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of images in the population
        #[arg(long, default_value_t = 16)]
        samples: usize,

        /// Side length of the square images
        #[arg(long, default_value_t = 24)]
        size: usize,

        /// Override the number of epochs
        #[arg(long)]
        epochs: Option<usize>,

        /// Number of in-process ranks
        #[arg(long, default_value_t = 1)]
        world_size: usize,

        /// Atlas image optimizer
        #[arg(long, value_enum, default_value_t = OptimizerKind::Sgd)]
        optimizer: OptimizerKind,

        /// Write the effective configuration here
        #[arg(long)]
        save_config: Option<PathBuf>,
    },

    /// Print or write the default atlas configuration
    DefaultConfig {
        /// Output file; prints to stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OptimizerKind {
    /// Plain gradient descent
    Sgd,
    /// Heavy-ball momentum 0.9
    Momentum,
    Adam,
}

/// What one rank brings back from a fit.
struct RankOutcome {
    rank: usize,
    epoch_losses: Vec<f64>,
    image_steps: Vec<usize>,
    translations: Vec<f32>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::FitSynthetic {
            config,
            samples,
            size,
            epochs,
            world_size,
            optimizer,
            save_config,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(epochs) = epochs {
                config.num_epochs = epochs;
            }
            config.validate()?;
            if let Some(path) = save_config {
                config
                    .save(&path)
                    .with_context(|| format!("cannot write {}", path.display()))?;
                info!("Configuration written to {}", path.display());
            }
            fit_synthetic(config, samples, size, world_size, optimizer)?;
        }
        Commands::DefaultConfig { output } => {
            let config = AtlasConfig::new();
            match output {
                Some(path) => {
                    config
                        .save(&path)
                        .with_context(|| format!("cannot write {}", path.display()))?;
                    info!("Default configuration written to {}", path.display());
                }
                None => println!("{}", config),
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<AtlasConfig> {
    match path {
        Some(path) => AtlasConfig::load(path)
            .map_err(|err| anyhow!("cannot load configuration {}: {}", path.display(), err)),
        None => Ok(AtlasConfig::new()),
    }
}

fn fit_synthetic(
    config: AtlasConfig,
    samples: usize,
    size: usize,
    world_size: usize,
    kind: OptimizerKind,
) -> Result<()> {
    if samples == 0 || size < 2 {
        anyhow::bail!("need at least one sample of size 2 or more");
    }
    let population = BlobPopulation::new(samples, size);
    info!(
        "Fitting {} blobs of {}x{} with {} rank(s), optimizer {:?}",
        samples, size, size, world_size, kind
    );

    let outcomes = match world_size {
        0 => anyhow::bail!("world size must be positive"),
        1 => vec![fit_rank(kind, &config, &population, Arc::new(SingleProcess))?],
        _ => {
            let handles: Vec<_> = LocalProcessGroup::new_group(world_size)
                .into_iter()
                .map(|group| {
                    let config = config.clone();
                    let population = population.clone();
                    thread::spawn(move || fit_rank(kind, &config, &population, Arc::new(group)))
                })
                .collect();
            let mut outcomes = Vec::with_capacity(world_size);
            for handle in handles {
                let outcome = handle.join().map_err(|_| anyhow!("a rank panicked"))??;
                outcomes.push(outcome);
            }
            outcomes
        }
    };

    report(&population, &outcomes, world_size);
    Ok(())
}

fn fit_rank(
    kind: OptimizerKind,
    config: &AtlasConfig,
    population: &BlobPopulation,
    group: Arc<dyn ProcessGroup>,
) -> Result<RankOutcome> {
    let lr = config.learning_rate_i;
    match kind {
        OptimizerKind::Sgd => fit_with(GradientDescent::new(lr), config, population, group),
        OptimizerKind::Momentum => fit_with(Momentum::new(lr, 0.9), config, population, group),
        OptimizerKind::Adam => fit_with(AdamOptimizer::new(lr), config, population, group),
    }
}

fn fit_with<O>(
    optimizer: O,
    config: &AtlasConfig,
    population: &BlobPopulation,
    group: Arc<dyn ProcessGroup>,
) -> Result<RankOutcome>
where
    O: Optimizer<AtlasImage<Backend>, Backend>,
{
    let device = Default::default();
    let rank = group.rank();
    let dataset = population.dataset::<NdArray<f32>>(&device)?;
    let mut parameters = AffinePopulation::<2>::zeros(population.shifts.len());

    let mut fitter = AtlasFitter::<Backend, _, _, 2>::new(config.clone(), optimizer, LinearSampler::new())?
        .with_process_group(group);
    let fit = fitter.fit(&dataset, &mut parameters, None, &device)?;

    Ok(RankOutcome {
        rank,
        epoch_losses: fit.epoch_losses,
        image_steps: fit.image_steps,
        translations: parameters.translations().to_vec(),
    })
}

fn report(population: &BlobPopulation, outcomes: &[RankOutcome], world_size: usize) {
    if let Some(lead) = outcomes.iter().find(|o| o.rank == 0) {
        for (epoch, (loss, steps)) in lead.epoch_losses.iter().zip(&lead.image_steps).enumerate() {
            info!("epoch {:>4}  loss {:.6e}  atlas steps {}", epoch, loss, steps);
        }
    }

    // Each rank only updates its own strided shard
    for outcome in outcomes {
        for id in (outcome.rank..population.shifts.len()).step_by(world_size) {
            let shift = population.shifts[id];
            let t = &outcome.translations[id * 2..id * 2 + 2];
            // The atlas is centred on the mean shift, so recovered T ≈ mean − shift
            info!(
                "sample {:>3}: shift ({:+.2}, {:+.2})  T ({:+.2}, {:+.2})",
                id, shift[0], shift[1], t[0], t[1]
            );
            if !t.iter().all(|v| v.is_finite()) {
                warn!("sample {} diverged; try a smaller learning rate", id);
            }
        }
    }
}
