use anyhow::Context;
use clap::{Parser, ValueEnum};
use pl_model::{Dataset, LogisticRegressionFactory};
use pl_optimizer::{
    BestModelPersistor, ChampionTracker, GridSampler, PerturbationSampler, RandomSampler, Sampler,
    SearchConfig, SearchOrchestrator, SearchSpace, Study, StudyDirection, StudyStore,
    TracingSink, TrainingData,
};
use pl_tracking::{InMemoryTracking, MlflowClient, ModelRegistry, TrackingClient, TrackingConfig};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SamplerKind {
    Random,
    Grid,
    Perturbation,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Direction {
    Maximize,
    Minimize,
}

impl From<Direction> for StudyDirection {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Maximize => StudyDirection::Maximize,
            Direction::Minimize => StudyDirection::Minimize,
        }
    }
}

/// Tune a logistic regression and register the champion for approval.
#[derive(Debug, Parser)]
#[command(name = "pl-tune", version)]
struct Args {
    /// Tracking server; read from MLFLOW_TRACKING_URI when omitted.
    #[arg(long, env = "MLFLOW_TRACKING_URI")]
    tracking_uri: Option<String>,

    /// Run against an in-process tracking service; ignores the tracking URI.
    #[arg(long)]
    sandbox: bool,

    #[arg(long, default_value = "Iris Classification")]
    experiment: String,

    #[arg(long, default_value = "first_attempt")]
    run_name: String,

    #[arg(long, default_value = "Iris Classification Model")]
    model_name: String,

    /// Study name; defaults to the experiment name.
    #[arg(long)]
    study: Option<String>,

    #[arg(long, default_value_t = 100)]
    n_trials: usize,

    #[arg(long, value_enum, default_value_t = Direction::Maximize)]
    direction: Direction,

    #[arg(long, value_enum, default_value_t = SamplerKind::Random)]
    sampler: SamplerKind,

    /// Points per continuous axis for the grid sampler.
    #[arg(long, default_value_t = 5)]
    grid_steps: usize,

    /// Share of perturbation trials drawn uniformly instead of near the best.
    #[arg(long, default_value_t = 0.3)]
    exploration_weight: f64,

    /// CSV with numeric feature columns and the label last; Iris when omitted.
    #[arg(long)]
    data: Option<PathBuf>,

    #[arg(long, default_value_t = 0.25)]
    test_size: f64,

    /// Seed for the split and the sampler.
    #[arg(long)]
    seed: Option<u64>,

    /// Persist the study here and resume it if the file exists.
    #[arg(long)]
    study_path: Option<PathBuf>,

    /// Where best-model snapshots are kept during the search.
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Record failed trials and continue instead of aborting.
    #[arg(long)]
    skip_failed_trials: bool,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn build_sampler(args: &Args, space: &SearchSpace) -> Box<dyn Sampler> {
    match args.sampler {
        SamplerKind::Random => Box::new(RandomSampler::new(args.seed)),
        SamplerKind::Grid => Box::new(GridSampler::new(space, args.grid_steps)),
        SamplerKind::Perturbation => Box::new(PerturbationSampler::new(
            args.direction.into(),
            args.exploration_weight,
            args.seed,
        )),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let args = Args::parse();

    let dataset = match &args.data {
        Some(path) => Dataset::from_csv_path(path)
            .with_context(|| format!("loading dataset {}", path.display()))?,
        None => Dataset::iris()?,
    };
    let data = TrainingData::from_dataset(&dataset, args.test_size, args.seed.unwrap_or(0))?;

    let direction: StudyDirection = args.direction.into();
    let config = SearchConfig {
        experiment_name: args.experiment.clone(),
        run_name: args.run_name.clone(),
        model_name: args.model_name.clone(),
        project: args.experiment.clone(),
        n_trials: args.n_trials,
        direction,
        skip_failed_trials: args.skip_failed_trials,
        scratch_dir: args
            .scratch_dir
            .clone()
            .unwrap_or_else(BestModelPersistor::default_scratch_root),
        ..SearchConfig::default()
    };

    let study_name = args.study.clone().unwrap_or_else(|| args.experiment.clone());
    let store = args.study_path.clone().map(StudyStore::new);
    let mut study = match &store {
        Some(store) => store.load_or_create(&study_name, direction)?,
        None => Study::new(study_name, direction),
    };

    let space = SearchSpace::logistic_regression();
    let mut sampler = build_sampler(&args, &space);
    let mut tracker = ChampionTracker::new(TracingSink);

    let sandbox;
    let mlflow;
    let (tracking, registry): (&dyn TrackingClient, &dyn ModelRegistry) = if args.sandbox {
        sandbox = InMemoryTracking::new();
        (&sandbox, &sandbox)
    } else {
        let config = match &args.tracking_uri {
            Some(uri) => TrackingConfig::new(uri)?,
            None => TrackingConfig::from_env()?,
        };
        info!(tracking_uri = %config.tracking_uri, "Using tracking server");
        mlflow = MlflowClient::new(&config)?;
        (&mlflow, &mlflow)
    };

    let mut orchestrator = SearchOrchestrator::new(
        config,
        space,
        LogisticRegressionFactory::default(),
        tracking,
        registry,
    );
    if let Some(store) = store {
        orchestrator = orchestrator.with_store(store);
    }

    let outcome = orchestrator
        .run(&mut study, sampler.as_mut(), &mut tracker, &data)
        .await
        .context("search failed")?;

    info!(
        best_trial = outcome.best_trial,
        best_value = outcome.best_value,
        version = outcome.model_version.version,
        failed = outcome.trials_failed,
        "Search complete"
    );
    println!("{}", outcome.model_uri);
    Ok(())
}
