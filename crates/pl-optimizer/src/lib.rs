//! # pl-optimizer
//!
//! Hyperparameter search for Plinth.
//!
//! Provides search space definitions and samplers (random, grid,
//! perturbation), the study and trial records, the champion tracker and its
//! best-model snapshot, the trial evaluator, and the orchestrator that drives
//! a search against a tracking service and registers the winning model.

mod champion;
mod evaluator;
mod orchestrator;
mod package;
mod search;
mod snapshot;
mod store;
mod study;

pub use champion::{ChampionEvent, ChampionSink, ChampionTracker, TracingSink};
pub use evaluator::{Evaluation, TrialEvaluator};
pub use orchestrator::{SearchConfig, SearchOrchestrator, SearchOutcome, TrainingData};
pub use package::{write_model_dir, ModelSchema, ENVIRONMENT_MANIFESTS};
pub use search::{
    GridSampler, ParameterDef, ParameterKind, PerturbationSampler, RandomSampler, Sampler,
    SearchSpace,
};
pub use snapshot::{BestModelPersistor, Snapshot};
pub use store::StudyStore;
pub use study::{Study, StudyDirection, Trial, TrialState};
