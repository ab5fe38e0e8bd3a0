//! Drives a search: trials, champion tracking, logging, and registration.

use pl_model::{Dataset, EstimatorFactory, Split};
use pl_tracking::{ModelRegistry, TrackingClient};
use pl_types::{
    config_error, params_to_strings, validation_error, ApprovalStatus, ModelVersion, ParamSet,
    PlError, PlResult, RunInfo, RunStatus, APPROVAL_TAG,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

use crate::champion::{ChampionSink, ChampionTracker};
use crate::evaluator::TrialEvaluator;
use crate::package::{write_model_dir, ModelSchema};
use crate::search::{Sampler, SearchSpace};
use crate::snapshot::{BestModelPersistor, Snapshot};
use crate::store::StudyStore;
use crate::study::{Study, StudyDirection, Trial};

/// Settings for one search run.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    pub experiment_name: String,
    /// Name of the parent run.
    pub run_name: String,
    /// Registry name the final model is registered under.
    pub model_name: String,
    pub project: String,
    pub model_family: String,
    pub feature_set_version: String,
    pub n_trials: usize,
    pub direction: StudyDirection,
    /// Record failed trials and keep going instead of aborting.
    pub skip_failed_trials: bool,
    /// Root for best-model snapshots.
    pub scratch_dir: PathBuf,
    /// Artifact path of the logged model inside the parent run.
    pub artifact_path: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            experiment_name: "Iris Classification".to_string(),
            run_name: "first_attempt".to_string(),
            model_name: "Iris Classification Model".to_string(),
            project: "Iris Classification".to_string(),
            model_family: "logistic_regression".to_string(),
            feature_set_version: "1".to_string(),
            n_trials: 100,
            direction: StudyDirection::Maximize,
            skip_failed_trials: false,
            scratch_dir: BestModelPersistor::default_scratch_root(),
            artifact_path: "model".to_string(),
        }
    }
}

/// The split a search trains on, plus the names written into the model.
#[derive(Debug, Clone)]
pub struct TrainingData {
    pub split: Split,
    pub schema: ModelSchema,
}

impl TrainingData {
    pub fn from_dataset(dataset: &Dataset, test_size: f64, seed: u64) -> PlResult<Self> {
        Ok(Self {
            split: dataset.train_test_split(test_size, seed)?,
            schema: ModelSchema {
                feature_names: dataset.feature_names.clone(),
                classes: dataset.classes.clone(),
            },
        })
    }
}

/// What a finished search produced.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub study_name: String,
    pub parent_run_id: String,
    pub best_trial: usize,
    pub best_value: f64,
    pub best_params: ParamSet,
    /// Resolved artifact URI of the logged model.
    pub model_uri: String,
    pub model_version: ModelVersion,
    pub trials_run: usize,
    pub trials_failed: usize,
    /// Whether the final model came from the snapshot rather than a refit.
    pub from_snapshot: bool,
}

/// How a recorded trial's nested run ends.
enum TrialStep {
    Complete,
    Failed(PlError),
}

pub struct SearchOrchestrator<'a, F: EstimatorFactory> {
    config: SearchConfig,
    space: SearchSpace,
    evaluator: TrialEvaluator<F>,
    tracking: &'a dyn TrackingClient,
    registry: &'a dyn ModelRegistry,
    store: Option<StudyStore>,
}

impl<'a, F: EstimatorFactory> SearchOrchestrator<'a, F> {
    pub fn new(
        config: SearchConfig,
        space: SearchSpace,
        factory: F,
        tracking: &'a dyn TrackingClient,
        registry: &'a dyn ModelRegistry,
    ) -> Self {
        Self {
            config,
            space,
            evaluator: TrialEvaluator::new(factory),
            tracking,
            registry,
            store: None,
        }
    }

    /// Persist the study after every trial.
    pub fn with_store(mut self, store: StudyStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Check the search space against the estimator before any remote call.
    pub fn validate(&self) -> PlResult<()> {
        self.space.validate()?;
        let mut sampled = self.space.names();
        let mut expected = self.evaluator.parameter_names().to_vec();
        sampled.sort_unstable();
        expected.sort_unstable();
        if sampled != expected {
            return Err(config_error!(
                "search space samples {sampled:?} but the estimator takes {expected:?}"
            ));
        }
        if self.config.n_trials == 0 {
            return Err(config_error!("n_trials must be at least 1"));
        }
        Ok(())
    }

    /// Run `n_trials` more trials of `study` under a new parent run, then log
    /// and register the champion's model.
    ///
    /// Trials run one at a time; `study` and `tracker` are borrowed mutably
    /// for the whole search.
    pub async fn run<S: ChampionSink>(
        &self,
        study: &mut Study,
        sampler: &mut dyn Sampler,
        tracker: &mut ChampionTracker<S>,
        data: &TrainingData,
    ) -> PlResult<SearchOutcome> {
        self.validate()?;
        if study.direction != self.config.direction {
            return Err(config_error!(
                "study {} is set to {}, search is configured to {}",
                study.name,
                study.direction.as_str(),
                self.config.direction.as_str()
            ));
        }

        let experiment_id = self
            .tracking
            .get_or_create_experiment(&self.config.experiment_name)
            .await?;
        let parent = self
            .tracking
            .start_run(&experiment_id, Some(&self.config.run_name), None)
            .await?;
        info!(
            experiment = %self.config.experiment_name,
            run_id = %parent.run_id,
            study = %study.name,
            sampler = sampler.name(),
            n_trials = self.config.n_trials,
            "Starting search"
        );

        match self.drive(&experiment_id, &parent, study, sampler, tracker, data).await {
            Ok(outcome) => {
                self.tracking.end_run(&parent.run_id, RunStatus::Finished).await?;
                Ok(outcome)
            }
            Err(e) => {
                self.close_failed(&parent.run_id).await;
                Err(e)
            }
        }
    }

    async fn drive<S: ChampionSink>(
        &self,
        experiment_id: &str,
        parent: &RunInfo,
        study: &mut Study,
        sampler: &mut dyn Sampler,
        tracker: &mut ChampionTracker<S>,
        data: &TrainingData,
    ) -> PlResult<SearchOutcome> {
        let persistor = BestModelPersistor::new(&self.config.scratch_dir, &study.name);
        if study.champion.is_none() && persistor.clear()? {
            warn!(path = %persistor.path().display(), "Removed stale best-model snapshot");
        }

        for trial in study.completed_trials() {
            if let Some(value) = trial.value {
                sampler.report(&trial.params, value);
            }
        }

        let mut trials_failed = 0;
        for _ in 0..self.config.n_trials {
            let number = study.next_trial_number();
            let params = self.space.sample(sampler, number)?;

            let child = self
                .tracking
                .start_run(experiment_id, None, Some(&parent.run_id))
                .await?;
            let mut trial = Trial::new(number, params).with_run_id(&child.run_id);
            trial.set_user_attr("trial_name", &child.run_name);

            match self
                .run_trial(&child, trial, study, sampler, tracker, &persistor, data)
                .await
            {
                Ok(TrialStep::Complete) => {
                    self.tracking
                        .end_run(&child.run_id, RunStatus::Finished)
                        .await?;
                }
                Ok(TrialStep::Failed(e)) => {
                    trials_failed += 1;
                    self.tracking
                        .end_run(&child.run_id, RunStatus::Failed)
                        .await?;
                    if !self.config.skip_failed_trials {
                        error!(trial = number, error = %e, "Trial failed, aborting search");
                        return Err(e);
                    }
                    warn!(trial = number, error = %e, "Trial failed, continuing");
                }
                Err(e) => {
                    self.close_failed(&child.run_id).await;
                    return Err(e);
                }
            }
        }

        let best = study
            .best_trial()
            .cloned()
            .ok_or_else(|| validation_error!("study {} has no completed trials", study.name))?;
        let best_value = best
            .value
            .ok_or_else(|| validation_error!("best trial {} has no value", best.number))?;

        self.tracking
            .log_params(&parent.run_id, &params_to_strings(&best.params))
            .await?;
        self.tracking
            .log_metric(&parent.run_id, "best_accuracy", best_value)
            .await?;
        self.tracking
            .set_tags(&parent.run_id, &self.run_tags(study, sampler.name()))
            .await?;

        let (model, from_snapshot) = self.final_model(&persistor, &best, &data.split)?;

        let staging = tempfile::tempdir()?;
        let model_dir = staging.path().join(&self.config.artifact_path);
        write_model_dir(
            &model_dir,
            &model,
            &data.schema,
            &parent.run_id,
            data.split.x_train.first().map(Vec::as_slice),
        )?;
        self.tracking
            .log_artifacts(parent, &model_dir, &self.config.artifact_path)
            .await?;
        let model_uri = self.tracking.artifact_uri(parent, &self.config.artifact_path);

        let version = self
            .registry
            .create_model_version(&self.config.model_name, &model_uri, Some(&parent.run_id))
            .await?;
        let pending = ApprovalStatus::Pending;
        self.registry
            .set_model_version_tag(&self.config.model_name, version.version, APPROVAL_TAG, pending.as_str())
            .await?;
        let version = version.with_tag(APPROVAL_TAG, pending.as_str());

        persistor.clear()?;

        info!(
            model = %self.config.model_name,
            version = version.version,
            best_trial = best.number,
            best_value,
            model_uri = %model_uri,
            "Registered model pending approval"
        );

        Ok(SearchOutcome {
            study_name: study.name.clone(),
            parent_run_id: parent.run_id.clone(),
            best_trial: best.number,
            best_value,
            best_params: best.params,
            model_uri,
            model_version: version,
            trials_run: self.config.n_trials,
            trials_failed,
            from_snapshot,
        })
    }

    /// Evaluate one trial and record it in the study. The nested run is
    /// left open for the caller to close; an `Err` means the trial could not
    /// be recorded or logged, a `TrialStep::Failed` that the estimator failed.
    #[allow(clippy::too_many_arguments)]
    async fn run_trial<S: ChampionSink>(
        &self,
        child: &RunInfo,
        mut trial: Trial,
        study: &mut Study,
        sampler: &mut dyn Sampler,
        tracker: &mut ChampionTracker<S>,
        persistor: &BestModelPersistor,
        data: &TrainingData,
    ) -> PlResult<TrialStep> {
        let number = trial.number;
        let params = trial.params.clone();

        match self.evaluator.evaluate(&params, &data.split) {
            Ok(eval) => {
                trial.mark_complete(eval.score, eval.error);
                study.record(trial)?;
                if let Some(event) = tracker.observe(study, number) {
                    let snapshot =
                        Snapshot::new(&study.name, number, event.value(), params.clone(), eval.model);
                    persistor.save(&snapshot)?;
                }
                sampler.report(&params, eval.score);
                self.save_study(study)?;

                self.tracking
                    .log_params(&child.run_id, &params_to_strings(&params))
                    .await?;
                self.tracking
                    .log_metric(&child.run_id, "accuracy", eval.score)
                    .await?;
                self.tracking
                    .log_metric(&child.run_id, "rmse", eval.error)
                    .await?;
                debug!(trial = number, score = eval.score, rmse = eval.error, "Trial complete");
                Ok(TrialStep::Complete)
            }
            Err(e) => {
                let message = e.to_string();
                trial.mark_failed(message.clone());
                study.record(trial)?;
                self.save_study(study)?;

                self.tracking
                    .log_params(&child.run_id, &params_to_strings(&params))
                    .await?;
                let tags = BTreeMap::from([("error".to_string(), message)]);
                self.tracking.set_tags(&child.run_id, &tags).await?;
                Ok(TrialStep::Failed(e))
            }
        }
    }

    async fn close_failed(&self, run_id: &str) {
        if let Err(e) = self.tracking.end_run(run_id, RunStatus::Failed).await {
            warn!(run_id = %run_id, error = %e, "Could not close run");
        }
    }

    /// The snapshot if it belongs to the best trial, otherwise a refit of the
    /// best parameters.
    fn final_model(
        &self,
        persistor: &BestModelPersistor,
        best: &Trial,
        split: &Split,
    ) -> PlResult<(F::Model, bool)> {
        match persistor.load::<F::Model>() {
            Ok(Some(snapshot)) if snapshot.params == best.params => {
                debug!(trial = snapshot.trial, "Using best-model snapshot");
                return Ok((snapshot.model, true));
            }
            Ok(Some(snapshot)) => {
                warn!(
                    snapshot_trial = snapshot.trial,
                    best_trial = best.number,
                    "Snapshot does not match the best trial, refitting"
                );
            }
            Ok(None) => info!(best_trial = best.number, "No snapshot found, refitting best parameters"),
            Err(e) => warn!(error = %e, "Unreadable snapshot, refitting best parameters"),
        }
        Ok((self.evaluator.fit(&best.params, split)?, false))
    }

    fn run_tags(&self, study: &Study, sampler: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("project".to_string(), self.config.project.clone()),
            ("optimizer_engine".to_string(), "plinth".to_string()),
            ("model_family".to_string(), self.config.model_family.clone()),
            ("feature_set_version".to_string(), self.config.feature_set_version.clone()),
            ("sampler".to_string(), sampler.to_string()),
            ("study".to_string(), study.name.clone()),
        ])
    }

    fn save_study(&self, study: &Study) -> PlResult<()> {
        match &self.store {
            Some(store) => store.save(study),
            None => Ok(()),
        }
    }
}
