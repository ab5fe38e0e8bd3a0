//! Service abstractions for tracking, registry, and artifact download.

use async_trait::async_trait;
use pl_types::{ModelVersion, PlResult, RegisteredModel, RunInfo, RunStatus};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Experiment-tracking service.
///
/// Runs nest by passing the parent's run id to [`TrackingClient::start_run`];
/// callers are responsible for ending every run they start.
#[async_trait]
pub trait TrackingClient: Send + Sync {
    /// Id of the experiment called `name`, creating it if needed.
    async fn get_or_create_experiment(&self, name: &str) -> PlResult<String>;

    /// Start a run. The service picks a name when `run_name` is `None`.
    async fn start_run(
        &self,
        experiment_id: &str,
        run_name: Option<&str>,
        parent_run_id: Option<&str>,
    ) -> PlResult<RunInfo>;

    async fn log_params(&self, run_id: &str, params: &BTreeMap<String, String>) -> PlResult<()>;

    async fn log_metric(&self, run_id: &str, key: &str, value: f64) -> PlResult<()>;

    async fn set_tags(&self, run_id: &str, tags: &BTreeMap<String, String>) -> PlResult<()>;

    async fn end_run(&self, run_id: &str, status: RunStatus) -> PlResult<()>;

    /// Upload every file under `local_dir` to `<run artifact root>/<artifact_path>/`.
    async fn log_artifacts(
        &self,
        run: &RunInfo,
        local_dir: &Path,
        artifact_path: &str,
    ) -> PlResult<()>;

    /// URI of `artifact_path` inside the run's artifact root.
    fn artifact_uri(&self, run: &RunInfo, artifact_path: &str) -> String {
        format!(
            "{}/{}",
            run.artifact_uri.trim_end_matches('/'),
            artifact_path.trim_start_matches('/')
        )
    }
}

/// Versioned model registry.
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// Every registered model with its latest versions.
    async fn search_registered_models(&self) -> PlResult<Vec<RegisteredModel>>;

    async fn get_latest_versions(&self, name: &str) -> PlResult<Vec<ModelVersion>>;

    /// Register `source` as a new version of `name`, creating the model if needed.
    async fn create_model_version(
        &self,
        name: &str,
        source: &str,
        run_id: Option<&str>,
    ) -> PlResult<ModelVersion>;

    async fn set_model_version_tag(
        &self,
        name: &str,
        version: u64,
        key: &str,
        value: &str,
    ) -> PlResult<()>;
}

/// Artifact store, download side.
#[async_trait]
pub trait ArtifactDownloader: Send + Sync {
    /// Materialize the tree at `source_uri` under `destination`, returning the
    /// local root of the downloaded tree.
    async fn download_artifacts(&self, source_uri: &str, destination: &Path) -> PlResult<PathBuf>;
}
