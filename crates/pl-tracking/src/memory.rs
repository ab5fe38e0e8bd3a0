//! In-process tracking service and registry for sandbox runs and tests.
//!
//! Executes every call locally with no external dependencies. Artifacts are
//! held in memory under `memory:/<experiment>/<run>/artifacts/...` URIs.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use pl_types::{
    ModelVersion, PlResult, RegisteredModel, RunInfo, RunStatus, TrackingError,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::artifacts::{copy_tree, join_uri, relative_key, ArtifactLocation};
use crate::client::{ArtifactDownloader, ModelRegistry, TrackingClient};

/// Everything logged to one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub info: RunInfo,
    pub status: RunStatus,
    pub params: BTreeMap<String, String>,
    /// Metric history per key, in logging order.
    pub metrics: BTreeMap<String, Vec<f64>>,
    pub tags: BTreeMap<String, String>,
}

impl RunRecord {
    pub fn last_metric(&self, key: &str) -> Option<f64> {
        self.metrics.get(key).and_then(|values| values.last().copied())
    }
}

#[derive(Debug, Default)]
struct State {
    experiments: BTreeMap<String, String>,
    runs: BTreeMap<String, RunRecord>,
    run_order: Vec<String>,
    artifacts: BTreeMap<String, Vec<u8>>,
    models: BTreeMap<String, Vec<ModelVersion>>,
}

/// A fully in-process tracking service, model registry, and artifact store.
#[derive(Debug, Default)]
pub struct InMemoryTracking {
    state: Mutex<State>,
}

impl InMemoryTracking {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run(&self, run_id: &str) -> Option<RunRecord> {
        self.state.lock().runs.get(run_id).cloned()
    }

    /// All runs in start order.
    pub fn runs(&self) -> Vec<RunRecord> {
        let state = self.state.lock();
        state
            .run_order
            .iter()
            .filter_map(|id| state.runs.get(id).cloned())
            .collect()
    }

    pub fn child_runs(&self, parent_run_id: &str) -> Vec<RunRecord> {
        self.runs()
            .into_iter()
            .filter(|r| r.info.parent_run_id.as_deref() == Some(parent_run_id))
            .collect()
    }

    pub fn artifact(&self, uri: &str) -> Option<Vec<u8>> {
        self.state.lock().artifacts.get(uri).cloned()
    }

    pub fn artifact_uris(&self) -> Vec<String> {
        self.state.lock().artifacts.keys().cloned().collect()
    }

    pub fn put_artifact(&self, uri: impl Into<String>, data: Vec<u8>) {
        self.state.lock().artifacts.insert(uri.into(), data);
    }

    /// Seed the registry with a version exactly as given.
    pub fn insert_model_version(&self, version: ModelVersion) {
        let mut state = self.state.lock();
        let versions = state.models.entry(version.name.clone()).or_default();
        versions.retain(|v| v.version != version.version);
        versions.push(version);
        versions.sort_by_key(|v| v.version);
    }

    pub fn model_versions(&self, name: &str) -> Vec<ModelVersion> {
        self.state
            .lock()
            .models
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    fn with_active_run<T>(
        &self,
        run_id: &str,
        f: impl FnOnce(&mut RunRecord) -> T,
    ) -> PlResult<T> {
        let mut state = self.state.lock();
        let run = state.runs.get_mut(run_id).ok_or_else(|| TrackingError::NotFound {
            what: format!("run {run_id}"),
        })?;
        if run.status != RunStatus::Running {
            return Err(TrackingError::RunNotActive {
                run_id: run_id.to_string(),
            }
            .into());
        }
        Ok(f(run))
    }

    fn download_memory(&self, prefix: &str, destination: &Path) -> PlResult<PathBuf> {
        let prefix = format!("memory:/{prefix}");
        let files: Vec<(String, Vec<u8>)> = {
            let state = self.state.lock();
            state
                .artifacts
                .iter()
                .filter_map(|(uri, data)| {
                    if uri == &prefix {
                        let name = uri.rsplit('/').next().unwrap_or_default();
                        Some((name.to_string(), data.clone()))
                    } else {
                        uri.strip_prefix(&prefix)
                            .and_then(|rest| rest.strip_prefix('/'))
                            .map(|rel| (rel.to_string(), data.clone()))
                    }
                })
                .collect()
        };
        if files.is_empty() {
            return Err(TrackingError::NotFound { what: prefix }.into());
        }

        std::fs::create_dir_all(destination)?;
        for (rel, data) in files {
            let target = destination.join(&rel);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&target, data)?;
        }
        Ok(destination.to_path_buf())
    }
}

#[async_trait]
impl TrackingClient for InMemoryTracking {
    async fn get_or_create_experiment(&self, name: &str) -> PlResult<String> {
        let mut state = self.state.lock();
        let next_id = state.experiments.len().to_string();
        let id = state
            .experiments
            .entry(name.to_string())
            .or_insert(next_id)
            .clone();
        Ok(id)
    }

    async fn start_run(
        &self,
        experiment_id: &str,
        run_name: Option<&str>,
        parent_run_id: Option<&str>,
    ) -> PlResult<RunInfo> {
        let mut state = self.state.lock();
        if let Some(parent) = parent_run_id {
            if !state.runs.contains_key(parent) {
                return Err(TrackingError::NotFound {
                    what: format!("parent run {parent}"),
                }
                .into());
            }
        }

        let run_id = Uuid::new_v4().simple().to_string();
        let run_name = run_name
            .map(str::to_string)
            .unwrap_or_else(|| format!("run-{}", state.run_order.len()));
        let info = RunInfo {
            artifact_uri: format!("memory:/{experiment_id}/{run_id}/artifacts"),
            run_id: run_id.clone(),
            run_name,
            experiment_id: experiment_id.to_string(),
            parent_run_id: parent_run_id.map(str::to_string),
        };
        let mut tags = BTreeMap::new();
        if let Some(parent) = parent_run_id {
            tags.insert("mlflow.parentRunId".to_string(), parent.to_string());
        }

        state.runs.insert(
            run_id.clone(),
            RunRecord {
                info: info.clone(),
                status: RunStatus::Running,
                params: BTreeMap::new(),
                metrics: BTreeMap::new(),
                tags,
            },
        );
        state.run_order.push(run_id);
        debug!(run_id = %info.run_id, run_name = %info.run_name, "Started run");
        Ok(info)
    }

    async fn log_params(&self, run_id: &str, params: &BTreeMap<String, String>) -> PlResult<()> {
        self.with_active_run(run_id, |run| {
            run.params
                .extend(params.iter().map(|(k, v)| (k.clone(), v.clone())))
        })
    }

    async fn log_metric(&self, run_id: &str, key: &str, value: f64) -> PlResult<()> {
        self.with_active_run(run_id, |run| {
            run.metrics.entry(key.to_string()).or_default().push(value)
        })
    }

    async fn set_tags(&self, run_id: &str, tags: &BTreeMap<String, String>) -> PlResult<()> {
        self.with_active_run(run_id, |run| {
            run.tags
                .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())))
        })
    }

    async fn end_run(&self, run_id: &str, status: RunStatus) -> PlResult<()> {
        self.with_active_run(run_id, |run| run.status = status)
    }

    async fn log_artifacts(
        &self,
        run: &RunInfo,
        local_dir: &Path,
        artifact_path: &str,
    ) -> PlResult<()> {
        self.with_active_run(&run.run_id, |_| ())?;
        let root = join_uri(&run.artifact_uri, artifact_path);
        for entry in WalkDir::new(local_dir) {
            let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(rel) = relative_key(local_dir, entry.path()) else {
                continue;
            };
            let data = std::fs::read(entry.path())?;
            self.put_artifact(join_uri(&root, &rel), data);
        }
        Ok(())
    }
}

#[async_trait]
impl ModelRegistry for InMemoryTracking {
    async fn search_registered_models(&self) -> PlResult<Vec<RegisteredModel>> {
        let state = self.state.lock();
        Ok(state
            .models
            .iter()
            .map(|(name, versions)| RegisteredModel {
                name: name.clone(),
                latest_versions: versions.last().cloned().into_iter().collect(),
                tags: BTreeMap::new(),
            })
            .collect())
    }

    async fn get_latest_versions(&self, name: &str) -> PlResult<Vec<ModelVersion>> {
        let state = self.state.lock();
        let versions = state.models.get(name).ok_or_else(|| TrackingError::NotFound {
            what: format!("registered model {name}"),
        })?;
        Ok(versions.last().cloned().into_iter().collect())
    }

    async fn create_model_version(
        &self,
        name: &str,
        source: &str,
        run_id: Option<&str>,
    ) -> PlResult<ModelVersion> {
        let mut state = self.state.lock();
        let versions = state.models.entry(name.to_string()).or_default();
        let next = versions.last().map_or(1, |v| v.version + 1);
        let mut version = ModelVersion::new(name, next, source);
        version.run_id = run_id.map(str::to_string);
        version.created_at = Some(Utc::now());
        versions.push(version.clone());
        Ok(version)
    }

    async fn set_model_version_tag(
        &self,
        name: &str,
        version: u64,
        key: &str,
        value: &str,
    ) -> PlResult<()> {
        let mut state = self.state.lock();
        let entry = state
            .models
            .get_mut(name)
            .and_then(|versions| versions.iter_mut().find(|v| v.version == version))
            .ok_or_else(|| TrackingError::NotFound {
                what: format!("model version {name} v{version}"),
            })?;
        entry.tags.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[async_trait]
impl ArtifactDownloader for InMemoryTracking {
    async fn download_artifacts(&self, source_uri: &str, destination: &Path) -> PlResult<PathBuf> {
        match ArtifactLocation::parse(source_uri)? {
            ArtifactLocation::Memory(prefix) => self.download_memory(&prefix, destination),
            ArtifactLocation::Local(path) => {
                copy_tree(&path, destination)?;
                Ok(destination.to_path_buf())
            }
            ArtifactLocation::Run { run_id, path } => {
                let root = self
                    .run(&run_id)
                    .map(|r| r.info.artifact_uri)
                    .ok_or_else(|| TrackingError::NotFound {
                        what: format!("run {run_id}"),
                    })?;
                self.download_artifacts(&join_uri(&root, &path), destination)
                    .await
            }
            ArtifactLocation::Model { name, version } => {
                let source = self
                    .model_versions(&name)
                    .into_iter()
                    .find(|v| v.version.to_string() == version)
                    .map(|v| v.source)
                    .ok_or_else(|| TrackingError::NotFound {
                        what: format!("model version {name} v{version}"),
                    })?;
                self.download_artifacts(&source, destination).await
            }
            ArtifactLocation::Proxied(_) => Err(TrackingError::UnsupportedUri {
                uri: source_uri.to_string(),
            }
            .into()),
        }
    }
}
