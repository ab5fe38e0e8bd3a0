//! MLflow REST client: tracking, model registry, and proxied artifacts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pl_types::{
    config_error, ModelVersion, PlResult, RegisteredModel, RunInfo, RunStatus, TrackingError,
};
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::artifacts::{copy_tree, join_uri, relative_key, ArtifactLocation};
use crate::client::{ArtifactDownloader, ModelRegistry, TrackingClient};
use crate::config::TrackingConfig;

const PARENT_RUN_TAG: &str = "mlflow.parentRunId";
const RUN_NAME_TAG: &str = "mlflow.runName";
const SEARCH_PAGE_SIZE: u32 = 1000;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct Tag {
    key: String,
    #[serde(default)]
    value: String,
}

fn tags_to_map(tags: Vec<Tag>) -> BTreeMap<String, String> {
    tags.into_iter().map(|t| (t.key, t.value)).collect()
}

fn tag_list(tags: &BTreeMap<String, String>) -> Vec<Value> {
    tags.iter()
        .map(|(key, value)| json!({ "key": key, "value": value }))
        .collect()
}

#[derive(Debug, Deserialize)]
struct ExperimentEnvelope {
    experiment: ExperimentBody,
}

#[derive(Debug, Deserialize)]
struct ExperimentBody {
    experiment_id: String,
}

#[derive(Debug, Deserialize)]
struct CreateExperimentResponse {
    experiment_id: String,
}

#[derive(Debug, Deserialize)]
struct RunEnvelope {
    run: RunBody,
}

#[derive(Debug, Deserialize)]
struct RunBody {
    info: RunInfoBody,
}

#[derive(Debug, Deserialize)]
struct RunInfoBody {
    run_id: String,
    #[serde(default)]
    run_name: String,
    experiment_id: String,
    artifact_uri: String,
}

#[derive(Debug, Deserialize)]
struct ModelVersionBody {
    name: String,
    version: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    run_id: Option<String>,
    #[serde(default)]
    tags: Vec<Tag>,
    #[serde(default)]
    creation_timestamp: Option<i64>,
}

impl ModelVersionBody {
    fn into_model_version(self) -> PlResult<ModelVersion> {
        let version = self.version.parse::<u64>().map_err(|_| TrackingError::Api {
            endpoint: "model-versions".to_string(),
            status: 200,
            message: format!("non-numeric version '{}' for {}", self.version, self.name),
        })?;
        Ok(ModelVersion {
            name: self.name,
            version,
            source: self.source,
            run_id: self.run_id.filter(|id| !id.is_empty()),
            tags: tags_to_map(self.tags),
            created_at: self
                .creation_timestamp
                .and_then(DateTime::<Utc>::from_timestamp_millis),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RegisteredModelBody {
    name: String,
    #[serde(default)]
    latest_versions: Vec<ModelVersionBody>,
    #[serde(default)]
    tags: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
struct SearchModelsResponse {
    #[serde(default)]
    registered_models: Vec<RegisteredModelBody>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LatestVersionsResponse {
    #[serde(default)]
    model_versions: Vec<ModelVersionBody>,
}

#[derive(Debug, Deserialize)]
struct ModelVersionEnvelope {
    model_version: ModelVersionBody,
}

#[derive(Debug, Deserialize)]
struct DownloadUriResponse {
    artifact_uri: String,
}

#[derive(Debug, Deserialize)]
struct ListArtifactsResponse {
    #[serde(default)]
    files: Vec<FileInfo>,
}

#[derive(Debug, Deserialize)]
struct FileInfo {
    path: String,
    #[serde(default)]
    is_dir: bool,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Client for an MLflow tracking server.
#[derive(Debug, Clone)]
pub struct MlflowClient {
    base: Url,
    http: Client,
}

impl MlflowClient {
    pub fn new(config: &TrackingConfig) -> PlResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| config_error!("failed to build HTTP client: {e}"))?;
        let base = config.tracking_uri.clone();
        if base.cannot_be_a_base() {
            return Err(config_error!("tracking URI {base} cannot be a base URL"));
        }
        Ok(Self { base, http })
    }

    pub fn tracking_uri(&self) -> &Url {
        &self.base
    }

    fn url(&self, prefix: &[&str], path: &str) -> PlResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| config_error!("tracking URI {} cannot be a base URL", self.base))?
            .pop_if_empty()
            .extend(prefix)
            .extend(path.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }

    fn api_url(&self, endpoint: &str) -> PlResult<Url> {
        self.url(&["api", "2.0", "mlflow"], endpoint)
    }

    fn proxied_url(&self, artifact_path: &str) -> PlResult<Url> {
        self.url(&["api", "2.0", "mlflow-artifacts", "artifacts"], artifact_path)
    }

    async fn send(&self, endpoint: &str, request: RequestBuilder) -> PlResult<reqwest::Response> {
        let response = request.send().await.map_err(|e| TrackingError::Request {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let api_error: Option<ApiError> = serde_json::from_str(&body).ok();
        if status == StatusCode::NOT_FOUND
            || api_error
                .as_ref()
                .is_some_and(|e| e.error_code == "RESOURCE_DOES_NOT_EXIST")
        {
            return Err(TrackingError::NotFound {
                what: format!("{endpoint}: {}", api_error.map(|e| e.message).unwrap_or(body)),
            }
            .into());
        }
        let message = match api_error {
            Some(e) if !e.error_code.is_empty() => format!("{}: {}", e.error_code, e.message),
            Some(e) => e.message,
            None => body,
        };
        Err(TrackingError::Api {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            message,
        }
        .into())
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> PlResult<T> {
        let url = self.api_url(endpoint)?;
        let mut request = self.http.request(method, url).query(query);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = self.send(endpoint, request).await?;
        response.json::<T>().await.map_err(|e| {
            TrackingError::Request {
                endpoint: endpoint.to_string(),
                message: format!("invalid response body: {e}"),
            }
            .into()
        })
    }

    async fn post<T: DeserializeOwned>(&self, endpoint: &str, body: Value) -> PlResult<T> {
        self.call(Method::POST, endpoint, &[], Some(body)).await
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str, query: &[(&str, &str)]) -> PlResult<T> {
        self.call(Method::GET, endpoint, query, None).await
    }

    async fn log_batch(&self, run_id: &str, mut body: Value) -> PlResult<()> {
        body["run_id"] = json!(run_id);
        let _: Value = self.post("runs/log-batch", body).await?;
        Ok(())
    }

    /// Artifact root of a run, as recorded by the server.
    pub async fn run_artifact_uri(&self, run_id: &str) -> PlResult<String> {
        let envelope: RunEnvelope = self.get("runs/get", &[("run_id", run_id)]).await?;
        Ok(envelope.run.info.artifact_uri)
    }

    async fn upload_proxied(&self, remote_root: &str, local_dir: &Path) -> PlResult<usize> {
        let mut files = Vec::new();
        for entry in WalkDir::new(local_dir) {
            let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }

        let mut uploaded = 0;
        for path in files {
            let Some(rel) = relative_key(local_dir, &path) else {
                continue;
            };
            let remote = join_uri(remote_root, &rel);
            let data = tokio::fs::read(&path).await?;
            let url = self.proxied_url(&remote)?;
            self.send("mlflow-artifacts", self.http.put(url).body(data))
                .await?;
            debug!(artifact = %remote, "Uploaded artifact");
            uploaded += 1;
        }
        Ok(uploaded)
    }

    async fn download_proxied(&self, remote_root: &str, destination: &Path) -> PlResult<PathBuf> {
        let mut pending = vec![(remote_root.to_string(), destination.to_path_buf())];
        let mut downloaded = 0usize;

        while let Some((remote, local)) = pending.pop() {
            let url = self.proxied_url("")?;
            let listing = self
                .send("mlflow-artifacts", self.http.get(url).query(&[("path", remote.as_str())]))
                .await?
                .json::<ListArtifactsResponse>()
                .await
                .map_err(|e| TrackingError::Download {
                    source_uri: remote.clone(),
                    message: e.to_string(),
                })?;

            if listing.files.is_empty() && downloaded == 0 && remote == remote_root {
                // not a directory: fetch as a single file
                let name = remote.rsplit('/').next().unwrap_or("artifact").to_string();
                tokio::fs::create_dir_all(&local).await?;
                self.fetch_file(&remote, &local.join(name)).await?;
                return Ok(destination.to_path_buf());
            }

            tokio::fs::create_dir_all(&local).await?;
            for file in listing.files {
                // servers report either the entry name or its full path
                let name = file.path.rsplit('/').next().unwrap_or_default().to_string();
                if name.is_empty() {
                    continue;
                }
                let child_remote = join_uri(&remote, &name);
                let child_local = local.join(&name);
                if file.is_dir {
                    pending.push((child_remote, child_local));
                } else {
                    self.fetch_file(&child_remote, &child_local).await?;
                    downloaded += 1;
                }
            }
        }

        debug!(files = downloaded, root = %remote_root, "Downloaded artifacts");
        Ok(destination.to_path_buf())
    }

    async fn fetch_file(&self, remote: &str, local: &Path) -> PlResult<()> {
        let url = self.proxied_url(remote)?;
        let bytes = self
            .send("mlflow-artifacts", self.http.get(url))
            .await?
            .bytes()
            .await
            .map_err(|e| TrackingError::Download {
                source_uri: remote.to_string(),
                message: e.to_string(),
            })?;
        tokio::fs::write(local, &bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl TrackingClient for MlflowClient {
    async fn get_or_create_experiment(&self, name: &str) -> PlResult<String> {
        match self
            .get::<ExperimentEnvelope>("experiments/get-by-name", &[("experiment_name", name)])
            .await
        {
            Ok(found) => Ok(found.experiment.experiment_id),
            Err(pl_types::PlError::Tracking(TrackingError::NotFound { .. })) => {
                let created: CreateExperimentResponse = self
                    .post("experiments/create", json!({ "name": name }))
                    .await?;
                info!(experiment = %name, id = %created.experiment_id, "Created experiment");
                Ok(created.experiment_id)
            }
            Err(e) => Err(e),
        }
    }

    async fn start_run(
        &self,
        experiment_id: &str,
        run_name: Option<&str>,
        parent_run_id: Option<&str>,
    ) -> PlResult<RunInfo> {
        let mut tags = BTreeMap::new();
        if let Some(parent) = parent_run_id {
            tags.insert(PARENT_RUN_TAG.to_string(), parent.to_string());
        }
        if let Some(name) = run_name {
            tags.insert(RUN_NAME_TAG.to_string(), name.to_string());
        }
        let mut body = json!({
            "experiment_id": experiment_id,
            "start_time": Utc::now().timestamp_millis(),
            "tags": tag_list(&tags),
        });
        if let Some(name) = run_name {
            body["run_name"] = json!(name);
        }

        let envelope: RunEnvelope = self.post("runs/create", body).await?;
        let info = envelope.run.info;
        Ok(RunInfo {
            run_id: info.run_id,
            run_name: info.run_name,
            experiment_id: info.experiment_id,
            artifact_uri: info.artifact_uri,
            parent_run_id: parent_run_id.map(str::to_string),
        })
    }

    async fn log_params(&self, run_id: &str, params: &BTreeMap<String, String>) -> PlResult<()> {
        if params.is_empty() {
            return Ok(());
        }
        self.log_batch(run_id, json!({ "params": tag_list(params) }))
            .await
    }

    async fn log_metric(&self, run_id: &str, key: &str, value: f64) -> PlResult<()> {
        let _: Value = self
            .post(
                "runs/log-metric",
                json!({
                    "run_id": run_id,
                    "key": key,
                    "value": value,
                    "timestamp": Utc::now().timestamp_millis(),
                    "step": 0,
                }),
            )
            .await?;
        Ok(())
    }

    async fn set_tags(&self, run_id: &str, tags: &BTreeMap<String, String>) -> PlResult<()> {
        if tags.is_empty() {
            return Ok(());
        }
        self.log_batch(run_id, json!({ "tags": tag_list(tags) })).await
    }

    async fn end_run(&self, run_id: &str, status: RunStatus) -> PlResult<()> {
        let _: Value = self
            .post(
                "runs/update",
                json!({
                    "run_id": run_id,
                    "status": status.as_str(),
                    "end_time": Utc::now().timestamp_millis(),
                }),
            )
            .await?;
        Ok(())
    }

    async fn log_artifacts(
        &self,
        run: &RunInfo,
        local_dir: &Path,
        artifact_path: &str,
    ) -> PlResult<()> {
        let target = join_uri(&run.artifact_uri, artifact_path);
        match ArtifactLocation::parse(&target)? {
            ArtifactLocation::Proxied(root) => {
                let count = self.upload_proxied(&root, local_dir).await?;
                info!(run_id = %run.run_id, files = count, artifact_path, "Logged artifacts");
                Ok(())
            }
            // server and client share a filesystem artifact root
            ArtifactLocation::Local(root) => {
                let count = copy_tree(local_dir, &root)?;
                info!(run_id = %run.run_id, files = count, artifact_path, "Logged artifacts");
                Ok(())
            }
            _ => Err(TrackingError::UnsupportedUri { uri: target }.into()),
        }
    }
}

#[async_trait]
impl ModelRegistry for MlflowClient {
    async fn search_registered_models(&self) -> PlResult<Vec<RegisteredModel>> {
        let page_size = SEARCH_PAGE_SIZE.to_string();
        let mut models = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("max_results", page_size.as_str())];
            if let Some(token) = page_token.as_deref() {
                query.push(("page_token", token));
            }
            let page: SearchModelsResponse =
                self.get("registered-models/search", &query).await?;

            for model in page.registered_models {
                let latest_versions = model
                    .latest_versions
                    .into_iter()
                    .map(ModelVersionBody::into_model_version)
                    .collect::<PlResult<Vec<_>>>()?;
                models.push(RegisteredModel {
                    name: model.name,
                    latest_versions,
                    tags: tags_to_map(model.tags),
                });
            }

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(models)
    }

    async fn get_latest_versions(&self, name: &str) -> PlResult<Vec<ModelVersion>> {
        let response: LatestVersionsResponse = self
            .post("registered-models/get-latest-versions", json!({ "name": name }))
            .await?;
        response
            .model_versions
            .into_iter()
            .map(ModelVersionBody::into_model_version)
            .collect()
    }

    async fn create_model_version(
        &self,
        name: &str,
        source: &str,
        run_id: Option<&str>,
    ) -> PlResult<ModelVersion> {
        let created: PlResult<Value> = self
            .post("registered-models/create", json!({ "name": name }))
            .await;
        match created {
            Ok(_) => info!(model = %name, "Registered new model"),
            Err(pl_types::PlError::Tracking(TrackingError::Api { ref message, .. }))
                if message.starts_with("RESOURCE_ALREADY_EXISTS") =>
            {
                debug!(model = %name, "Model already registered")
            }
            Err(e) => return Err(e),
        }

        let mut body = json!({ "name": name, "source": source });
        if let Some(run_id) = run_id {
            body["run_id"] = json!(run_id);
        }
        let envelope: ModelVersionEnvelope = self.post("model-versions/create", body).await?;
        envelope.model_version.into_model_version()
    }

    async fn set_model_version_tag(
        &self,
        name: &str,
        version: u64,
        key: &str,
        value: &str,
    ) -> PlResult<()> {
        let _: Value = self
            .post(
                "model-versions/set-tag",
                json!({
                    "name": name,
                    "version": version.to_string(),
                    "key": key,
                    "value": value,
                }),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ArtifactDownloader for MlflowClient {
    async fn download_artifacts(&self, source_uri: &str, destination: &Path) -> PlResult<PathBuf> {
        match ArtifactLocation::parse(source_uri)? {
            ArtifactLocation::Proxied(root) => self.download_proxied(&root, destination).await,
            ArtifactLocation::Local(path) => {
                copy_tree(&path, destination)?;
                Ok(destination.to_path_buf())
            }
            ArtifactLocation::Run { run_id, path } => {
                let root = self.run_artifact_uri(&run_id).await?;
                self.download_artifacts(&join_uri(&root, &path), destination)
                    .await
            }
            ArtifactLocation::Model { name, version } => {
                let resolved: DownloadUriResponse = self
                    .get(
                        "model-versions/get-download-uri",
                        &[("name", name.as_str()), ("version", version.as_str())],
                    )
                    .await?;
                self.download_artifacts(&resolved.artifact_uri, destination)
                    .await
            }
            ArtifactLocation::Memory(_) => Err(TrackingError::UnsupportedUri {
                uri: source_uri.to_string(),
            }
            .into()),
        }
    }
}
