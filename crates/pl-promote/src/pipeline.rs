//! Scan, download, and sync: one promotion job per approved version.

use pl_tracking::{ArtifactDownloader, ModelRegistry};
use pl_types::PlResult;
use serde::Serialize;
use std::path::PathBuf;
use tempfile::TempDir;
use tracing::{info, info_span, warn, Instrument};

use crate::blob::BlobStore;
use crate::scanner::{ApprovedVersion, RegistryScanner};
use crate::sync::{ArtifactSync, SyncReport};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Synced(SyncReport),
    DownloadFailed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobReport {
    pub version: ApprovedVersion,
    pub prefix: String,
    pub outcome: JobOutcome,
}

impl JobReport {
    pub fn is_complete(&self) -> bool {
        match &self.outcome {
            JobOutcome::Synced(report) => report.is_complete(),
            JobOutcome::DownloadFailed { .. } => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PromotionReport {
    pub jobs: Vec<JobReport>,
}

impl PromotionReport {
    pub fn failed_uploads(&self) -> usize {
        self.jobs
            .iter()
            .map(|job| match &job.outcome {
                JobOutcome::Synced(report) => report.failed(),
                JobOutcome::DownloadFailed { .. } => 0,
            })
            .sum()
    }

    pub fn failed_downloads(&self) -> usize {
        self.jobs
            .iter()
            .filter(|job| matches!(job.outcome, JobOutcome::DownloadFailed { .. }))
            .count()
    }

    pub fn uploaded(&self) -> usize {
        self.jobs
            .iter()
            .map(|job| match &job.outcome {
                JobOutcome::Synced(report) => report.uploaded(),
                JobOutcome::DownloadFailed { .. } => 0,
            })
            .sum()
    }

    /// True when every approved version was mirrored in full.
    pub fn is_complete(&self) -> bool {
        self.jobs.iter().all(JobReport::is_complete)
    }
}

/// Mirrors every approved version into a blob store.
///
/// Versions are processed one after another. Each gets its own staging
/// directory, removed once its upload has finished.
pub struct PromotionPipeline<'a> {
    registry: &'a dyn ModelRegistry,
    downloader: &'a dyn ArtifactDownloader,
    store: &'a dyn BlobStore,
    staging_root: Option<PathBuf>,
}

impl<'a> PromotionPipeline<'a> {
    pub fn new(
        registry: &'a dyn ModelRegistry,
        downloader: &'a dyn ArtifactDownloader,
        store: &'a dyn BlobStore,
    ) -> Self {
        Self {
            registry,
            downloader,
            store,
            staging_root: None,
        }
    }

    /// Stage downloads under `root` instead of the system temp directory.
    pub fn with_staging_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.staging_root = Some(root.into());
        self
    }

    /// A failing registry scan is returned as an error. Download and upload
    /// failures are recorded in the report.
    pub async fn promote(&self) -> PlResult<PromotionReport> {
        let approved = RegistryScanner::new(self.registry).scan().await?;
        info!(
            approved = approved.len(),
            container = %self.store.container(),
            "Promoting approved model versions"
        );

        let mut report = PromotionReport::default();
        for version in approved {
            let span = info_span!("promote", model = %version.model_name, version = version.version);
            let job = self.run_job(version).instrument(span).await?;
            report.jobs.push(job);
        }

        info!(
            jobs = report.jobs.len(),
            uploaded = report.uploaded(),
            failed_uploads = report.failed_uploads(),
            failed_downloads = report.failed_downloads(),
            "Promotion finished"
        );
        Ok(report)
    }

    async fn run_job(&self, version: ApprovedVersion) -> PlResult<JobReport> {
        let prefix = version.blob_prefix();
        let staging = self.staging_dir()?;
        let destination = staging.path().join(&prefix);

        let outcome = match self
            .downloader
            .download_artifacts(&version.source, &destination)
            .await
        {
            Ok(local_dir) => {
                info!(source = %version.source, path = %local_dir.display(), "Downloaded artifacts");
                match ArtifactSync::new(self.store).sync(&local_dir, &prefix).await {
                    Ok(sync) => JobOutcome::Synced(sync),
                    Err(e) => {
                        warn!(error = %e, "Downloaded artifact tree could not be synced");
                        JobOutcome::DownloadFailed {
                            error: e.to_string(),
                        }
                    }
                }
            }
            Err(e) => {
                warn!(source = %version.source, error = %e, "Failed to download artifacts, skipping version");
                JobOutcome::DownloadFailed {
                    error: e.to_string(),
                }
            }
        };

        reclaim(staging);
        Ok(JobReport {
            version,
            prefix,
            outcome,
        })
    }

    fn staging_dir(&self) -> PlResult<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("plinth-promote-");
        let dir = match &self.staging_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }
}

fn reclaim(staging: TempDir) {
    let shown = staging.path().display().to_string();
    if let Err(e) = staging.close() {
        warn!(path = %shown, error = %e, "Failed to remove staging directory");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use pl_tracking::InMemoryTracking;
    use pl_types::{ModelVersion, APPROVAL_TAG};
    use tempfile::tempdir;

    fn seed(tracking: &InMemoryTracking) {
        tracking.put_artifact("memory:/runs/r1/model/MLmodel", b"flavors: {}\n".to_vec());
        tracking.put_artifact("memory:/runs/r1/model/model.json", b"{}".to_vec());
        tracking.put_artifact("memory:/runs/r1/model/requirements.txt", b"x\n".to_vec());
        tracking.insert_model_version(
            ModelVersion::new("iris", 2, "memory:/runs/r1/model").with_tag(APPROVAL_TAG, "approved"),
        );
        tracking.insert_model_version(
            ModelVersion::new("wine", 1, "memory:/runs/r2/model").with_tag(APPROVAL_TAG, "pending"),
        );
    }

    #[tokio::test]
    async fn promotes_approved_versions_only() {
        let tracking = InMemoryTracking::new();
        seed(&tracking);
        let store = MemoryBlobStore::new("models");
        let staging = tempdir().unwrap();

        let report = PromotionPipeline::new(&tracking, &tracking, &store)
            .with_staging_root(staging.path())
            .promote()
            .await
            .unwrap();

        assert_eq!(report.jobs.len(), 1);
        assert_eq!(report.jobs[0].prefix, "iris_v2");
        assert!(report.is_complete());
        assert_eq!(
            store.blob_names(),
            vec!["iris_v2/MLmodel".to_string(), "iris_v2/model.json".to_string()]
        );
        assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn download_failure_is_reported_and_skipped() {
        let tracking = InMemoryTracking::new();
        seed(&tracking);
        tracking.insert_model_version(
            ModelVersion::new("broken", 4, "memory:/runs/missing/model")
                .with_tag(APPROVAL_TAG, "approved"),
        );
        let store = MemoryBlobStore::new("models");

        let report = PromotionPipeline::new(&tracking, &tracking, &store)
            .promote()
            .await
            .unwrap();

        assert_eq!(report.jobs.len(), 2);
        assert_eq!(report.failed_downloads(), 1);
        assert_eq!(report.failed_uploads(), 0);
        assert!(!report.is_complete());
        assert_eq!(store.blob_names().len(), 2);
    }
}
