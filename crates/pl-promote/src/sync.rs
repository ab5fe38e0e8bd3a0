//! Mirror a local artifact tree into a blob container.

use pl_types::{config_error, PlResult};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::blob::BlobStore;

/// Environment manifests that stay out of blob storage, matched by file name
/// at any depth.
pub const EXCLUDED_FILES: [&str; 3] = ["requirements.txt", "python_env.yaml", "conda.yaml"];

pub fn is_excluded(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| EXCLUDED_FILES.contains(&name))
}

/// What happened to one file of the tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    Uploaded {
        path: PathBuf,
        blob: String,
        bytes: usize,
    },
    Failed {
        path: PathBuf,
        blob: String,
        error: String,
    },
    Excluded {
        path: PathBuf,
    },
    /// The walk could not read this entry, e.g. a dangling symlink.
    Unreadable {
        path: PathBuf,
        error: String,
    },
}

impl FileOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::Unreadable { .. })
    }
}

/// Per-file outcomes of one sync: unreadable entries first, then files in
/// walk order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub prefix: String,
    pub outcomes: Vec<FileOutcome>,
}

impl SyncReport {
    fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            outcomes: Vec::new(),
        }
    }

    pub fn uploaded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, FileOutcome::Uploaded { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failure()).count()
    }

    pub fn excluded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, FileOutcome::Excluded { .. }))
            .count()
    }

    pub fn failed_blobs(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                FileOutcome::Failed { blob, .. } => Some(blob.as_str()),
                _ => None,
            })
            .collect()
    }

    /// True when no file failed; a re-run is needed otherwise.
    pub fn is_complete(&self) -> bool {
        self.failed() == 0
    }
}

/// `prefix/relative` with forward slashes whatever the host separator.
pub fn blob_name(prefix: &str, relative: &Path) -> String {
    let rel = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        rel
    } else {
        format!("{prefix}/{rel}")
    }
}

/// Uploads every non-excluded file under a directory, overwriting what is
/// already there.
pub struct ArtifactSync<'a> {
    store: &'a dyn BlobStore,
}

impl<'a> ArtifactSync<'a> {
    pub fn new(store: &'a dyn BlobStore) -> Self {
        Self { store }
    }

    /// Fails only when `local_dir` is not a readable directory. Per-file
    /// problems land in the report.
    pub async fn sync(&self, local_dir: &Path, prefix: &str) -> PlResult<SyncReport> {
        if !local_dir.is_dir() {
            return Err(config_error!(
                "artifact directory {} does not exist",
                local_dir.display()
            ));
        }

        let mut report = SyncReport::new(prefix);
        let mut files = Vec::new();
        for entry in WalkDir::new(local_dir).follow_links(true).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e
                        .path()
                        .map(|p| p.strip_prefix(local_dir).unwrap_or(p).to_path_buf())
                        .unwrap_or_default();
                    warn!(path = %path.display(), error = %e, "Unreadable entry in artifact tree");
                    report.outcomes.push(FileOutcome::Unreadable {
                        path,
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(local_dir) else {
                continue;
            };
            if is_excluded(relative) {
                debug!(path = %relative.display(), "Excluding environment manifest");
                report.outcomes.push(FileOutcome::Excluded {
                    path: relative.to_path_buf(),
                });
                continue;
            }
            files.push((entry.path().to_path_buf(), relative.to_path_buf()));
        }

        for (absolute, relative) in files {
            let blob = blob_name(prefix, &relative);
            let outcome = match self.upload_file(&absolute, &blob).await {
                Ok(bytes) => {
                    debug!(blob = %blob, bytes, "Uploaded artifact");
                    FileOutcome::Uploaded {
                        path: relative,
                        blob,
                        bytes,
                    }
                }
                Err(e) => {
                    warn!(
                        blob = %blob,
                        path = %relative.display(),
                        error = %e,
                        "Failed to upload artifact, continuing"
                    );
                    FileOutcome::Failed {
                        path: relative,
                        blob,
                        error: e.to_string(),
                    }
                }
            };
            report.outcomes.push(outcome);
        }

        info!(
            prefix = %prefix,
            container = %self.store.container(),
            backend = self.store.backend_type(),
            uploaded = report.uploaded(),
            failed = report.failed(),
            excluded = report.excluded(),
            "Artifact sync finished"
        );
        Ok(report)
    }

    async fn upload_file(&self, path: &Path, blob: &str) -> PlResult<usize> {
        let data = tokio::fs::read(path).await?;
        let bytes = data.len();
        self.store.upload_blob(blob, data, true).await?;
        Ok(bytes)
    }
}
