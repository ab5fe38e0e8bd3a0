//! Best-model snapshot: the fitted estimator of the current champion.

use chrono::{DateTime, Utc};
use pl_model::Estimator;
use pl_types::{ParamSet, PlResult, StorageError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

const SNAPSHOT_FILE: &str = "best_model.json";

/// What the persistor writes: the model plus the trial it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<M> {
    pub study: String,
    pub trial: usize,
    pub value: f64,
    pub params: ParamSet,
    pub saved_at: DateTime<Utc>,
    pub model: M,
}

impl<M> Snapshot<M> {
    pub fn new(study: impl Into<String>, trial: usize, value: f64, params: ParamSet, model: M) -> Self {
        Self {
            study: study.into(),
            trial,
            value,
            params,
            saved_at: Utc::now(),
            model,
        }
    }
}

/// Keeps one snapshot file per study under a scratch root.
///
/// Every save replaces the previous file completely. Two runs sharing a
/// scratch root and study name will overwrite each other.
#[derive(Debug, Clone)]
pub struct BestModelPersistor {
    path: PathBuf,
}

impl BestModelPersistor {
    pub fn new(scratch_root: impl AsRef<Path>, study_name: &str) -> Self {
        Self {
            path: scratch_root
                .as_ref()
                .join(sanitize(study_name))
                .join(SNAPSHOT_FILE),
        }
    }

    /// `<cache dir>/plinth`, or the system temp dir when there is no cache dir.
    pub fn default_scratch_root() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("plinth")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn save<M: Estimator>(&self, snapshot: &Snapshot<M>) -> PlResult<()> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(|e| self.error(e))?;

        let json = serde_json::to_vec(snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| self.error(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.error(e))?;

        debug!(path = %self.path.display(), trial = snapshot.trial, "Saved best-model snapshot");
        Ok(())
    }

    pub fn load<M: Estimator>(&self) -> PlResult<Option<Snapshot<M>>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.error(e)),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Delete the snapshot. Returns whether a file was removed.
    pub fn clear(&self) -> PlResult<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                if let Some(parent) = self.path.parent() {
                    // only succeeds if the study dir is now empty
                    let _ = std::fs::remove_dir(parent);
                }
                debug!(path = %self.path.display(), "Cleared best-model snapshot");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(self.error(e)),
        }
    }

    fn error(&self, e: std::io::Error) -> pl_types::PlError {
        StorageError::Snapshot {
            path: self.path.display().to_string(),
            message: e.to_string(),
        }
        .into()
    }
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "study".to_string()
    } else {
        cleaned
    }
}
