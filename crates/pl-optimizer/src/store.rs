//! JSON persistence for studies, so a search can resume where it stopped.

use pl_types::{config_error, PlResult};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::study::{Study, StudyDirection};

#[derive(Debug, Clone)]
pub struct StudyStore {
    path: PathBuf,
}

impl StudyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored study, or start a new one if the file does not exist.
    ///
    /// A stored study with a different direction is a configuration error.
    pub fn load_or_create(&self, name: &str, direction: StudyDirection) -> PlResult<Study> {
        if !self.path.exists() {
            return Ok(Study::new(name, direction));
        }

        let study: Study = serde_json::from_slice(&std::fs::read(&self.path)?)?;
        if study.direction != direction {
            return Err(config_error!(
                "study at {} was created to {}, not {}",
                self.path.display(),
                study.direction.as_str(),
                direction.as_str()
            ));
        }
        if study.name != name {
            warn!(stored = %study.name, requested = %name, "Resuming study under its stored name");
        }
        info!(
            study = %study.name,
            trials = study.trials.len(),
            path = %self.path.display(),
            "Loaded existing study"
        );
        Ok(study)
    }

    /// Write via a temporary file and rename.
    pub fn save(&self, study: &Study) -> PlResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, serde_json::to_vec_pretty(study)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::study::Trial;
    use pl_types::ParamSet;
    use tempfile::tempdir;

    #[test]
    fn resumes_trials_and_champion() {
        let dir = tempdir().unwrap();
        let store = StudyStore::new(dir.path().join("studies/iris.json"));

        let mut study = store.load_or_create("iris", StudyDirection::Maximize).unwrap();
        assert!(study.trials.is_empty());

        let mut trial = Trial::new(0, ParamSet::new());
        trial.mark_complete(0.9, 0.1);
        study.record(trial).unwrap();
        study.champion = Some(0.9);
        store.save(&study).unwrap();

        let resumed = store.load_or_create("iris", StudyDirection::Maximize).unwrap();
        assert_eq!(resumed.id, study.id);
        assert_eq!(resumed.trials.len(), 1);
        assert_eq!(resumed.champion, Some(0.9));
        assert_eq!(resumed.best_value(), Some(0.9));
        assert_eq!(resumed.next_trial_number(), 1);
    }

    #[test]
    fn direction_mismatch_is_a_config_error() {
        let dir = tempdir().unwrap();
        let store = StudyStore::new(dir.path().join("s.json"));
        store.save(&Study::new("s", StudyDirection::Minimize)).unwrap();

        let err = store.load_or_create("s", StudyDirection::Maximize).unwrap_err();
        assert!(err.is_config());
    }
}
