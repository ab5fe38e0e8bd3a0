//! Studies and the trials recorded in them.

use chrono::{DateTime, Utc};
use pl_types::{validation_error, ParamSet, PlResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Whether we are maximizing or minimizing the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StudyDirection {
    Maximize,
    Minimize,
}

impl Default for StudyDirection {
    fn default() -> Self {
        Self::Maximize
    }
}

impl StudyDirection {
    /// True when `candidate` strictly beats `incumbent`. NaN never wins.
    pub fn is_better(self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Self::Maximize => candidate > incumbent,
            Self::Minimize => candidate < incumbent,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Maximize => "maximize",
            Self::Minimize => "minimize",
        }
    }
}

impl std::str::FromStr for StudyDirection {
    type Err = pl_types::PlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "maximize" | "max" => Ok(Self::Maximize),
            "minimize" | "min" => Ok(Self::Minimize),
            other => Err(validation_error!("unknown study direction '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialState {
    Running,
    Complete,
    Failed,
}

/// One evaluation of a sampled parameter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    /// Ordinal index, monotonic per study.
    pub number: usize,
    pub params: ParamSet,
    pub state: TrialState,
    /// Validation score compared by the champion tracker.
    pub value: Option<f64>,
    /// Auxiliary error metric, logged only.
    pub error_metric: Option<f64>,
    pub run_id: Option<String>,
    pub user_attrs: BTreeMap<String, String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Trial {
    pub fn new(number: usize, params: ParamSet) -> Self {
        Self {
            number,
            params,
            state: TrialState::Running,
            value: None,
            error_metric: None,
            run_id: None,
            user_attrs: BTreeMap::new(),
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn set_user_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.user_attrs.insert(key.into(), value.into());
    }

    pub fn mark_complete(&mut self, value: f64, error_metric: f64) {
        self.state = TrialState::Complete;
        self.value = Some(value);
        self.error_metric = Some(error_metric);
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = TrialState::Failed;
        self.error = Some(error);
        self.finished_at = Some(Utc::now());
    }

    pub fn is_complete(&self) -> bool {
        self.state == TrialState::Complete && self.value.is_some()
    }
}

/// Aggregate state of one search session.
///
/// `champion` is the single champion marker owned by the
/// [`ChampionTracker`](crate::ChampionTracker). Anything that mutates the
/// study needs `&mut Study`, so trials are recorded and observed by one
/// writer in completion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Study {
    pub id: Uuid,
    pub name: String,
    pub direction: StudyDirection,
    pub trials: Vec<Trial>,
    /// Best value the champion tracker has acknowledged so far.
    pub champion: Option<f64>,
    pub user_attrs: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl Study {
    pub fn new(name: impl Into<String>, direction: StudyDirection) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            direction,
            trials: Vec::new(),
            champion: None,
            user_attrs: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn next_trial_number(&self) -> usize {
        self.trials.last().map_or(0, |t| t.number + 1)
    }

    /// Append a finished trial. Numbers must keep increasing.
    pub fn record(&mut self, trial: Trial) -> PlResult<()> {
        if trial.state == TrialState::Running {
            return Err(validation_error!("trial {} has not finished", trial.number));
        }
        if let Some(last) = self.trials.last() {
            if trial.number <= last.number {
                return Err(validation_error!(
                    "trial {} recorded after trial {}",
                    trial.number,
                    last.number
                ));
            }
        }
        self.trials.push(trial);
        Ok(())
    }

    pub fn trial(&self, number: usize) -> Option<&Trial> {
        self.trials.iter().find(|t| t.number == number)
    }

    pub fn completed_trials(&self) -> impl Iterator<Item = &Trial> {
        self.trials.iter().filter(|t| t.is_complete())
    }

    /// Best completed trial under the study direction; the earliest wins ties.
    pub fn best_trial(&self) -> Option<&Trial> {
        let mut best: Option<(&Trial, f64)> = None;
        for trial in self.completed_trials() {
            let Some(value) = trial.value.filter(|v| !v.is_nan()) else {
                continue;
            };
            match best {
                Some((_, incumbent)) if !self.direction.is_better(value, incumbent) => {}
                _ => best = Some((trial, value)),
            }
        }
        best.map(|(trial, _)| trial)
    }

    pub fn best_value(&self) -> Option<f64> {
        self.best_trial().and_then(|t| t.value)
    }

    pub fn best_params(&self) -> Option<&ParamSet> {
        self.best_trial().map(|t| &t.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pl_types::ParameterValue;

    fn complete(number: usize, value: f64) -> Trial {
        let mut params = ParamSet::new();
        params.insert("C".into(), ParameterValue::Float(number as f64));
        let mut trial = Trial::new(number, params);
        trial.mark_complete(value, 0.0);
        trial
    }

    #[test]
    fn best_trial_tracking_maximize() {
        let mut study = Study::new("max", StudyDirection::Maximize);
        study.record(complete(0, 0.7)).unwrap();
        study.record(complete(1, 0.9)).unwrap();
        study.record(complete(2, 0.8)).unwrap();
        assert_eq!(study.best_trial().unwrap().number, 1);
        assert_eq!(study.best_value(), Some(0.9));
    }

    #[test]
    fn best_trial_tracking_minimize_prefers_earliest_tie() {
        let mut study = Study::new("min", StudyDirection::Minimize);
        study.record(complete(0, 0.3)).unwrap();
        study.record(complete(1, 0.1)).unwrap();
        study.record(complete(2, 0.1)).unwrap();
        assert_eq!(study.best_trial().unwrap().number, 1);
        assert_eq!(study.best_params().unwrap()["C"], ParameterValue::Float(1.0));
    }

    #[test]
    fn failed_trials_are_never_best() {
        let mut study = Study::new("s", StudyDirection::Maximize);
        let mut failed = Trial::new(0, ParamSet::new());
        failed.mark_failed("fit diverged".into());
        study.record(failed).unwrap();
        assert!(study.best_trial().is_none());

        study.record(complete(1, 0.2)).unwrap();
        assert_eq!(study.best_trial().unwrap().number, 1);
        assert_eq!(study.next_trial_number(), 2);
    }

    #[test]
    fn record_rejects_running_and_out_of_order_trials() {
        let mut study = Study::new("s", StudyDirection::Maximize);
        assert!(study.record(Trial::new(0, ParamSet::new())).is_err());
        study.record(complete(3, 0.5)).unwrap();
        assert!(study.record(complete(2, 0.6)).is_err());
    }

    #[test]
    fn trial_lifecycle() {
        let mut trial = Trial::new(4, ParamSet::new()).with_run_id("abc");
        trial.set_user_attr("trial_name", "merry-owl-3");
        assert_eq!(trial.state, TrialState::Running);

        trial.mark_complete(0.95, 0.2);
        assert!(trial.is_complete());
        assert!(trial.finished_at.is_some());
        assert_eq!(trial.user_attrs["trial_name"], "merry-owl-3");
    }

    #[test]
    fn direction_parses_and_serializes_lowercase() {
        assert_eq!("Minimize".parse::<StudyDirection>().unwrap(), StudyDirection::Minimize);
        assert!("sideways".parse::<StudyDirection>().is_err());
        assert_eq!(serde_json::to_string(&StudyDirection::Maximize).unwrap(), "\"maximize\"");
    }
}
