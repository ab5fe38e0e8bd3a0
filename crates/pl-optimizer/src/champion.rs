//! Champion tracking: the single "best so far" marker of a study.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::study::Study;

/// Emitted when the champion marker changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChampionEvent {
    /// The first completed trial of the study.
    Initial { trial: usize, value: f64 },
    /// A later trial beat the recorded champion.
    Improved {
        trial: usize,
        value: f64,
        /// `|previous - value| / value * 100`. Not finite when `value` is 0.
        improvement_pct: f64,
    },
}

impl ChampionEvent {
    pub fn trial(&self) -> usize {
        match self {
            Self::Initial { trial, .. } | Self::Improved { trial, .. } => *trial,
        }
    }

    pub fn value(&self) -> f64 {
        match self {
            Self::Initial { value, .. } | Self::Improved { value, .. } => *value,
        }
    }
}

/// Percentage change between two champion values, relative to the new one.
pub fn improvement_pct(previous: f64, new: f64) -> f64 {
    (previous - new).abs() / new * 100.0
}

/// Where champion events go.
pub trait ChampionSink: Send {
    fn notify(&mut self, event: &ChampionEvent);
}

/// Logs every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ChampionSink for TracingSink {
    fn notify(&mut self, event: &ChampionEvent) {
        match event {
            ChampionEvent::Initial { trial, value } => {
                info!(trial, value, "Initial trial achieved value");
            }
            ChampionEvent::Improved {
                trial,
                value,
                improvement_pct,
            } => {
                info!(
                    trial,
                    value,
                    improvement_pct = %format!("{improvement_pct:.4}"),
                    "Trial achieved value with improvement"
                );
            }
        }
    }
}

impl ChampionSink for Vec<ChampionEvent> {
    fn notify(&mut self, event: &ChampionEvent) {
        self.push(event.clone());
    }
}

/// Compares each finished trial against the study's champion marker.
///
/// Call [`observe`](Self::observe) once per trial, after the trial has been
/// recorded in the study and in completion order.
#[derive(Debug, Default)]
pub struct ChampionTracker<S: ChampionSink = TracingSink> {
    sink: S,
}

impl<S: ChampionSink> ChampionTracker<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Update `study.champion` if the study's best value moved and report it.
    ///
    /// Returns `None` when nothing changed (a failed trial, a repeat, or a
    /// non-improving value). The trial's own score is never touched.
    pub fn observe(&mut self, study: &mut Study, trial_number: usize) -> Option<ChampionEvent> {
        let best = study.best_value()?;

        let event = match study.champion {
            None => ChampionEvent::Initial {
                trial: trial_number,
                value: best,
            },
            Some(previous) if previous != best => ChampionEvent::Improved {
                trial: trial_number,
                value: best,
                improvement_pct: improvement_pct(previous, best),
            },
            Some(_) => return None,
        };

        study.champion = Some(best);
        self.sink.notify(&event);
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::study::{StudyDirection, Trial};
    use pl_types::ParamSet;

    fn feed(direction: StudyDirection, scores: &[f64]) -> (Study, Vec<ChampionEvent>, Vec<f64>) {
        let mut study = Study::new("feed", direction);
        let mut tracker = ChampionTracker::new(Vec::new());
        let mut champions = Vec::new();
        for (n, score) in scores.iter().enumerate() {
            let mut trial = Trial::new(n, ParamSet::new());
            trial.mark_complete(*score, 0.0);
            study.record(trial).unwrap();
            tracker.observe(&mut study, n);
            champions.push(study.champion.unwrap());
        }
        (study, tracker.into_sink(), champions)
    }

    #[test]
    fn champion_is_running_optimum_maximize() {
        let scores = [0.4, 0.9, 0.2, 0.95, 0.95, 0.1];
        let (_, _, champions) = feed(StudyDirection::Maximize, &scores);
        for (i, champion) in champions.iter().enumerate() {
            let optimum = scores[..=i].iter().cloned().fold(f64::MIN, f64::max);
            assert_eq!(*champion, optimum);
        }
        assert!(champions.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn champion_is_running_optimum_minimize() {
        let scores = [0.5, 0.7, 0.3, 0.3, 0.31, 0.05];
        let (_, _, champions) = feed(StudyDirection::Minimize, &scores);
        for (i, champion) in champions.iter().enumerate() {
            let optimum = scores[..=i].iter().cloned().fold(f64::MAX, f64::min);
            assert_eq!(*champion, optimum);
        }
        assert!(champions.windows(2).all(|w| w[1] <= w[0]));
    }

    #[test]
    fn one_event_per_real_improvement() {
        let (_, events, _) = feed(StudyDirection::Maximize, &[0.1, 0.2, 0.3, 0.4]);
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], ChampionEvent::Initial { trial: 0, .. }));
        assert!(events[1..]
            .iter()
            .all(|e| matches!(e, ChampionEvent::Improved { .. })));

        let (_, events, _) = feed(StudyDirection::Maximize, &[0.5, 0.5, 0.4, 0.5, 0.6, 0.6]);
        let trials: Vec<usize> = events.iter().map(ChampionEvent::trial).collect();
        assert_eq!(trials, vec![0, 4]);
    }

    #[test]
    fn improvement_percentage_divides_by_new_champion() {
        let (_, events, _) = feed(StudyDirection::Maximize, &[0.8, 0.9]);
        match events[1] {
            ChampionEvent::Improved {
                trial,
                value,
                improvement_pct,
            } => {
                assert_eq!(trial, 1);
                assert_eq!(value, 0.9);
                let expected = (0.8f64 - 0.9).abs() / 0.9 * 100.0;
                assert!((improvement_pct - expected).abs() < 1e-9);
            }
            ref other => panic!("unexpected event: {other:?}"),
        }

        let (_, events, _) = feed(StudyDirection::Minimize, &[0.4, 0.1]);
        assert!((events[1].value() - 0.1).abs() < 1e-12);
        match events[1] {
            ChampionEvent::Improved { improvement_pct, .. } => {
                assert!((improvement_pct - 300.0).abs() < 1e-9)
            }
            ref other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn failed_trials_emit_nothing() {
        let mut study = Study::new("s", StudyDirection::Maximize);
        let mut tracker = ChampionTracker::new(Vec::new());

        let mut failed = Trial::new(0, ParamSet::new());
        failed.mark_failed("boom".into());
        study.record(failed).unwrap();
        assert!(tracker.observe(&mut study, 0).is_none());
        assert!(study.champion.is_none());

        let mut ok = Trial::new(1, ParamSet::new());
        ok.mark_complete(0.5, 0.1);
        study.record(ok).unwrap();
        assert_eq!(
            tracker.observe(&mut study, 1),
            Some(ChampionEvent::Initial { trial: 1, value: 0.5 })
        );
        assert_eq!(study.trial(1).unwrap().value, Some(0.5));
    }

    #[test]
    fn zero_champion_yields_non_finite_percentage() {
        assert!(!improvement_pct(0.2, 0.0).is_finite());
    }
}
