//! Search space definitions and the samplers that walk it.

use pl_types::{config_error, internal_error, ParamSet, ParameterValue, PlResult};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::study::StudyDirection;

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Name the estimator factory expects (e.g. "C").
    pub name: String,
    /// The kind of search range.
    pub kind: ParameterKind,
}

/// Describes how a parameter is sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Continuous uniform range [low, high].
    FloatRange { low: f64, high: f64 },
    /// Integer range [low, high] inclusive.
    IntRange { low: i64, high: i64 },
    /// Log-uniform range (sampled in log-space then exponentiated).
    LogUniform { low: f64, high: f64 },
    /// Categorical choices.
    Choice { values: Vec<ParameterValue> },
}

/// The full search space: an ordered list of parameter definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    /// `C` log-uniform over [1e-5, 1] and `solver` over every solver category.
    pub fn logistic_regression() -> Self {
        Self::new().add_log_uniform("C", 1e-5, 1.0).add_choice(
            "solver",
            pl_model::Solver::ALL
                .iter()
                .map(|s| ParameterValue::from(s.as_str()))
                .collect(),
        )
    }

    pub fn add_float(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::FloatRange { low, high },
        });
        self
    }

    pub fn add_int(mut self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::IntRange { low, high },
        });
        self
    }

    pub fn add_log_uniform(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::LogUniform { low, high },
        });
        self
    }

    pub fn add_choice(mut self, name: impl Into<String>, values: Vec<ParameterValue>) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Choice { values },
        });
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.parameters.iter().map(|p| p.name.as_str()).collect()
    }

    /// Reject empty, inverted, or non-finite ranges and empty choice lists.
    pub fn validate(&self) -> PlResult<()> {
        for param in &self.parameters {
            let name = &param.name;
            match &param.kind {
                ParameterKind::FloatRange { low, high } => {
                    if !low.is_finite() || !high.is_finite() || low > high {
                        return Err(config_error!("{name}: invalid range [{low}, {high}]"));
                    }
                }
                ParameterKind::IntRange { low, high } => {
                    if low > high {
                        return Err(config_error!("{name}: invalid range [{low}, {high}]"));
                    }
                }
                ParameterKind::LogUniform { low, high } => {
                    if !(low.is_finite() && high.is_finite() && *low > 0.0 && low <= high) {
                        return Err(config_error!(
                            "{name}: log-uniform range [{low}, {high}] must be positive"
                        ));
                    }
                }
                ParameterKind::Choice { values } => {
                    if values.is_empty() {
                        return Err(config_error!("{name}: no choices"));
                    }
                }
            }
        }
        Ok(())
    }

    /// Draw one parameter set for `trial_number`, one `suggest` per dimension.
    pub fn sample(&self, sampler: &mut dyn Sampler, trial_number: usize) -> PlResult<ParamSet> {
        sampler.begin_trial(trial_number);
        let mut params = ParamSet::new();
        for param in &self.parameters {
            let value = sampler.suggest(param)?;
            params.insert(param.name.clone(), value);
        }
        Ok(params)
    }

    /// Total number of grid points (returns `None` if any parameter is
    /// continuous without a natural grid).
    pub fn grid_size(&self) -> Option<usize> {
        let mut total: usize = 1;
        for param in &self.parameters {
            let dim_size = match &param.kind {
                ParameterKind::IntRange { low, high } => (high - low + 1) as usize,
                ParameterKind::Choice { values } => values.len(),
                _ => return None,
            };
            total = total.checked_mul(dim_size)?;
        }
        Some(total)
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}

fn sample_kind<R: Rng>(rng: &mut R, name: &str, kind: &ParameterKind) -> PlResult<ParameterValue> {
    let value = match kind {
        ParameterKind::FloatRange { low, high } => {
            ParameterValue::Float(rng.gen_range(*low..=*high))
        }
        ParameterKind::IntRange { low, high } => ParameterValue::Int(rng.gen_range(*low..=*high)),
        ParameterKind::LogUniform { low, high } => {
            let log_val: f64 = rng.gen_range(low.ln()..=high.ln());
            ParameterValue::Float(log_val.exp().clamp(*low, *high))
        }
        ParameterKind::Choice { values } => {
            if values.is_empty() {
                return Err(config_error!("{name}: no choices"));
            }
            values[rng.gen_range(0..values.len())].clone()
        }
    };
    Ok(value)
}

fn rng_from(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    }
}

// ---------------------------------------------------------------------------
// Samplers
// ---------------------------------------------------------------------------

/// Proposes one value per parameter per trial.
pub trait Sampler: Send {
    /// Called once before the parameters of `trial_number` are suggested.
    fn begin_trial(&mut self, _trial_number: usize) {}

    fn suggest(&mut self, param: &ParameterDef) -> PlResult<ParameterValue>;

    /// Report completed trial results so adaptive samplers can learn.
    fn report(&mut self, _params: &ParamSet, _objective: f64) {}

    /// Human-readable sampler name.
    fn name(&self) -> &str;
}

// ---- Random ----

/// Independent random sampling across the search space.
#[derive(Debug, Clone)]
pub struct RandomSampler {
    rng: ChaCha8Rng,
}

impl RandomSampler {
    /// Seeded samplers replay the same sequence of suggestions.
    pub fn new(seed: Option<u64>) -> Self {
        Self { rng: rng_from(seed) }
    }
}

impl Sampler for RandomSampler {
    fn suggest(&mut self, param: &ParameterDef) -> PlResult<ParameterValue> {
        sample_kind(&mut self.rng, &param.name, &param.kind)
    }

    fn name(&self) -> &str {
        "random"
    }
}

// ---- Grid ----

/// Exhaustive grid over the cartesian product of every dimension.
///
/// Continuous dimensions are discretised into `float_steps` points. Trial
/// numbers past the end of the grid wrap around to its start.
#[derive(Debug, Clone)]
pub struct GridSampler {
    combos: Vec<ParamSet>,
    current: usize,
}

impl GridSampler {
    pub fn new(space: &SearchSpace, float_steps: usize) -> Self {
        Self {
            combos: Self::build_grid(space, float_steps),
            current: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.combos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combos.is_empty()
    }

    fn build_grid(space: &SearchSpace, float_steps: usize) -> Vec<ParamSet> {
        let steps = float_steps.max(2);
        let mut result: Vec<ParamSet> = vec![ParamSet::new()];

        for param in &space.parameters {
            let axis: Vec<ParameterValue> = match &param.kind {
                ParameterKind::FloatRange { low, high } => (0..steps)
                    .map(|i| {
                        let t = i as f64 / (steps - 1) as f64;
                        ParameterValue::Float(low + t * (high - low))
                    })
                    .collect(),
                ParameterKind::IntRange { low, high } => {
                    (*low..=*high).map(ParameterValue::Int).collect()
                }
                ParameterKind::LogUniform { low, high } => {
                    let (log_low, log_high) = (low.ln(), high.ln());
                    (0..steps)
                        .map(|i| {
                            let t = i as f64 / (steps - 1) as f64;
                            ParameterValue::Float((log_low + t * (log_high - log_low)).exp())
                        })
                        .collect()
                }
                ParameterKind::Choice { values } => values.clone(),
            };

            let mut next = Vec::with_capacity(result.len() * axis.len());
            for existing in &result {
                for value in &axis {
                    let mut combo = existing.clone();
                    combo.insert(param.name.clone(), value.clone());
                    next.push(combo);
                }
            }
            result = next;
        }

        result
    }
}

impl Sampler for GridSampler {
    fn begin_trial(&mut self, trial_number: usize) {
        if !self.combos.is_empty() {
            self.current = trial_number % self.combos.len();
        }
    }

    fn suggest(&mut self, param: &ParameterDef) -> PlResult<ParameterValue> {
        self.combos
            .get(self.current)
            .and_then(|combo| combo.get(&param.name))
            .cloned()
            .ok_or_else(|| internal_error!("parameter {} is not on the grid", param.name))
    }

    fn name(&self) -> &str {
        "grid"
    }
}

// ---- Perturbation ----

/// Explore/exploit sampling around the best reported point.
///
/// Each trial either draws uniformly (with probability `exploration_weight`,
/// and always before the first report) or perturbs every dimension of the
/// best point seen so far under the study's direction.
#[derive(Debug, Clone)]
pub struct PerturbationSampler {
    rng: ChaCha8Rng,
    direction: StudyDirection,
    exploration_weight: f64,
    best: Option<(ParamSet, f64)>,
    exploiting: bool,
}

impl PerturbationSampler {
    pub fn new(direction: StudyDirection, exploration_weight: f64, seed: Option<u64>) -> Self {
        Self {
            rng: rng_from(seed),
            direction,
            exploration_weight: exploration_weight.clamp(0.0, 1.0),
            best: None,
            exploiting: false,
        }
    }

    pub fn best(&self) -> Option<&(ParamSet, f64)> {
        self.best.as_ref()
    }

    fn perturb(&mut self, param: &ParameterDef, base: &ParameterValue) -> PlResult<ParameterValue> {
        let rng = &mut self.rng;
        let value = match (&param.kind, base) {
            (ParameterKind::FloatRange { low, high }, ParameterValue::Float(v)) => {
                let noise = rng.gen_range(-0.1..0.1) * (high - low);
                ParameterValue::Float((v + noise).clamp(*low, *high))
            }
            (ParameterKind::IntRange { low, high }, ParameterValue::Int(v)) => {
                let delta: i64 = rng.gen_range(-2..=2);
                ParameterValue::Int((v + delta).clamp(*low, *high))
            }
            (ParameterKind::LogUniform { low, high }, ParameterValue::Float(v)) => {
                let noise = rng.gen_range(-0.1..0.1) * (high.ln() - low.ln());
                ParameterValue::Float((v.ln() + noise).exp().clamp(*low, *high))
            }
            (ParameterKind::Choice { values }, current) => {
                // keep the incumbent category most of the time
                if rng.gen::<f64>() < 0.8 && values.contains(current) {
                    current.clone()
                } else {
                    sample_kind(rng, &param.name, &param.kind)?
                }
            }
            _ => sample_kind(rng, &param.name, &param.kind)?,
        };
        Ok(value)
    }
}

impl Sampler for PerturbationSampler {
    fn begin_trial(&mut self, _trial_number: usize) {
        self.exploiting = self.best.is_some() && self.rng.gen::<f64>() >= self.exploration_weight;
    }

    fn suggest(&mut self, param: &ParameterDef) -> PlResult<ParameterValue> {
        let base = if self.exploiting {
            self.best
                .as_ref()
                .and_then(|(params, _)| params.get(&param.name))
                .cloned()
        } else {
            None
        };
        match base {
            Some(base) => self.perturb(param, &base),
            None => sample_kind(&mut self.rng, &param.name, &param.kind),
        }
    }

    fn report(&mut self, params: &ParamSet, objective: f64) {
        let improves = match &self.best {
            None => !objective.is_nan(),
            Some((_, best)) => self.direction.is_better(objective, *best),
        };
        if improves {
            self.best = Some((params.clone(), objective));
        }
    }

    fn name(&self) -> &str {
        "perturbation"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_space() -> SearchSpace {
        SearchSpace::new()
            .add_int("max_iter", 50, 150)
            .add_float("learning_rate", 0.05, 1.0)
            .add_log_uniform("C", 1e-5, 1.0)
    }

    #[test]
    fn random_sampler_respects_bounds() {
        let space = sample_space();
        let mut sampler = RandomSampler::new(Some(7));

        for n in 0..50 {
            let params = space.sample(&mut sampler, n).unwrap();
            match params.get("max_iter") {
                Some(ParameterValue::Int(v)) => assert!((50..=150).contains(v)),
                other => panic!("unexpected max_iter value: {other:?}"),
            }
            match params.get("learning_rate") {
                Some(ParameterValue::Float(v)) => assert!(*v >= 0.05 && *v <= 1.0),
                other => panic!("unexpected learning_rate value: {other:?}"),
            }
            match params.get("C") {
                Some(ParameterValue::Float(v)) => assert!(*v >= 1e-5 && *v <= 1.0, "C out of bounds: {v}"),
                other => panic!("unexpected C value: {other:?}"),
            }
        }
    }

    #[test]
    fn seeded_random_sampler_is_reproducible() {
        let space = SearchSpace::logistic_regression();
        let mut a = RandomSampler::new(Some(42));
        let mut b = RandomSampler::new(Some(42));
        for n in 0..10 {
            assert_eq!(space.sample(&mut a, n).unwrap(), space.sample(&mut b, n).unwrap());
        }
    }

    #[test]
    fn choice_parameter_draws_from_values() {
        let space = SearchSpace::logistic_regression();
        let mut sampler = RandomSampler::new(Some(3));
        for n in 0..30 {
            let params = space.sample(&mut sampler, n).unwrap();
            let solver = params["solver"].as_str().unwrap();
            assert!(["gd", "sgd", "momentum"].contains(&solver));
        }
    }

    #[test]
    fn grid_covers_product_and_wraps() {
        let space = SearchSpace::new()
            .add_int("a", 1, 3)
            .add_choice("b", vec!["x".into(), "y".into()]);
        assert_eq!(space.grid_size(), Some(6));

        let mut grid = GridSampler::new(&space, 5);
        assert_eq!(grid.len(), 6);

        let first_pass: Vec<ParamSet> = (0..6).map(|n| space.sample(&mut grid, n).unwrap()).collect();
        for (i, a) in first_pass.iter().enumerate() {
            for b in &first_pass[i + 1..] {
                assert_ne!(a, b);
            }
        }

        assert_eq!(space.sample(&mut grid, 6).unwrap(), first_pass[0]);
        assert_eq!(space.sample(&mut grid, 8).unwrap(), first_pass[2]);
    }

    #[test]
    fn grid_discretises_log_uniform_endpoints() {
        let space = SearchSpace::new().add_log_uniform("C", 1e-4, 1.0);
        let mut grid = GridSampler::new(&space, 5);
        assert_eq!(grid.len(), 5);
        let first = space.sample(&mut grid, 0).unwrap()["C"].as_f64().unwrap();
        let last = space.sample(&mut grid, 4).unwrap()["C"].as_f64().unwrap();
        assert!((first - 1e-4).abs() < 1e-12);
        assert!((last - 1.0).abs() < 1e-12);
    }

    #[test]
    fn perturbation_exploits_near_best_when_minimizing() {
        let space = SearchSpace::new().add_float("x", 0.0, 10.0);
        let mut sampler = PerturbationSampler::new(StudyDirection::Minimize, 0.0, Some(1));

        let mut worse = ParamSet::new();
        worse.insert("x".into(), ParameterValue::Float(9.0));
        let mut better = ParamSet::new();
        better.insert("x".into(), ParameterValue::Float(2.0));
        sampler.report(&better, 0.1);
        sampler.report(&worse, 0.5);
        assert_eq!(sampler.best().unwrap().1, 0.1);

        for n in 0..20 {
            let x = space.sample(&mut sampler, n).unwrap()["x"].as_f64().unwrap();
            assert!((1.0..=3.0).contains(&x), "x drifted from the best point: {x}");
        }
    }

    #[test]
    fn perturbation_explores_before_any_report() {
        let space = sample_space();
        let mut sampler = PerturbationSampler::new(StudyDirection::Maximize, 0.0, Some(9));
        assert!(space.sample(&mut sampler, 0).is_ok());
        assert!(sampler.best().is_none());
    }

    #[test]
    fn validate_rejects_bad_ranges() {
        assert!(SearchSpace::new().add_log_uniform("C", 0.0, 1.0).validate().unwrap_err().is_config());
        assert!(SearchSpace::new().add_int("n", 5, 1).validate().is_err());
        assert!(SearchSpace::new().add_choice("s", vec![]).validate().is_err());
        assert!(SearchSpace::logistic_regression().validate().is_ok());
    }
}
