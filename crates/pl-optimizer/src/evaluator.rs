//! Fits and scores one estimator per trial.

use pl_model::{accuracy, root_mean_squared_error, Estimator, EstimatorFactory, Split};
use pl_types::{ParamSet, PlResult, TrialError};

/// Outcome of a successful evaluation.
#[derive(Debug, Clone)]
pub struct Evaluation<M> {
    /// Validation accuracy.
    pub score: f64,
    /// RMSE of predicted against true labels, for logging only.
    pub error: f64,
    /// The fitted estimator, handed to the snapshot on a new champion.
    pub model: M,
}

/// Builds a fresh estimator for every parameter set it evaluates.
#[derive(Debug, Clone)]
pub struct TrialEvaluator<F> {
    factory: F,
}

impl<F: EstimatorFactory> TrialEvaluator<F> {
    pub fn new(factory: F) -> Self {
        Self { factory }
    }

    pub fn parameter_names(&self) -> &[&'static str] {
        self.factory.parameter_names()
    }

    /// `params` must hold exactly the factory's parameter names.
    pub fn check_params(&self, params: &ParamSet) -> PlResult<()> {
        let expected = self.factory.parameter_names();
        if let Some(missing) = expected.iter().find(|name| !params.contains_key(**name)) {
            return Err(TrialError::MissingParameter {
                parameter: missing.to_string(),
            }
            .into());
        }
        if let Some(extra) = params
            .keys()
            .find(|key| !expected.iter().any(|name| *name == key.as_str()))
        {
            return Err(TrialError::UnexpectedParameter {
                parameter: extra.clone(),
            }
            .into());
        }
        Ok(())
    }

    /// Fit on the training split only.
    pub fn fit(&self, params: &ParamSet, split: &Split) -> PlResult<F::Model> {
        self.check_params(params)?;
        split.validate()?;
        let mut model = self.factory.build(params)?;
        model.fit(&split.x_train, &split.y_train)?;
        Ok(model)
    }

    /// Fit on the training split and score on the validation split.
    ///
    /// Any build, fit, or predict failure is returned as is.
    pub fn evaluate(&self, params: &ParamSet, split: &Split) -> PlResult<Evaluation<F::Model>> {
        let model = self.fit(params, split)?;
        let predicted = model.predict(&split.x_valid)?;
        Ok(Evaluation {
            score: accuracy(&predicted, &split.y_valid)?,
            error: root_mean_squared_error(&predicted, &split.y_valid)?,
            model,
        })
    }
}
