//! The seam between the optimizer and a concrete classifier.

use pl_types::{ParamSet, PlResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::metrics::accuracy;

/// A classifier that can be fit, queried, and serialized as a snapshot.
pub trait Estimator: Serialize + DeserializeOwned + Send {
    /// Model flavor written to the logged model descriptor.
    fn flavor(&self) -> &'static str;

    fn fit(&mut self, features: &[Vec<f64>], labels: &[usize]) -> PlResult<()>;

    fn predict(&self, features: &[Vec<f64>]) -> PlResult<Vec<usize>>;

    /// Mean accuracy on the given split.
    fn score(&self, features: &[Vec<f64>], labels: &[usize]) -> PlResult<f64> {
        let predicted = self.predict(features)?;
        accuracy(&predicted, labels)
    }

    /// Number of classes seen during fit, if fitted.
    fn n_classes(&self) -> Option<usize>;
}

/// Builds a fresh, unfitted estimator from one trial's parameters.
pub trait EstimatorFactory {
    type Model: Estimator;

    /// The exact set of parameter names `build` accepts.
    fn parameter_names(&self) -> &[&'static str];

    fn build(&self, params: &ParamSet) -> PlResult<Self::Model>;
}
