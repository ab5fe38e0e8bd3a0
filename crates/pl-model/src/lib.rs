//! # pl-model
//!
//! The "train and score" side of a search: tabular datasets with a seeded
//! train/validation split, the [`Estimator`] seam the optimizer fits through,
//! a multinomial logistic regression, and the metrics trials report.

pub mod dataset;
pub mod estimator;
pub mod logistic;
pub mod metrics;

pub use dataset::{Dataset, Split};
pub use estimator::{Estimator, EstimatorFactory};
pub use logistic::{LogisticRegression, LogisticRegressionFactory, Solver};
pub use metrics::{accuracy, root_mean_squared_error};
