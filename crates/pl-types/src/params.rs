//! Concrete hyperparameter values and the per-trial parameter set.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::{PlResult, TrialError};

/// A concrete parameter value produced by a sampler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl ParameterValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<f64> for ParameterValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for ParameterValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

/// Parameters sampled for one trial, keyed by name.
///
/// Ordered so that logged parameters and serialized studies are stable.
pub type ParamSet = BTreeMap<String, ParameterValue>;

/// Look up a numeric parameter.
pub fn require_f64(params: &ParamSet, name: &str) -> PlResult<f64> {
    match params.get(name) {
        Some(value) => value.as_f64().ok_or_else(|| {
            TrialError::InvalidParameter {
                parameter: name.to_string(),
                message: format!("expected a number, got {value}"),
            }
            .into()
        }),
        None => Err(TrialError::MissingParameter {
            parameter: name.to_string(),
        }
        .into()),
    }
}

/// Look up a categorical (string) parameter.
pub fn require_str<'a>(params: &'a ParamSet, name: &str) -> PlResult<&'a str> {
    match params.get(name) {
        Some(value) => value.as_str().ok_or_else(|| {
            TrialError::InvalidParameter {
                parameter: name.to_string(),
                message: format!("expected a string, got {value}"),
            }
            .into()
        }),
        None => Err(TrialError::MissingParameter {
            parameter: name.to_string(),
        }
        .into()),
    }
}

/// Render a parameter set as the string map tracking services accept.
pub fn params_to_strings(params: &ParamSet) -> BTreeMap<String, String> {
    params
        .iter()
        .map(|(name, value)| (name.clone(), value.to_string()))
        .collect()
}
