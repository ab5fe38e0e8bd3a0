//! # pl-tracking
//!
//! Interfaces to the services a search run and a promotion run talk to:
//! the experiment tracker, the model registry, and the artifact store.
//!
//! - [`MlflowClient`] speaks the MLflow REST API (tracking, registry, and the
//!   proxied `mlflow-artifacts` store).
//! - [`InMemoryTracking`] implements the same traits in-process for sandbox
//!   runs and tests.

pub mod artifacts;
pub mod client;
pub mod config;
pub mod memory;
pub mod mlflow;

pub use artifacts::{copy_tree, ArtifactLocation};
pub use client::{ArtifactDownloader, ModelRegistry, TrackingClient};
pub use config::{TrackingConfig, TRACKING_URI_VAR};
pub use memory::{InMemoryTracking, RunRecord};
pub use mlflow::MlflowClient;
