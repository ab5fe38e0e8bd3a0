//! # pl-promote
//!
//! Mirrors approved model versions into blob storage.
//!
//! The [`RegistryScanner`] finds versions tagged `validation_status=approved`,
//! the [`PromotionPipeline`] downloads each one into a staging directory, and
//! [`ArtifactSync`] uploads the tree under `{model}_v{version}/` to a
//! [`BlobStore`]. Uploads are best effort: every file gets an outcome and a
//! failed file never stops the rest.

pub mod azure;
pub mod blob;
pub mod config;
pub mod pipeline;
pub mod scanner;
pub mod sync;

pub use azure::AzureBlobStore;
pub use blob::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use config::{
    validate_container_name, ConnectionString, PromotionConfig, CONTAINER_NAME_VAR,
    STORAGE_CONNECTION_VAR,
};
pub use pipeline::{JobOutcome, JobReport, PromotionPipeline, PromotionReport};
pub use scanner::{ApprovedVersion, RegistryScanner};
pub use sync::{ArtifactSync, FileOutcome, SyncReport, EXCLUDED_FILES};
