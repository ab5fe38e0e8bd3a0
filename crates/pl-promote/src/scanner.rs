//! Registry scan for approved model versions.

use pl_tracking::ModelRegistry;
use pl_types::{ModelVersion, PlResult};
use serde::Serialize;
use tracing::{debug, info};

/// A version cleared for promotion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovedVersion {
    pub model_name: String,
    pub version: u64,
    /// Artifact source locator as the registry reports it.
    pub source: String,
}

impl ApprovedVersion {
    pub fn blob_prefix(&self) -> String {
        format!("{}_v{}", self.model_name, self.version)
    }
}

impl From<&ModelVersion> for ApprovedVersion {
    fn from(version: &ModelVersion) -> Self {
        Self {
            model_name: version.name.clone(),
            version: version.version,
            source: version.source.clone(),
        }
    }
}

/// Reads the registry and keeps the latest versions tagged approved.
pub struct RegistryScanner<'a> {
    registry: &'a dyn ModelRegistry,
}

impl<'a> RegistryScanner<'a> {
    pub fn new(registry: &'a dyn ModelRegistry) -> Self {
        Self { registry }
    }

    pub async fn scan(&self) -> PlResult<Vec<ApprovedVersion>> {
        let models = self.registry.search_registered_models().await?;
        debug!(models = models.len(), "Scanning registered models");

        let mut approved = Vec::new();
        for model in &models {
            for version in &model.latest_versions {
                if version.is_approved() {
                    info!(
                        model = %version.name,
                        version = version.version,
                        source = %version.source,
                        "Found approved model version"
                    );
                    approved.push(ApprovedVersion::from(version));
                } else {
                    let status = version
                        .approval_status()
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "untagged".to_string());
                    info!(
                        model = %version.name,
                        version = version.version,
                        status = %status,
                        "Skipping model version that is not approved"
                    );
                }
            }
        }
        Ok(approved)
    }
}
