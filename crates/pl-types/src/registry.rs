//! Model registry records as the scanner and orchestrator see them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tag key carrying a version's human/external sign-off state.
pub const APPROVAL_TAG: &str = "validation_status";

/// Value of the approval tag on a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Other(String),
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Other(value) => value,
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "pending" => Self::Pending,
            "approved" => Self::Approved,
            other => Self::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One version of a registered model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub name: String,
    pub version: u64,
    /// Locator of the version's artifact tree in the tracking backend.
    pub source: String,
    pub run_id: Option<String>,
    pub tags: BTreeMap<String, String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl ModelVersion {
    pub fn new(name: impl Into<String>, version: u64, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version,
            source: source.into(),
            run_id: None,
            tags: BTreeMap::new(),
            created_at: None,
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// `None` when the version has never been tagged.
    pub fn approval_status(&self) -> Option<ApprovalStatus> {
        self.tags.get(APPROVAL_TAG).map(|v| ApprovalStatus::parse(v))
    }

    pub fn is_approved(&self) -> bool {
        self.approval_status() == Some(ApprovalStatus::Approved)
    }

    /// Destination prefix in blob storage: `{name}_v{version}`.
    pub fn blob_prefix(&self) -> String {
        format!("{}_v{}", self.name, self.version)
    }
}

/// A named model with the latest version per stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredModel {
    pub name: String,
    pub latest_versions: Vec<ModelVersion>,
    pub tags: BTreeMap<String, String>,
}

impl RegisteredModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            latest_versions: Vec::new(),
            tags: BTreeMap::new(),
        }
    }
}
