use thiserror::Error;

/// Main error type for Plinth
#[derive(Error, Debug)]
pub enum PlError {
    #[error("Trial error: {0}")]
    Trial(#[from] TrialError),

    #[error("Tracking error: {0}")]
    Tracking(#[from] TrackingError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl PlError {
    /// True for errors that must stop a run before any remote work starts.
    pub fn is_config(&self) -> bool {
        matches!(self, PlError::Config(_))
    }
}

/// Errors raised while fitting or scoring a trial's estimator
#[derive(Error, Debug)]
pub enum TrialError {
    #[error("Missing parameter: {parameter}")]
    MissingParameter { parameter: String },

    #[error("Unexpected parameter: {parameter}")]
    UnexpectedParameter { parameter: String },

    #[error("Invalid parameter: {parameter}, message: {message}")]
    InvalidParameter { parameter: String, message: String },

    #[error("Empty {split} split")]
    EmptySplit { split: String },

    #[error("Label mismatch in {split} split: {rows} rows but {labels} labels")]
    LabelMismatch {
        split: String,
        rows: usize,
        labels: usize,
    },

    #[error("Feature width mismatch: expected {expected}, got {actual}")]
    FeatureMismatch { expected: usize, actual: usize },

    #[error("Fit failed: {message}")]
    FitFailed { message: String },

    #[error("Estimator used before fit")]
    NotFitted,
}

/// Errors from the tracking service, model registry, or artifact backend
#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Request to {endpoint} failed: {message}")]
    Request { endpoint: String, message: String },

    #[error("Tracking API returned {status} for {endpoint}: {message}")]
    Api {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Unsupported artifact URI: {uri}")]
    UnsupportedUri { uri: String },

    #[error("Run {run_id} is not active")]
    RunNotActive { run_id: String },

    #[error("Artifact download failed for {source_uri}: {message}")]
    Download { source_uri: String, message: String },
}

/// Errors from blob storage and local scratch storage
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid connection string: {message}")]
    InvalidConnectionString { message: String },

    #[error("Invalid container name '{name}': {message}")]
    InvalidContainerName { name: String, message: String },

    #[error("Upload of {blob} failed: {message}")]
    Upload { blob: String, message: String },

    #[error("Blob already exists: {blob}")]
    AlreadyExists { blob: String },

    #[error("Snapshot error at {path}: {message}")]
    Snapshot { path: String, message: String },
}

/// Result type alias for Plinth operations
pub type PlResult<T> = Result<T, PlError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::PlError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::PlError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::PlError::Config(format!($($arg)*))
    };
}
