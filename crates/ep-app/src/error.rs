//! Error types for the ep-app service layer.

use std::path::PathBuf;

/// Application error type that wraps errors from the backend crates and
/// classifies run failures.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{role} not found: {path}")]
    InputValidation { role: &'static str, path: PathBuf },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read config file: {path}")]
    ConfigFileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write config file: {path}")]
    ConfigFileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid batch: {0}")]
    Batch(String),

    #[error("EnergyPlus run {name} failed: {reason}")]
    ExecutionFailed {
        name: String,
        code: Option<i32>,
        reason: String,
        log: String,
    },

    #[error("EnergyPlus run {name} was interrupted")]
    Interrupted { name: String, log: String },

    #[error(transparent)]
    Core(#[from] ep_core::CoreError),

    #[error("Results error: {0}")]
    Results(String),

    #[error("Install error: {0}")]
    Install(String),

    #[error("Post-processing failed: {0}")]
    PostProcess(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Captured engine log, for failures that got as far as running it.
    pub fn log(&self) -> Option<&str> {
        match self {
            AppError::ExecutionFailed { log, .. } | AppError::Interrupted { log, .. } => Some(log),
            _ => None,
        }
    }
}

/// Result type for ep-app operations.
pub type AppResult<T> = Result<T, AppError>;

// Conversions from backend error types
impl From<ep_results::ResultsError> for AppError {
    fn from(err: ep_results::ResultsError) -> Self {
        AppError::Results(err.to_string())
    }
}

impl From<ep_install::InstallError> for AppError {
    fn from(err: ep_install::InstallError) -> Self {
        AppError::Install(err.to_string())
    }
}
