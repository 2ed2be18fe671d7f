//! Error taxonomy for the supervisor, the symbol index and the analyzer.

use crate::language_detector::Language;
use thiserror::Error;

/// A single file that could not be indexed.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FileError {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Backend for {language:?} unavailable: {reason}")]
    BackendUnavailable { language: Language, reason: String },

    #[error("Backend for {language:?} failed on {method}: {message}")]
    BackendError {
        language: Language,
        method: String,
        message: String,
    },

    #[error("Backend for {language:?} timed out on {method} after {timeout_ms}ms")]
    BackendTimeout {
        language: Language,
        method: String,
        timeout_ms: u64,
    },

    #[error("Backend returned error {code}: {message}")]
    Protocol { code: i64, message: String },

    #[error("Health check failed for {language:?}: {reason}")]
    HealthCheckFailure { language: Language, reason: String },

    #[error("Indexing failed for {} file(s)", errors.len())]
    IndexingPartialFailure { errors: Vec<FileError> },

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Snapshot encoding error: {0}")]
    Snapshot(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, SupervisorError>;

impl SupervisorError {
    pub(crate) fn backend(language: Language, method: &str, err: impl std::fmt::Display) -> Self {
        SupervisorError::BackendError {
            language,
            method: method.to_string(),
            message: err.to_string(),
        }
    }

    /// Errors a caller may retry after the supervisor has had a chance to recover.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SupervisorError::BackendTimeout { .. }
                | SupervisorError::BackendError { .. }
                | SupervisorError::HealthCheckFailure { .. }
                | SupervisorError::Io(_)
        )
    }

    /// Errors that advisory point queries swallow and turn into empty results.
    pub fn is_advisory_degradable(&self) -> bool {
        matches!(
            self,
            SupervisorError::BackendUnavailable { .. }
                | SupervisorError::BackendError { .. }
                | SupervisorError::BackendTimeout { .. }
                | SupervisorError::Protocol { .. }
                | SupervisorError::HealthCheckFailure { .. }
                | SupervisorError::Serialization(_)
        )
    }
}
