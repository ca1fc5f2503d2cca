//! Error types for the MariaDB operator
//!
//! Errors are split between transient failures, which are retried on the next
//! scheduled pass, and failures that are fatal to the pass they occur in.

use thiserror::Error;

/// Result alias used across the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("SQL error: {0}")]
    SqlError(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    /// A member could not be reached or is not ready to serve queries
    #[error("Member not ready: {0}")]
    NotReady(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    /// Optimistic concurrency check failed on a status write
    #[error("Conflict: {0}")]
    Conflict(String),

    /// No member could act as a Galera bootstrap source
    #[error("Galera recovery exhausted: {0}")]
    RecoveryExhausted(String),

    #[error("Recovery agent returned {status}: {message}")]
    AgentError { status: u16, message: String },
}

impl Error {
    /// Whether the error is expected to clear up on its own on a later pass
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::KubeError(kube::Error::Api(e)) => e.code == 409 || e.code >= 500,
            Error::KubeError(_)
            | Error::HttpError(_)
            | Error::SqlError(_)
            | Error::NotReady(_)
            | Error::Timeout(_)
            | Error::Conflict(_)
            | Error::RecoveryExhausted(_)
            | Error::AgentError { .. } => true,
            Error::SerializationError(_) | Error::ConfigError(_) | Error::ValidationError(_) => {
                false
            }
        }
    }

    /// Short label used for metrics and events
    pub fn kind(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "kube",
            Error::HttpError(_) => "http",
            Error::SqlError(_) => "sql",
            Error::SerializationError(_) => "serialization",
            Error::ConfigError(_) => "config",
            Error::ValidationError(_) => "validation",
            Error::NotReady(_) => "not_ready",
            Error::Timeout(_) => "timeout",
            Error::Conflict(_) => "conflict",
            Error::RecoveryExhausted(_) => "recovery_exhausted",
            Error::AgentError { .. } => "agent",
        }
    }
}
