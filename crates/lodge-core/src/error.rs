use std::time::Duration;

use thiserror::Error;

/// How an error must be handled by the scheduler.
///
/// Decided by the variant at the point the error is constructed, so callers
/// never have to inspect messages to know whether to retry or abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient navigation failure; the task may be attempted again.
    Retryable,
    /// The task failed and another attempt cannot help.
    Permanent,
    /// The whole run must stop.
    Fatal,
}

/// Application-wide error types for lodge.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed or returned a non-success status.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error (DNS, connect, proxy tunnel, reset).
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Navigation or handler budget exceeded.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Headless browser failed to launch, navigate or render.
    #[error("Browser error: {0}")]
    BrowserError(String),

    /// Target URL cannot be requested at all.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The pre-flight probe found the target unreachable.
    #[error("Health check failed: {0}")]
    HealthCheckFailed(String),

    /// Persisting a record or value failed.
    #[error("Sink error: {0}")]
    SinkError(String),

    /// Invalid crawl configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    pub fn class(&self) -> ErrorClass {
        match self {
            AppError::HttpError(_)
            | AppError::NetworkError(_)
            | AppError::Timeout(_)
            | AppError::BrowserError(_) => ErrorClass::Retryable,
            AppError::HealthCheckFailed(_) => ErrorClass::Fatal,
            AppError::InvalidUrl(_)
            | AppError::SinkError(_)
            | AppError::ConfigError(_)
            | AppError::SerializationError(_)
            | AppError::Generic(_) => ErrorClass::Permanent,
        }
    }

    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }

    /// Returns true if this error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }
}
