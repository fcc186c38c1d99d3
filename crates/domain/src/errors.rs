//! Error types used throughout the client
//!
//! [`LivError`] is the one error every public operation returns. It plugs
//! into the shared [`ErrorClassification`] trait so the retry orchestrator
//! and circuit breaker can decide what to retry and what to count.

use std::time::Duration;

use livlink_common::resilience::{ConfigError, ResilienceError, RetryError};
use livlink_common::{CommonError, ErrorClassification, ErrorSeverity, FailureClass};
use thiserror::Error;

/// Main error type for livlink
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LivError {
    /// Credentials rejected or a refresh failed. Terminal, never retried.
    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Rate limited by the remote service")]
    RateLimited { retry_after: Option<Duration> },

    /// Local admission failure; no network I/O was attempted
    #[error("Circuit breaker is open")]
    CircuitOpen { retry_after: Option<Duration> },

    #[error("Command queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Command was cancelled before dispatch")]
    Cancelled,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Client is shutting down")]
    ShuttingDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for livlink operations
pub type Result<T> = std::result::Result<T, LivError>;

impl LivError {
    pub fn validation<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::Validation { field: field.into(), message: message.into() }
    }

    pub fn api<M: Into<String>>(status: u16, message: M) -> Self {
        Self::Api { status, message: message.into() }
    }

    /// True for errors raised locally without touching the network
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpen { .. }
                | Self::QueueFull { .. }
                | Self::Validation { .. }
                | Self::Cancelled
                | Self::ShuttingDown
                | Self::Config(_)
        )
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::NotFound(_) => Some(404),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }
}

impl ErrorClassification for LivError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Timeout(_) | Self::RateLimited { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Cancelled | Self::NotFound(_) | Self::ShuttingDown => ErrorSeverity::Info,
            Self::Connection(_)
            | Self::Timeout(_)
            | Self::RateLimited { .. }
            | Self::CircuitOpen { .. }
            | Self::QueueFull { .. } => ErrorSeverity::Warning,
            Self::Api { status, .. } if *status >= 500 => ErrorSeverity::Warning,
            Self::Internal(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, Self::Internal(_))
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } | Self::CircuitOpen { retry_after } => *retry_after,
            _ => None,
        }
    }

    fn failure_class(&self) -> FailureClass {
        match self {
            Self::Connection(_) => FailureClass::Connection,
            Self::Timeout(_) => FailureClass::Timeout,
            Self::RateLimited { .. } => FailureClass::RateLimited,
            Self::Api { status, .. } if *status >= 500 => FailureClass::Server,
            Self::Api { .. } | Self::NotFound(_) | Self::Validation { .. } => FailureClass::Client,
            Self::Authentication(_) => FailureClass::Authentication,
            _ => FailureClass::Other,
        }
    }
}

impl From<CommonError> for LivError {
    fn from(err: CommonError) -> Self {
        match err {
            CommonError::Timeout { .. } => Self::Timeout(err.to_string()),
            CommonError::RateLimitExceeded { retry_after } => Self::RateLimited { retry_after },
            CommonError::CircuitBreakerOpen { retry_after, .. } => Self::CircuitOpen { retry_after },
            CommonError::Backend { is_retryable: true, message, .. } => Self::Connection(message),
            CommonError::Backend { message, .. } => Self::api(0, message),
            CommonError::Config { message, .. } => Self::Config(message),
            CommonError::Serialization { message, .. } => Self::Serialization(message),
            CommonError::Validation { field, message, .. } => Self::Validation { field, message },
            CommonError::NotFound { .. } => Self::NotFound(err.to_string()),
            CommonError::Unauthorized { operation } => Self::Authentication(operation),
            CommonError::Internal { message, .. } => Self::Internal(message),
        }
    }
}

impl From<RetryError<LivError>> for LivError {
    fn from(err: RetryError<LivError>) -> Self {
        match err {
            RetryError::CircuitOpen { retry_after } => Self::CircuitOpen { retry_after },
            RetryError::Exhausted { source, .. } | RetryError::NonRetryable { source } => source,
        }
    }
}

impl From<ResilienceError<LivError>> for LivError {
    fn from(err: ResilienceError<LivError>) -> Self {
        match err {
            ResilienceError::CircuitOpen { retry_after } => Self::CircuitOpen { retry_after },
            ResilienceError::OperationFailed { source } => source,
        }
    }
}

impl From<ConfigError> for LivError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<serde_json::Error> for LivError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
