//! Integration tests for `livlink_common::error`.
//!
//! These suites validate classification and module error delegation so the
//! retry and breaker layers receive consistent failure semantics.

#![cfg(feature = "foundation")]

use std::time::Duration;

use livlink_common::error::{
    CommonError, CommonResult, ErrorClassification, ErrorSeverity, FailureClass,
};
use thiserror::Error;

/// Validates that `CommonError` classification surfaces the expected retryable,
/// severity and failure class combinations for each variant.
///
/// Assertions:
/// - Confirms `is_retryable()`, `severity()` and `failure_class()` per case.
#[test]
fn classification_matrix_matches_expected_contract() {
    let cases = vec![
        (CommonError::config("missing base url"), false, ErrorSeverity::Error, FailureClass::Other),
        (
            CommonError::rate_limit(Some(Duration::from_secs(2))),
            true,
            ErrorSeverity::Warning,
            FailureClass::RateLimited,
        ),
        (
            CommonError::timeout("list devices", Duration::from_secs(30)),
            true,
            ErrorSeverity::Warning,
            FailureClass::Timeout,
        ),
        (
            CommonError::backend("hub", "503 unavailable", true),
            true,
            ErrorSeverity::Warning,
            FailureClass::Server,
        ),
        (
            CommonError::unauthorized("refresh token"),
            false,
            ErrorSeverity::Error,
            FailureClass::Authentication,
        ),
        (
            CommonError::validation("brightness", "must be 0-100"),
            false,
            ErrorSeverity::Error,
            FailureClass::Client,
        ),
        (
            CommonError::Internal { message: "poisoned state".into(), context: None },
            false,
            ErrorSeverity::Critical,
            FailureClass::Other,
        ),
    ];

    for (err, retryable, severity, class) in cases {
        assert_eq!(err.is_retryable(), retryable, "retryable mismatch for {err}");
        assert_eq!(err.severity(), severity, "severity mismatch for {err}");
        assert_eq!(err.failure_class(), class, "class mismatch for {err}");
        assert_eq!(err.is_critical(), severity == ErrorSeverity::Critical);
    }
}

/// Validates that only rate-limit and breaker errors carry a retry hint.
#[test]
fn retry_after_is_surfaced_for_hinted_errors() {
    let limited = CommonError::rate_limit(Some(Duration::from_secs(9)));
    assert_eq!(limited.retry_after(), Some(Duration::from_secs(9)));

    let open = CommonError::CircuitBreakerOpen {
        service: "hub".into(),
        retry_after: Some(Duration::from_secs(12)),
    };
    assert_eq!(open.retry_after(), Some(Duration::from_secs(12)));

    assert_eq!(CommonError::timeout("login", Duration::from_secs(1)).retry_after(), None);
}

/// Validates the serde_json conversion into the shared vocabulary.
#[test]
fn json_errors_convert_to_serialization_variant() {
    fn parse(raw: &str) -> CommonResult<serde_json::Value> {
        Ok(serde_json::from_str(raw)?)
    }

    let err = parse("{not json").unwrap_err();
    assert!(matches!(err, CommonError::Serialization { .. }));
    assert!(!err.is_retryable());
}

#[derive(Debug, Error)]
enum HubError {
    #[error(transparent)]
    Common(#[from] CommonError),

    #[error("device {0} rejected the command")]
    Rejected(String),

    #[error("hub busy")]
    Busy,
}

impl ErrorClassification for HubError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Common(e) => e.is_retryable(),
            Self::Rejected(_) => false,
            Self::Busy => true,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Common(e) => e.severity(),
            Self::Rejected(_) => ErrorSeverity::Error,
            Self::Busy => ErrorSeverity::Warning,
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, Self::Common(e) if e.is_critical())
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Common(e) => e.retry_after(),
            Self::Rejected(_) => None,
            Self::Busy => Some(Duration::from_secs(1)),
        }
    }

    fn failure_class(&self) -> FailureClass {
        match self {
            Self::Common(e) => e.failure_class(),
            _ => FailureClass::Other,
        }
    }
}

/// Validates classification delegation for a module error embedding
/// `CommonError`.
///
/// Assertions:
/// - Confirms the embedded `CommonError` keeps its own classification.
/// - Confirms explicit variants use the declared values.
/// - Confirms module-specific variants fall back to `FailureClass::Other`.
#[test]
fn module_error_delegates_to_common_variant() {
    let wrapped = HubError::from(CommonError::timeout("set power", Duration::from_secs(30)));
    assert!(wrapped.is_retryable());
    assert_eq!(wrapped.failure_class(), FailureClass::Timeout);

    let rejected = HubError::Rejected("dev-1".into());
    assert!(!rejected.is_retryable());
    assert_eq!(rejected.retry_after(), None);
    assert_eq!(rejected.failure_class(), FailureClass::Other);

    let busy = HubError::Busy;
    assert_eq!(busy.retry_after(), Some(Duration::from_secs(1)));
    assert_eq!(busy.severity(), ErrorSeverity::Warning);
}

#[test]
fn failure_class_labels_are_snake_case() {
    assert_eq!(FailureClass::RateLimited.to_string(), "rate_limited");
    assert_eq!(FailureClass::Connection.to_string(), "connection");
}
