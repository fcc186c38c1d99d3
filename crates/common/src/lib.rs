//! Domain-free building blocks shared across livlink crates.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: the shared error vocabulary and classification trait
//! - `runtime`: clocks and the resilience primitives (breaker, backoff,
//!   rate-limit governor, retry orchestrator)
//! - `test-utils`: helpers for async tests in downstream crates

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod error;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod resilience;

// Testing utilities
// ---------------------------------------------------------------
#[cfg(any(feature = "test-utils", test))]
pub mod testing;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "foundation")]
pub use error::{CommonError, CommonResult, ErrorClassification, ErrorSeverity, FailureClass};
#[cfg(feature = "runtime")]
pub use resilience::{
    BackoffPolicy, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState,
    Clock, ConfigError, Jitter, MockClock, RateLimitConfig, RateLimitGovernor, RateLimitHint,
    ResilienceError, RetryError, RetryOrchestrator, RetryResult, SystemClock,
};
