//! Fault-tolerance primitives for calls to a remote service
//!
//! - **Circuit breaker**: tri-state fuse that stops calling a failing
//!   service and probes it again after a recovery timeout
//! - **Backoff policy**: exponential delay sequence with full jitter
//! - **Rate-limit governor**: turns `429` responses and `Retry-After` hints
//!   into delays
//! - **Retry orchestrator**: runs an operation under all three, in the order
//!   that avoids sleeping for calls the breaker would refuse
//!
//! Every primitive is an owned, injectable value. Clones of a breaker share
//! state, so one breaker can guard a whole family of calls.
//!
//! Time is read through [`Clock`]; tests use [`MockClock`] to move breakers
//! through their recovery window without sleeping.

pub mod backoff;
pub mod circuit_breaker;
pub mod clock;
pub mod rate_limit;
pub mod retry;

pub use backoff::{BackoffAttempt, BackoffPolicy, BackoffPolicyBuilder, Jitter};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerBuilderWithClock, CircuitBreakerConfig,
    CircuitBreakerConfigBuilder, CircuitBreakerMetrics, CircuitState, ConfigError, ConfigResult,
    ResilienceError, ResilienceResult,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use rate_limit::{
    format_http_date, RateLimitConfig, RateLimitGovernor, RateLimitHint, TOO_MANY_REQUESTS,
};
pub use retry::{RetryError, RetryOrchestrator, RetryResult};
