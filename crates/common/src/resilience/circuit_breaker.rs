//! Tri-state circuit breaker guarding a family of remote calls
//!
//! The breaker never runs a background timer. An OPEN breaker is moved to
//! HALF_OPEN lazily, the first time anybody looks at it after the recovery
//! timeout has elapsed.
//!
//! Counters and the state live behind one lock so a transition and its
//! counter reset are observed together, even when the breaker is shared by
//! many concurrently scheduled operations.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::clock::{Clock, SystemClock};
use crate::error::{ErrorClassification, FailureClass};

//==============================================================================
// Error Types
//==============================================================================

/// Simple configuration error for validation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    pub(crate) fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid { message: message.into() }
    }
}

/// Errors produced by a breaker-guarded call
///
/// Generic over the operation error `E` so the original failure is preserved.
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Admission refused; no attempt was made
    #[error("Circuit breaker is open, rejecting calls")]
    CircuitOpen { retry_after: Option<Duration> },

    /// The underlying operation failed
    #[error("Operation failed: {source}")]
    OperationFailed {
        #[source]
        source: E,
    },
}

/// Result type for resilience operations
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;

/// Configuration result type using simple config errors
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Trial calls are admitted to probe recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

//==============================================================================
// Configuration
//==============================================================================

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive counted failures in CLOSED before the circuit opens
    pub failure_threshold: u64,
    /// Consecutive successes in HALF_OPEN before the circuit closes
    pub success_threshold: u64,
    /// Time spent OPEN before a trial call is admitted
    pub recovery_timeout: Duration,
    /// Failure classes that count against the circuit
    pub monitored: HashSet<FailureClass>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(60),
            monitored: default_monitored(),
        }
    }
}

fn default_monitored() -> HashSet<FailureClass> {
    [FailureClass::Connection, FailureClass::Timeout, FailureClass::Server].into_iter().collect()
}

impl CircuitBreakerConfig {
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold must be greater than 0"));
        }

        if self.success_threshold == 0 {
            return Err(ConfigError::invalid("success_threshold must be greater than 0"));
        }

        if self.monitored.is_empty() {
            return Err(ConfigError::invalid("monitored failure classes must not be empty"));
        }

        Ok(())
    }
}

/// Builder for CircuitBreakerConfig
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn success_threshold(mut self, threshold: u64) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    /// Replace the monitored failure classes
    pub fn monitored<I>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = FailureClass>,
    {
        self.config.monitored = classes.into_iter().collect();
        self
    }

    /// Add one class to the monitored set
    pub fn monitor(mut self, class: FailureClass) -> Self {
        self.config.monitored.insert(class);
        self
    }

    /// Switch to a custom clock and build a breaker directly
    pub fn clock<C: Clock>(self, clock: C) -> CircuitBreakerBuilderWithClock<C> {
        CircuitBreakerBuilderWithClock { config: self.config, clock }
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Builder with custom clock that builds a CircuitBreaker directly
pub struct CircuitBreakerBuilderWithClock<C: Clock> {
    config: CircuitBreakerConfig,
    clock: C,
}

impl<C: Clock> CircuitBreakerBuilderWithClock<C> {
    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn success_threshold(mut self, threshold: u64) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreaker<C>> {
        CircuitBreaker::with_clock(self.config, self.clock)
    }
}

//==============================================================================
// Breaker
//==============================================================================

/// Circuit breaker metrics for monitoring
#[derive(Debug, Clone)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub failure_count: u64,
    pub success_count: u64,
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub time_in_state: Duration,
}

#[derive(Debug)]
struct BreakerCore {
    state: CircuitState,
    failure_count: u64,
    success_count: u64,
    last_transition: Instant,
}

impl BreakerCore {
    fn transition(&mut self, next: CircuitState, now: Instant) {
        self.state = next;
        self.failure_count = 0;
        self.success_count = 0;
        self.last_transition = now;
    }
}

/// Tri-state fuse around a family of remote calls
///
/// Cloning is cheap and yields a handle to the same breaker.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: Arc<CircuitBreakerConfig>,
    core: Arc<RwLock<BreakerCore>>,
    total_calls: Arc<AtomicU64>,
    rejected_calls: Arc<AtomicU64>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core.read();
        f.debug_struct("CircuitBreaker")
            .field("state", &core.state)
            .field("failure_count", &core.failure_count)
            .field("success_count", &core.success_count)
            .field("failure_threshold", &self.config.failure_threshold)
            .finish()
    }
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            core: Arc::clone(&self.core),
            total_calls: Arc::clone(&self.total_calls),
            rejected_calls: Arc::clone(&self.rejected_calls),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a new circuit breaker using the system clock
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }

    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a new circuit breaker with a custom clock (useful for testing)
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        let now = clock.now();

        Ok(Self {
            config: Arc::new(config),
            core: Arc::new(RwLock::new(BreakerCore {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_transition: now,
            })),
            total_calls: Arc::new(AtomicU64::new(0)),
            rejected_calls: Arc::new(AtomicU64::new(0)),
            clock: Arc::new(clock),
        })
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, promoting OPEN to HALF_OPEN once the recovery timeout
    /// has elapsed
    pub fn state(&self) -> CircuitState {
        {
            let core = self.core.read();
            if core.state != CircuitState::Open || !self.recovery_elapsed(&core) {
                return core.state;
            }
        }

        let mut core = self.core.write();
        self.promote_if_recovered(&mut core);
        core.state
    }

    // Must be called with the write lock held; another caller may already
    // have promoted the circuit.
    fn promote_if_recovered(&self, core: &mut BreakerCore) {
        if core.state == CircuitState::Open && self.recovery_elapsed(core) {
            core.transition(CircuitState::HalfOpen, self.clock.now());
            info!(state = %CircuitState::HalfOpen, "Circuit breaker admitting trial calls");
        }
    }

    fn recovery_elapsed(&self, core: &BreakerCore) -> bool {
        self.clock.now().saturating_duration_since(core.last_transition)
            >= self.config.recovery_timeout
    }

    /// Admission check
    ///
    /// Returns `false` only while OPEN and the recovery timeout has not yet
    /// elapsed.
    pub fn can_execute(&self) -> bool {
        let admitted = self.state() != CircuitState::Open;
        if !admitted {
            self.rejected_calls.fetch_add(1, Ordering::Relaxed);
        }
        admitted
    }

    /// Remaining time before an OPEN circuit admits a trial call
    pub fn time_until_half_open(&self) -> Option<Duration> {
        let core = self.core.read();
        if core.state != CircuitState::Open {
            return None;
        }
        let elapsed = self.clock.now().saturating_duration_since(core.last_transition);
        Some(self.config.recovery_timeout.saturating_sub(elapsed))
    }

    /// Run a single attempt under breaker protection
    ///
    /// The outcome is recorded using the error's [`FailureClass`]; unmonitored
    /// failures pass through without touching the counters.
    #[instrument(skip(self, operation), fields(state = %self.state()))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + ErrorClassification + Send + Sync + 'static,
    {
        if !self.can_execute() {
            debug!("Circuit breaker rejecting call");
            return Err(ResilienceError::CircuitOpen { retry_after: self.time_until_half_open() });
        }

        match operation().await {
            Ok(result) => {
                self.record_success();
                Ok(result)
            }
            Err(error) => {
                self.record_failure(error.failure_class());
                Err(ResilienceError::OperationFailed { source: error })
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let mut core = self.core.write();
        self.promote_if_recovered(&mut core);

        match core.state {
            CircuitState::Closed => {
                core.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                core.success_count += 1;
                if core.success_count >= self.config.success_threshold {
                    let successes = core.success_count;
                    core.transition(CircuitState::Closed, self.clock.now());
                    info!(successes, "Circuit breaker closed after successful trial calls");
                }
            }
            CircuitState::Open => {
                debug!("Ignoring success recorded while circuit is open");
            }
        }
    }

    /// Record a failed call of the given class
    ///
    /// Returns `true` when the failure was counted.
    pub fn record_failure(&self, class: FailureClass) -> bool {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        if !self.config.monitored.contains(&class) {
            debug!(%class, "Failure class not monitored, breaker unchanged");
            return false;
        }

        let mut core = self.core.write();
        self.promote_if_recovered(&mut core);
        let now = self.clock.now();

        match core.state {
            CircuitState::Closed => {
                core.failure_count += 1;
                if core.failure_count >= self.config.failure_threshold {
                    let failures = core.failure_count;
                    core.transition(CircuitState::Open, now);
                    warn!(failures, %class, "Circuit breaker opened");
                }
            }
            CircuitState::HalfOpen => {
                core.transition(CircuitState::Open, now);
                warn!(%class, "Circuit breaker re-opened by a failed trial call");
            }
            CircuitState::Open => {}
        }
        true
    }

    /// Get circuit breaker metrics
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let state = self.state();
        let core = self.core.read();
        CircuitBreakerMetrics {
            state,
            failure_count: core.failure_count,
            success_count: core.success_count,
            total_calls: self.total_calls.load(Ordering::Acquire),
            rejected_calls: self.rejected_calls.load(Ordering::Acquire),
            time_in_state: self.clock.now().saturating_duration_since(core.last_transition),
        }
    }

    /// Force the circuit CLOSED with zeroed counters
    pub fn reset(&self) {
        let mut core = self.core.write();
        core.transition(CircuitState::Closed, self.clock.now());
        info!("Circuit breaker manually reset to closed state");
    }
}
