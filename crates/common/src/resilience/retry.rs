//! Retry orchestration over breaker, backoff and rate-limit governor
//!
//! One `execute` call runs this loop:
//!
//! 1. Ask the breaker for admission. A refusal fails fast with
//!    [`RetryError::CircuitOpen`]; nothing is attempted and nobody sleeps.
//! 2. Run the operation, bounded by the per-attempt timeout.
//! 3. On a retryable error or a rate-limited response pick a delay. A server
//!    hint wins over the backoff schedule.
//! 4. Check the breaker again, sleep, and go back to 2 until `max_attempts`
//!    is reached.
//!
//! The breaker hears about the call once: a success when it finally works, a
//! failure when attempts run out or a terminal error stops the loop.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::backoff::BackoffPolicy;
use super::circuit_breaker::CircuitBreaker;
use super::clock::{Clock, SystemClock};
use super::rate_limit::RateLimitGovernor;
use crate::error::{CommonError, ErrorClassification, FailureClass};

/// Errors that end a retry sequence
#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The breaker refused admission
    #[error("Circuit breaker is open, call not attempted")]
    CircuitOpen { retry_after: Option<Duration> },

    /// Every allowed attempt failed; `source` is the last failure
    #[error("All {attempts} attempts failed: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },

    /// The operation failed with an error that must not be retried
    #[error("Operation failed with non-retryable error: {source}")]
    NonRetryable {
        #[source]
        source: E,
    },
}

impl<E> RetryError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The underlying operation error, if an attempt was made
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::CircuitOpen { .. } => None,
            Self::Exhausted { source, .. } | Self::NonRetryable { source } => Some(source),
        }
    }
}

/// Result type for retry operations
pub type RetryResult<T, E> = Result<T, RetryError<E>>;

/// Composes the resilience primitives around an arbitrary remote operation
pub struct RetryOrchestrator<C: Clock = SystemClock> {
    backoff: BackoffPolicy,
    rate_limiter: RateLimitGovernor<C>,
    breaker: Option<CircuitBreaker<C>>,
    attempt_timeout: Option<Duration>,
}

impl<C: Clock> Clone for RetryOrchestrator<C> {
    fn clone(&self) -> Self {
        Self {
            backoff: self.backoff.clone(),
            rate_limiter: RateLimitGovernor::clone(&self.rate_limiter),
            breaker: self.breaker.clone(),
            attempt_timeout: self.attempt_timeout,
        }
    }
}

impl Default for RetryOrchestrator<SystemClock> {
    fn default() -> Self {
        Self::new(BackoffPolicy::default(), RateLimitGovernor::default())
    }
}

impl<C: Clock> RetryOrchestrator<C> {
    /// Default per-attempt timeout
    pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(backoff: BackoffPolicy, rate_limiter: RateLimitGovernor<C>) -> Self {
        Self {
            backoff,
            rate_limiter,
            breaker: None,
            attempt_timeout: Some(Self::DEFAULT_ATTEMPT_TIMEOUT),
        }
    }

    /// Attach a (possibly shared) circuit breaker
    pub fn with_breaker(mut self, breaker: CircuitBreaker<C>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn breaker(&self) -> Option<&CircuitBreaker<C>> {
        self.breaker.as_ref()
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    pub fn rate_limiter(&self) -> &RateLimitGovernor<C> {
        &self.rate_limiter
    }

    /// Retry `operation` on retryable errors
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> RetryResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + ErrorClassification + From<CommonError> + Send + Sync + 'static,
    {
        self.run(operation, |_: &T| None).await
    }

    /// Retry `operation` on retryable errors and on rate-limited responses
    ///
    /// `classify_status` reads the status code of a response that made it
    /// back; `extract_retry_after` reads its raw `Retry-After` value.
    #[instrument(skip_all, fields(max_attempts = self.backoff.max_attempts))]
    pub async fn execute_classified<F, Fut, T, E, S, R>(
        &self,
        operation: F,
        classify_status: S,
        extract_retry_after: R,
    ) -> RetryResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + ErrorClassification + From<CommonError> + Send + Sync + 'static,
        S: Fn(&T) -> u16,
        R: Fn(&T) -> Option<String>,
    {
        self.run(operation, |response: &T| {
            let status = classify_status(response);
            self.rate_limiter.is_rate_limited(status).then(|| {
                self.rate_limiter.retry_delay(status, extract_retry_after(response).as_deref())
            })
        })
        .await
    }

    async fn run<F, Fut, T, E, K>(&self, mut operation: F, rate_limited: K) -> RetryResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + ErrorClassification + From<CommonError> + Send + Sync + 'static,
        K: Fn(&T) -> Option<Duration>,
    {
        let max_attempts = self.backoff.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            self.admit()?;
            let attempts_made = attempt + 1;
            let is_last = attempts_made >= max_attempts;

            let delay = match self.attempt(&mut operation).await {
                Ok(response) => match rate_limited(&response) {
                    None => {
                        if let Some(breaker) = &self.breaker {
                            breaker.record_success();
                        }
                        if attempt > 0 {
                            debug!(attempts = attempts_made, "Operation succeeded after retries");
                        }
                        return Ok(response);
                    }
                    Some(hint) if is_last => {
                        let error = E::from(CommonError::rate_limit(Some(hint)));
                        return Err(self.exhausted(attempts_made, error));
                    }
                    Some(hint) => {
                        debug!(attempt = attempts_made, delay_ms = millis(hint), "Rate limited");
                        hint
                    }
                },
                Err(error) if !error.is_retryable() => {
                    self.record_failure(&error);
                    debug!(attempt = attempts_made, %error, "Non-retryable failure");
                    return Err(RetryError::NonRetryable { source: error });
                }
                Err(error) if is_last => return Err(self.exhausted(attempts_made, error)),
                Err(error) => {
                    let delay = self.delay_for_error(&error, attempt);
                    debug!(
                        attempt = attempts_made,
                        delay_ms = millis(delay),
                        %error,
                        "Retryable failure"
                    );
                    delay
                }
            };

            // No point sleeping for a call the breaker would refuse anyway.
            self.admit()?;
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn attempt<F, Fut, T, E>(&self, operation: &mut F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CommonError>,
    {
        match self.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, operation()).await {
                Ok(result) => result,
                Err(_) => Err(E::from(CommonError::timeout("remote call", limit))),
            },
            None => operation().await,
        }
    }

    fn admit<E>(&self) -> Result<(), RetryError<E>>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        match &self.breaker {
            Some(breaker) if !breaker.can_execute() => {
                debug!(state = %breaker.state(), "Breaker refused admission");
                Err(RetryError::CircuitOpen { retry_after: breaker.time_until_half_open() })
            }
            _ => Ok(()),
        }
    }

    fn delay_for_error<E: ErrorClassification>(&self, error: &E, attempt: u32) -> Duration {
        let limits = self.rate_limiter.config();
        match error.retry_after().filter(|_| limits.respect_retry_after) {
            Some(hint) => hint.min(limits.max_delay),
            None if error.failure_class() == FailureClass::RateLimited => limits.default_delay,
            None => self.backoff.delay_for_attempt(attempt),
        }
    }

    fn exhausted<E>(&self, attempts: u32, error: E) -> RetryError<E>
    where
        E: std::error::Error + ErrorClassification + Send + Sync + 'static,
    {
        warn!(attempts, %error, "Retry attempts exhausted");
        self.record_failure(&error);
        RetryError::Exhausted { attempts, source: error }
    }

    fn record_failure<E: ErrorClassification>(&self, error: &E) {
        if let Some(breaker) = &self.breaker {
            breaker.record_failure(error.failure_class());
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
