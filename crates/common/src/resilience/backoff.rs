//! Exponential backoff with optional full jitter
//!
//! The policy is a pure description of a delay sequence. It never sleeps and
//! never counts attempts; enforcing `max_attempts` is the orchestrator's job.

use std::time::Duration;

use rand::Rng;

use super::circuit_breaker::{ConfigError, ConfigResult};

/// Jitter type for adding randomness to retry delays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    /// Use the computed delay as-is
    None,
    /// Uniformly random between zero and the computed delay
    #[default]
    Full,
}

impl Jitter {
    /// Apply jitter to a computed delay
    pub fn apply(self, delay: Duration) -> Duration {
        match self {
            Jitter::None => delay,
            Jitter::Full => {
                let upper = delay.as_secs_f64();
                if upper <= 0.0 {
                    return Duration::ZERO;
                }
                Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..=upper))
            }
        }
    }
}

/// One step of a backoff sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffAttempt {
    /// Zero-based index of the failed attempt this delay follows
    pub attempt: u32,
    pub delay: Duration,
}

/// Exponential backoff parameters
///
/// `delay_for_attempt(n) = min(max_delay, base_delay * growth_factor^n)`,
/// optionally passed through [`Jitter::Full`].
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Total attempts allowed, the first one included
    pub max_attempts: u32,
    pub growth_factor: f64,
    pub jitter: Jitter,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 5,
            growth_factor: 2.0,
            jitter: Jitter::Full,
        }
    }
}

impl BackoffPolicy {
    pub fn builder() -> BackoffPolicyBuilder {
        BackoffPolicyBuilder::new()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts must be at least 1"));
        }

        if !self.growth_factor.is_finite() || self.growth_factor < 1.0 {
            return Err(ConfigError::invalid("growth_factor must be a finite value >= 1.0"));
        }

        if self.base_delay > self.max_delay {
            return Err(ConfigError::invalid("base_delay must not exceed max_delay"));
        }

        Ok(())
    }

    /// Deterministic delay before jitter
    pub fn computed_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.base_delay.as_secs_f64() * self.growth_factor.powi(exponent);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }

    /// Delay to wait after the given zero-based attempt failed
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.jitter.apply(self.computed_delay(attempt))
    }

    /// The sequence of delays between consecutive attempts
    ///
    /// Yields `max_attempts - 1` steps since no delay follows the last try.
    pub fn schedule(&self) -> impl Iterator<Item = BackoffAttempt> + '_ {
        (0..self.max_attempts.saturating_sub(1))
            .map(move |attempt| BackoffAttempt { attempt, delay: self.delay_for_attempt(attempt) })
    }
}

/// Builder for [`BackoffPolicy`]
#[derive(Debug, Default)]
pub struct BackoffPolicyBuilder {
    policy: BackoffPolicy,
}

impl BackoffPolicyBuilder {
    pub fn new() -> Self {
        Self { policy: BackoffPolicy::default() }
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.policy.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.policy.max_attempts = attempts;
        self
    }

    pub fn growth_factor(mut self, factor: f64) -> Self {
        self.policy.growth_factor = factor;
        self
    }

    pub fn no_jitter(mut self) -> Self {
        self.policy.jitter = Jitter::None;
        self
    }

    pub fn full_jitter(mut self) -> Self {
        self.policy.jitter = Jitter::Full;
        self
    }

    pub fn build(self) -> ConfigResult<BackoffPolicy> {
        self.policy.validate()?;
        Ok(self.policy)
    }
}
