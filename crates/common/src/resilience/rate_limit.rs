//! Decoding of server "slow down" responses
//!
//! The governor turns a `429 Too Many Requests` status and its optional
//! `Retry-After` header into a concrete delay. Hints are accepted either as
//! delta-seconds (`"120"`, `"2.5"`) or as an HTTP date
//! (`"Wed, 21 Oct 2015 07:28:00 GMT"`).

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use tracing::debug;

use super::circuit_breaker::{ConfigError, ConfigResult};
use super::clock::{Clock, SystemClock};

/// HTTP status for "too many requests"
pub const TOO_MANY_REQUESTS: u16 = 429;

/// Server-provided retry hint, valid for a single retry decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateLimitHint {
    pub retry_after: Option<Duration>,
}

impl RateLimitHint {
    pub fn absent() -> Self {
        Self { retry_after: None }
    }

    pub fn is_present(&self) -> bool {
        self.retry_after.is_some()
    }
}

/// Rate limiter configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Used when the server gives no usable hint
    pub default_delay: Duration,
    /// Upper bound applied to server hints
    pub max_delay: Duration,
    pub respect_retry_after: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(300),
            respect_retry_after: true,
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.default_delay > self.max_delay {
            return Err(ConfigError::invalid("default_delay must not exceed max_delay"));
        }
        Ok(())
    }
}

/// Translates 429 responses into retry delays
pub struct RateLimitGovernor<C: Clock = SystemClock> {
    config: RateLimitConfig,
    clock: Arc<C>,
}

impl<C: Clock> Clone for RateLimitGovernor<C> {
    fn clone(&self) -> Self {
        Self { config: self.config.clone(), clock: Arc::clone(&self.clock) }
    }
}

impl<C: Clock> fmt::Debug for RateLimitGovernor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitGovernor").field("config", &self.config).finish()
    }
}

impl RateLimitGovernor<SystemClock> {
    pub fn new(config: RateLimitConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl Default for RateLimitGovernor<SystemClock> {
    fn default() -> Self {
        Self { config: RateLimitConfig::default(), clock: Arc::new(SystemClock) }
    }
}

impl<C: Clock> RateLimitGovernor<C> {
    pub fn with_clock(config: RateLimitConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self { config, clock: Arc::new(clock) })
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn is_rate_limited(&self, status: u16) -> bool {
        status == TOO_MANY_REQUESTS
    }

    /// Delay to honour before retrying a response with `status`
    ///
    /// Zero when the status is not a rate-limit response. Otherwise the
    /// capped server hint, or the default delay when hints are ignored or
    /// unusable.
    pub fn retry_delay(&self, status: u16, retry_after: Option<&str>) -> Duration {
        if !self.is_rate_limited(status) {
            return Duration::ZERO;
        }

        if !self.config.respect_retry_after {
            return self.config.default_delay;
        }

        match self.parse_hint(retry_after).retry_after {
            Some(delay) => delay,
            None => {
                debug!(
                    header = retry_after.unwrap_or("<absent>"),
                    default_ms = self.config.default_delay.as_millis() as u64,
                    "Unusable Retry-After hint, using default delay"
                );
                self.config.default_delay
            }
        }
    }

    /// Decode a raw `Retry-After` value, capped at `max_delay`
    pub fn parse_hint(&self, raw: Option<&str>) -> RateLimitHint {
        let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
            return RateLimitHint::absent();
        };

        let delay = parse_delta_seconds(raw).or_else(|| self.parse_http_date(raw));
        RateLimitHint { retry_after: delay.map(|delay| delay.min(self.config.max_delay)) }
    }

    fn parse_http_date(&self, raw: &str) -> Option<Duration> {
        let target = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
        let now: DateTime<Utc> = DateTime::<Utc>::from(self.clock.system_time());
        // A date in the past means "retry now".
        Some((target - now).to_std().unwrap_or(Duration::ZERO))
    }
}

fn parse_delta_seconds(raw: &str) -> Option<Duration> {
    let seconds: f64 = raw.parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(seconds).ok()
}

/// Convert a wall-clock instant into an HTTP date (used by tests and fakes)
pub fn format_http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use super::*;
    use crate::resilience::clock::MockClock;

    fn governor() -> RateLimitGovernor {
        RateLimitGovernor::default()
    }

    /// Validates integer hints.
    ///
    /// Assertions:
    /// - Confirms "60" yields 60 seconds.
    /// - Confirms hints above `max_delay` are capped.
    #[test]
    fn test_numeric_hint_is_used_and_capped() {
        let limiter = governor();
        assert_eq!(limiter.retry_delay(429, Some("60")), Duration::from_secs(60));
        assert_eq!(limiter.retry_delay(429, Some("9000")), Duration::from_secs(300));
        assert_eq!(limiter.retry_delay(429, Some(" 2.5 ")), Duration::from_millis(2_500));
    }

    #[test]
    fn test_non_rate_limited_status_has_no_delay() {
        let limiter = governor();
        assert!(!limiter.is_rate_limited(503));
        assert_eq!(limiter.retry_delay(503, Some("60")), Duration::ZERO);
        assert_eq!(limiter.retry_delay(200, None), Duration::ZERO);
    }

    /// Validates the fallback to the default delay.
    #[test]
    fn test_unusable_hint_falls_back_to_default() {
        let limiter = governor();
        assert_eq!(limiter.retry_delay(429, None), Duration::from_secs(60));
        assert_eq!(limiter.retry_delay(429, Some("soon")), Duration::from_secs(60));
        assert_eq!(limiter.retry_delay(429, Some("-5")), Duration::from_secs(60));
        assert_eq!(limiter.retry_delay(429, Some("")), Duration::from_secs(60));
    }

    #[test]
    fn test_hints_ignored_when_disabled() {
        let limiter = RateLimitGovernor::new(RateLimitConfig {
            respect_retry_after: false,
            default_delay: Duration::from_secs(15),
            ..RateLimitConfig::default()
        })
        .unwrap();
        assert_eq!(limiter.retry_delay(429, Some("1")), Duration::from_secs(15));
    }

    /// Validates HTTP-date hints.
    ///
    /// Assertions:
    /// - Confirms a date 90s ahead of the clock yields 90s.
    /// - Confirms a date in the past yields zero.
    /// - Confirms far-future dates are capped.
    #[test]
    fn test_http_date_hint() {
        let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let clock = MockClock::with_wall_time(now);
        let limiter = RateLimitGovernor::with_clock(RateLimitConfig::default(), clock).unwrap();

        let ahead = format_http_date(now + Duration::from_secs(90));
        assert_eq!(limiter.retry_delay(429, Some(&ahead)), Duration::from_secs(90));

        let past = format_http_date(now - Duration::from_secs(30));
        assert_eq!(limiter.retry_delay(429, Some(&past)), Duration::ZERO);

        let far = format_http_date(now + Duration::from_secs(86_400));
        assert_eq!(limiter.retry_delay(429, Some(&far)), Duration::from_secs(300));
    }

    #[test]
    fn test_config_validation() {
        let config = RateLimitConfig {
            default_delay: Duration::from_secs(600),
            ..RateLimitConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
