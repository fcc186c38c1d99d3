//! Client configuration
//!
//! Every section has serde defaults so a partial TOML or JSON file (or no
//! file at all) yields a complete configuration. Durations are written as
//! seconds; the `to_*` helpers turn each section into the typed config
//! of the matching resilience primitive.

use std::fmt;
use std::time::Duration;

use livlink_common::resilience::{BackoffPolicy, CircuitBreakerConfig, Jitter, RateLimitConfig};
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_AUTO_REFRESH_INTERVAL_SECS, DEFAULT_BASE_URL, DEFAULT_COMMAND_TIMEOUT_SECS,
    DEFAULT_MAX_QUEUE_SIZE, DEFAULT_MIN_DISPATCH_INTERVAL_SECS, DEFAULT_REQUEST_TIMEOUT_SECS,
    DEFAULT_TOKEN_LIFETIME_SECS,
};
use crate::errors::{LivError, Result};

/// Top-level client configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub auth: AuthConfig,
    pub breaker: BreakerSettings,
    pub backoff: BackoffSettings,
    pub rate_limit: RateLimitSettings,
    pub queue: QueueSettings,
    pub sync: SyncSettings,
    pub logging: LoggingConfig,
}

impl ClientConfig {
    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.auth.validate()?;
        self.breaker.to_config()?;
        self.backoff.to_policy()?;
        self.rate_limit.to_config()?;
        self.queue.validate()?;
        self.sync.validate()?;
        self.logging.validate()
    }
}

/// Remote endpoint and credential settings
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub base_url: String,
    pub username: Option<String>,
    /// Never written back out
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub request_timeout_secs: f64,
    pub token_lifetime_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            username: None,
            password: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            token_lifetime_secs: DEFAULT_TOKEN_LIFETIME_SECS,
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("token_lifetime_secs", &self.token_lifetime_secs)
            .finish()
    }
}

impl AuthConfig {
    pub fn validate(&self) -> Result<()> {
        let url = self.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(LivError::Config(format!(
                "auth.base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        positive_secs("auth.request_timeout_secs", self.request_timeout_secs)?;
        if self.token_lifetime_secs == 0 {
            return Err(LivError::Config("auth.token_lifetime_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        secs_or(self.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS)
    }

    pub fn token_lifetime(&self) -> Duration {
        Duration::from_secs(self.token_lifetime_secs)
    }

    /// Base URL without a trailing slash
    pub fn normalized_base_url(&self) -> &str {
        self.base_url.trim().trim_end_matches('/')
    }

    /// Username and password, when both are configured
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(password)) if !user.is_empty() => Some((user, password)),
            _ => None,
        }
    }
}

/// Circuit breaker tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u64,
    pub success_threshold: u64,
    pub recovery_timeout_secs: f64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            failure_threshold: defaults.failure_threshold,
            success_threshold: defaults.success_threshold,
            recovery_timeout_secs: defaults.recovery_timeout.as_secs_f64(),
        }
    }
}

impl BreakerSettings {
    pub fn to_config(&self) -> Result<CircuitBreakerConfig> {
        let recovery_timeout =
            checked_secs("breaker.recovery_timeout_secs", self.recovery_timeout_secs)?;
        Ok(CircuitBreakerConfig::builder()
            .failure_threshold(self.failure_threshold)
            .success_threshold(self.success_threshold)
            .recovery_timeout(recovery_timeout)
            .build()?)
    }
}

/// Backoff tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffSettings {
    pub base_delay_secs: f64,
    pub max_delay_secs: f64,
    /// Total attempts per call, the first one included
    pub max_retries: u32,
    pub growth_factor: f64,
    pub jitter: bool,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        let defaults = BackoffPolicy::default();
        Self {
            base_delay_secs: defaults.base_delay.as_secs_f64(),
            max_delay_secs: defaults.max_delay.as_secs_f64(),
            max_retries: defaults.max_attempts,
            growth_factor: defaults.growth_factor,
            jitter: defaults.jitter == Jitter::Full,
        }
    }
}

impl BackoffSettings {
    pub fn to_policy(&self) -> Result<BackoffPolicy> {
        let builder = BackoffPolicy::builder()
            .base_delay(checked_secs("backoff.base_delay_secs", self.base_delay_secs)?)
            .max_delay(checked_secs("backoff.max_delay_secs", self.max_delay_secs)?)
            .max_attempts(self.max_retries)
            .growth_factor(self.growth_factor);
        let builder = if self.jitter { builder.full_jitter() } else { builder.no_jitter() };
        Ok(builder.build()?)
    }
}

/// Rate-limit governor tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub default_delay_secs: f64,
    pub max_delay_secs: f64,
    pub respect_retry_after: bool,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        let defaults = RateLimitConfig::default();
        Self {
            default_delay_secs: defaults.default_delay.as_secs_f64(),
            max_delay_secs: defaults.max_delay.as_secs_f64(),
            respect_retry_after: defaults.respect_retry_after,
        }
    }
}

impl RateLimitSettings {
    pub fn to_config(&self) -> Result<RateLimitConfig> {
        let config = RateLimitConfig {
            default_delay: checked_secs("rate_limit.default_delay_secs", self.default_delay_secs)?,
            max_delay: checked_secs("rate_limit.max_delay_secs", self.max_delay_secs)?,
            respect_retry_after: self.respect_retry_after,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Command queue tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Minimum spacing between two dispatches, across the whole queue
    pub min_interval_secs: f64,
    pub max_queue_size: usize,
    pub command_timeout_secs: f64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            min_interval_secs: DEFAULT_MIN_DISPATCH_INTERVAL_SECS,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
        }
    }
}

impl QueueSettings {
    pub fn validate(&self) -> Result<()> {
        checked_secs("queue.min_interval_secs", self.min_interval_secs)?;
        positive_secs("queue.command_timeout_secs", self.command_timeout_secs)?;
        if self.max_queue_size == 0 {
            return Err(LivError::Config("queue.max_queue_size must be at least 1".into()));
        }
        Ok(())
    }

    /// Zero disables spacing
    pub fn min_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.min_interval_secs)
            .unwrap_or_else(|_| Duration::from_secs_f64(DEFAULT_MIN_DISPATCH_INTERVAL_SECS))
    }

    pub fn command_timeout(&self) -> Duration {
        secs_or(self.command_timeout_secs, DEFAULT_COMMAND_TIMEOUT_SECS)
    }
}

/// Synchronization engine tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Used when auto refresh is started without an explicit interval
    pub auto_refresh_interval_secs: f64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self { auto_refresh_interval_secs: DEFAULT_AUTO_REFRESH_INTERVAL_SECS }
    }
}

impl SyncSettings {
    pub fn validate(&self) -> Result<()> {
        positive_secs("sync.auto_refresh_interval_secs", self.auto_refresh_interval_secs)
    }

    pub fn auto_refresh_interval(&self) -> Duration {
        secs_or(self.auto_refresh_interval_secs, DEFAULT_AUTO_REFRESH_INTERVAL_SECS)
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging settings consumed by the subscriber initialisation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// An `EnvFilter` directive such as `info` or `livlink_core=debug`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Pretty }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.level.trim().is_empty() {
            return Err(LivError::Config("logging.level must not be empty".into()));
        }
        Ok(())
    }
}

fn checked_secs(field: &str, secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(LivError::Config(format!("{field} must be a non-negative number, got {secs}")));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|err| LivError::Config(format!("{field} is out of range: {err}")))
}

fn positive_secs(field: &str, secs: f64) -> Result<()> {
    if checked_secs(field, secs)?.is_zero() {
        return Err(LivError::Config(format!("{field} must be positive")));
    }
    Ok(())
}

fn secs_or(secs: f64, fallback: f64) -> Duration {
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|duration| !duration.is_zero())
        .unwrap_or_else(|| Duration::from_secs_f64(fallback))
}
