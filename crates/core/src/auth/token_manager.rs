//! Token lifecycle manager
//!
//! Owns the bearer credential for one account:
//! - Exchanges username and password for a token when none is held or the
//!   held one has outlived its lifetime
//! - Serializes every refresh behind one guard so concurrent callers share a
//!   single exchange and its outcome
//! - Re-authenticates when the server rejects a token it still considers
//!   valid locally
//! - Notifies subscribers after each successful refresh

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use livlink_common::resilience::{Clock, RetryOrchestrator, SystemClock};
use livlink_domain::constants::{AUTH_FAILURE_STATUSES, DEFAULT_TOKEN_LIFETIME_SECS};
use livlink_domain::{AuthConfig, Credential, LivError, Result};
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::jwt;
use crate::ports::CredentialExchange;

/// Callback invoked with the new credential after each successful refresh
pub type RefreshListener = Arc<dyn Fn(&Credential) + Send + Sync>;

/// Token manager with serialized refresh
pub struct TokenManager {
    exchange: Arc<dyn CredentialExchange>,
    username: String,
    password: String,
    lifetime: Duration,
    retry: Option<RetryOrchestrator>,
    clock: Arc<dyn Clock>,
    current: RwLock<Option<Credential>>,
    last_error: RwLock<Option<LivError>>,
    /// Completed refresh rounds, successful or not
    rounds: AtomicU64,
    refresh_guard: Mutex<()>,
    listeners: RwLock<Vec<RefreshListener>>,
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("username", &self.username)
            .field("lifetime", &self.lifetime)
            .field("credential", &*self.current.read())
            .field("rounds", &self.rounds.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    /// Create a token manager for one account
    ///
    /// Nothing is exchanged until the first [`ensure_valid`](Self::ensure_valid).
    pub fn new<U, P>(exchange: Arc<dyn CredentialExchange>, username: U, password: P) -> Self
    where
        U: Into<String>,
        P: Into<String>,
    {
        Self {
            exchange,
            username: username.into(),
            password: password.into(),
            lifetime: Duration::from_secs(DEFAULT_TOKEN_LIFETIME_SECS),
            retry: None,
            clock: Arc::new(SystemClock),
            current: RwLock::new(None),
            last_error: RwLock::new(None),
            rounds: AtomicU64::new(0),
            refresh_guard: Mutex::new(()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Build from the `[auth]` section
    ///
    /// # Errors
    /// Returns [`LivError::Config`] when username or password is missing.
    pub fn from_config(config: &AuthConfig, exchange: Arc<dyn CredentialExchange>) -> Result<Self> {
        let (username, password) = config.credentials().ok_or_else(|| {
            LivError::Config("auth.username and auth.password are required".to_string())
        })?;
        Ok(Self::new(exchange, username, password).with_lifetime(config.token_lifetime()))
    }

    /// Lifetime used when the server does not send a ttl hint
    #[must_use]
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Retry transient exchange failures through `retry`
    #[must_use]
    pub fn with_retry(mut self, retry: RetryOrchestrator) -> Self {
        self.retry = Some(retry);
        self
    }

    #[must_use]
    pub fn with_clock<C: Clock>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Register a callback fired once per successful refresh
    pub fn on_refresh<F>(&self, callback: F)
    where
        F: Fn(&Credential) + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(callback));
    }

    /// Current credential without refreshing, expired or not
    pub fn credential(&self) -> Option<Credential> {
        self.current.read().clone()
    }

    pub fn subject_id(&self) -> Option<String> {
        self.current.read().as_ref().map(|credential| credential.subject_id.clone())
    }

    /// True when the next [`ensure_valid`](Self::ensure_valid) will exchange
    pub fn needs_reauthentication(&self) -> bool {
        self.valid_credential().is_none()
    }

    /// Whether `status` means the server rejected the credential
    ///
    /// Independent of local expiry tracking.
    pub fn should_retry_on_auth_failure(&self, status: u16) -> bool {
        AUTH_FAILURE_STATUSES.contains(&status)
    }

    /// Return a usable credential, exchanging only if absent or expired
    ///
    /// # Errors
    /// Returns the exchange error when a needed refresh fails. Concurrent
    /// callers waiting on that refresh receive the same error.
    #[instrument(skip(self))]
    pub async fn ensure_valid(&self) -> Result<Credential> {
        self.acquire(false).await
    }

    /// Exchange credentials regardless of the held token
    ///
    /// A caller that had to wait for another refresh takes that refresh's
    /// outcome instead of exchanging a second time.
    ///
    /// # Errors
    /// Returns the exchange error.
    #[instrument(skip(self))]
    pub async fn force_refresh(&self) -> Result<Credential> {
        self.acquire(true).await
    }

    /// React to a server-side credential rejection
    ///
    /// # Errors
    /// Always [`LivError::Authentication`] when the refresh fails; the caller
    /// must not retry.
    #[instrument(skip(self))]
    pub async fn handle_auth_failure(&self, status: u16) -> Result<Credential> {
        warn!(status, "Server rejected credential, re-authenticating");
        self.force_refresh().await.map_err(|err| match err {
            LivError::Authentication(_) => err,
            other => LivError::Authentication(format!(
                "re-authentication after HTTP {status} failed: {other}"
            )),
        })
    }

    /// Drop the held credential (logout)
    pub fn clear(&self) {
        *self.current.write() = None;
        *self.last_error.write() = None;
        info!("Credential cleared");
    }

    async fn acquire(&self, force: bool) -> Result<Credential> {
        let round = self.rounds.load(Ordering::Acquire);
        if !force {
            if let Some(credential) = self.valid_credential() {
                return Ok(credential);
            }
        }

        let _guard = self.refresh_guard.lock().await;

        if self.rounds.load(Ordering::Acquire) != round {
            if let Some(err) = self.last_error.read().clone() {
                debug!(error = %err, "Sharing failed refresh outcome");
                return Err(err);
            }
            if let Some(credential) = self.valid_credential() {
                debug!("Sharing refreshed credential");
                return Ok(credential);
            }
        }

        self.refresh_locked().await
    }

    /// Exchange and store. Callers must hold `refresh_guard`.
    async fn refresh_locked(&self) -> Result<Credential> {
        let outcome = self.exchange().await;

        match &outcome {
            Ok(credential) => {
                *self.current.write() = Some(credential.clone());
                *self.last_error.write() = None;
                info!(
                    subject_id = %credential.subject_id,
                    ttl_secs = credential.ttl.as_secs(),
                    "Credential refreshed"
                );
            }
            Err(err) => {
                if matches!(err, LivError::Authentication(_)) {
                    *self.current.write() = None;
                }
                *self.last_error.write() = Some(err.clone());
                warn!(error = %err, "Credential refresh failed");
            }
        }
        self.rounds.fetch_add(1, Ordering::AcqRel);

        if let Ok(credential) = &outcome {
            let listeners = self.listeners.read().clone();
            for listener in listeners {
                listener(credential);
            }
        }
        outcome
    }

    async fn exchange(&self) -> Result<Credential> {
        let login = || self.exchange.login(&self.username, &self.password);
        let grant = match &self.retry {
            Some(retry) => retry.execute(login).await?,
            None => login().await?,
        };

        Ok(Credential {
            subject_id: jwt::subject_id(&grant.id_token)?,
            bearer_token: grant.access_token,
            issued_at: self.now(),
            ttl: grant.ttl_hint.unwrap_or(self.lifetime),
        })
    }

    fn valid_credential(&self) -> Option<Credential> {
        let now = self.now();
        self.current.read().as_ref().filter(|credential| !credential.is_expired_at(now)).cloned()
    }

    fn now(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.clock.system_time())
    }
}
