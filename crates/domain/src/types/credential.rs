//! Credential held by the token lifecycle manager

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Tokens returned by a successful credential exchange
#[derive(Clone, PartialEq, Eq)]
pub struct LoginGrant {
    pub access_token: String,
    pub id_token: String,
    /// Lifetime suggested by the server, if it sent one
    pub ttl_hint: Option<Duration>,
}

impl fmt::Debug for LoginGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginGrant")
            .field("access_token", &"[REDACTED]")
            .field("id_token", &"[REDACTED]")
            .field("ttl_hint", &self.ttl_hint)
            .finish()
    }
}

/// A time-boxed bearer token and the subject it belongs to
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub subject_id: String,
    pub bearer_token: String,
    pub issued_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl Credential {
    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        self.issued_at.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whether the credential has reached the end of its lifetime at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.issued_at).to_std().unwrap_or(Duration::ZERO)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("subject_id", &self.subject_id)
            .field("bearer_token", &"[REDACTED]")
            .field("issued_at", &self.issued_at)
            .field("ttl", &self.ttl)
            .finish()
    }
}
