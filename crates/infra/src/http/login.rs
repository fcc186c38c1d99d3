//! Username/password login over HTTP

use std::time::Duration;

use async_trait::async_trait;
use livlink_common::resilience::RateLimitGovernor;
use livlink_core::CredentialExchange;
use livlink_domain::constants::LOGIN_PATH;
use livlink_domain::{AuthConfig, LivError, LoginGrant, Result};
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::client::HttpClient;
use super::transport::{read_response, HttpTransport};

#[derive(Serialize)]
struct LoginRequest<'a> {
    user_name: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(default)]
    accesstoken: Option<String>,
    #[serde(default)]
    idtoken: Option<String>,
    /// Seconds until the access token expires, when the service says
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Credential exchange against the `login2` endpoint
#[derive(Clone)]
pub struct HttpCredentialExchange {
    transport: HttpTransport,
    governor: RateLimitGovernor,
}

impl HttpCredentialExchange {
    pub fn new(client: HttpClient, base_url: &str) -> Result<Self> {
        Ok(Self {
            transport: HttpTransport::new(client, base_url)?,
            governor: RateLimitGovernor::default(),
        })
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let client = HttpClient::builder().timeout(config.request_timeout()).build()?;
        Self::new(client, config.normalized_base_url())
    }

    /// Interpret `Retry-After` on throttled logins with `governor`
    pub fn with_governor(mut self, governor: RateLimitGovernor) -> Self {
        self.governor = governor;
        self
    }
}

#[async_trait]
impl CredentialExchange for HttpCredentialExchange {
    #[instrument(skip(self, password))]
    async fn login(&self, username: &str, password: &str) -> Result<LoginGrant> {
        let url = self.transport.endpoint(LOGIN_PATH, &[])?;
        let builder = self
            .transport
            .client()
            .request(reqwest::Method::POST, url)
            .header(ACCEPT, "application/json")
            .json(&LoginRequest { user_name: username, password });

        let response = read_response(self.transport.client().send(builder).await?).await?;

        match response.status {
            200 => {}
            401 => {
                warn!("Login rejected");
                return Err(LivError::Authentication("Invalid credentials".into()));
            }
            429 => {
                let retry_after = if self.governor.config().respect_retry_after {
                    self.governor.parse_hint(response.retry_after.as_deref()).retry_after
                } else {
                    None
                };
                return Err(LivError::RateLimited { retry_after });
            }
            status @ 500..=599 => {
                return Err(LivError::api(status, "login service unavailable"));
            }
            status => {
                return Err(LivError::Authentication(format!(
                    "Authentication failed with status {status}"
                )));
            }
        }

        let body = response
            .body
            .ok_or_else(|| LivError::Authentication("empty authentication response".into()))?;
        let parsed: LoginResponse = serde_json::from_value(body).map_err(|err| {
            LivError::Authentication(format!("invalid authentication response: {err}"))
        })?;

        let access_token = parsed.accesstoken.filter(|token| !token.is_empty()).ok_or_else(|| {
            LivError::Authentication("Missing access token in authentication response".into())
        })?;
        let id_token = parsed.idtoken.filter(|token| !token.is_empty()).ok_or_else(|| {
            LivError::Authentication("Missing id token in authentication response".into())
        })?;

        info!("Login succeeded");
        Ok(LoginGrant {
            access_token,
            id_token,
            ttl_hint: parsed.expires_in.filter(|secs| *secs > 0).map(Duration::from_secs),
        })
    }
}
