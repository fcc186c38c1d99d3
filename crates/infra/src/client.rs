//! Fleet client wired to the HTTP adapters

use std::sync::Arc;

use livlink_common::resilience::RateLimitGovernor;
use livlink_core::FleetClient;
use livlink_domain::{ClientConfig, Result};

use crate::http::{HttpCredentialExchange, HttpTransport};

/// Build a [`FleetClient`] talking to the configured service over HTTP
///
/// Nothing is sent until the first call; use
/// [`FleetClient::login`] to authenticate eagerly.
///
/// # Errors
/// Returns [`LivError::Config`](livlink_domain::LivError::Config) for an
/// invalid configuration or missing credentials.
pub fn connect(config: &ClientConfig) -> Result<FleetClient> {
    let transport = Arc::new(HttpTransport::from_config(&config.auth)?);
    let governor = RateLimitGovernor::new(config.rate_limit.to_config()?)?;
    let exchange =
        Arc::new(HttpCredentialExchange::from_config(&config.auth)?.with_governor(governor));
    FleetClient::new(config, transport, exchange)
}
