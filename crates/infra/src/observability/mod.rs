//! Logging initialisation
//!
//! Installs one global `tracing` subscriber built from [`LoggingConfig`]:
//! an `EnvFilter` (with `RUST_LOG` taking precedence over the configured
//! level) and either the human-readable or the JSON formatter.

use livlink_domain::{LogFormat, LoggingConfig};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const FALLBACK_FILTER: &str = "warn";

/// Install the global subscriber
///
/// Returns `false` when a subscriber was already installed, in which case
/// the existing one stays in place.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = log_filter(std::env::var("RUST_LOG").ok().as_deref(), &config.level);
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Pretty => {
            registry.with(tracing_subscriber::fmt::layer().with_target(true)).try_init()
        }
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init(),
    };

    match installed {
        Ok(()) => {
            tracing::debug!(level = %config.level, format = ?config.format, "Logging initialised");
            true
        }
        Err(_) => false,
    }
}

/// Filter from `RUST_LOG` if set, else the configured level, else `warn`
fn log_filter(env_override: Option<&str>, configured: &str) -> EnvFilter {
    let directive = env_override.filter(|value| !value.trim().is_empty()).unwrap_or(configured);
    EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new(FALLBACK_FILTER))
}
