//! Configuration loader
//!
//! Loads [`ClientConfig`] from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If the credentials are not in the environment, falls back to a file
//! 3. Probes the working directory for config files
//! 4. Supports JSON and TOML formats
//!
//! ## Environment Variables
//! - `LIVLINK_USERNAME`: Account username (required)
//! - `LIVLINK_PASSWORD`: Account password (required)
//! - `LIVLINK_BASE_URL`: Service base URL
//! - `LIVLINK_REQUEST_TIMEOUT`: Per-request timeout in seconds
//! - `LIVLINK_AUTO_REFRESH_INTERVAL`: Default auto refresh interval in seconds
//! - `LIVLINK_TOKEN_LIFETIME`: Credential lifetime in seconds
//! - `LIVLINK_LOG_LEVEL`: Log filter directive
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./livlink.toml`
//! 2. `./livlink.json`
//! 3. `./config.toml`
//! 4. `./config.json`

use std::path::{Path, PathBuf};
use std::str::FromStr;

use livlink_domain::{ClientConfig, LivError, Result};

const CANDIDATE_FILES: [&str; 4] = ["livlink.toml", "livlink.json", "config.toml", "config.json"];

/// Load configuration with automatic fallback strategy
///
/// First attempts to load from environment variables. If the credentials
/// are missing there, falls back to loading from a config file.
///
/// # Errors
/// Returns `LivError::Config` if:
/// - Configuration cannot be loaded from either source
/// - File format is invalid
/// - A value fails validation
pub fn load() -> Result<ClientConfig> {
    match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = %e, "Failed to load from environment, trying file");
            load_from_file(None)
        }
    }
}

/// Load configuration from environment variables
///
/// `LIVLINK_USERNAME` and `LIVLINK_PASSWORD` are required; every other
/// variable falls back to its default.
///
/// # Errors
/// Returns `LivError::Config` if required variables are missing or have
/// invalid values.
pub fn load_from_env() -> Result<ClientConfig> {
    from_lookup(|key| std::env::var(key).ok())
}

/// Build a configuration from an arbitrary variable source
pub(crate) fn from_lookup<F>(lookup: F) -> Result<ClientConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let required = |key: &str| {
        lookup(key)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| LivError::Config(format!("Missing required environment variable: {key}")))
    };

    let mut config = ClientConfig::default();
    config.auth.username = Some(required("LIVLINK_USERNAME")?);
    config.auth.password = Some(required("LIVLINK_PASSWORD")?);

    if let Some(base_url) = lookup("LIVLINK_BASE_URL") {
        config.auth.base_url = base_url;
    }
    if let Some(timeout) = parsed(&lookup, "LIVLINK_REQUEST_TIMEOUT")? {
        config.auth.request_timeout_secs = timeout;
    }
    if let Some(lifetime) = parsed(&lookup, "LIVLINK_TOKEN_LIFETIME")? {
        config.auth.token_lifetime_secs = lifetime;
    }
    if let Some(interval) = parsed(&lookup, "LIVLINK_AUTO_REFRESH_INTERVAL")? {
        config.sync.auto_refresh_interval_secs = interval;
    }
    if let Some(level) = lookup("LIVLINK_LOG_LEVEL") {
        config.logging.level = level;
    }

    config.validate()?;
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes the standard locations for config files.
/// Format is detected by file extension.
///
/// # Errors
/// Returns `LivError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid or a value fails validation
pub fn load_from_file(path: Option<PathBuf>) -> Result<ClientConfig> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(LivError::Config(format!("Config file not found: {}", p.display())));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            LivError::Config("No config file found in any of the standard locations".to_string())
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| LivError::Config(format!("Failed to read config file: {e}")))?;

    let config = parse_config(&contents, &config_path)?;
    config.validate()?;
    Ok(config)
}

/// Parse configuration from string content, by file extension
fn parse_config(contents: &str, path: &Path) -> Result<ClientConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| LivError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| LivError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(LivError::Config(format!("Unsupported config format: '{extension}'"))),
    }
}

/// First config file present in the working directory
pub fn probe_config_paths() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    probe_in(&cwd)
}

/// First config file present in `dir`
pub fn probe_in(dir: &Path) -> Option<PathBuf> {
    CANDIDATE_FILES.iter().map(|name| dir.join(name)).find(|path| path.is_file())
}

fn parsed<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| LivError::Config(format!("Invalid value for {key}: {e}")))
        })
        .transpose()
}
