//! # LivLink Infrastructure
//!
//! Infrastructure implementations of core ports.
//!
//! This crate contains:
//! - The reqwest transport and the HTTP login exchange
//! - Configuration loading from the environment and TOML/JSON files
//! - Logging initialisation
//!
//! ## Architecture
//! - Implements traits defined in `livlink-core`
//! - Contains all "impure" code (network, filesystem, global subscriber)

pub mod client;
pub mod config;
pub mod errors;
pub mod http;
pub mod observability;

// Re-export commonly used items
pub use client::connect;
pub use errors::InfraError;
pub use http::{HttpClient, HttpClientBuilder, HttpCredentialExchange, HttpTransport};
pub use observability::init_logging;
