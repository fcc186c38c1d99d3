//! # livlink Domain
//!
//! Data types and models for the livlink device-control client.
//!
//! This crate contains:
//! - Device data (info, params, status, cached state) and device groups
//! - Control commands, their coalescing kinds and wire payloads
//! - The [`LivError`] taxonomy and `Result` alias
//! - Configuration structures and constants
//!
//! ## Architecture
//! - Depends only on `livlink-common` among livlink crates
//! - No I/O and no async code
//! - Pure data and validation

pub mod config;
pub mod constants;
pub mod errors;
pub mod macros;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
