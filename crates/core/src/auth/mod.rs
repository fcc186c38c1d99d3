//! Credential lifecycle
//!
//! [`TokenManager`] owns the bearer token; [`jwt`] reads the subject out of
//! the id token returned by the login exchange.

pub mod jwt;
pub mod token_manager;

pub use token_manager::{RefreshListener, TokenManager};
