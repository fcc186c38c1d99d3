//! # LivLink Core
//!
//! Device-control logic - no HTTP or platform code.
//!
//! This crate contains:
//! - The token lifecycle manager and the authenticated request pipeline
//! - The coalescing command queue
//! - The per-device synchronization engine and the fleet client on top
//!
//! ## Architecture Principles
//! - Depends only on `livlink-common` and `livlink-domain`
//! - Remote calls and credential exchange go through the traits in [`ports`]
//! - Infrastructure adapters live in `livlink-infra`

#![forbid(unsafe_code)]

pub mod api;
pub mod auth;
pub mod client;
pub mod ports;
pub mod queue;
pub mod sync;

pub use api::DeviceApi;
pub use auth::{RefreshListener, TokenManager};
pub use client::FleetClient;
pub use ports::{CredentialExchange, Method, RemoteRequest, RemoteResponse, RemoteTransport};
pub use queue::{CommandHandle, CommandOutcome, CommandQueue};
pub use sync::{DeviceListener, DeviceSync};
