//! HTTP adapters for the remote service
//!
//! - [`HttpClient`]: shared reqwest client, one attempt per call
//! - [`HttpTransport`]: the core's `RemoteTransport` port
//! - [`HttpCredentialExchange`]: the core's `CredentialExchange` port

pub mod client;
pub mod login;
pub mod transport;

pub use client::{HttpClient, HttpClientBuilder};
pub use login::HttpCredentialExchange;
pub use transport::HttpTransport;
