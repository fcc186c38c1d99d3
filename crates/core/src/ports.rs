//! Port interfaces for the remote service
//!
//! The core never talks HTTP itself. Adapters in `livlink-infra` implement
//! these traits; tests implement them with in-memory fakes.

use std::fmt;

use async_trait::async_trait;
use livlink_domain::{LoginGrant, Result};
use serde_json::Value;

/// HTTP verb of a remote call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A remote call before authentication is attached
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRequest {
    pub method: Method,
    /// Path below the base URL, including the version prefix
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RemoteRequest {
    pub fn new<P: Into<String>>(method: Method, path: P) -> Self {
        Self { method, path: path.into(), query: Vec::new(), body: None }
    }

    pub fn get<P: Into<String>>(path: P) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn with_query<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// What came back from the remote service
///
/// Only the status, the decoded body and the raw `Retry-After` value are
/// inspected by the core.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResponse {
    pub status: u16,
    pub body: Option<Value>,
    pub retry_after: Option<String>,
}

impl RemoteResponse {
    pub fn new(status: u16, body: Option<Value>) -> Self {
        Self { status, body, retry_after: None }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Abstract transport for remote calls
///
/// Implementations return `Ok` for every response that made it back,
/// whatever its status. Transport failures map to
/// [`LivError::Connection`](livlink_domain::LivError::Connection) or
/// [`LivError::Timeout`](livlink_domain::LivError::Timeout) so the retry
/// orchestrator treats them as transient.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Perform one call, attaching `token` as the `Authorization` value
    async fn call(&self, request: &RemoteRequest, token: Option<&str>) -> Result<RemoteResponse>;
}

/// Username/password exchange for a bearer token
#[async_trait]
pub trait CredentialExchange: Send + Sync {
    /// Exchange credentials for tokens
    ///
    /// Rejected credentials are an
    /// [`LivError::Authentication`](livlink_domain::LivError::Authentication)
    /// and are never retried.
    async fn login(&self, username: &str, password: &str) -> Result<LoginGrant>;
}
