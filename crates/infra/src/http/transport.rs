//! reqwest implementation of the remote transport port
//!
//! Joins the configured base URL with the request path, attaches the bearer
//! token as the raw `Authorization` value, and hands every response back
//! with its status, decoded body and `Retry-After` header. Status handling
//! is left to the core pipeline.

use async_trait::async_trait;
use livlink_core::{Method, RemoteRequest, RemoteResponse, RemoteTransport};
use livlink_domain::{AuthConfig, LivError, Result};
use reqwest::header::{ACCEPT, AUTHORIZATION, RETRY_AFTER};
use reqwest::Response;
use serde_json::{json, Value};
use tracing::instrument;
use url::Url;

use super::client::HttpClient;
use crate::errors::InfraError;

/// HTTP transport bound to one service base URL
#[derive(Clone)]
pub struct HttpTransport {
    client: HttpClient,
    base_url: String,
}

impl HttpTransport {
    /// # Errors
    /// Returns [`LivError::Config`] when `base_url` is not an absolute URL.
    pub fn new(client: HttpClient, base_url: &str) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        Url::parse(&base_url).map_err(InfraError::from)?;
        Ok(Self { client, base_url })
    }

    /// Transport with a client timed out per `config.request_timeout()`
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let client = HttpClient::builder().timeout(config.request_timeout()).build()?;
        Self::new(client, config.normalized_base_url())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn client(&self) -> &HttpClient {
        &self.client
    }

    pub(crate) fn endpoint(&self, path: &str, query: &[(String, String)]) -> Result<Url> {
        let mut url = Url::parse(&format!("{}{path}", self.base_url)).map_err(InfraError::from)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
        Ok(url)
    }
}

#[async_trait]
impl RemoteTransport for HttpTransport {
    #[instrument(skip(self, request, token), fields(method = %request.method, path = %request.path))]
    async fn call(&self, request: &RemoteRequest, token: Option<&str>) -> Result<RemoteResponse> {
        let url = self.endpoint(&request.path, &request.query)?;

        let mut builder =
            self.client.request(http_method(request.method), url).header(ACCEPT, "application/json");
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = self.client.send(builder).await?;
        read_response(response).await
    }
}

fn http_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
    }
}

/// Decode status, `Retry-After` and body
///
/// A success with an undecodable body is a serialization error; an error
/// response with a plain-text body keeps the text as its description.
pub(crate) async fn read_response(response: Response) -> Result<RemoteResponse> {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let text = response.text().await.map_err(InfraError::from)?;
    let body = if text.trim().is_empty() {
        None
    } else {
        match serde_json::from_str::<Value>(&text) {
            Ok(body) => Some(body),
            Err(err) if (200..300).contains(&status) => {
                return Err(LivError::Serialization(format!("invalid JSON in response: {err}")));
            }
            Err(_) => Some(json!({ "description": text.trim() })),
        }
    };

    Ok(RemoteResponse { status, body, retry_after })
}
