//! Authenticated request pipeline and device endpoints
//!
//! Every call runs through the retry orchestrator (breaker, backoff and
//! rate-limit governor) with a credential from the token manager attached.
//! A 401/403 triggers one re-authentication and one re-issue of the call.

use std::sync::Arc;

use chrono::Utc;
use livlink_common::resilience::{CircuitBreaker, RetryOrchestrator};
use livlink_domain::constants::{
    API_VERSION_PREFIX, NODES_PATH, NODE_CONFIG_PATH, NODE_GROUP_PATH, NODE_PARAMS_PATH,
    NODE_STATUS_PATH,
};
use livlink_domain::{
    CreatedGroup, DeviceGroup, DeviceState, GroupList, GroupRequest, GroupUpdate, LivError,
    NodeList, Result,
};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use crate::auth::TokenManager;
use crate::ports::{Method, RemoteRequest, RemoteResponse, RemoteTransport};

/// Device and group endpoints over an injected transport
pub struct DeviceApi {
    transport: Arc<dyn RemoteTransport>,
    tokens: Arc<TokenManager>,
    retry: RetryOrchestrator,
}

impl DeviceApi {
    pub fn new(
        transport: Arc<dyn RemoteTransport>,
        tokens: Arc<TokenManager>,
        retry: RetryOrchestrator,
    ) -> Self {
        Self { transport, tokens, retry }
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// Breaker guarding the device call family, if one is attached
    pub fn breaker(&self) -> Option<&CircuitBreaker> {
        self.retry.breaker()
    }

    /// Send one authenticated request and map its status
    ///
    /// 2xx yields the body (`{}` when empty), 404 yields
    /// [`LivError::NotFound`], anything else yields [`LivError::Api`].
    ///
    /// # Errors
    /// Returns the mapped status error, the last transient failure once
    /// retries are exhausted, or [`LivError::Authentication`] when
    /// re-authentication fails or the fresh credential is rejected too.
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn send(&self, request: &RemoteRequest) -> Result<Value> {
        let mut response = self.dispatch(request).await?;

        if self.tokens.should_retry_on_auth_failure(response.status) {
            self.tokens.handle_auth_failure(response.status).await?;
            response = self.dispatch(request).await?;
            if self.tokens.should_retry_on_auth_failure(response.status) {
                warn!(status = response.status, "Fresh credential rejected");
                return Err(LivError::Authentication(format!(
                    "credential rejected with HTTP {} after re-authentication",
                    response.status
                )));
            }
        }

        into_body(request, response)
    }

    /// Run the call through the orchestrator with one credential
    ///
    /// Login failures surface directly; they are never retried here.
    async fn dispatch(&self, request: &RemoteRequest) -> Result<RemoteResponse> {
        let credential = self.tokens.ensure_valid().await?;
        let token = credential.bearer_token.as_str();
        self.retry
            .execute_classified(
                || self.attempt(request, token),
                |response: &RemoteResponse| response.status,
                |response: &RemoteResponse| response.retry_after.clone(),
            )
            .await
            .map_err(LivError::from)
    }

    async fn attempt(&self, request: &RemoteRequest, token: &str) -> Result<RemoteResponse> {
        let response = self.transport.call(request, Some(token)).await?;

        // Server errors go back through the orchestrator as retryable failures
        if response.status >= 500 {
            return Err(LivError::api(response.status, error_message(&response)));
        }
        Ok(response)
    }

    /// Like [`send`](Self::send), with 404 mapped to `None`
    async fn send_optional(&self, request: RemoteRequest) -> Result<Option<Value>> {
        match self.send(&request).await {
            Ok(body) => Ok(Some(body)),
            Err(LivError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    // Devices
    // ---------------------------------------------------------------------

    /// Node ids of every device on the account
    pub async fn node_ids(&self) -> Result<Vec<String>> {
        let body = self.send(&RemoteRequest::get(versioned(NODES_PATH))).await?;
        Ok(serde_json::from_value::<NodeList>(body)?.nodes)
    }

    /// Node ids of the devices in one group
    pub async fn group_node_ids(&self, group_id: &str) -> Result<Vec<String>> {
        let request = RemoteRequest::get(versioned(NODES_PATH)).with_query("group_id", group_id);
        Ok(serde_json::from_value::<NodeList>(self.send(&request).await?)?.nodes)
    }

    /// Fetch params, status and config concurrently
    ///
    /// Returns `Ok(None)` when the service no longer knows the device.
    #[instrument(skip(self))]
    pub async fn fetch_state(&self, node_id: &str) -> Result<Option<DeviceState>> {
        let (params, status, config) = futures::try_join!(
            self.send_optional(node_request(Method::Get, NODE_PARAMS_PATH, node_id)),
            self.send_optional(node_request(Method::Get, NODE_STATUS_PATH, node_id)),
            self.send_optional(node_request(Method::Get, NODE_CONFIG_PATH, node_id)),
        )?;

        let Some(params) = params else {
            debug!(node_id, "Device absent");
            return Ok(None);
        };

        let empty = json!({});
        let state = DeviceState::from_responses(
            node_id,
            &params,
            status.as_ref().unwrap_or(&empty),
            config.as_ref().unwrap_or(&empty),
            Utc::now(),
        )?;
        Ok(Some(state))
    }

    /// Write a params payload to a device
    ///
    /// Returns the response body, which is usually a bare acknowledgment.
    #[instrument(skip(self, payload))]
    pub async fn put_params(&self, node_id: &str, payload: Value) -> Result<Value> {
        let request = node_request(Method::Put, NODE_PARAMS_PATH, node_id).with_body(payload);
        self.send(&request).await
    }

    // Groups
    // ---------------------------------------------------------------------

    pub async fn list_groups(&self) -> Result<Vec<DeviceGroup>> {
        let body = self.send(&RemoteRequest::get(versioned(NODE_GROUP_PATH))).await?;
        Ok(serde_json::from_value::<GroupList>(body)?.groups)
    }

    pub async fn group(&self, group_id: &str) -> Result<Option<DeviceGroup>> {
        let request = group_request(Method::Get, group_id);
        match self.send_optional(request).await? {
            Some(body) => Ok(serde_json::from_value::<GroupList>(body)?.groups.into_iter().next()),
            None => Ok(None),
        }
    }

    /// Create a group and return its id
    #[instrument(skip(self, request), fields(group_name = %request.group_name))]
    pub async fn create_group(&self, request: &GroupRequest) -> Result<String> {
        let call = RemoteRequest::new(Method::Post, versioned(NODE_GROUP_PATH))
            .with_body(serde_json::to_value(request)?);
        let created: CreatedGroup = serde_json::from_value(self.send(&call).await?)?;
        info!(group_id = %created.group_id, "Group created");
        Ok(created.group_id)
    }

    /// Rename a group and/or replace its membership
    ///
    /// The service needs a name on every update, so a membership-only update
    /// reads the current name first.
    #[instrument(skip(self, update))]
    pub async fn update_group(&self, group_id: &str, update: GroupUpdate) -> Result<()> {
        update.validate()?;

        let name = match update.trimmed_name() {
            Some(name) => name.to_string(),
            None => {
                self.group(group_id)
                    .await?
                    .ok_or_else(|| LivError::NotFound(format!("group {group_id}")))?
                    .group_name
            }
        };
        let body = update.into_request(&name);

        let call = group_request(Method::Put, group_id).with_body(serde_json::to_value(&body)?);
        self.send(&call).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete_group(&self, group_id: &str) -> Result<()> {
        self.send(&group_request(Method::Delete, group_id)).await?;
        Ok(())
    }
}

fn versioned(path: &str) -> String {
    format!("{API_VERSION_PREFIX}{path}")
}

fn node_request(method: Method, path: &str, node_id: &str) -> RemoteRequest {
    RemoteRequest::new(method, versioned(path)).with_query("nodeid", node_id)
}

fn group_request(method: Method, group_id: &str) -> RemoteRequest {
    RemoteRequest::new(method, versioned(NODE_GROUP_PATH)).with_query("group_id", group_id)
}

fn into_body(request: &RemoteRequest, response: RemoteResponse) -> Result<Value> {
    match response.status {
        200..=299 => Ok(response.body.unwrap_or_else(|| json!({}))),
        404 => Err(LivError::NotFound(format!("{} {}", request.method, request.path))),
        status => Err(LivError::api(status, error_message(&response))),
    }
}

fn error_message(response: &RemoteResponse) -> String {
    response
        .body
        .as_ref()
        .and_then(|body| {
            ["description", "message", "error"]
                .iter()
                .find_map(|key| body.get(*key).and_then(Value::as_str))
        })
        .map_or_else(|| format!("HTTP {}", response.status), str::to_string)
}

#[cfg(test)]
mod tests {
    use livlink_common::ErrorClassification;

    use super::*;

    #[test]
    fn test_success_without_body_is_empty_object() {
        let request = RemoteRequest::get("/v1/user/nodes");
        let body = into_body(&request, RemoteResponse::new(204, None)).unwrap();
        assert_eq!(body, json!({}));
    }

    /// Validates status mapping.
    ///
    /// Assertions:
    /// - Confirms 404 maps to `NotFound` naming the call.
    /// - Confirms other 4xx map to non-retryable `Api` errors carrying the
    ///   service's description.
    #[test]
    fn test_status_mapping() {
        let request = RemoteRequest::new(Method::Put, "/v1/user/nodes/params");

        match into_body(&request, RemoteResponse::new(404, None)) {
            Err(LivError::NotFound(what)) => assert_eq!(what, "PUT /v1/user/nodes/params"),
            other => panic!("unexpected: {other:?}"),
        }

        let rejected = RemoteResponse::new(400, Some(json!({"description": "bad hue"})));
        let err = into_body(&request, rejected).unwrap_err();
        assert_eq!(err, LivError::api(400, "bad hue"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_request_builders() {
        let request = node_request(Method::Get, NODE_STATUS_PATH, "node-1");
        assert_eq!(request.path, "/v1/user/nodes/status");
        assert_eq!(request.query, vec![("nodeid".to_string(), "node-1".to_string())]);
        assert_eq!(group_request(Method::Delete, "g1").path, "/v1/user/node_group");
    }
}
