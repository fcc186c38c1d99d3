//! Shared test helpers for `livlink-core` integration tests.
//!
//! [`FakeHub`] is an in-memory stand-in for the remote service: it routes
//! device, status, config and group calls against a small mutable model,
//! records every call, and can be scripted to answer the next calls with
//! arbitrary statuses. [`FakeExchange`] hands out numbered tokens.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use livlink_common::resilience::{
    BackoffPolicy, CircuitBreaker, RateLimitConfig, RateLimitGovernor, RetryOrchestrator,
};
use livlink_core::{
    CommandQueue, CredentialExchange, DeviceApi, Method, RemoteRequest, RemoteResponse,
    RemoteTransport, TokenManager,
};
use livlink_domain::{LivError, LoginGrant, Result};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

/// One call as the hub saw it
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub token: Option<String>,
}

impl RecordedCall {
    fn query_value(&self, key: &str) -> Option<&str> {
        self.query.iter().find(|(name, _)| name == key).map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone)]
struct FakeGroup {
    name: String,
    members: Vec<String>,
}

/// In-memory remote service
#[derive(Default)]
pub struct FakeHub {
    devices: Mutex<BTreeMap<String, Map<String, Value>>>,
    groups: Mutex<BTreeMap<String, FakeGroup>>,
    scripted: Mutex<VecDeque<Result<RemoteResponse>>>,
    calls: Mutex<Vec<RecordedCall>>,
    put_failure: Mutex<Option<u16>>,
    latency: Mutex<Option<Duration>>,
    active: AtomicUsize,
    peak_active: AtomicUsize,
    next_group: AtomicU32,
}

impl FakeHub {
    /// A hub hosting the given powered-on devices
    pub fn with_devices(node_ids: &[&str]) -> Arc<Self> {
        let hub = Self::default();
        for node_id in node_ids {
            hub.add_device(node_id);
        }
        Arc::new(hub)
    }

    pub fn add_device(&self, node_id: &str) {
        let params = json!({
            "Name": format!("Hub {node_id}"),
            "Enable Repellers": true,
            "Power": true,
            "LED Brightness": 80,
            "LED Hue": 120,
            "Refill Life": 75.0,
            "System Status": 3,
            "Error": 0
        });
        if let Value::Object(params) = params {
            self.devices.lock().insert(node_id.to_string(), params);
        }
    }

    pub fn remove_device(&self, node_id: &str) {
        self.devices.lock().remove(node_id);
    }

    /// Change a reported value behind the client's back
    pub fn set_param(&self, node_id: &str, key: &str, value: Value) {
        if let Some(params) = self.devices.lock().get_mut(node_id) {
            params.insert(key.to_string(), value);
        }
    }

    pub fn param(&self, node_id: &str, key: &str) -> Option<Value> {
        self.devices.lock().get(node_id).and_then(|params| params.get(key).cloned())
    }

    /// Answer the next call with `status` regardless of its route
    pub fn push_status(&self, status: u16) {
        self.push_response(RemoteResponse::new(status, Some(json!({"description": "scripted"}))));
    }

    pub fn push_response(&self, response: RemoteResponse) {
        self.scripted.lock().push_back(Ok(response));
    }

    /// Fail the next call at the transport level
    pub fn push_error(&self, error: LivError) {
        self.scripted.lock().push_back(Err(error));
    }

    /// Reject every params write with `status`
    pub fn fail_puts(&self, status: Option<u16>) {
        *self.put_failure.lock() = status;
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Most calls ever in progress at the same time
    pub fn peak_concurrency(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Calls matching a method and path
    pub fn calls_to(&self, method: Method, path: &str) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.method == method && call.path == path)
            .cloned()
            .collect()
    }

    fn route(&self, call: &RecordedCall) -> RemoteResponse {
        let node_id = call.query_value("nodeid").unwrap_or_default();
        let group_id = call.query_value("group_id").map(str::to_string);

        match (call.method, call.path.as_str()) {
            (Method::Get, "/v1/user/nodes") => {
                let nodes: Vec<String> = match group_id {
                    Some(group_id) => match self.groups.lock().get(&group_id) {
                        Some(group) => group.members.clone(),
                        None => return not_found(),
                    },
                    None => self.devices.lock().keys().cloned().collect(),
                };
                ok(json!({ "nodes": nodes, "total": nodes.len() }))
            }
            (Method::Get, "/v1/user/nodes/params") => match self.devices.lock().get(node_id) {
                Some(params) => ok(json!({ "LIV Hub": params })),
                None => not_found(),
            },
            (Method::Get, "/v1/user/nodes/status") => {
                if self.devices.lock().contains_key(node_id) {
                    ok(json!({"connectivity": {"connected": true, "timestamp": 1_700_000_000}}))
                } else {
                    not_found()
                }
            }
            (Method::Get, "/v1/user/nodes/config") => {
                if self.devices.lock().contains_key(node_id) {
                    ok(json!({
                        "info": {"name": "LIV Hub", "type": "thermacell-hub", "fw_version": "5.3.2"},
                        "devices": [{"serial_num": format!("SN-{node_id}")}]
                    }))
                } else {
                    not_found()
                }
            }
            (Method::Put, "/v1/user/nodes/params") => self.write_params(node_id, call.body.as_ref()),
            (Method::Get, "/v1/user/node_group") => self.read_groups(group_id.as_deref()),
            (Method::Post, "/v1/user/node_group") => {
                let group_id = format!("group-{}", self.next_group.fetch_add(1, Ordering::SeqCst) + 1);
                self.groups.lock().insert(group_id.clone(), group_from(call.body.as_ref(), None));
                ok(json!({ "group_id": group_id }))
            }
            (Method::Put, "/v1/user/node_group") => {
                let mut groups = self.groups.lock();
                match group_id.and_then(|group_id| groups.get_mut(&group_id)) {
                    Some(group) => {
                        let updated = group_from(call.body.as_ref(), Some(&*group));
                        *group = updated;
                        ok(json!({"status": "success"}))
                    }
                    None => not_found(),
                }
            }
            (Method::Delete, "/v1/user/node_group") => {
                match group_id.and_then(|group_id| self.groups.lock().remove(&group_id)) {
                    Some(_) => ok(json!({"status": "success"})),
                    None => not_found(),
                }
            }
            _ => not_found(),
        }
    }

    fn write_params(&self, node_id: &str, body: Option<&Value>) -> RemoteResponse {
        if let Some(status) = *self.put_failure.lock() {
            return RemoteResponse::new(status, Some(json!({"description": "write rejected"})));
        }
        let mut devices = self.devices.lock();
        let Some(params) = devices.get_mut(node_id) else {
            return not_found();
        };
        if let Some(Value::Object(update)) = body.and_then(|body| body.get("LIV Hub")) {
            for (key, value) in update {
                params.insert(key.clone(), value.clone());
            }
        }
        ok(json!({"status": "success"}))
    }

    fn read_groups(&self, group_id: Option<&str>) -> RemoteResponse {
        let groups = self.groups.lock();
        let render = |(group_id, group): (&String, &FakeGroup)| {
            json!({
                "group_id": group_id,
                "group_name": group.name,
                "total": group.members.len()
            })
        };
        match group_id {
            Some(group_id) => match groups.get_key_value(group_id) {
                Some(entry) => ok(json!({ "groups": [render(entry)], "total": 1 })),
                None => not_found(),
            },
            None => {
                let listed: Vec<Value> = groups.iter().map(render).collect();
                ok(json!({ "total": listed.len(), "groups": listed }))
            }
        }
    }
}

#[async_trait]
impl RemoteTransport for FakeHub {
    async fn call(&self, request: &RemoteRequest, token: Option<&str>) -> Result<RemoteResponse> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(active, Ordering::SeqCst);
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let call = RecordedCall {
            method: request.method,
            path: request.path.clone(),
            query: request.query.clone(),
            body: request.body.clone(),
            token: token.map(str::to_string),
        };
        self.calls.lock().push(call.clone());

        let scripted = self.scripted.lock().pop_front();
        match scripted {
            Some(outcome) => outcome,
            None => Ok(self.route(&call)),
        }
    }
}

fn ok(body: Value) -> RemoteResponse {
    RemoteResponse::new(200, Some(body))
}

fn not_found() -> RemoteResponse {
    RemoteResponse::new(404, Some(json!({"description": "not found"})))
}

fn group_from(body: Option<&Value>, current: Option<&FakeGroup>) -> FakeGroup {
    let name = body
        .and_then(|body| body.get("group_name"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| current.map(|group| group.name.clone()))
        .unwrap_or_default();
    let members = body
        .and_then(|body| body.get("node_list"))
        .and_then(|list| serde_json::from_value::<Vec<String>>(list.clone()).ok())
        .or_else(|| current.map(|group| group.members.clone()))
        .unwrap_or_default();
    FakeGroup { name, members }
}

/// Credential exchange handing out `token-1`, `token-2`, ...
#[derive(Default)]
pub struct FakeExchange {
    logins: AtomicU32,
    reject: AtomicBool,
    unreachable: AtomicBool,
}

impl FakeExchange {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn logins(&self) -> u32 {
        self.logins.load(Ordering::SeqCst)
    }

    /// Answer every login with "Invalid credentials"
    pub fn reject_credentials(&self) {
        self.reject.store(true, Ordering::SeqCst);
    }

    /// Fail every login as if the service could not be reached
    pub fn go_unreachable(&self) {
        self.unreachable.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CredentialExchange for FakeExchange {
    async fn login(&self, _username: &str, _password: &str) -> Result<LoginGrant> {
        let round = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(LivError::Connection("login service unreachable".into()));
        }
        if self.reject.load(Ordering::SeqCst) {
            return Err(LivError::Authentication("Invalid credentials".into()));
        }
        Ok(LoginGrant {
            access_token: format!("token-{round}"),
            id_token: id_token("user-42"),
            ttl_hint: None,
        })
    }
}

/// Unsigned id token carrying `subject` as the user id claim
pub fn id_token(subject: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
    let claims = URL_SAFE_NO_PAD.encode(json!({ "custom:user_id": subject }).to_string());
    format!("{header}.{claims}.signature")
}

/// Three attempts, millisecond backoff, short rate-limit default
pub fn fast_retry() -> RetryOrchestrator {
    let backoff = BackoffPolicy::builder()
        .base_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(10))
        .max_attempts(3)
        .no_jitter()
        .build()
        .expect("valid backoff");
    let governor = RateLimitGovernor::new(RateLimitConfig {
        default_delay: Duration::from_millis(10),
        max_delay: Duration::from_secs(30),
        respect_retry_after: true,
    })
    .expect("valid governor");
    RetryOrchestrator::new(backoff, governor)
}

pub fn token_manager(exchange: Arc<FakeExchange>) -> Arc<TokenManager> {
    Arc::new(TokenManager::new(exchange, "user@example.com", "hunter2").with_retry(fast_retry()))
}

pub fn device_api(hub: &Arc<FakeHub>, exchange: Arc<FakeExchange>) -> Arc<DeviceApi> {
    Arc::new(DeviceApi::new(
        Arc::clone(hub) as Arc<dyn RemoteTransport>,
        token_manager(exchange),
        fast_retry(),
    ))
}

pub fn guarded_api(
    hub: &Arc<FakeHub>,
    exchange: Arc<FakeExchange>,
    breaker: CircuitBreaker,
) -> Arc<DeviceApi> {
    Arc::new(DeviceApi::new(
        Arc::clone(hub) as Arc<dyn RemoteTransport>,
        token_manager(exchange),
        fast_retry().with_breaker(breaker),
    ))
}

/// Queue without spacing so tests dispatch immediately
pub fn eager_queue() -> Arc<CommandQueue> {
    Arc::new(
        CommandQueue::new(Duration::ZERO, 16, Duration::from_secs(30)).expect("valid queue"),
    )
}
