//! Fleet client
//!
//! Wires one token manager, one breaker-guarded pipeline and one command
//! queue into a device cache with one [`DeviceSync`] per device.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, try_join_all};
use livlink_common::resilience::{CircuitBreaker, RateLimitGovernor, RetryOrchestrator};
use livlink_domain::{ClientConfig, DeviceGroup, DeviceState, GroupRequest, GroupUpdate, Result};
use parking_lot::RwLock;
use tracing::{info, instrument, warn};

use crate::api::DeviceApi;
use crate::auth::TokenManager;
use crate::ports::{CredentialExchange, RemoteTransport};
use crate::queue::CommandQueue;
use crate::sync::DeviceSync;

/// Entry point for controlling every device on one account
pub struct FleetClient {
    api: Arc<DeviceApi>,
    queue: Arc<CommandQueue>,
    devices: RwLock<BTreeMap<String, Arc<DeviceSync>>>,
    auto_refresh_interval: Duration,
}

impl FleetClient {
    /// Build the full stack from configuration
    ///
    /// The device pipeline gets the configured breaker; the login exchange
    /// retries with the same backoff but without the breaker, so a failing
    /// device family never blocks re-authentication.
    ///
    /// # Errors
    /// Returns [`LivError::Config`](livlink_domain::LivError::Config) for an
    /// invalid configuration or missing credentials.
    pub fn new(
        config: &ClientConfig,
        transport: Arc<dyn RemoteTransport>,
        exchange: Arc<dyn CredentialExchange>,
    ) -> Result<Self> {
        config.validate()?;

        let orchestrator = || -> Result<RetryOrchestrator> {
            let governor = RateLimitGovernor::new(config.rate_limit.to_config()?)?;
            Ok(RetryOrchestrator::new(config.backoff.to_policy()?, governor)
                .with_attempt_timeout(config.auth.request_timeout()))
        };

        let breaker = CircuitBreaker::new(config.breaker.to_config()?)?;
        let tokens = Arc::new(
            TokenManager::from_config(&config.auth, exchange)?.with_retry(orchestrator()?),
        );
        let api = Arc::new(DeviceApi::new(transport, tokens, orchestrator()?.with_breaker(breaker)));
        let queue = Arc::new(CommandQueue::from_settings(&config.queue)?);

        Ok(Self::from_parts(api, queue, config.sync.auto_refresh_interval()))
    }

    /// Assemble from already-built parts
    pub fn from_parts(
        api: Arc<DeviceApi>,
        queue: Arc<CommandQueue>,
        auto_refresh_interval: Duration,
    ) -> Self {
        Self { api, queue, devices: RwLock::new(BTreeMap::new()), auto_refresh_interval }
    }

    pub fn api(&self) -> &Arc<DeviceApi> {
        &self.api
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        self.api.tokens()
    }

    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.queue
    }

    /// Authenticate now instead of on the first call
    pub async fn login(&self) -> Result<()> {
        self.tokens().ensure_valid().await.map(drop)
    }

    /// Devices currently in the cache
    pub fn cached_devices(&self) -> Vec<Arc<DeviceSync>> {
        self.devices.read().values().cloned().collect()
    }

    /// All devices on the account
    ///
    /// Served from the cache unless it is empty or `force_refresh` is set. A
    /// reload keeps existing engines (and their listeners) for devices that
    /// are still listed and drops the rest.
    #[instrument(skip(self))]
    pub async fn devices(&self, force_refresh: bool) -> Result<Vec<Arc<DeviceSync>>> {
        if !force_refresh {
            let cached = self.cached_devices();
            if !cached.is_empty() {
                return Ok(cached);
            }
        }

        let node_ids = self.api.node_ids().await?;
        let states = try_join_all(node_ids.iter().map(|node_id| self.api.fetch_state(node_id))).await?;

        let existing = self.devices.read().clone();
        let mut listed = BTreeMap::new();
        for state in states.into_iter().flatten() {
            let node_id = state.node_id().to_string();
            let engine = match existing.get(&node_id) {
                Some(engine) => {
                    engine.replace_state(state);
                    Arc::clone(engine)
                }
                None => self.engine_for(state),
            };
            listed.insert(node_id, engine);
        }

        for (node_id, engine) in &existing {
            if !listed.contains_key(node_id) {
                engine.stop_auto_refresh();
                info!(node_id = %node_id, "Device removed from account");
            }
        }

        let devices: Vec<_> = listed.values().cloned().collect();
        *self.devices.write() = listed;
        info!(count = devices.len(), "Device list loaded");
        Ok(devices)
    }

    /// One device by node id
    ///
    /// A cached device is returned as is when neither `force_refresh` is set
    /// nor its state is older than `max_age`; otherwise it is refreshed
    /// first. Returns `None` when the service does not know the device.
    #[instrument(skip(self))]
    pub async fn device(
        &self,
        node_id: &str,
        force_refresh: bool,
        max_age: Option<Duration>,
    ) -> Result<Option<Arc<DeviceSync>>> {
        let cached = self.devices.read().get(node_id).cloned();

        if let Some(engine) = cached {
            let fresh_enough = max_age.map_or(true, |max_age| engine.state_age() <= max_age);
            if !force_refresh && fresh_enough {
                return Ok(Some(engine));
            }
            if engine.refresh().await? {
                return Ok(Some(engine));
            }
            self.forget(node_id);
            return Ok(None);
        }

        match self.api.fetch_state(node_id).await? {
            Some(state) => {
                let engine = self.engine_for(state);
                let engine =
                    Arc::clone(self.devices.write().entry(node_id.to_string()).or_insert(engine));
                Ok(Some(engine))
            }
            None => Ok(None),
        }
    }

    /// Refresh every cached device concurrently
    ///
    /// Devices that disappeared are dropped from the cache; failures are
    /// logged and leave the cached state untouched. Returns the number of
    /// devices refreshed successfully.
    #[instrument(skip(self))]
    pub async fn refresh_all(&self) -> usize {
        let engines = self.cached_devices();
        let outcomes = join_all(engines.iter().map(|engine| engine.refresh())).await;

        let mut refreshed = 0;
        for (engine, outcome) in engines.iter().zip(outcomes) {
            match outcome {
                Ok(true) => refreshed += 1,
                Ok(false) => self.forget(engine.node_id()),
                Err(err) => warn!(node_id = %engine.node_id(), error = %err, "Refresh failed"),
            }
        }
        refreshed
    }

    /// Start auto refresh on every cached device
    ///
    /// Uses the configured interval when `interval` is `None`.
    ///
    /// # Errors
    /// See [`DeviceSync::start_auto_refresh`].
    pub fn start_auto_refresh_all(&self, interval: Option<Duration>) -> Result<()> {
        let interval = interval.unwrap_or(self.auto_refresh_interval);
        for engine in self.cached_devices() {
            engine.start_auto_refresh(interval)?;
        }
        Ok(())
    }

    /// Returns the number of schedules that were running
    pub fn stop_auto_refresh_all(&self) -> usize {
        self.cached_devices().iter().filter(|engine| engine.stop_auto_refresh()).count()
    }

    /// Stop every refresh schedule and shut the command queue down
    pub async fn shutdown(&self) {
        let stopped = self.stop_auto_refresh_all();
        self.queue.shutdown().await;
        info!(stopped, "Fleet client shut down");
    }

    // Groups
    // ---------------------------------------------------------------------

    pub async fn groups(&self) -> Result<Vec<DeviceGroup>> {
        self.api.list_groups().await
    }

    pub async fn group(&self, group_id: &str) -> Result<Option<DeviceGroup>> {
        self.api.group(group_id).await
    }

    /// Create a group and return its id
    ///
    /// # Errors
    /// Returns a validation error for a blank name.
    pub async fn create_group(&self, name: &str, node_ids: Option<Vec<String>>) -> Result<String> {
        self.api.create_group(&GroupRequest::create(name, node_ids)?).await
    }

    pub async fn update_group(&self, group_id: &str, update: GroupUpdate) -> Result<()> {
        self.api.update_group(group_id, update).await
    }

    pub async fn delete_group(&self, group_id: &str) -> Result<()> {
        self.api.delete_group(group_id).await
    }

    /// Devices belonging to a group, loading any not yet cached
    pub async fn group_devices(&self, group_id: &str) -> Result<Vec<Arc<DeviceSync>>> {
        let node_ids = self.api.group_node_ids(group_id).await?;
        let devices = try_join_all(node_ids.iter().map(|node_id| self.device(node_id, false, None)))
            .await?;
        Ok(devices.into_iter().flatten().collect())
    }

    fn engine_for(&self, state: DeviceState) -> Arc<DeviceSync> {
        Arc::new(DeviceSync::new(Arc::clone(&self.api), Arc::clone(&self.queue), state))
    }

    fn forget(&self, node_id: &str) {
        if let Some(engine) = self.devices.write().remove(node_id) {
            engine.stop_auto_refresh();
            info!(node_id, "Device removed from account");
        }
    }
}
