//! Per-device synchronization engine
//!
//! [`DeviceSync`] caches one device's state and keeps it consistent with
//! the remote service:
//! - Commands are applied to the cache first, then queued for dispatch; a
//!   failed dispatch restores the snapshot taken before the first of the
//!   commands that coalesced into it
//! - Refreshes overwrite the cache with what the service reports, at most one
//!   in flight per device
//! - Listeners hear about every change to the cached values

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use livlink_domain::constants::DEVICE_TYPE_LIV_HUB;
use livlink_domain::{CommandKind, DeviceCommand, DeviceParams, DeviceState, LivError, Result};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::api::DeviceApi;
use crate::queue::CommandQueue;

/// Callback notified with the new state after every change
pub type DeviceListener = Arc<dyn Fn(&DeviceState) + Send + Sync>;

struct AutoRefresh {
    token: CancellationToken,
    interval: Duration,
}

/// State to restore if a queued command fails
///
/// Shared by every caller whose command coalesced into the same queue entry.
struct Rollback {
    snapshot: DeviceState,
    restored: AtomicBool,
}

impl Rollback {
    fn new(snapshot: DeviceState) -> Arc<Self> {
        Arc::new(Self { snapshot, restored: AtomicBool::new(false) })
    }

    /// True for the first caller only
    fn claim(&self) -> bool {
        !self.restored.swap(true, Ordering::AcqRel)
    }
}

/// Clears the in-flight flag when a refresh ends, however it ends
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Cached, listenable state of one device
pub struct DeviceSync {
    node_id: String,
    api: Arc<DeviceApi>,
    queue: Arc<CommandQueue>,
    state: RwLock<DeviceState>,
    present: AtomicBool,
    refreshing: AtomicBool,
    listeners: RwLock<Vec<DeviceListener>>,
    /// Rollback of the command waiting in each coalescable slot
    rollbacks: Mutex<HashMap<CommandKind, Arc<Rollback>>>,
    auto_refresh: Mutex<Option<AutoRefresh>>,
}

impl DeviceSync {
    pub fn new(api: Arc<DeviceApi>, queue: Arc<CommandQueue>, initial: DeviceState) -> Self {
        Self {
            node_id: initial.node_id().to_string(),
            api,
            queue,
            state: RwLock::new(initial),
            present: AtomicBool::new(true),
            refreshing: AtomicBool::new(false),
            listeners: RwLock::new(Vec::new()),
            rollbacks: Mutex::new(HashMap::new()),
            auto_refresh: Mutex::new(None),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Snapshot of the cached state
    pub fn state(&self) -> DeviceState {
        self.state.read().clone()
    }

    /// Time since the last authoritative refresh
    ///
    /// Optimistic command updates do not reset it.
    pub fn state_age(&self) -> Duration {
        (Utc::now() - self.state.read().refreshed_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_online(&self) -> bool {
        self.state.read().is_online()
    }

    /// False once a refresh found the device gone from the account
    pub fn is_present(&self) -> bool {
        self.present.load(Ordering::Acquire)
    }

    // Listeners
    // ---------------------------------------------------------------------

    /// Register a listener; returns false if it was already registered
    pub fn add_listener(&self, listener: DeviceListener) -> bool {
        let mut listeners = self.listeners.write();
        if listeners.iter().any(|existing| Arc::ptr_eq(existing, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Unregister a listener; returns false if it was not registered
    pub fn remove_listener(&self, listener: &DeviceListener) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|existing| !Arc::ptr_eq(existing, listener));
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    fn notify(&self, state: &DeviceState) {
        // Snapshot so listeners may (un)register without deadlocking
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(state))).is_err() {
                error!(node_id = %self.node_id, "Device listener panicked");
            }
        }
    }

    // Commands
    // ---------------------------------------------------------------------

    pub async fn turn_on(&self) -> Result<()> {
        self.set_power(true).await
    }

    pub async fn turn_off(&self) -> Result<()> {
        self.set_power(false).await
    }

    pub async fn set_power(&self, on: bool) -> Result<()> {
        self.apply_optimistic(DeviceCommand::power(on)).await
    }

    /// Switch the LED on (full brightness) or off
    pub async fn set_led_power(&self, on: bool) -> Result<()> {
        self.apply_optimistic(DeviceCommand::led_power(on)).await
    }

    pub async fn set_led_brightness(&self, brightness: i64) -> Result<()> {
        self.apply_optimistic(DeviceCommand::led_brightness(brightness)?).await
    }

    pub async fn set_led_color(&self, hue: i64, brightness: i64) -> Result<()> {
        self.apply_optimistic(DeviceCommand::led_color(hue, brightness)?).await
    }

    /// Reset the refill counter for cartridge code 0, 1 or 2
    pub async fn reset_refill(&self, cartridge: i64) -> Result<()> {
        self.apply_optimistic(DeviceCommand::reset_refill(cartridge)?).await
    }

    /// Apply `command` to the cache, notify, then dispatch it through the
    /// queue
    ///
    /// On success the cache keeps the optimistic value unless the service
    /// answered with params of its own. On failure the cache is restored to
    /// the snapshot taken before the first command of the coalesced group,
    /// once, and listeners are notified again.
    ///
    /// # Errors
    /// Returns validation errors before touching the cache, and the dispatch
    /// error after rolling back.
    #[instrument(skip(self), fields(node_id = %self.node_id))]
    pub async fn apply_optimistic(&self, command: DeviceCommand) -> Result<()> {
        command.validate()?;
        let kind = command.kind();

        let payload = command.to_payload();
        let response: Arc<Mutex<Option<Value>>> = Arc::default();
        let executor = {
            let api = Arc::clone(&self.api);
            let node_id = self.node_id.clone();
            let payload = payload.clone();
            let response = Arc::clone(&response);
            move || async move {
                let body = api.put_params(&node_id, payload).await?;
                *response.lock() = Some(body);
                Ok(())
            }
        };

        let (enqueued, rollback, optimistic) = {
            let mut rollbacks = self.rollbacks.lock();
            let (snapshot, optimistic) = {
                let mut state = self.state.write();
                let snapshot = state.clone();
                command.apply_to(&mut state.params);
                (snapshot, state.clone())
            };

            let enqueued = self.queue.enqueue(&self.node_id, kind, payload, executor);
            let joined = match &enqueued {
                Ok(handle) if handle.is_coalesced() => rollbacks.get(&kind).cloned(),
                _ => None,
            };
            let rollback = match joined {
                Some(rollback) => rollback,
                None => {
                    let rollback = Rollback::new(snapshot);
                    if enqueued.is_ok() && kind.is_coalescable() {
                        rollbacks.insert(kind, Arc::clone(&rollback));
                    }
                    rollback
                }
            };
            (enqueued, rollback, optimistic)
        };
        self.notify(&optimistic);

        let outcome = match enqueued {
            Ok(handle) => handle.await,
            Err(err) => Err(err),
        };
        self.release_rollback(kind, &rollback);

        match outcome {
            Ok(()) => {
                let reported = response.lock().take().and_then(|body| reported_params(&body));
                if let Some(params) = reported {
                    self.overwrite_params(params);
                }
                Ok(())
            }
            Err(err) => {
                if rollback.claim() {
                    warn!(kind = %kind, error = %err, "Command failed, rolling back");
                    *self.state.write() = rollback.snapshot.clone();
                    self.notify(&rollback.snapshot);
                }
                Err(err)
            }
        }
    }

    fn release_rollback(&self, kind: CommandKind, rollback: &Arc<Rollback>) {
        let mut rollbacks = self.rollbacks.lock();
        if rollbacks.get(&kind).is_some_and(|current| Arc::ptr_eq(current, rollback)) {
            rollbacks.remove(&kind);
        }
    }

    fn overwrite_params(&self, params: DeviceParams) {
        let updated = {
            let mut state = self.state.write();
            if state.params == params {
                None
            } else {
                state.params = params;
                Some(state.clone())
            }
        };
        if let Some(updated) = updated {
            self.notify(&updated);
        }
    }

    // Refresh
    // ---------------------------------------------------------------------

    /// Re-read the device from the service
    ///
    /// Returns whether the device still exists. A call made while another
    /// refresh of this device is in flight returns immediately.
    ///
    /// # Errors
    /// Returns the fetch error; the cache is left untouched.
    #[instrument(skip(self), fields(node_id = %self.node_id))]
    pub async fn refresh(&self) -> Result<bool> {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Refresh already in flight");
            return Ok(self.is_present());
        }
        let _in_flight = InFlight(&self.refreshing);

        match self.api.fetch_state(&self.node_id).await? {
            Some(fresh) => {
                self.present.store(true, Ordering::Release);
                self.replace_state(fresh);
                Ok(true)
            }
            None => {
                warn!("Device no longer present");
                self.present.store(false, Ordering::Release);
                Ok(false)
            }
        }
    }

    /// Install an authoritative state, notifying only if values changed
    pub(crate) fn replace_state(&self, fresh: DeviceState) {
        let changed = {
            let mut state = self.state.write();
            let changed = !state.same_values(&fresh);
            *state = fresh.clone();
            changed
        };
        if changed {
            self.notify(&fresh);
        }
    }

    /// Refresh every `interval` until stopped
    ///
    /// Replaces any running schedule. The task holds only a weak reference,
    /// so dropping the engine ends it too.
    ///
    /// # Errors
    /// Returns [`LivError::Validation`] for a zero interval and
    /// [`LivError::Internal`] outside a tokio runtime.
    pub fn start_auto_refresh(self: &Arc<Self>, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            return Err(LivError::validation("interval", "must be positive"));
        }
        let runtime = Handle::try_current()
            .map_err(|_| LivError::Internal("auto refresh requires a tokio runtime".to_string()))?;

        self.stop_auto_refresh();
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let engine = Arc::downgrade(self);

        runtime.spawn(async move {
            loop {
                tokio::select! {
                    () = cancelled.cancelled() => break,
                    () = tokio::time::sleep(interval) => {}
                }
                let Some(engine) = engine.upgrade() else { break };
                if let Err(err) = engine.refresh().await {
                    warn!(node_id = %engine.node_id, error = %err, "Auto refresh failed");
                }
            }
        });

        *self.auto_refresh.lock() = Some(AutoRefresh { token, interval });
        info!(node_id = %self.node_id, interval_secs = interval.as_secs_f64(), "Auto refresh started");
        Ok(())
    }

    /// Cancel the schedule; a refresh already running still completes
    ///
    /// Returns whether a schedule was running.
    pub fn stop_auto_refresh(&self) -> bool {
        match self.auto_refresh.lock().take() {
            Some(schedule) => {
                schedule.token.cancel();
                debug!(node_id = %self.node_id, "Auto refresh stopped");
                true
            }
            None => false,
        }
    }

    /// Interval of the running schedule, if any
    pub fn auto_refresh_interval(&self) -> Option<Duration> {
        self.auto_refresh.lock().as_ref().map(|schedule| schedule.interval)
    }
}

impl Drop for DeviceSync {
    fn drop(&mut self) {
        if let Some(schedule) = self.auto_refresh.get_mut().take() {
            schedule.token.cancel();
        }
    }
}

/// Params carried by a command response, if it is more than an ack
fn reported_params(body: &Value) -> Option<DeviceParams> {
    body.get(DEVICE_TYPE_LIV_HUB)?;
    DeviceParams::from_response(body).ok()
}
