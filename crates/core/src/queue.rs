//! Coalescing command queue
//!
//! Holds at most one waiting command per (device, kind) slot. A newer
//! command for an occupied slot takes over the waiting entry: its payload and
//! executor replace the old ones, and every caller that enqueued into the
//! slot resolves with the outcome of whatever finally runs.
//!
//! A single worker drains the queue in insertion order and keeps at least
//! `min_interval` between the end of one dispatch and the start of the next,
//! across all devices. At most one command is in flight at a time, including
//! during [`CommandQueue::flush`].

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use livlink_domain::{CommandKind, LivError, QueueSettings, Result};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Outcome shared by every caller of one slot
pub type CommandOutcome = Result<()>;

type Executor = Box<dyn FnOnce() -> BoxFuture<'static, CommandOutcome> + Send>;
type Slot = (String, CommandKind);

struct PendingCommand {
    device_id: String,
    kind: CommandKind,
    payload: Value,
    enqueued_at: Instant,
    executor: Executor,
    waiters: Vec<oneshot::Sender<CommandOutcome>>,
}

impl PendingCommand {
    fn resolve(self, outcome: &CommandOutcome) {
        notify_waiters(self.waiters, outcome);
    }
}

fn notify_waiters(waiters: Vec<oneshot::Sender<CommandOutcome>>, outcome: &CommandOutcome) {
    for waiter in waiters {
        // The caller may have stopped waiting; nothing to do then.
        let _ = waiter.send(outcome.clone());
    }
}

struct QueueState {
    /// Waiting commands keyed by insertion sequence
    commands: BTreeMap<u64, PendingCommand>,
    /// Coalescable slots and the sequence of their waiting command
    slots: HashMap<Slot, u64>,
    next_seq: u64,
    last_dispatch: Option<Instant>,
    accepting: bool,
}

impl QueueState {
    fn pop_next(&mut self) -> Option<PendingCommand> {
        let (seq, command) = self.commands.pop_first()?;
        let slot = (command.device_id.clone(), command.kind);
        if self.slots.get(&slot) == Some(&seq) {
            self.slots.remove(&slot);
        }
        Some(command)
    }

    fn drain(&mut self) -> Vec<PendingCommand> {
        self.slots.clear();
        std::mem::take(&mut self.commands).into_values().collect()
    }
}

struct Shared {
    state: Mutex<QueueState>,
    /// Held for the duration of every dispatch
    in_flight: AsyncMutex<()>,
    notify: Notify,
    shutdown: CancellationToken,
    min_interval: Duration,
    capacity: usize,
    command_timeout: Duration,
}

impl Shared {
    fn spacing_remaining(&self) -> Duration {
        match self.state.lock().last_dispatch {
            Some(last) => self.min_interval.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        }
    }

    async fn dispatch(&self, command: PendingCommand) {
        let PendingCommand { device_id, kind, payload, enqueued_at, executor, waiters } = command;
        debug!(
            device_id = %device_id,
            kind = %kind,
            payload = %payload,
            waited_ms = u64::try_from(enqueued_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Dispatching command"
        );

        let outcome = match tokio::time::timeout(self.command_timeout, executor()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(LivError::Timeout(format!(
                "{kind} command for {device_id} exceeded {:?}",
                self.command_timeout
            ))),
        };
        self.state.lock().last_dispatch = Some(Instant::now());

        match &outcome {
            Ok(()) => debug!(device_id = %device_id, kind = %kind, "Command completed"),
            Err(err) => warn!(device_id = %device_id, kind = %kind, error = %err, "Command failed"),
        }

        notify_waiters(waiters, &outcome);
    }
}

/// Completion handle returned by [`CommandQueue::enqueue`]
///
/// Resolves with the outcome of the command that actually ran for the slot,
/// which is a later replacement if this one was coalesced away.
#[must_use = "dropping the handle discards the command outcome"]
#[derive(Debug)]
pub struct CommandHandle {
    receiver: oneshot::Receiver<CommandOutcome>,
    coalesced: bool,
}

impl CommandHandle {
    /// Whether this command joined a command already waiting in its slot
    pub fn is_coalesced(&self) -> bool {
        self.coalesced
    }
}

impl Future for CommandHandle {
    type Output = CommandOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(LivError::ShuttingDown)))
    }
}

/// Bounded, paced, coalescing command queue
pub struct CommandQueue {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CommandQueue {
    /// Create the queue and start its worker on the current tokio runtime
    ///
    /// # Errors
    /// Returns [`LivError::Config`] for a zero capacity or timeout, and
    /// [`LivError::Internal`] outside a tokio runtime.
    pub fn new(min_interval: Duration, capacity: usize, command_timeout: Duration) -> Result<Self> {
        if capacity == 0 {
            return Err(LivError::Config("queue capacity must be at least 1".to_string()));
        }
        if command_timeout.is_zero() {
            return Err(LivError::Config("command timeout must be positive".to_string()));
        }
        let runtime = Handle::try_current().map_err(|_| {
            LivError::Internal("command queue requires a tokio runtime".to_string())
        })?;

        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                commands: BTreeMap::new(),
                slots: HashMap::new(),
                next_seq: 0,
                last_dispatch: None,
                accepting: true,
            }),
            in_flight: AsyncMutex::new(()),
            notify: Notify::new(),
            shutdown: CancellationToken::new(),
            min_interval,
            capacity,
            command_timeout,
        });
        let worker = runtime.spawn(run_worker(Arc::clone(&shared)));

        Ok(Self { shared, worker: Mutex::new(Some(worker)) })
    }

    /// Build from the `[queue]` section
    ///
    /// # Errors
    /// See [`new`](Self::new).
    pub fn from_settings(settings: &QueueSettings) -> Result<Self> {
        settings.validate()?;
        Self::new(settings.min_interval(), settings.max_queue_size, settings.command_timeout())
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Queue a command for `device_id`
    ///
    /// If a coalescable command of the same kind is already waiting for this
    /// device, it is replaced and both callers share the replacement's
    /// outcome. Refill resets always get their own entry.
    ///
    /// # Errors
    /// Returns [`LivError::QueueFull`] when a new entry would exceed the
    /// capacity and [`LivError::ShuttingDown`] after [`shutdown`](Self::shutdown).
    #[instrument(skip(self, payload, executor), fields(kind = %kind))]
    pub fn enqueue<F, Fut>(
        &self,
        device_id: &str,
        kind: CommandKind,
        payload: Value,
        executor: F,
    ) -> Result<CommandHandle>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CommandOutcome> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let executor: Executor = Box::new(move || executor().boxed());
        let slot = (device_id.to_string(), kind);

        {
            let mut state = self.shared.state.lock();
            if !state.accepting {
                return Err(LivError::ShuttingDown);
            }

            let waiting_seq =
                if kind.is_coalescable() { state.slots.get(&slot).copied() } else { None };
            if let Some(waiting) = waiting_seq.and_then(|seq| state.commands.get_mut(&seq)) {
                debug!(from = %waiting.payload, to = %payload, "Coalescing command");
                waiting.payload = payload;
                waiting.executor = executor;
                waiting.enqueued_at = Instant::now();
                waiting.waiters.push(sender);
                return Ok(CommandHandle { receiver, coalesced: true });
            }

            if state.commands.len() >= self.shared.capacity {
                warn!(capacity = self.shared.capacity, "Command queue full");
                return Err(LivError::QueueFull { capacity: self.shared.capacity });
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            if kind.is_coalescable() {
                state.slots.insert(slot, seq);
            }
            state.commands.insert(
                seq,
                PendingCommand {
                    device_id: device_id.to_string(),
                    kind,
                    payload,
                    enqueued_at: Instant::now(),
                    executor,
                    waiters: vec![sender],
                },
            );
        }

        self.shared.notify.notify_one();
        Ok(CommandHandle { receiver, coalesced: false })
    }

    /// Run every waiting command now, ignoring the dispatch interval
    ///
    /// Waits for a dispatch already in flight to finish first.
    pub async fn flush(&self) {
        let _in_flight = self.shared.in_flight.lock().await;
        let drained = self.shared.state.lock().drain();
        if !drained.is_empty() {
            debug!(count = drained.len(), "Flushing command queue");
        }
        for command in drained {
            self.shared.dispatch(command).await;
        }
    }

    /// Drop the waiting command(s) for a slot, resolving them as cancelled
    ///
    /// Returns whether anything was waiting. A command already dispatched is
    /// unaffected.
    pub fn cancel(&self, device_id: &str, kind: CommandKind) -> bool {
        let cancelled: Vec<PendingCommand> = {
            let mut state = self.shared.state.lock();
            state.slots.remove(&(device_id.to_string(), kind));
            let seqs: Vec<u64> = state
                .commands
                .iter()
                .filter(|(_, command)| command.device_id == device_id && command.kind == kind)
                .map(|(seq, _)| *seq)
                .collect();
            seqs.iter().filter_map(|seq| state.commands.remove(seq)).collect()
        };

        let found = !cancelled.is_empty();
        for command in cancelled {
            debug!(device_id, kind = %kind, "Cancelled command");
            command.resolve(&Err(LivError::Cancelled));
        }
        found
    }

    /// Cancel every waiting command and return how many there were
    pub fn cancel_all(&self) -> usize {
        let drained = self.shared.state.lock().drain();
        let count = drained.len();
        for command in drained {
            command.resolve(&Err(LivError::Cancelled));
        }
        if count > 0 {
            debug!(count, "Cancelled all waiting commands");
        }
        count
    }

    /// Stop accepting work, cancel what is waiting and stop the worker
    ///
    /// A dispatch already in flight runs to completion first.
    pub async fn shutdown(&self) {
        self.shared.state.lock().accepting = false;
        let cancelled = self.cancel_all();
        self.shared.shutdown.cancel();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(err) = worker.await {
                warn!(error = %err, "Command queue worker ended abnormally");
            }
        }
        info!(cancelled, "Command queue shut down");
    }

    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().commands.len()
    }

    pub fn is_pending(&self, device_id: &str, kind: CommandKind) -> bool {
        self.shared
            .state
            .lock()
            .commands
            .values()
            .any(|command| command.device_id == device_id && command.kind == kind)
    }

    pub fn is_accepting(&self) -> bool {
        self.shared.state.lock().accepting
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

async fn run_worker(shared: Arc<Shared>) {
    debug!("Command queue worker started");

    loop {
        let idle = shared.state.lock().commands.is_empty();
        if idle {
            tokio::select! {
                () = shared.notify.notified() => continue,
                () = shared.shutdown.cancelled() => break,
            }
        }

        let wait = shared.spacing_remaining();
        if !wait.is_zero() {
            debug!(wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX), "Pacing dispatch");
            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                () = shared.shutdown.cancelled() => break,
            }
        }

        let _in_flight = shared.in_flight.lock().await;
        // A flush may have dispatched while we waited for the lock
        if !shared.spacing_remaining().is_zero() {
            continue;
        }
        let next = shared.state.lock().pop_next();
        if let Some(command) = next {
            shared.dispatch(command).await;
        }
    }

    debug!("Command queue worker stopped");
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    type Log = Arc<Mutex<Vec<(Value, Instant)>>>;

    fn queue(min_interval_ms: u64) -> CommandQueue {
        CommandQueue::new(Duration::from_millis(min_interval_ms), 8, Duration::from_secs(5)).unwrap()
    }

    fn record(queue: &CommandQueue, log: &Log, kind: CommandKind, payload: Value) -> CommandHandle {
        let log = Arc::clone(log);
        let recorded = payload.clone();
        queue
            .enqueue("hub-1", kind, payload, move || async move {
                log.lock().push((recorded, Instant::now()));
                Ok(())
            })
            .unwrap()
    }

    fn payloads(log: &Log) -> Vec<Value> {
        log.lock().iter().map(|(payload, _)| payload.clone()).collect()
    }

    /// Validates coalescing within the dispatch interval.
    ///
    /// Assertions:
    /// - Confirms `turn_on` then `turn_off` enqueued 100ms apart while the
    ///   queue is pacing dispatches only `turn_off`.
    /// - Confirms both callers resolve with the same outcome.
    #[tokio::test(start_paused = true)]
    async fn test_turn_on_then_off_dispatches_only_off() {
        let queue = queue(500);
        let log = Log::default();

        record(&queue, &log, CommandKind::LedBrightness, json!({"LED Brightness": 40}))
            .await
            .unwrap();

        let turn_on = record(&queue, &log, CommandKind::Power, json!({"Enable Repellers": true}));
        tokio::time::sleep(Duration::from_millis(100)).await;
        let turn_off = record(&queue, &log, CommandKind::Power, json!({"Enable Repellers": false}));
        assert_eq!(queue.pending_count(), 1);

        let (on, off) = tokio::join!(turn_on, turn_off);
        assert_eq!(on, Ok(()));
        assert_eq!(on, off);
        assert_eq!(
            payloads(&log),
            vec![json!({"LED Brightness": 40}), json!({"Enable Repellers": false})]
        );
    }

    /// Validates pacing across kinds.
    ///
    /// Assertions:
    /// - Confirms different kinds are not coalesced and run in insertion
    ///   order.
    /// - Confirms consecutive dispatches are at least the interval apart.
    #[tokio::test(start_paused = true)]
    async fn test_different_kinds_run_in_order_with_spacing() {
        let queue = queue(500);
        let log = Log::default();

        let power = record(&queue, &log, CommandKind::Power, json!("power"));
        let led = record(&queue, &log, CommandKind::LedBrightness, json!("led"));
        let refill = record(&queue, &log, CommandKind::RefillReset, json!("refill"));
        let (a, b, c) = tokio::join!(power, led, refill);
        assert!(a.is_ok() && b.is_ok() && c.is_ok());

        let entries = log.lock().clone();
        assert_eq!(payloads(&log), vec![json!("power"), json!("led"), json!("refill")]);
        for pair in entries.windows(2) {
            assert!(pair[1].1 - pair[0].1 >= Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_resets_never_coalesce() {
        let queue = queue(500);
        let log = Log::default();

        let first = record(&queue, &log, CommandKind::RefillReset, json!(1));
        let second = record(&queue, &log, CommandKind::RefillReset, json!(2));
        assert_eq!(queue.pending_count(), 2);

        let _ = tokio::join!(first, second);
        assert_eq!(payloads(&log), vec![json!(1), json!(2)]);
    }

    /// Validates backpressure.
    ///
    /// Assertions:
    /// - Confirms a new slot beyond capacity fails with `QueueFull`.
    /// - Confirms replacing an occupied slot still succeeds at capacity.
    #[tokio::test(start_paused = true)]
    async fn test_bounded_queue_fails_fast() {
        let queue = CommandQueue::new(Duration::from_secs(60), 2, Duration::from_secs(5)).unwrap();
        let log = Log::default();

        // Occupies the worker's pacing window
        record(&queue, &log, CommandKind::Power, json!("warm")).await.unwrap();

        let _a = record(&queue, &log, CommandKind::Power, json!("a"));
        let _b = record(&queue, &log, CommandKind::LedColor, json!("b"));
        let err = queue
            .enqueue("hub-2", CommandKind::Power, json!("c"), || async { Ok(()) })
            .unwrap_err();
        assert_eq!(err, LivError::QueueFull { capacity: 2 });

        assert!(queue
            .enqueue("hub-1", CommandKind::Power, json!("a2"), || async { Ok(()) })
            .is_ok());
        assert_eq!(queue.pending_count(), 2);
    }

    /// Validates cancellation.
    ///
    /// Assertions:
    /// - Confirms a cancelled command resolves as `Cancelled` and never runs.
    /// - Confirms cancelling an empty slot reports false.
    #[tokio::test(start_paused = true)]
    async fn test_cancel_pending_command() {
        let queue = queue(1_000);
        let log = Log::default();
        record(&queue, &log, CommandKind::LedPower, json!("warm")).await.unwrap();

        let pending = record(&queue, &log, CommandKind::Power, json!("on"));
        assert!(queue.is_pending("hub-1", CommandKind::Power));
        assert!(queue.cancel("hub-1", CommandKind::Power));
        assert!(!queue.cancel("hub-1", CommandKind::Power));

        assert_eq!(pending.await, Err(LivError::Cancelled));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(payloads(&log), vec![json!("warm")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_bypasses_spacing() {
        let queue = queue(60_000);
        let log = Log::default();
        record(&queue, &log, CommandKind::Power, json!("warm")).await.unwrap();

        let started = Instant::now();
        let a = record(&queue, &log, CommandKind::LedBrightness, json!("a"));
        let b = record(&queue, &log, CommandKind::LedColor, json!("b"));
        queue.flush().await;

        assert_eq!(a.await, Ok(()));
        assert_eq!(b.await, Ok(()));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(queue.pending_count(), 0);
    }

    /// Validates that a flush never overlaps the worker's dispatch.
    ///
    /// Assertions:
    /// - Confirms the flushed command starts only after the in-flight one
    ///   finished.
    /// - Confirms only the joining handle reports coalescing.
    #[tokio::test(start_paused = true)]
    async fn test_flush_waits_for_in_flight_dispatch() {
        let queue = queue(0);
        let log = Log::default();
        let slow = Arc::clone(&log);
        let first = queue
            .enqueue("hub-1", CommandKind::Power, json!("first"), move || async move {
                slow.lock().push((json!("first-start"), Instant::now()));
                tokio::time::sleep(Duration::from_millis(200)).await;
                slow.lock().push((json!("first-end"), Instant::now()));
                Ok(())
            })
            .unwrap();
        assert!(!first.is_coalesced());
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = record(&queue, &log, CommandKind::Power, json!("second"));
        let third = record(&queue, &log, CommandKind::Power, json!("third"));
        assert!(!second.is_coalesced());
        assert!(third.is_coalesced());
        queue.flush().await;

        assert_eq!(first.await, Ok(()));
        assert_eq!(second.await, Ok(()));
        assert_eq!(third.await, Ok(()));
        assert_eq!(
            payloads(&log),
            vec![json!("first-start"), json!("first-end"), json!("third")]
        );
    }

    /// Validates that failures and timeouts reach every coalesced caller.
    ///
    /// Assertions:
    /// - Confirms a failing replacement fails both callers identically.
    /// - Confirms a hung executor resolves as `Timeout`.
    #[tokio::test(start_paused = true)]
    async fn test_failure_and_timeout_are_shared() {
        let queue = CommandQueue::new(Duration::from_millis(500), 8, Duration::from_secs(1)).unwrap();
        let log = Log::default();
        record(&queue, &log, CommandKind::LedPower, json!("warm")).await.unwrap();

        let first = record(&queue, &log, CommandKind::Power, json!("on"));
        let second = queue
            .enqueue("hub-1", CommandKind::Power, json!("off"), || async {
                Err(LivError::Connection("reset".into()))
            })
            .unwrap();
        let (first, second) = tokio::join!(first, second);
        assert_eq!(first, Err(LivError::Connection("reset".into())));
        assert_eq!(first, second);

        let hung = queue
            .enqueue("hub-1", CommandKind::LedBrightness, json!(5), || async {
                futures::future::pending::<CommandOutcome>().await
            })
            .unwrap();
        assert!(matches!(hung.await, Err(LivError::Timeout(_))));
    }

    /// Validates shutdown.
    ///
    /// Assertions:
    /// - Confirms waiting commands resolve as `Cancelled`.
    /// - Confirms later enqueues fail with `ShuttingDown`.
    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_and_rejects() {
        let queue = queue(5_000);
        let log = Log::default();
        record(&queue, &log, CommandKind::Power, json!("warm")).await.unwrap();

        let pending = record(&queue, &log, CommandKind::LedColor, json!("color"));
        queue.shutdown().await;

        assert_eq!(pending.await, Err(LivError::Cancelled));
        assert!(!queue.is_accepting());
        let err = queue
            .enqueue("hub-1", CommandKind::Power, json!("late"), || async { Ok(()) })
            .unwrap_err();
        assert_eq!(err, LivError::ShuttingDown);
        assert_eq!(queue.cancel_all(), 0);
    }

    #[test]
    fn test_requires_runtime_and_valid_limits() {
        let no_runtime = CommandQueue::new(Duration::ZERO, 4, Duration::from_secs(1));
        assert!(matches!(no_runtime, Err(LivError::Internal(_))));

        let zero_capacity = CommandQueue::new(Duration::ZERO, 0, Duration::from_secs(1));
        assert!(matches!(zero_capacity, Err(LivError::Config(_))));
    }
}
