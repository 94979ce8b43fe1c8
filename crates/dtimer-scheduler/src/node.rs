//! Per-process timer node.
//!
//! A node joins the membership ring, subscribes to its wake channel and
//! drives the scheduling protocol from a single background loop: sleep until
//! the local timer fires (or a hint shortens it), claim due events, hand them
//! to the consumer and re-arm with the interval the protocol returned.

use crate::config::NodeConfig;
use crate::error::{Result, SchedulerError};
use crate::event::NewEvent;
use crate::keyspace::{Index, Keyspace};
use crate::notification::{NodePhase, NodeState, TimerNotification};
use crate::protocol::{
    PeekedEvent, ScheduleStats, SchedulerProtocol, UpcomingEvent, UpcomingOptions, UpdateOutcome,
};
use crate::ring::ScheduleCursor;
use dtimer_bus::{WakeChannel, WakeHint, WakeSubscription};
use dtimer_core::{observe, ScheduleStore};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// State shared between a node handle and its background loop.
struct NodeShared<S: ScheduleStore> {
    node_id: Option<String>,
    protocol: Arc<SchedulerProtocol<S>>,
    wake: Option<Arc<dyn WakeChannel>>,
    config: NodeConfig,
    max_events: AtomicUsize,
    phase: RwLock<NodePhase>,
    state: RwLock<NodeState>,
    notifications: mpsc::Sender<TimerNotification>,
}

impl<S: ScheduleStore> NodeShared<S> {
    /// Run a protocol call on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&SchedulerProtocol<S>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let protocol = self.protocol.clone();
        tokio::task::spawn_blocking(move || f(&protocol))
            .await
            .map_err(|e| SchedulerError::Join(e.to_string()))?
    }

    async fn notify(&self, notification: TimerNotification) {
        if self.notifications.send(notification).await.is_err() {
            debug!("Notification receiver dropped");
        }
    }

    /// Send a notification unless the loop is told to stop first. Returns
    /// `false` on shutdown.
    ///
    /// A consumer that stops draining must not keep `leave` from finishing.
    /// Claimed events that are not handed over stay leased and are
    /// redelivered once the lease expires.
    async fn notify_or_stop(
        &self,
        notification: TimerNotification,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        tokio::select! {
            biased;
            _ = stopped(shutdown) => false,
            sent = self.notifications.send(notification) => {
                if sent.is_err() {
                    debug!("Notification receiver dropped");
                }
                true
            }
        }
    }

    fn set_state(&self, state: NodeState) {
        *self.state.write() = state;
    }

    /// One polling cycle. Returns how long to sleep before the next one, or
    /// `None` if the loop was stopped while handing over results.
    async fn poll(
        &self,
        node_id: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<Duration> {
        let max_events = self.max_events.load(Ordering::SeqCst);
        let lease_ms = self.config.lease_duration_ms;
        let caller = node_id.to_string();

        match self
            .blocking(move |p| p.update(Some(&caller), max_events, lease_ms))
            .await
        {
            Ok(outcome) => {
                let interval = Duration::from_millis(outcome.interval_ms);
                self.deliver(node_id, outcome, shutdown)
                    .await
                    .then_some(interval)
            }
            Err(e) => {
                warn!(
                    node_id,
                    error = %e,
                    backoff_ms = self.config.backoff_ms,
                    "Update failed, backing off"
                );
                observe::record_backoff();
                self.notify_or_stop(TimerNotification::Error(e), shutdown)
                    .await
                    .then(|| self.config.backoff())
            }
        }
    }

    async fn deliver(
        &self,
        node_id: &str,
        outcome: UpdateOutcome,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        for id in outcome.corrupt {
            let error =
                SchedulerError::Protocol(format!("dropped event {} with corrupt payload", id));
            if !self
                .notify_or_stop(TimerNotification::Error(error), shutdown)
                .await
            {
                return false;
            }
        }

        let mut delivered = 0;
        for record in outcome.claimed {
            debug!(
                node_id,
                event_id = %record.id,
                retry_count = record.retry_count,
                "Delivering event"
            );
            if !self
                .notify_or_stop(TimerNotification::Event(record), shutdown)
                .await
            {
                observe::record_delivered(delivered);
                return false;
            }
            delivered += 1;
        }
        observe::record_delivered(delivered);
        true
    }
}

/// Resolves once the driver is told to stop or its handle is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Background loop handle.
struct Driver {
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl Driver {
    async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Timer loop ended abnormally");
            }
        }
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn run_driver<S: ScheduleStore>(
    shared: Arc<NodeShared<S>>,
    node_id: String,
    mut subscription: WakeSubscription,
    initial: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut deadline = Instant::now() + initial;
    let mut hints_open = true;

    loop {
        shared.set_state(NodeState::Armed);
        tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => break,
            message = subscription.recv(), if hints_open => match message {
                Some(bytes) => match WakeHint::decode(&bytes) {
                    Ok(Some(hint)) => {
                        let wake_at = Instant::now() + hint.as_duration();
                        // Hints only ever bring the next poll forward
                        if wake_at < deadline {
                            debug!(
                                node_id = %node_id,
                                interval_ms = hint.interval,
                                "Wake hint shortened timer"
                            );
                            deadline = wake_at;
                        }
                    }
                    Ok(None) => {
                        debug!(node_id = %node_id, "Ignoring wake message without interval");
                    }
                    Err(e) => {
                        warn!(node_id = %node_id, error = %e, "Malformed wake message");
                        if !shared
                            .notify_or_stop(TimerNotification::Error(e.into()), &mut shutdown)
                            .await
                        {
                            break;
                        }
                    }
                },
                None => {
                    warn!(node_id = %node_id, "Wake subscription closed, relying on heartbeat");
                    hints_open = false;
                }
            },
            _ = tokio::time::sleep_until(deadline) => {
                shared.set_state(NodeState::Polling);
                let Some(interval) = shared.poll(&node_id, &mut shutdown).await else {
                    break;
                };
                debug!(
                    node_id = %node_id,
                    interval_ms = interval.as_millis() as u64,
                    "Timer re-armed"
                );
                deadline = Instant::now() + interval;
            }
        }
    }

    debug!(node_id = %node_id, "Timer loop stopped");
}

/// A participant in a distributed timer.
///
/// Cloning yields another handle to the same node.
pub struct TimerNode<S: ScheduleStore> {
    shared: Arc<NodeShared<S>>,
    driver: Arc<Mutex<Option<Driver>>>,
}

impl<S: ScheduleStore> Clone for TimerNode<S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            driver: self.driver.clone(),
        }
    }
}

impl<S: ScheduleStore> TimerNode<S> {
    /// Create a new node builder.
    pub fn builder(store: Arc<S>) -> TimerNodeBuilder<S> {
        TimerNodeBuilder::new(store)
    }

    pub fn node_id(&self) -> Option<&str> {
        self.shared.node_id.as_deref()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.shared.config
    }

    pub fn phase(&self) -> NodePhase {
        *self.shared.phase.read()
    }

    pub fn state(&self) -> NodeState {
        *self.shared.state.read()
    }

    /// Per-poll claim cap.
    pub fn max_events(&self) -> usize {
        self.shared.max_events.load(Ordering::SeqCst)
    }

    /// Change the per-poll claim cap. Zero restores the configured value.
    pub fn set_max_events(&self, max_events: usize) {
        let value = if max_events > 0 {
            max_events
        } else {
            self.shared.config.max_events
        };
        self.shared.max_events.store(value, Ordering::SeqCst);
    }

    /// Current time on the store's clock.
    pub fn now_ms(&self) -> i64 {
        self.shared.protocol.now_ms()
    }

    /// Check the store is usable and move to `Ready`.
    ///
    /// Emits [`TimerNotification::Ready`] on success. On failure the node
    /// moves to `Failed`, emits an error notification and may be initialized
    /// again later.
    pub async fn initialize(&self) -> Result<()> {
        if self.phase() == NodePhase::Ready {
            return Ok(());
        }

        let timeout = self.shared.config.ready_timeout();
        let check = self.shared.blocking(|p| {
            let txn = p.store().read_txn()?;
            ScheduleCursor::load(&txn, &p.keys().cursor)?;
            Ok(())
        });
        let result = match tokio::time::timeout(timeout, check).await {
            Ok(result) => result,
            Err(_) => Err(SchedulerError::Timeout(format!(
                "store not ready within {:?}",
                timeout
            ))),
        };

        match result {
            Ok(()) => {
                *self.shared.phase.write() = NodePhase::Ready;
                info!(
                    node_id = ?self.node_id(),
                    namespace = %self.shared.protocol.keys().namespace(),
                    "Node ready"
                );
                self.shared.notify(TimerNotification::Ready).await;
                Ok(())
            }
            Err(e) => {
                *self.shared.phase.write() = NodePhase::Failed;
                warn!(node_id = ?self.node_id(), error = %e, "Node initialization failed");
                self.shared
                    .notify(TimerNotification::Error(SchedulerError::NotReady))
                    .await;
                Err(e)
            }
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.phase() {
            NodePhase::Ready => Ok(()),
            _ => Err(SchedulerError::NotReady),
        }
    }

    fn subscriber(&self) -> Result<(String, Arc<dyn WakeChannel>)> {
        match (&self.shared.node_id, &self.shared.wake) {
            (Some(node_id), Some(wake)) => Ok((node_id.clone(), wake.clone())),
            _ => Err(SchedulerError::NoSubscriber),
        }
    }

    /// Subscribe to this node's wake channel, enter the ring and start
    /// polling.
    pub async fn join(&self) -> Result<()> {
        self.ensure_ready()?;
        let (node_id, wake) = self.subscriber()?;

        let mut driver = self.driver.lock().await;
        if driver.is_some() {
            return Err(SchedulerError::AlreadyJoined);
        }

        let channel = self.shared.protocol.keys().channel_for(&node_id);
        let subscription = wake.subscribe(&channel)?;

        let member = node_id.clone();
        let outcome = match self.shared.blocking(move |p| p.join_member(&member)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Err(unsub) = wake.unsubscribe(&channel) {
                    warn!(
                        channel = %channel,
                        error = %unsub,
                        "Failed to unsubscribe after failed join"
                    );
                }
                return Err(e);
            }
        };

        self.shared.set_state(NodeState::Joined);
        info!(
            node_id = %node_id,
            channel = %channel,
            interval_ms = outcome.interval_ms,
            "Joined"
        );

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_driver(
            self.shared.clone(),
            node_id,
            subscription,
            Duration::from_millis(outcome.interval_ms),
            rx,
        ));
        *driver = Some(Driver {
            shutdown: tx,
            handle: Some(handle),
        });
        Ok(())
    }

    /// Stop polling, leave the ring and unsubscribe.
    pub async fn leave(&self) -> Result<()> {
        self.ensure_ready()?;
        let (node_id, wake) = self.subscriber()?;

        let driver = self
            .driver
            .lock()
            .await
            .take()
            .ok_or(SchedulerError::NotJoined)?;
        driver.stop().await;

        let member = node_id.clone();
        let left = self
            .shared
            .blocking(move |p| p.leave_member(&member))
            .await;
        wake.unsubscribe(&self.shared.protocol.keys().channel_for(&node_id))?;
        self.shared.set_state(NodeState::Left);
        left?;

        info!(node_id = %node_id, "Left");
        Ok(())
    }

    /// Schedule `event` to fire `delay_ms` from now. Returns the event id.
    pub async fn post(&self, event: NewEvent, delay_ms: u64) -> Result<String> {
        self.ensure_ready()?;
        let record = event.into_record()?;
        let id = record.id.clone();
        self.shared
            .blocking(move |p| p.post(&record, delay_ms))
            .await?;
        Ok(id)
    }

    /// Cancel an event that has not fired. Returns whether it was pending.
    pub async fn cancel(&self, id: &str) -> Result<bool> {
        self.ensure_ready()?;
        let id = id.to_string();
        self.shared
            .blocking(move |p| p.cancel(&id, Index::Pending))
            .await
    }

    /// Confirm a delivered event so it is not retried. Returns whether it
    /// was leased.
    pub async fn confirm(&self, id: &str) -> Result<bool> {
        self.ensure_ready()?;
        let id = id.to_string();
        self.shared
            .blocking(move |p| p.cancel(&id, Index::Leased))
            .await
    }

    /// Make a pending event fire `delay_ms` from now. Returns whether it was
    /// pending.
    pub async fn change_delay(&self, id: &str, delay_ms: u64) -> Result<bool> {
        self.ensure_ready()?;
        let id = id.to_string();
        self.shared
            .blocking(move |p| p.reschedule_after(&id, delay_ms))
            .await
    }

    /// Look at a pending event.
    pub async fn peek(&self, id: &str) -> Result<Option<PeekedEvent>> {
        self.ensure_ready()?;
        let id = id.to_string();
        self.shared.blocking(move |p| p.peek(&id)).await
    }

    /// List pending events inside a window.
    pub async fn upcoming(
        &self,
        options: UpcomingOptions,
    ) -> Result<BTreeMap<String, UpcomingEvent>> {
        self.ensure_ready()?;
        self.shared.blocking(move |p| p.upcoming(&options)).await
    }

    /// Counts and horizon of the schedule.
    pub async fn stats(&self) -> Result<ScheduleStats> {
        self.ensure_ready()?;
        self.shared.blocking(|p| p.stats()).await
    }
}

/// Builder for creating a timer node.
pub struct TimerNodeBuilder<S: ScheduleStore> {
    store: Arc<S>,
    node_id: Option<String>,
    wake: Option<Arc<dyn WakeChannel>>,
    config: NodeConfig,
}

impl<S: ScheduleStore> TimerNodeBuilder<S> {
    /// Create a new node builder.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            node_id: None,
            wake: None,
            config: NodeConfig::default(),
        }
    }

    /// Identity used for claiming and for the wake channel. Required to join.
    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    /// Transport for publishing and receiving wake hints.
    pub fn with_wake_channel(mut self, wake: Arc<dyn WakeChannel>) -> Self {
        self.wake = Some(wake);
        self
    }

    /// Replace the whole configuration.
    pub fn with_config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config = self.config.with_namespace(namespace);
        self
    }

    /// Set the per-poll claim cap.
    pub fn with_max_events(mut self, max_events: usize) -> Self {
        self.config = self.config.with_max_events(max_events);
        self
    }

    /// Set the lease duration.
    pub fn with_lease_duration(mut self, lease: Duration) -> Self {
        self.config = self.config.with_lease_duration(lease);
        self
    }

    /// Set the initialization timeout.
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_ready_timeout(timeout);
        self
    }

    /// Set the failure backoff.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.config = self.config.with_backoff(backoff);
        self
    }

    /// Set the poll interval bounds.
    pub fn with_interval_bounds(mut self, min: Duration, idle: Duration) -> Self {
        self.config = self.config.with_interval_bounds(min, idle);
        self
    }

    /// Build the node.
    ///
    /// Returns the node and the receiver its notifications arrive on. The
    /// node starts `Uninitialized`; call [`TimerNode::initialize`] before
    /// using it.
    pub fn build(self) -> Result<(TimerNode<S>, mpsc::Receiver<TimerNotification>)> {
        if self.node_id.as_deref() == Some("") {
            return Err(SchedulerError::Validation(
                "node id must be a non-empty string".into(),
            ));
        }
        if self.config.max_events == 0 {
            return Err(SchedulerError::Validation(
                "max_events must be positive".into(),
            ));
        }

        let keys = Keyspace::new(&self.config.namespace)?;
        let protocol = SchedulerProtocol::new(
            self.store,
            keys,
            self.wake.clone(),
            self.config.interval_bounds(),
        );
        let (tx, rx) = mpsc::channel(self.config.notification_capacity.max(1));

        let shared = NodeShared {
            node_id: self.node_id,
            protocol: Arc::new(protocol),
            wake: self.wake,
            max_events: AtomicUsize::new(self.config.max_events),
            config: self.config,
            phase: RwLock::new(NodePhase::Uninitialized),
            state: RwLock::new(NodeState::Idle),
            notifications: tx,
        };

        Ok((
            TimerNode {
                shared: Arc::new(shared),
                driver: Arc::new(Mutex::new(None)),
            },
            rx,
        ))
    }
}
