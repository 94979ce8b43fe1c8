//! Timer nodes running against a shared store and an in-process wake hub.

use dtimer_bus::{LocalWakeHub, WakeChannel};
use dtimer_core::{DTimerError, ScheduleStore, StoreConfig};
use dtimer_lmdb::{LmdbReadTxn, LmdbScheduleStore, LmdbWriteTxn};
use dtimer_scheduler::{
    EventRecord, NewEvent, NodeConfig, NodePhase, NodeState, SchedulerError, TimerNode,
    TimerNodeBuilder, TimerNotification, UpcomingOptions,
};
use serde_json::{json, Map};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::mpsc::Receiver;

/// Store whose next few write transactions fail.
struct FlakyStore {
    inner: Arc<LmdbScheduleStore>,
    failures: AtomicUsize,
}

impl FlakyStore {
    fn new(inner: Arc<LmdbScheduleStore>) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(0),
        }
    }

    fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }
}

impl ScheduleStore for FlakyStore {
    type ReadTxn<'a> = LmdbReadTxn<'a>;
    type Txn<'a> = LmdbWriteTxn<'a>;

    fn open(cfg: StoreConfig) -> dtimer_core::Result<Self> {
        Ok(Self::new(Arc::new(LmdbScheduleStore::open(cfg)?)))
    }

    fn now_ms(&self) -> i64 {
        self.inner.now_ms()
    }

    fn read_txn(&self) -> dtimer_core::Result<LmdbReadTxn<'_>> {
        self.inner.read_txn()
    }

    fn write_txn(&self) -> dtimer_core::Result<LmdbWriteTxn<'_>> {
        let fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(DTimerError::Transaction("store unavailable".into()));
        }
        self.inner.write_txn()
    }
}

fn open_store(dir: &TempDir) -> Arc<LmdbScheduleStore> {
    Arc::new(
        LmdbScheduleStore::open(StoreConfig::new(dir.path()).with_map_size(16 * 1024 * 1024))
            .unwrap(),
    )
}

fn builder(
    store: &Arc<LmdbScheduleStore>,
    hub: &LocalWakeHub,
    node_id: &str,
) -> TimerNodeBuilder<LmdbScheduleStore> {
    TimerNode::builder(store.clone())
        .with_node_id(node_id)
        .with_wake_channel(Arc::new(hub.clone()))
        .with_interval_bounds(Duration::from_millis(10), Duration::from_secs(5))
}

async fn start<S: ScheduleStore>(
    builder: TimerNodeBuilder<S>,
) -> (TimerNode<S>, Receiver<TimerNotification>) {
    let (node, rx) = builder.build().unwrap();
    node.initialize().await.unwrap();
    node.join().await.unwrap();
    (node, rx)
}

fn event(msg: &str) -> NewEvent {
    let mut payload = Map::new();
    payload.insert("msg".into(), json!(msg));
    NewEvent::new(payload)
}

/// Wait for the next delivered event, skipping other notifications.
async fn next_event(
    rx: &mut Receiver<TimerNotification>,
    within: Duration,
) -> Option<EventRecord> {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(TimerNotification::Event(record))) => return Some(record),
            Ok(Some(_)) => continue,
            _ => return None,
        }
    }
}

#[tokio::test]
async fn test_initialize_emits_ready() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let hub = LocalWakeHub::new();
    let (node, mut rx) = builder(&store, &hub, "n1").build().unwrap();
    assert_eq!(node.phase(), NodePhase::Uninitialized);

    node.initialize().await.unwrap();
    assert_eq!(node.phase(), NodePhase::Ready);
    assert!(matches!(rx.recv().await, Some(TimerNotification::Ready)));

    // initializing again is a no-op
    node.initialize().await.unwrap();
}

#[tokio::test]
async fn test_operations_require_ready() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let hub = LocalWakeHub::new();
    let (node, _rx) = builder(&store, &hub, "n1").build().unwrap();

    assert!(matches!(
        node.post(event("early"), 0).await,
        Err(SchedulerError::NotReady)
    ));
    assert!(matches!(node.join().await, Err(SchedulerError::NotReady)));
    assert!(matches!(node.cancel("x").await, Err(SchedulerError::NotReady)));
    assert!(matches!(node.stats().await, Err(SchedulerError::NotReady)));
}

#[tokio::test]
async fn test_build_validation() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let hub = LocalWakeHub::new();

    let err = builder(&store, &hub, "").build().err().unwrap();
    assert!(err.is_validation());

    let err = builder(&store, &hub, "n1")
        .with_namespace("")
        .build()
        .err()
        .unwrap();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_event_delivered_after_delay() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let hub = LocalWakeHub::new();
    let (node, mut rx) = start(builder(&store, &hub, "n1")).await;
    assert!(matches!(node.state(), NodeState::Joined | NodeState::Armed));

    let posted = Instant::now();
    let id = node.post(event("hello").with_id("greeting"), 100).await.unwrap();
    assert_eq!(id, "greeting");

    let record = next_event(&mut rx, Duration::from_secs(2)).await.unwrap();
    assert!(posted.elapsed() >= Duration::from_millis(100));
    assert_eq!(record.id, "greeting");
    assert_eq!(record.retry_count, 0);
    assert_eq!(record.payload.get("msg"), Some(&json!("hello")));

    assert!(node.confirm(&record.id).await.unwrap());
    assert!(!node.confirm(&record.id).await.unwrap());
    node.leave().await.unwrap();
}

#[tokio::test]
async fn test_generated_ids_are_unique() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let hub = LocalWakeHub::new();
    let (node, _rx) = builder(&store, &hub, "n1").build().unwrap();
    node.initialize().await.unwrap();

    let a = node.post(event("a"), 60_000).await.unwrap();
    let b = node.post(event("b"), 60_000).await.unwrap();
    assert_ne!(a, b);
    assert_eq!(node.stats().await.unwrap().pending, 2);
}

#[tokio::test]
async fn test_cancel_before_fire() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let hub = LocalWakeHub::new();
    let (node, mut rx) = start(builder(&store, &hub, "n1")).await;

    let id = node.post(event("never"), 300).await.unwrap();
    assert!(node.cancel(&id).await.unwrap());
    assert!(!node.cancel(&id).await.unwrap());

    assert!(next_event(&mut rx, Duration::from_millis(600)).await.is_none());
    node.leave().await.unwrap();
}

#[tokio::test]
async fn test_unconfirmed_event_is_redelivered() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let hub = LocalWakeHub::new();
    let (node, mut rx) = start(
        builder(&store, &hub, "n1").with_lease_duration(Duration::from_millis(200)),
    )
    .await;

    node.post(event("flaky").with_max_retries(2), 0).await.unwrap();

    let mut retries = Vec::new();
    while let Some(record) = next_event(&mut rx, Duration::from_millis(800)).await {
        retries.push(record.retry_count);
    }
    assert_eq!(retries, vec![0, 1, 2]);

    let stats = node.stats().await.unwrap();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.leased, 0);
    node.leave().await.unwrap();
}

#[tokio::test]
async fn test_confirm_stops_redelivery() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let hub = LocalWakeHub::new();
    let (node, mut rx) = start(
        builder(&store, &hub, "n1").with_lease_duration(Duration::from_millis(200)),
    )
    .await;

    node.post(event("once").with_max_retries(5), 0).await.unwrap();
    let record = next_event(&mut rx, Duration::from_secs(2)).await.unwrap();
    assert!(node.confirm(&record.id).await.unwrap());

    assert!(next_event(&mut rx, Duration::from_millis(600)).await.is_none());
    node.leave().await.unwrap();
}

#[tokio::test]
async fn test_change_delay() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let hub = LocalWakeHub::new();
    let (node, mut rx) = start(builder(&store, &hub, "n1")).await;

    let id = node.post(event("later"), 60_000).await.unwrap();
    assert!(node.peek(&id).await.unwrap().unwrap().remaining_ms > 50_000);

    assert!(node.change_delay(&id, 100).await.unwrap());
    let record = next_event(&mut rx, Duration::from_secs(2)).await.unwrap();
    assert_eq!(record.id, id);

    // delivered events are leased, not pending
    assert!(!node.change_delay(&id, 100).await.unwrap());
    assert!(node.peek(&id).await.unwrap().is_none());
    node.leave().await.unwrap();
}

#[tokio::test]
async fn test_upcoming_lists_pending_events() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let hub = LocalWakeHub::new();
    let (node, _rx) = builder(&store, &hub, "n1").build().unwrap();
    node.initialize().await.unwrap();

    node.post(event("a").with_id("a"), 10_000).await.unwrap();
    node.post(event("b").with_id("b"), 20_000).await.unwrap();
    node.post(event("c").with_id("c"), 30_000).await.unwrap();

    let listed = node.upcoming(UpcomingOptions::new()).await.unwrap();
    assert_eq!(listed.len(), 3);

    let window = node
        .upcoming(UpcomingOptions::new().with_duration_ms(15_000))
        .await
        .unwrap();
    assert_eq!(window.keys().collect::<Vec<_>>(), vec!["a"]);
}

#[tokio::test]
async fn test_nodes_share_backlog() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let hub = LocalWakeHub::new();

    let mut receivers = Vec::new();
    let mut nodes = Vec::new();
    for id in ["n1", "n2", "n3"] {
        let (node, rx) = start(
            builder(&store, &hub, id)
                .with_max_events(1)
                .with_interval_bounds(Duration::from_millis(50), Duration::from_secs(5)),
        )
        .await;
        nodes.push(node);
        receivers.push(rx);
    }

    for i in 0..3 {
        nodes[0].post(event(&format!("job {}", i)), 0).await.unwrap();
    }

    let mut seen = HashSet::new();
    for rx in receivers.iter_mut() {
        let record = next_event(rx, Duration::from_secs(2)).await.unwrap();
        assert!(seen.insert(record.id));
    }
    for rx in receivers.iter_mut() {
        assert!(next_event(rx, Duration::from_millis(200)).await.is_none());
    }

    for node in &nodes {
        node.leave().await.unwrap();
    }
}

#[tokio::test]
async fn test_join_leave_lifecycle() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let hub = LocalWakeHub::new();
    let (node, _rx) = builder(&store, &hub, "n1").build().unwrap();
    node.initialize().await.unwrap();

    assert!(matches!(node.leave().await, Err(SchedulerError::NotJoined)));

    node.join().await.unwrap();
    assert!(matches!(node.join().await, Err(SchedulerError::AlreadyJoined)));
    assert_eq!(node.stats().await.unwrap().members, vec!["n1"]);
    assert_eq!(hub.channels(), vec!["dtimer.node.n1".to_string()]);

    node.leave().await.unwrap();
    assert_eq!(node.state(), NodeState::Left);
    assert!(node.stats().await.unwrap().members.is_empty());
    assert!(hub.channels().is_empty());

    node.join().await.unwrap();
    assert_eq!(node.stats().await.unwrap().members, vec!["n1"]);
    node.leave().await.unwrap();
}

#[tokio::test]
async fn test_post_only_node() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let hub = LocalWakeHub::new();
    let (worker, mut rx) = start(builder(&store, &hub, "worker")).await;

    let (poster, _poster_rx) = TimerNode::builder(store.clone())
        .with_wake_channel(Arc::new(hub.clone()))
        .build()
        .unwrap();
    poster.initialize().await.unwrap();
    assert!(matches!(poster.join().await, Err(SchedulerError::NoSubscriber)));
    assert!(matches!(poster.leave().await, Err(SchedulerError::NoSubscriber)));

    let id = poster.post(event("from afar"), 50).await.unwrap();
    let record = next_event(&mut rx, Duration::from_secs(2)).await.unwrap();
    assert_eq!(record.id, id);
    assert!(poster.confirm(&id).await.unwrap());
    worker.leave().await.unwrap();
}

#[tokio::test]
async fn test_malformed_hint_is_reported() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let hub = LocalWakeHub::new();
    let (node, mut rx) = start(builder(&store, &hub, "n1")).await;
    assert!(matches!(rx.recv().await, Some(TimerNotification::Ready)));

    hub.publish("dtimer.node.n1", b"{oops").unwrap();
    let notification = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap();
    assert!(matches!(
        notification,
        Some(TimerNotification::Error(SchedulerError::Bus(_)))
    ));

    // the loop keeps running
    node.post(event("still alive"), 0).await.unwrap();
    assert!(next_event(&mut rx, Duration::from_secs(2)).await.is_some());
    node.leave().await.unwrap();
}

#[tokio::test]
async fn test_set_max_events() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let hub = LocalWakeHub::new();
    let (node, _rx) = builder(&store, &hub, "n1").build().unwrap();
    assert_eq!(node.max_events(), 8);

    node.set_max_events(3);
    assert_eq!(node.max_events(), 3);

    node.set_max_events(0);
    assert_eq!(node.max_events(), 8);
}

#[tokio::test]
async fn test_leave_completes_when_consumer_stops_draining() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let hub = LocalWakeHub::new();
    let (node, _rx) = TimerNode::builder(store.clone())
        .with_config(NodeConfig::new().with_notification_capacity(2))
        .with_node_id("n1")
        .with_wake_channel(Arc::new(hub.clone()))
        .with_interval_bounds(Duration::from_millis(10), Duration::from_secs(5))
        .build()
        .unwrap();
    node.initialize().await.unwrap();
    for i in 0..4 {
        node.post(event(&format!("job {}", i)), 0).await.unwrap();
    }
    // Ready plus one event fill the channel; the second event blocks
    node.join().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let left = tokio::time::timeout(Duration::from_secs(2), node.leave()).await;
    assert!(matches!(left, Ok(Ok(()))));

    // events that were not handed over stay leased for redelivery
    assert_eq!(node.stats().await.unwrap().leased, 4);
}

#[tokio::test]
async fn test_failed_poll_backs_off_and_recovers() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let hub = LocalWakeHub::new();
    let flaky = Arc::new(FlakyStore::new(store.clone()));

    let (worker, mut rx) = start(
        TimerNode::builder(flaky.clone())
            .with_node_id("worker")
            .with_wake_channel(Arc::new(hub.clone()))
            .with_interval_bounds(Duration::from_millis(10), Duration::from_secs(5))
            .with_backoff(Duration::from_millis(300)),
    )
    .await;
    flaky.fail_next(2);

    let (poster, _poster_rx) = TimerNode::builder(store.clone())
        .with_wake_channel(Arc::new(hub.clone()))
        .build()
        .unwrap();
    poster.initialize().await.unwrap();

    let posted = Instant::now();
    poster.post(event("eventually"), 0).await.unwrap();

    let mut failures = 0;
    let record = loop {
        let notification = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .unwrap();
        match notification {
            Some(TimerNotification::Error(e)) => {
                assert!(e.is_transport());
                failures += 1;
            }
            Some(TimerNotification::Event(record)) => break record,
            Some(TimerNotification::Ready) => {}
            None => panic!("notification channel closed"),
        }
    };

    assert_eq!(failures, 2);
    assert!(posted.elapsed() >= Duration::from_millis(600));
    assert_eq!(record.payload.get("msg"), Some(&json!("eventually")));
    worker.leave().await.unwrap();
}

#[tokio::test]
async fn test_long_hint_does_not_delay_armed_timer() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let hub = LocalWakeHub::new();
    let (worker, mut rx) = start(
        builder(&store, &hub, "worker")
            .with_interval_bounds(Duration::from_millis(10), Duration::from_millis(400)),
    )
    .await;

    // no wake channel, so the worker only learns of the event on its heartbeat
    let (poster, _poster_rx) = TimerNode::builder(store.clone()).build().unwrap();
    poster.initialize().await.unwrap();
    poster.post(event("on heartbeat"), 0).await.unwrap();

    hub.publish("dtimer.node.worker", br#"{"interval":60000}"#)
        .unwrap();

    let record = next_event(&mut rx, Duration::from_secs(2)).await;
    assert_eq!(
        record.unwrap().payload.get("msg"),
        Some(&json!("on heartbeat"))
    );
    worker.leave().await.unwrap();
}
