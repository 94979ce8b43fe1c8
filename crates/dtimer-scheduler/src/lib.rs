//! dtimer scheduler
//!
//! A distributed delayed-event dispatcher: a pool of nodes shares a backlog
//! of timed events in one transactional store, and exactly one node at a
//! time claims and delivers each event when its fire time arrives. Delivered
//! events stay leased until confirmed; an unconfirmed lease expires and the
//! event is redelivered until its retry budget runs out.
//!
//! # Architecture
//!
//! 1. **Event store**: pending index, lease index, payloads, membership ring
//!    and round-robin cursor, all inside the shared store
//! 2. **Protocol**: the atomic update (lease expiry, claim, next interval,
//!    wake hint), cancel-from-index and reschedule
//! 3. **Wake channel**: best-effort hints that shorten another node's sleep
//! 4. **Timer node**: join/leave lifecycle and the polling loop that delivers
//!    claimed events on a notification channel
//!
//! # Example
//!
//! ```ignore
//! use dtimer_lmdb::LmdbScheduleStore;
//! use dtimer_scheduler::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let store = Arc::new(LmdbScheduleStore::open(StoreConfig::new("./timers"))?);
//!     let hub: Arc<dyn WakeChannel> = Arc::new(LocalWakeHub::new());
//!
//!     let (node, mut notifications) = TimerNode::builder(store)
//!         .with_node_id("worker-1")
//!         .with_wake_channel(hub)
//!         .with_max_events(4)
//!         .build()?;
//!     node.initialize().await?;
//!     node.join().await?;
//!
//!     let mut payload = serde_json::Map::new();
//!     payload.insert("msg".into(), "hello".into());
//!     node.post(NewEvent::new(payload).with_max_retries(2), 1_000).await?;
//!
//!     while let Some(notification) = notifications.recv().await {
//!         if let TimerNotification::Event(event) = notification {
//!             println!("fired: {}", event.id);
//!             node.confirm(&event.id).await?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod event_store;
pub mod keyspace;
pub mod node;
pub mod notification;
pub mod protocol;
pub mod ring;

pub mod prelude;

// Re-export main types
pub use config::{IntervalBounds, NodeConfig};
pub use error::{Result, SchedulerError};
pub use event::{parse_delay_ms, EventRecord, NewEvent};
pub use event_store::{EventStore, StoredEvent};
pub use keyspace::{Index, Keyspace};
pub use node::{TimerNode, TimerNodeBuilder};
pub use notification::{NodePhase, NodeState, TimerNotification};
pub use protocol::{
    PeekedEvent, PlannedHint, ScheduleStats, SchedulerProtocol, UpcomingEvent, UpcomingOptions,
    UpdateOutcome,
};
pub use ring::{MembershipRing, ScheduleCursor};
