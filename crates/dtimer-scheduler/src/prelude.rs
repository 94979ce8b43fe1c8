//! Convenience re-exports for common types.

pub use crate::config::{IntervalBounds, NodeConfig};
pub use crate::error::{Result, SchedulerError};
pub use crate::event::{EventRecord, NewEvent};
pub use crate::keyspace::Index;
pub use crate::node::{TimerNode, TimerNodeBuilder};
pub use crate::notification::{NodePhase, NodeState, TimerNotification};
pub use crate::protocol::{PeekedEvent, UpcomingEvent, UpcomingOptions};
pub use dtimer_bus::{LocalWakeHub, WakeChannel};
pub use dtimer_core::{ScheduleStore, StoreConfig};
