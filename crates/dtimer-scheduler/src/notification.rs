//! What a node reports to its consumer, and the node's lifecycle states.

use crate::error::SchedulerError;
use crate::event::EventRecord;

/// Message delivered on a node's notification channel.
#[derive(Debug)]
pub enum TimerNotification {
    /// Initialization finished; operations are accepted from now on.
    Ready,
    /// An event claimed by this node. Confirm it to stop redelivery.
    Event(EventRecord),
    /// A failure inside the node's own loop or a corrupt record or hint.
    Error(SchedulerError),
}

/// Startup phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodePhase {
    Uninitialized,
    Ready,
    Failed,
}

/// Membership and timer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Never joined.
    Idle,
    /// Registered, loop starting.
    Joined,
    /// Sleeping until the timer fires or a hint shortens it.
    Armed,
    /// Running an update.
    Polling,
    /// Left the ring; may join again.
    Left,
}
