//! Error types for the scheduler.

use dtimer_bus::BusError;
use dtimer_core::DTimerError;
use thiserror::Error;

/// Result type for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Errors that can occur in the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Malformed caller input, rejected before any store access.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The store failed or rejected a transaction.
    #[error("Transport error: {0}")]
    Transport(#[from] DTimerError),

    /// A stored record or wire message could not be decoded.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Wake channel error.
    #[error("Wake channel error: {0}")]
    Bus(#[from] BusError),

    /// The node has not finished initializing, or initialization failed.
    #[error("Node is not ready")]
    NotReady,

    /// `leave` was called on a node that is not joined.
    #[error("Node has not joined")]
    NotJoined,

    /// `join` was called on a node that is already joined.
    #[error("Node has already joined")]
    AlreadyJoined,

    /// The node has no wake channel or no identity to subscribe with.
    #[error("No wake channel subscription configured")]
    NoSubscriber,

    /// A blocking store task panicked or was cancelled.
    #[error("Task join error: {0}")]
    Join(String),

    /// An operation did not complete in time.
    #[error("Timed out: {0}")]
    Timeout(String),
}

impl SchedulerError {
    /// Caller input was rejected.
    pub fn is_validation(&self) -> bool {
        matches!(self, SchedulerError::Validation(_))
    }

    /// The store or channel could not be reached.
    pub fn is_transport(&self) -> bool {
        match self {
            SchedulerError::Transport(_) | SchedulerError::Join(_) | SchedulerError::Timeout(_) => {
                true
            }
            SchedulerError::Bus(e) => !matches!(e, BusError::MalformedHint(_)),
            _ => false,
        }
    }

    /// A record or message was corrupt.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            SchedulerError::Protocol(_) | SchedulerError::Bus(BusError::MalformedHint(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(SchedulerError::Validation("bad".into()).is_validation());
        assert!(SchedulerError::Transport(DTimerError::Transaction("down".into())).is_transport());
        assert!(SchedulerError::Bus(BusError::MalformedHint("x".into())).is_protocol());
        assert!(!SchedulerError::Bus(BusError::MalformedHint("x".into())).is_transport());
        assert!(SchedulerError::Protocol("corrupt".into()).is_protocol());
        assert!(!SchedulerError::NotReady.is_transport());
    }
}
