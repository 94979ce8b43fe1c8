//! Names of the store structures that make up one schedule.

use crate::error::{Result, SchedulerError};

/// Which index an event sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Index {
    /// Waiting for its fire time, scored by `fireAt`.
    Pending,
    /// Delivered and awaiting confirmation, scored by lease deadline.
    Leased,
}

/// Key names derived from a namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyspace {
    namespace: String,
    pub pending: String,
    pub leases: String,
    pub events: String,
    pub members: String,
    pub cursor: String,
}

impl Keyspace {
    pub fn new(namespace: &str) -> Result<Self> {
        if namespace.is_empty() {
            return Err(SchedulerError::Validation(
                "namespace must be a non-empty string".into(),
            ));
        }
        if namespace.contains('\0') {
            return Err(SchedulerError::Validation(
                "namespace must not contain NUL".into(),
            ));
        }

        Ok(Self {
            namespace: namespace.to_string(),
            pending: format!("{}.pending", namespace),
            leases: format!("{}.leases", namespace),
            events: format!("{}.events", namespace),
            members: format!("{}.members", namespace),
            cursor: format!("{}.cursor", namespace),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn index(&self, index: Index) -> &str {
        match index {
            Index::Pending => &self.pending,
            Index::Leased => &self.leases,
        }
    }

    /// Wake channel a node subscribes to.
    pub fn channel_for(&self, node_id: &str) -> String {
        format!("{}.node.{}", self.namespace, node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        let keys = Keyspace::new("jobs").unwrap();
        assert_eq!(keys.index(Index::Pending), "jobs.pending");
        assert_eq!(keys.index(Index::Leased), "jobs.leases");
        assert_eq!(keys.channel_for("worker-1"), "jobs.node.worker-1");
        assert_eq!(keys.namespace(), "jobs");
    }

    #[test]
    fn test_invalid_namespace() {
        assert!(Keyspace::new("").unwrap_err().is_validation());
        assert!(Keyspace::new("a\0b").unwrap_err().is_validation());
    }
}
