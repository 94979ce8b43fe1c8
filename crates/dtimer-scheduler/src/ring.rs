//! Membership ring and round-robin cursor.

use crate::error::{Result, SchedulerError};
use dtimer_core::{ScheduleRead, ScheduleTxn};
use serde::{Deserialize, Serialize};

/// Joined node ids, most recently joined first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MembershipRing {
    members: Vec<String>,
}

impl MembershipRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load<T: ScheduleRead>(txn: &T, key: &str) -> Result<Self> {
        match txn.get_value(key)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| SchedulerError::Protocol(format!("membership ring: {}", e))),
            None => Ok(Self::default()),
        }
    }

    pub fn save<T: ScheduleTxn>(&self, txn: &mut T, key: &str) -> Result<()> {
        let bytes =
            serde_json::to_vec(self).map_err(|e| SchedulerError::Protocol(e.to_string()))?;
        txn.put_value(key, &bytes)?;
        Ok(())
    }

    /// Move `node_id` to the head, removing any earlier occurrence.
    pub fn join(&mut self, node_id: &str) {
        self.leave(node_id);
        self.members.insert(0, node_id.to_string());
    }

    /// Remove every occurrence of `node_id`. Returns whether it was present.
    pub fn leave(&mut self, node_id: &str) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m != node_id);
        self.members.len() != before
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    /// Round-robin pick starting at `cursor`, passing over `skip`.
    ///
    /// Returns the chosen member and the cursor value for the following pick.
    pub fn next(&self, cursor: usize, skip: Option<&str>) -> Option<(&str, usize)> {
        let len = self.members.len();
        (0..len)
            .map(|step| (cursor + step) % len)
            .find(|&i| Some(self.members[i].as_str()) != skip)
            .map(|i| (self.members[i].as_str(), (i + 1) % len))
    }
}

/// Persisted round-robin position and the horizon seen by the last update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleCursor {
    /// Ring position of the next hint target.
    pub next: usize,
    /// Earliest fire time or lease deadline after the last update.
    pub horizon: Option<i64>,
}

impl ScheduleCursor {
    pub fn load<T: ScheduleRead>(txn: &T, key: &str) -> Result<Self> {
        match txn.get_value(key)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| SchedulerError::Protocol(format!("schedule cursor: {}", e))),
            None => Ok(Self::default()),
        }
    }

    pub fn save<T: ScheduleTxn>(&self, txn: &mut T, key: &str) -> Result<()> {
        let bytes =
            serde_json::to_vec(self).map_err(|e| SchedulerError::Protocol(e.to_string()))?;
        txn.put_value(key, &bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(ids: &[&str]) -> MembershipRing {
        let mut ring = MembershipRing::new();
        for id in ids.iter().rev() {
            ring.join(id);
        }
        ring
    }

    #[test]
    fn test_join_moves_to_head_without_duplicates() {
        let mut ring = MembershipRing::new();
        ring.join("a");
        ring.join("b");
        ring.join("a");
        assert_eq!(ring.members(), &["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_leave_removes_member() {
        let mut ring = ring(&["a", "b", "c"]);
        assert!(ring.leave("b"));
        assert!(!ring.leave("b"));
        assert_eq!(ring.members(), &["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_next_round_robin() {
        let ring = ring(&["a", "b", "c"]);
        assert_eq!(ring.next(0, None), Some(("a", 1)));
        assert_eq!(ring.next(1, None), Some(("b", 2)));
        assert_eq!(ring.next(2, None), Some(("c", 0)));
        // stale cursor wraps
        assert_eq!(ring.next(7, None), Some(("b", 2)));
    }

    #[test]
    fn test_next_skips_caller() {
        let pair = ring(&["a", "b"]);
        assert_eq!(pair.next(0, Some("a")), Some(("b", 0)));
        assert_eq!(pair.next(1, Some("a")), Some(("b", 0)));

        let solo = ring(&["a"]);
        assert_eq!(solo.next(0, Some("a")), None);
        assert_eq!(MembershipRing::new().next(0, None), None);
    }

    #[test]
    fn test_cursor_json() {
        let cursor = ScheduleCursor {
            next: 2,
            horizon: Some(1_000),
        };
        let text = serde_json::to_string(&cursor).unwrap();
        assert_eq!(text, r#"{"next":2,"horizon":1000}"#);
    }
}
