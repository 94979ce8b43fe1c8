//! Schedule state primitives over a store transaction.

use crate::error::Result;
use crate::event::EventRecord;
use crate::keyspace::{Index, Keyspace};
use dtimer_core::{ScheduleRead, ScheduleTxn, ScoreRange, ScoredMember};
use tracing::warn;

/// A payload read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredEvent {
    Decoded(EventRecord),
    /// The bytes could not be decoded; carries the reason.
    Corrupt(String),
}

/// Owns the key space of one schedule: pending index, lease index,
/// payload map, membership ring and cursor.
#[derive(Debug, Clone)]
pub struct EventStore {
    keys: Keyspace,
}

impl EventStore {
    pub fn new(keys: Keyspace) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &Keyspace {
        &self.keys
    }

    /// Write the payload and place the event in the pending index.
    ///
    /// An existing event with the same id is replaced, including one that is
    /// currently leased.
    pub fn admit<T: ScheduleTxn>(
        &self,
        txn: &mut T,
        record: &EventRecord,
        fire_at: i64,
    ) -> Result<()> {
        txn.set_remove(&self.keys.leases, &record.id)?;
        self.save(txn, record)?;
        txn.set_insert(&self.keys.pending, &record.id, fire_at)?;
        Ok(())
    }

    /// Remove `id` from both indices and the payload map.
    pub fn drop_everywhere<T: ScheduleTxn>(&self, txn: &mut T, id: &str) -> Result<()> {
        txn.set_remove(&self.keys.pending, id)?;
        txn.set_remove(&self.keys.leases, id)?;
        txn.hash_del(&self.keys.events, id)?;
        Ok(())
    }

    pub fn range_by_score<T: ScheduleRead>(
        &self,
        txn: &T,
        index: Index,
        range: &ScoreRange,
    ) -> Result<Vec<ScoredMember>> {
        Ok(txn.range_by_score(self.keys.index(index), range)?)
    }

    /// Decoded payloads for `ids`. Missing ids yield no entry; corrupt
    /// payloads are logged and skipped.
    pub fn get_payloads<T: ScheduleRead>(
        &self,
        txn: &T,
        ids: &[&str],
    ) -> Result<Vec<EventRecord>> {
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            match self.load(txn, id)? {
                Some(StoredEvent::Decoded(record)) => records.push(record),
                Some(StoredEvent::Corrupt(reason)) => {
                    warn!(event_id = %id, reason = %reason, "Skipping corrupt event payload");
                }
                None => {}
            }
        }
        Ok(records)
    }

    pub fn load<T: ScheduleRead>(&self, txn: &T, id: &str) -> Result<Option<StoredEvent>> {
        Ok(txn.hash_get(&self.keys.events, id)?.map(|bytes| {
            match EventRecord::decode(&bytes) {
                Ok(record) => StoredEvent::Decoded(record),
                Err(e) => StoredEvent::Corrupt(e.to_string()),
            }
        }))
    }

    pub fn save<T: ScheduleTxn>(&self, txn: &mut T, record: &EventRecord) -> Result<()> {
        txn.hash_put(&self.keys.events, &record.id, &record.encode()?)?;
        Ok(())
    }

    /// Move `id` into `index` at `score`, out of the other index.
    pub fn move_to<T: ScheduleTxn>(
        &self,
        txn: &mut T,
        id: &str,
        index: Index,
        score: i64,
    ) -> Result<()> {
        let other = match index {
            Index::Pending => Index::Leased,
            Index::Leased => Index::Pending,
        };
        txn.set_remove(self.keys.index(other), id)?;
        txn.set_insert(self.keys.index(index), id, score)?;
        Ok(())
    }
}
