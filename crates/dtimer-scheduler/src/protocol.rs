//! The atomic scheduling algorithms.
//!
//! Every operation here runs inside a single store write transaction, so
//! concurrent callers on any node observe them as if they ran one at a time.
//! Wake hints are published only after the transaction commits.

use crate::config::IntervalBounds;
use crate::error::{Result, SchedulerError};
use crate::event::EventRecord;
use crate::event_store::{EventStore, StoredEvent};
use crate::keyspace::{Index, Keyspace};
use crate::ring::{MembershipRing, ScheduleCursor};
use dtimer_bus::{WakeChannel, WakeHint};
use dtimer_core::{observe, ScheduleRead, ScheduleStore, ScheduleTxn, ScoreRange};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Result of one update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    /// Events claimed for the caller, in claim order.
    pub claimed: Vec<EventRecord>,
    /// Milliseconds until the caller should poll again.
    pub interval_ms: u64,
    /// Ids whose stored payload could not be decoded and were dropped.
    pub corrupt: Vec<String>,
}

/// A wake hint decided inside a transaction, published after commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedHint {
    pub node_id: String,
    pub interval_ms: u64,
}

#[derive(Debug, Default)]
struct UpdateReport {
    outcome: UpdateOutcome,
    hints: Vec<PlannedHint>,
    retried: u64,
    dropped: u64,
}

/// A pending event and the time left until it fires.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeekedEvent {
    pub remaining_ms: u64,
    pub event: EventRecord,
}

/// A pending event and its absolute fire time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpcomingEvent {
    pub expire_at: i64,
    pub event: EventRecord,
}

/// Window for listing pending events, relative to the store's clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpcomingOptions {
    /// Start of the window relative to now. May be negative to include
    /// overdue events.
    pub offset_ms: i64,
    /// Length of the window. Unbounded when `None`.
    pub duration_ms: Option<u64>,
    /// Maximum number of entries, earliest first. Unbounded when `None`.
    pub limit: Option<usize>,
}

impl UpcomingOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_offset_ms(mut self, offset_ms: i64) -> Self {
        self.offset_ms = offset_ms;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn range(&self, now: i64) -> ScoreRange {
        let low = now.saturating_add(self.offset_ms);
        let high = match self.duration_ms {
            Some(duration) => low.saturating_add(duration.min(i64::MAX as u64) as i64),
            None => i64::MAX,
        };
        let range = ScoreRange::new(low, high);
        match self.limit {
            Some(limit) => range.with_limit(limit),
            None => range,
        }
    }
}

/// Counts and horizon of a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleStats {
    pub pending: usize,
    pub leased: usize,
    pub members: Vec<String>,
    pub horizon: Option<i64>,
    pub now: i64,
}

fn earliest(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Scheduling protocol over a shared store.
pub struct SchedulerProtocol<S: ScheduleStore> {
    store: Arc<S>,
    events: EventStore,
    wake: Option<Arc<dyn WakeChannel>>,
    bounds: IntervalBounds,
}

impl<S: ScheduleStore> SchedulerProtocol<S> {
    pub fn new(
        store: Arc<S>,
        keys: Keyspace,
        wake: Option<Arc<dyn WakeChannel>>,
        bounds: IntervalBounds,
    ) -> Self {
        Self {
            store,
            events: EventStore::new(keys),
            wake,
            bounds,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn keys(&self) -> &Keyspace {
        self.events.keys()
    }

    /// Current time on the store's clock.
    pub fn now_ms(&self) -> i64 {
        self.store.now_ms()
    }

    /// Expire leases, claim due events for `caller`, compute the next
    /// interval and hint other nodes.
    ///
    /// `caller = None` is a housekeeping run: nothing is claimed and the next
    /// ring member is hinted if the schedule's horizon moved earlier.
    pub fn update(
        &self,
        caller: Option<&str>,
        max_claim: usize,
        lease_ms: u64,
    ) -> Result<UpdateOutcome> {
        let started = Instant::now();
        let now = self.store.now_ms();
        let mut txn = self.store.write_txn()?;
        let report = self.run_update(&mut txn, now, caller, max_claim, lease_ms)?;
        txn.commit()?;
        observe::record_update(started.elapsed(), caller.is_some());
        Ok(self.finish(report))
    }

    /// Admit `record` to fire `delay_ms` from now, then run housekeeping.
    pub fn post(&self, record: &EventRecord, delay_ms: u64) -> Result<UpdateOutcome> {
        let now = self.store.now_ms();
        let fire_at = now.saturating_add(delay_ms.min(i64::MAX as u64) as i64);
        let mut txn = self.store.write_txn()?;
        self.events.admit(&mut txn, record, fire_at)?;
        let report = self.run_update(&mut txn, now, None, 0, 0)?;
        txn.commit()?;
        debug!(event_id = %record.id, fire_at, "Posted event");
        Ok(self.finish(report))
    }

    /// Remove `id` from `index` and delete its payload, then run
    /// housekeeping. Returns whether the event was there.
    ///
    /// Targeting [`Index::Pending`] cancels an event that has not fired;
    /// targeting [`Index::Leased`] confirms a delivered one.
    pub fn cancel(&self, id: &str, index: Index) -> Result<bool> {
        let now = self.store.now_ms();
        let mut txn = self.store.write_txn()?;
        let removed = txn.set_remove(self.keys().index(index), id)?;
        if removed {
            txn.hash_del(&self.keys().events, id)?;
        }
        let report = self.run_update(&mut txn, now, None, 0, 0)?;
        txn.commit()?;
        debug!(event_id = %id, ?index, removed, "Removed event");
        self.finish(report);
        Ok(removed)
    }

    /// Move a pending event to `fire_at`, then run housekeeping. Leased and
    /// unknown events are left alone and yield `false`.
    pub fn reschedule(&self, id: &str, fire_at: i64) -> Result<bool> {
        let now = self.store.now_ms();
        let mut txn = self.store.write_txn()?;
        let moved = if txn.score(&self.keys().pending, id)?.is_some() {
            txn.set_insert(&self.keys().pending, id, fire_at)?;
            true
        } else {
            false
        };
        let report = self.run_update(&mut txn, now, None, 0, 0)?;
        txn.commit()?;
        self.finish(report);
        Ok(moved)
    }

    /// Reschedule `id` to fire `delay_ms` from now.
    pub fn reschedule_after(&self, id: &str, delay_ms: u64) -> Result<bool> {
        let fire_at = self
            .store
            .now_ms()
            .saturating_add(delay_ms.min(i64::MAX as u64) as i64);
        self.reschedule(id, fire_at)
    }

    /// Register `node_id` in the ring and run housekeeping.
    pub fn join_member(&self, node_id: &str) -> Result<UpdateOutcome> {
        self.with_ring(|ring| ring.join(node_id))
    }

    /// Remove `node_id` from the ring and run housekeeping.
    pub fn leave_member(&self, node_id: &str) -> Result<UpdateOutcome> {
        self.with_ring(|ring| {
            ring.leave(node_id);
        })
    }

    fn with_ring(&self, change: impl FnOnce(&mut MembershipRing)) -> Result<UpdateOutcome> {
        let now = self.store.now_ms();
        let mut txn = self.store.write_txn()?;
        let mut ring = MembershipRing::load(&txn, &self.keys().members)?;
        change(&mut ring);
        ring.save(&mut txn, &self.keys().members)?;
        let report = self.run_update(&mut txn, now, None, 0, 0)?;
        txn.commit()?;
        Ok(self.finish(report))
    }

    /// A pending event and the time until it fires.
    pub fn peek(&self, id: &str) -> Result<Option<PeekedEvent>> {
        let now = self.store.now_ms();
        let txn = self.store.read_txn()?;
        let Some(fire_at) = txn.score(&self.keys().pending, id)? else {
            return Ok(None);
        };
        match self.events.load(&txn, id)? {
            Some(StoredEvent::Decoded(event)) => Ok(Some(PeekedEvent {
                remaining_ms: fire_at.saturating_sub(now).max(0) as u64,
                event,
            })),
            Some(StoredEvent::Corrupt(reason)) => Err(SchedulerError::Protocol(format!(
                "event {}: {}",
                id, reason
            ))),
            None => Ok(None),
        }
    }

    /// Pending events inside the window described by `options`.
    pub fn upcoming(&self, options: &UpcomingOptions) -> Result<BTreeMap<String, UpcomingEvent>> {
        let now = self.store.now_ms();
        let txn = self.store.read_txn()?;
        let entries = self
            .events
            .range_by_score(&txn, Index::Pending, &options.range(now))?;
        let ids: Vec<&str> = entries.iter().map(|e| e.member.as_str()).collect();
        let mut records: BTreeMap<String, EventRecord> = self
            .events
            .get_payloads(&txn, &ids)?
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();

        Ok(entries
            .iter()
            .filter_map(|entry| {
                records.remove(&entry.member).map(|event| {
                    (
                        entry.member.clone(),
                        UpcomingEvent {
                            expire_at: entry.score,
                            event,
                        },
                    )
                })
            })
            .collect())
    }

    pub fn stats(&self) -> Result<ScheduleStats> {
        let now = self.store.now_ms();
        let txn = self.store.read_txn()?;
        let keys = self.keys();
        let first_pending = txn.first_by_score(&keys.pending)?.map(|m| m.score);
        let first_lease = txn.first_by_score(&keys.leases)?.map(|m| m.score);
        Ok(ScheduleStats {
            pending: txn.set_len(&keys.pending)?,
            leased: txn.set_len(&keys.leases)?,
            members: MembershipRing::load(&txn, &keys.members)?.members().to_vec(),
            horizon: earliest(first_pending, first_lease),
            now,
        })
    }

    fn run_update<T: ScheduleTxn>(
        &self,
        txn: &mut T,
        now: i64,
        caller: Option<&str>,
        max_claim: usize,
        lease_ms: u64,
    ) -> Result<UpdateReport> {
        let keys = self.events.keys();
        let mut report = UpdateReport::default();

        // Lease expiry
        for lease in txn.range_by_score(&keys.leases, &ScoreRange::up_to(now))? {
            let id = lease.member;
            match self.events.load(&*txn, &id)? {
                Some(StoredEvent::Decoded(mut record))
                    if record.retry_count < record.max_retries =>
                {
                    record.retry_count += 1;
                    self.events.save(txn, &record)?;
                    self.events.move_to(txn, &id, Index::Pending, now)?;
                    report.retried += 1;
                    debug!(
                        event_id = %id,
                        retry_count = record.retry_count,
                        "Lease expired, requeued"
                    );
                }
                Some(StoredEvent::Decoded(_)) => {
                    self.events.drop_everywhere(txn, &id)?;
                    report.dropped += 1;
                    debug!(event_id = %id, "Lease expired, retries exhausted");
                }
                Some(StoredEvent::Corrupt(reason)) => {
                    error!(event_id = %id, reason = %reason, "Dropping corrupt event");
                    self.events.drop_everywhere(txn, &id)?;
                    report.outcome.corrupt.push(id);
                }
                None => {
                    txn.set_remove(&keys.leases, &id)?;
                }
            }
        }

        // Claim
        let mut saturated = false;
        if let Some(caller) = caller.filter(|_| max_claim > 0) {
            let due = txn.range_by_score(
                &keys.pending,
                &ScoreRange::up_to(now).with_limit(max_claim),
            )?;
            let deadline = now.saturating_add(lease_ms.min(i64::MAX as u64) as i64);
            for entry in due {
                let id = entry.member;
                match self.events.load(&*txn, &id)? {
                    Some(StoredEvent::Decoded(record)) => {
                        self.events.move_to(txn, &id, Index::Leased, deadline)?;
                        report.outcome.claimed.push(record);
                    }
                    Some(StoredEvent::Corrupt(reason)) => {
                        error!(event_id = %id, reason = %reason, "Dropping corrupt event");
                        self.events.drop_everywhere(txn, &id)?;
                        report.outcome.corrupt.push(id);
                    }
                    None => {
                        txn.set_remove(&keys.pending, &id)?;
                    }
                }
            }
            // Dropped entries do not count toward a full batch
            saturated = report.outcome.claimed.len() >= max_claim;
            if !report.outcome.claimed.is_empty() {
                debug!(
                    node_id = %caller,
                    claimed = report.outcome.claimed.len(),
                    deadline,
                    "Claimed events"
                );
            }
        }

        // Interval
        let first_pending = txn.first_by_score(&keys.pending)?.map(|m| m.score);
        let first_lease = txn.first_by_score(&keys.leases)?.map(|m| m.score);
        let horizon = earliest(first_pending, first_lease);
        report.outcome.interval_ms = self.bounds.interval(horizon, now);

        // Wake hints
        let mut cursor = ScheduleCursor::load(&*txn, &keys.cursor)?;
        match caller {
            Some(caller) if saturated && first_pending.is_some_and(|at| at <= now) => {
                // Hand the due backlog to another member instead of claiming
                // it all on the next poll.
                let ring = MembershipRing::load(&*txn, &keys.members)?;
                if let Some((member, next)) = ring.next(cursor.next, Some(caller)) {
                    report.hints.push(PlannedHint {
                        node_id: member.to_string(),
                        interval_ms: self.bounds.interval(first_pending, now),
                    });
                    cursor.next = next;

                    let not_due_range = ScoreRange::starting_at(now.saturating_add(1)).with_limit(1);
                    let not_due = txn
                        .range_by_score(&keys.pending, &not_due_range)?
                        .first()
                        .map(|m| m.score);
                    report.outcome.interval_ms =
                        self.bounds.interval(earliest(not_due, first_lease), now);
                }
            }
            Some(_) => {}
            None => {
                let sooner = match (horizon, cursor.horizon) {
                    (Some(new), Some(recorded)) => new < recorded,
                    (Some(_), None) => true,
                    (None, _) => false,
                };
                if sooner {
                    let ring = MembershipRing::load(&*txn, &keys.members)?;
                    if let Some((member, next)) = ring.next(cursor.next, None) {
                        report.hints.push(PlannedHint {
                            node_id: member.to_string(),
                            interval_ms: report.outcome.interval_ms,
                        });
                        cursor.next = next;
                    }
                }
            }
        }
        cursor.horizon = horizon;
        cursor.save(txn, &keys.cursor)?;

        Ok(report)
    }

    /// Publish planned hints and record metrics once the transaction has
    /// committed.
    fn finish(&self, report: UpdateReport) -> UpdateOutcome {
        observe::record_update_outcome(
            report.outcome.claimed.len() as u64,
            report.retried,
            report.dropped + report.outcome.corrupt.len() as u64,
        );
        for hint in &report.hints {
            self.publish_hint(hint);
        }
        report.outcome
    }

    fn publish_hint(&self, hint: &PlannedHint) {
        let Some(wake) = &self.wake else {
            debug!(node_id = %hint.node_id, "No wake channel, hint skipped");
            return;
        };
        let channel = self.keys().channel_for(&hint.node_id);
        let published = WakeHint::new(hint.interval_ms)
            .encode()
            .and_then(|message| wake.publish(&channel, &message));
        match published {
            Ok(receivers) => {
                debug!(
                    node_id = %hint.node_id,
                    interval_ms = hint.interval_ms,
                    receivers,
                    "Published wake hint"
                );
                observe::record_hint(true);
            }
            Err(e) => {
                warn!(node_id = %hint.node_id, error = %e, "Failed to publish wake hint");
                observe::record_hint(false);
            }
        }
    }
}
