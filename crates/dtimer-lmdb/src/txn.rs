use dtimer_core::{
    error::{DTimerError, Result},
    traits::{ScheduleRead, ScheduleTxn},
    types::{ScoreRange, ScoredMember},
};
use lmdb::{Cursor, Database, RoTransaction, RwTransaction, Transaction, WriteFlags};
use lmdb_sys::{MDB_NEXT, MDB_SET_RANGE};

use crate::keys;

/// Handles to the databases inside one environment
#[derive(Debug, Clone, Copy)]
pub(crate) struct Dbs {
    pub(crate) set_entries: Database,
    pub(crate) set_scores: Database,
    pub(crate) hashes: Database,
    pub(crate) values: Database,
}

fn txn_err(e: lmdb::Error) -> DTimerError {
    DTimerError::Transaction(e.to_string())
}

fn get_bytes<T: Transaction>(txn: &T, db: Database, key: &[u8]) -> Result<Option<Vec<u8>>> {
    match txn.get(db, &key) {
        Ok(bytes) => Ok(Some(bytes.to_vec())),
        Err(lmdb::Error::NotFound) => Ok(None),
        Err(e) => Err(txn_err(e)),
    }
}

fn read_score<T: Transaction>(txn: &T, dbs: &Dbs, set: &str, member: &str) -> Result<Option<i64>> {
    match get_bytes(txn, dbs.set_scores, &keys::field_key(set, member))? {
        Some(bytes) => keys::decode_score(&bytes).map(Some).ok_or_else(|| {
            DTimerError::Serialization(format!("Corrupt score for {}/{}", set, member))
        }),
        None => Ok(None),
    }
}

/// Visit keys of `db` from the first key at or after `start`, in order,
/// until `visit` returns `false`.
///
/// `Cursor::iter_from` unwraps the positioning lookup, which fails with
/// `NotFound` when `start` sorts after every key, so the cursor is stepped
/// by hand here.
fn scan_from<T, F>(txn: &T, db: Database, start: &[u8], mut visit: F) -> Result<()>
where
    T: Transaction,
    F: FnMut(&[u8]) -> Result<bool>,
{
    let cursor = txn.open_ro_cursor(db).map_err(txn_err)?;
    let mut step = cursor.get(Some(start), None, MDB_SET_RANGE);
    loop {
        let key = match step {
            Ok((Some(key), _)) => key,
            Ok((None, _)) | Err(lmdb::Error::NotFound) => return Ok(()),
            Err(e) => return Err(txn_err(e)),
        };
        if !visit(key)? {
            return Ok(());
        }
        step = cursor.get(None, None, MDB_NEXT);
    }
}

fn read_range<T: Transaction>(
    txn: &T,
    dbs: &Dbs,
    set: &str,
    range: &ScoreRange,
) -> Result<Vec<ScoredMember>> {
    let mut results = Vec::new();
    if range.is_empty() {
        return Ok(results);
    }

    let prefix = keys::name_prefix(set);
    let start = keys::entry_key(set, range.low, "");

    scan_from(txn, dbs.set_entries, &start, |key| {
        if !key.starts_with(&prefix) {
            return Ok(false);
        }
        let (score, member) = keys::split_entry(&key[prefix.len()..])
            .ok_or_else(|| DTimerError::Serialization(format!("Corrupt entry key in {}", set)))?;
        if score > range.high {
            return Ok(false);
        }
        let member = std::str::from_utf8(member)
            .map_err(|e| DTimerError::Serialization(e.to_string()))?;
        results.push(ScoredMember {
            member: member.to_string(),
            score,
        });
        Ok(!range.limit.is_some_and(|limit| results.len() >= limit))
    })?;

    Ok(results)
}

fn count_prefix<T: Transaction>(txn: &T, db: Database, name: &str) -> Result<usize> {
    let prefix = keys::name_prefix(name);
    let mut count = 0;
    scan_from(txn, db, &prefix, |key| {
        if key.starts_with(&prefix) {
            count += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    })?;
    Ok(count)
}

/// Read-only transaction for the LMDB schedule store
///
/// Enables concurrent reads without blocking writes or other reads.
pub struct LmdbReadTxn<'a> {
    txn: RoTransaction<'a>,
    dbs: Dbs,
}

impl<'a> LmdbReadTxn<'a> {
    pub(crate) fn new(txn: RoTransaction<'a>, dbs: Dbs) -> Self {
        Self { txn, dbs }
    }
}

impl ScheduleRead for LmdbReadTxn<'_> {
    fn score(&self, set: &str, member: &str) -> Result<Option<i64>> {
        read_score(&self.txn, &self.dbs, set, member)
    }

    fn range_by_score(&self, set: &str, range: &ScoreRange) -> Result<Vec<ScoredMember>> {
        read_range(&self.txn, &self.dbs, set, range)
    }

    fn set_len(&self, set: &str) -> Result<usize> {
        count_prefix(&self.txn, self.dbs.set_scores, set)
    }

    fn hash_get(&self, hash: &str, field: &str) -> Result<Option<Vec<u8>>> {
        get_bytes(&self.txn, self.dbs.hashes, &keys::field_key(hash, field))
    }

    fn get_value(&self, key: &str) -> Result<Option<Vec<u8>>> {
        get_bytes(&self.txn, self.dbs.values, key.as_bytes())
    }
}

/// Write transaction for the LMDB schedule store
///
/// LMDB admits one write transaction per environment at a time, which makes
/// every multi-key update through this type linearizable.
pub struct LmdbWriteTxn<'a> {
    txn: Option<RwTransaction<'a>>,
    dbs: Dbs,
}

impl<'a> LmdbWriteTxn<'a> {
    pub(crate) fn new(txn: RwTransaction<'a>, dbs: Dbs) -> Self {
        Self {
            txn: Some(txn),
            dbs,
        }
    }

    fn txn(&self) -> Result<&RwTransaction<'a>> {
        self.txn
            .as_ref()
            .ok_or_else(|| DTimerError::InvalidState("Transaction already committed".into()))
    }

    fn txn_mut(&mut self) -> Result<&mut RwTransaction<'a>> {
        self.txn
            .as_mut()
            .ok_or_else(|| DTimerError::InvalidState("Transaction already committed".into()))
    }

    fn put(&mut self, db: Database, key: &[u8], value: &[u8]) -> Result<()> {
        self.txn_mut()?
            .put(db, &key, &value, WriteFlags::empty())
            .map_err(txn_err)
    }

    fn del(&mut self, db: Database, key: &[u8]) -> Result<bool> {
        match self.txn_mut()?.del(db, &key, None) {
            Ok(()) => Ok(true),
            Err(lmdb::Error::NotFound) => Ok(false),
            Err(e) => Err(txn_err(e)),
        }
    }
}

impl ScheduleRead for LmdbWriteTxn<'_> {
    fn score(&self, set: &str, member: &str) -> Result<Option<i64>> {
        read_score(self.txn()?, &self.dbs, set, member)
    }

    fn range_by_score(&self, set: &str, range: &ScoreRange) -> Result<Vec<ScoredMember>> {
        read_range(self.txn()?, &self.dbs, set, range)
    }

    fn set_len(&self, set: &str) -> Result<usize> {
        count_prefix(self.txn()?, self.dbs.set_scores, set)
    }

    fn hash_get(&self, hash: &str, field: &str) -> Result<Option<Vec<u8>>> {
        get_bytes(self.txn()?, self.dbs.hashes, &keys::field_key(hash, field))
    }

    fn get_value(&self, key: &str) -> Result<Option<Vec<u8>>> {
        get_bytes(self.txn()?, self.dbs.values, key.as_bytes())
    }
}

impl ScheduleTxn for LmdbWriteTxn<'_> {
    fn set_insert(&mut self, set: &str, member: &str, score: i64) -> Result<()> {
        let dbs = self.dbs;
        match self.score(set, member)? {
            Some(existing) if existing == score => return Ok(()),
            Some(existing) => {
                self.del(dbs.set_entries, &keys::entry_key(set, existing, member))?;
            }
            None => {}
        }
        self.put(dbs.set_entries, &keys::entry_key(set, score, member), b"")?;
        self.put(
            dbs.set_scores,
            &keys::field_key(set, member),
            &keys::encode_score(score),
        )
    }

    fn set_remove(&mut self, set: &str, member: &str) -> Result<bool> {
        let dbs = self.dbs;
        let Some(score) = self.score(set, member)? else {
            return Ok(false);
        };
        self.del(dbs.set_entries, &keys::entry_key(set, score, member))?;
        self.del(dbs.set_scores, &keys::field_key(set, member))
    }

    fn hash_put(&mut self, hash: &str, field: &str, value: &[u8]) -> Result<()> {
        let db = self.dbs.hashes;
        self.put(db, &keys::field_key(hash, field), value)
    }

    fn hash_del(&mut self, hash: &str, field: &str) -> Result<bool> {
        let db = self.dbs.hashes;
        self.del(db, &keys::field_key(hash, field))
    }

    fn put_value(&mut self, key: &str, value: &[u8]) -> Result<()> {
        let db = self.dbs.values;
        self.put(db, key.as_bytes(), value)
    }

    fn del_value(&mut self, key: &str) -> Result<bool> {
        let db = self.dbs.values;
        self.del(db, key.as_bytes())
    }

    fn commit(mut self) -> Result<()> {
        let txn = self
            .txn
            .take()
            .ok_or_else(|| DTimerError::InvalidState("Transaction already committed".into()))?;
        txn.commit().map_err(txn_err)
    }

    fn abort(mut self) {
        if let Some(txn) = self.txn.take() {
            txn.abort();
        }
    }
}

impl Drop for LmdbWriteTxn<'_> {
    fn drop(&mut self) {
        // Uncommitted writes are discarded
        if let Some(txn) = self.txn.take() {
            txn.abort();
        }
    }
}
