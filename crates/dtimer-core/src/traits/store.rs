use crate::config::StoreConfig;
use crate::error::Result;
use crate::types::{ScoreRange, ScoredMember};

/// Read access to the schedule store.
///
/// The store offers three structures, each addressed by a string name:
/// score-ordered sets, hashes of byte values, and plain values.
pub trait ScheduleRead {
    /// Score of `member` in `set`, if present
    fn score(&self, set: &str, member: &str) -> Result<Option<i64>>;

    /// Members of `set` whose score lies in `range`, ascending by score and
    /// then by member bytes
    fn range_by_score(&self, set: &str, range: &ScoreRange) -> Result<Vec<ScoredMember>>;

    /// Number of members in `set`
    fn set_len(&self, set: &str) -> Result<usize>;

    fn hash_get(&self, hash: &str, field: &str) -> Result<Option<Vec<u8>>>;

    fn get_value(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Lowest-scored member of `set`
    fn first_by_score(&self, set: &str) -> Result<Option<ScoredMember>> {
        Ok(self
            .range_by_score(set, &ScoreRange::all().with_limit(1))?
            .into_iter()
            .next())
    }
}

/// Write transaction over the schedule store
///
/// All writes become visible atomically on `commit`. Dropping the
/// transaction without committing discards them.
///
/// Note: Not required to be Send, as some backends (LMDB) have thread-affine transactions
pub trait ScheduleTxn: ScheduleRead {
    /// Insert `member` into `set` or move it to a new score
    fn set_insert(&mut self, set: &str, member: &str, score: i64) -> Result<()>;

    /// Remove `member` from `set`, returning whether it was present
    fn set_remove(&mut self, set: &str, member: &str) -> Result<bool>;

    fn hash_put(&mut self, hash: &str, field: &str, value: &[u8]) -> Result<()>;

    /// Remove `field` from `hash`, returning whether it was present
    fn hash_del(&mut self, hash: &str, field: &str) -> Result<bool>;

    fn put_value(&mut self, key: &str, value: &[u8]) -> Result<()>;

    fn del_value(&mut self, key: &str) -> Result<bool>;

    fn commit(self) -> Result<()>;

    fn abort(self);
}

/// Transactional store shared by every node of a schedule
///
/// The store is also the clock authority: all timestamps written into the
/// schedule come from [`ScheduleStore::now_ms`].
pub trait ScheduleStore: Send + Sync + 'static {
    type ReadTxn<'a>: ScheduleRead
    where
        Self: 'a;

    type Txn<'a>: ScheduleTxn
    where
        Self: 'a;

    /// Open the store
    fn open(cfg: StoreConfig) -> Result<Self>
    where
        Self: Sized;

    /// Current time according to the store's clock
    fn now_ms(&self) -> i64;

    fn read_txn(&self) -> Result<Self::ReadTxn<'_>>;

    /// Begin a write transaction
    ///
    /// Write transactions are serialized: at most one is live at a time.
    fn write_txn(&self) -> Result<Self::Txn<'_>>;
}
