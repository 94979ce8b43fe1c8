use dtimer_core::{
    clock::{Clock, SystemClock},
    config::SyncMode,
    error::{DTimerError, Result},
    traits::ScheduleStore,
    StoreConfig,
};
use lmdb::{DatabaseFlags, Environment, EnvironmentFlags};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::keys::db_names;
use crate::txn::{Dbs, LmdbReadTxn, LmdbWriteTxn};

/// LMDB-backed schedule store
///
/// One store instance should exist per environment path per process; nodes
/// in the same process share it through an `Arc`. Separate processes may
/// open the same path concurrently.
pub struct LmdbScheduleStore {
    env: Arc<Environment>,
    dbs: Dbs,
    clock: Arc<dyn Clock>,
    path: PathBuf,
}

impl LmdbScheduleStore {
    /// Open a store whose timestamps come from `clock`
    pub fn open_with_clock(cfg: StoreConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        // Create directory if it doesn't exist
        std::fs::create_dir_all(&cfg.path)?;

        let mut env_builder = Environment::new();
        env_builder.set_max_dbs(4); // set entries, set scores, hashes, values
        env_builder.set_map_size(cfg.map_size);
        env_builder.set_max_readers(cfg.max_readers);

        // Reader slots are tied to transactions, not threads, so reads can be
        // issued from any thread of the blocking pool
        let mut flags = EnvironmentFlags::NO_TLS;
        match cfg.sync_mode {
            SyncMode::Full => {}
            SyncMode::NoMetaSync => {
                flags.insert(EnvironmentFlags::NO_META_SYNC);
            }
            SyncMode::NoSync => {
                flags.insert(EnvironmentFlags::NO_SYNC);
            }
        }
        env_builder.set_flags(flags);

        let env = env_builder
            .open(&cfg.path)
            .map_err(|e| DTimerError::Io(std::io::Error::other(e)))?;

        let create = |name: &str| {
            env.create_db(Some(name), DatabaseFlags::empty())
                .map_err(|e| DTimerError::Transaction(e.to_string()))
        };
        let dbs = Dbs {
            set_entries: create(db_names::SET_ENTRIES)?,
            set_scores: create(db_names::SET_SCORES)?,
            hashes: create(db_names::HASHES)?,
            values: create(db_names::VALUES)?,
        };

        info!(path = %cfg.path.display(), "Opened schedule store");

        Ok(Self {
            env: Arc::new(env),
            dbs,
            clock,
            path: cfg.path,
        })
    }

    /// Path of the environment directory
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ScheduleStore for LmdbScheduleStore {
    type ReadTxn<'a> = LmdbReadTxn<'a>;
    type Txn<'a> = LmdbWriteTxn<'a>;

    fn open(cfg: StoreConfig) -> Result<Self> {
        Self::open_with_clock(cfg, Arc::new(SystemClock))
    }

    fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    fn read_txn(&self) -> Result<LmdbReadTxn<'_>> {
        let txn = self
            .env
            .begin_ro_txn()
            .map_err(|e| DTimerError::Transaction(e.to_string()))?;
        Ok(LmdbReadTxn::new(txn, self.dbs))
    }

    fn write_txn(&self) -> Result<LmdbWriteTxn<'_>> {
        let txn = self
            .env
            .begin_rw_txn()
            .map_err(|e| DTimerError::Transaction(e.to_string()))?;
        Ok(LmdbWriteTxn::new(txn, self.dbs))
    }
}
