//! dtimer core: traits and types shared by the dtimer crates
//!
//! This crate defines the abstractions the scheduling protocol is built on:
//! - Schedule store: score-ordered sets, hashes and plain values behind
//!   serialized multi-key write transactions
//! - Clock authority: the store's notion of "now"
//! - Store configuration with serde defaults
//! - Optional metrics (`observe` feature)

pub mod clock;
pub mod config;
pub mod error;
pub mod observe;
pub mod traits;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{StoreConfig, SyncMode};
pub use error::{DTimerError, Result};
pub use traits::{ScheduleRead, ScheduleStore, ScheduleTxn};
pub use types::{ScoreRange, ScoredMember};
