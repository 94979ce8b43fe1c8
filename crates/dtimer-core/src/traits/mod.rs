pub mod store;

pub use store::{ScheduleRead, ScheduleStore, ScheduleTxn};
